// src/srt/preroll.rs - Header/preroll replay cache
//
// A late joiner must see the stream headers (and optionally the frames since the
// last keyframes) before live chunks, or it cannot decode anything until the next
// header repetition.
//
// - Replay snapshots are Arc<[Bytes]>, so handing one to every new client is O(1)
// - Completed GOPs are frozen once, the writing GOP stays a plain Vec
// - Snapshot is rebuilt lazily, only when a client actually joins

use crate::srt::chunk::Chunk;
use bytes::Bytes;
use std::collections::VecDeque;
use std::sync::Arc;

/// Immutable replay sequence, cheap to clone.
pub type PrerollSnapshot = Arc<[Bytes]>;

/// Frozen GOP - immutable, O(1) clone
#[derive(Clone)]
struct FrozenGop {
    chunks: Arc<[Bytes]>,
}

impl FrozenGop {
    fn new(chunks: Vec<Bytes>) -> Self {
        Self {
            chunks: Arc::from(chunks.into_boxed_slice()),
        }
    }

    fn chunks(&self) -> &[Bytes] {
        &self.chunks
    }
}

pub struct Preroll {
    headers: Vec<Bytes>,
    /// Set while consecutive header chunks are arriving
    collecting_headers: bool,
    frozen: VecDeque<FrozenGop>,
    current: Vec<Bytes>,
    gop_limit: usize,
    snapshot: Option<PrerollSnapshot>,
}

impl Default for Preroll {
    fn default() -> Self {
        Self::new(0)
    }
}

impl Preroll {
    /// `gop_limit` = number of GOPs replayed after the headers. 0 replays headers only.
    pub fn new(gop_limit: usize) -> Self {
        Self {
            headers: Vec::new(),
            collecting_headers: false,
            frozen: VecDeque::with_capacity(gop_limit),
            current: Vec::new(),
            gop_limit,
            snapshot: None,
        }
    }

    /// Replaces the header set explicitly.
    pub fn set_headers(&mut self, headers: Vec<Bytes>) {
        self.headers = headers;
        self.collecting_headers = false;
        self.snapshot = None;
    }

    /// Records a chunk after it has been delivered.
    ///
    /// A header chunk following ordinary data starts a new header set, so periodically
    /// repeated headers replace the old ones instead of piling up.
    pub fn record(&mut self, chunk: &Chunk) {
        if chunk.is_header() {
            if !self.collecting_headers {
                self.headers.clear();
                self.collecting_headers = true;
            }
            self.headers.push(chunk.data().clone());
            self.snapshot = None;
            return;
        }
        self.collecting_headers = false;

        if self.gop_limit == 0 {
            return;
        }

        if chunk.is_keyframe() {
            // The writing GOP is complete, freeze it
            if !self.current.is_empty() {
                let chunks = std::mem::take(&mut self.current);
                self.frozen.push_back(FrozenGop::new(chunks));
            }
            // Only the newest gop_limit GOPs are replayed, the writing one included
            while self.frozen.len() >= self.gop_limit {
                self.frozen.pop_front();
            }
        } else if self.current.is_empty() {
            // Nothing decodable before the first keyframe
            return;
        }

        self.current.push(chunk.data().clone());
        self.snapshot = None;
    }

    /// Headers, then cached GOPs oldest first.
    pub fn snapshot(&mut self) -> PrerollSnapshot {
        if let Some(snapshot) = &self.snapshot {
            return snapshot.clone();
        }
        let len = self.headers.len()
            + self.frozen.iter().map(|g| g.chunks().len()).sum::<usize>()
            + self.current.len();
        let mut chunks = Vec::with_capacity(len);
        chunks.extend(self.headers.iter().cloned());
        for gop in &self.frozen {
            chunks.extend(gop.chunks().iter().cloned());
        }
        chunks.extend(self.current.iter().cloned());

        let snapshot: PrerollSnapshot = Arc::from(chunks.into_boxed_slice());
        self.snapshot = Some(snapshot.clone());
        snapshot
    }

    pub fn headers(&self) -> &[Bytes] {
        &self.headers
    }

    pub fn is_empty(&self) -> bool {
        self.headers.is_empty() && self.frozen.is_empty() && self.current.is_empty()
    }

    pub fn gop_caching_enabled(&self) -> bool {
        self.gop_limit > 0
    }

    #[cfg(test)]
    fn frozen_count(&self) -> usize {
        self.frozen.len()
    }
}
