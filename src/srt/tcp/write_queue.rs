// src/srt/tcp/write_queue.rs - Per-connection outgoing queue
//
// Gives the TCP transport SRT-like message semantics on a byte stream:
// - A message is accepted whole or rejected whole, never truncated
// - Partial writes keep their offset and resume on the next flush
// - Queued bytes count as unacknowledged, so backpressure sees them

use bytes::Bytes;
use std::collections::VecDeque;
use std::io::{self, Write};

/// Upper bound of queued bytes per connection
pub(crate) const QUEUE_MAX_BYTES: usize = 4 * 1024 * 1024;

struct WriteEntry {
    data: Bytes,
    offset: usize,
}

impl WriteEntry {
    fn remaining(&self) -> &[u8] {
        &self.data[self.offset..]
    }

    fn advance(&mut self, n: usize) {
        self.offset += n;
    }

    fn is_complete(&self) -> bool {
        self.offset >= self.data.len()
    }
}

#[derive(Debug, PartialEq, Eq)]
pub(crate) enum FlushResult {
    /// Queue drained
    Complete { bytes_written: usize },
    /// The socket stopped accepting data, the rest stays queued
    WouldBlock { bytes_written: usize },
    /// The peer is gone
    Closed,
}

pub(crate) struct WriteQueue {
    queue: VecDeque<WriteEntry>,
    /// Bytes not yet handed to the kernel
    total_bytes: usize,
    max_bytes: usize,
}

impl WriteQueue {
    pub(crate) fn new() -> Self {
        Self::with_limit(QUEUE_MAX_BYTES)
    }

    pub(crate) fn with_limit(max_bytes: usize) -> Self {
        Self {
            queue: VecDeque::with_capacity(64),
            total_bytes: 0,
            max_bytes,
        }
    }

    /// Queues a whole message. Returns `false`, queueing nothing, when it does not fit.
    pub(crate) fn enqueue(&mut self, data: Bytes) -> bool {
        if data.is_empty() {
            return true;
        }
        // Check the limit before adding so a message is never split by rejection
        if self.total_bytes.saturating_add(data.len()) > self.max_bytes {
            return false;
        }
        self.total_bytes += data.len();
        self.queue.push_back(WriteEntry { data, offset: 0 });
        true
    }

    /// Writes as much as the writer takes without blocking.
    pub(crate) fn try_flush<W: Write>(&mut self, writer: &mut W) -> io::Result<FlushResult> {
        let mut bytes_written = 0;

        while let Some(entry) = self.queue.front_mut() {
            match writer.write(entry.remaining()) {
                Ok(0) => return Ok(FlushResult::Closed),
                Ok(n) => {
                    bytes_written += n;
                    self.total_bytes = self.total_bytes.saturating_sub(n);
                    entry.advance(n);
                    if entry.is_complete() {
                        self.queue.pop_front();
                    }
                }
                Err(ref e) if e.kind() == io::ErrorKind::WouldBlock => {
                    return Ok(FlushResult::WouldBlock { bytes_written });
                }
                Err(ref e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(e),
            }
        }

        Ok(FlushResult::Complete { bytes_written })
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }

    pub(crate) fn pending_bytes(&self) -> usize {
        self.total_bytes
    }

    #[cfg(test)]
    fn pending_entries(&self) -> usize {
        self.queue.len()
    }
}

impl Default for WriteQueue {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Takes at most `limit` bytes per call and blocks after `capacity` in total.
    struct ThrottledWriter {
        inner: Vec<u8>,
        limit: usize,
        capacity: usize,
    }

    impl Write for ThrottledWriter {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            let room = self.capacity - self.inner.len();
            if room == 0 {
                return Err(io::Error::from(io::ErrorKind::WouldBlock));
            }
            let n = buf.len().min(self.limit).min(room);
            self.inner.extend_from_slice(&buf[..n]);
            Ok(n)
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    #[test]
    fn test_partial_writes_complete() {
        let mut queue = WriteQueue::new();
        queue.enqueue(Bytes::from_static(b"hello"));
        queue.enqueue(Bytes::from_static(b"world"));

        let mut writer = ThrottledWriter {
            inner: Vec::new(),
            limit: 3,
            capacity: usize::MAX,
        };
        let result = queue.try_flush(&mut writer).unwrap();

        assert_eq!(result, FlushResult::Complete { bytes_written: 10 });
        assert_eq!(writer.inner, b"helloworld");
        assert!(queue.is_empty());
        assert_eq!(queue.pending_bytes(), 0);
    }

    #[test]
    fn test_would_block_keeps_offset() {
        let mut queue = WriteQueue::new();
        queue.enqueue(Bytes::from_static(b"hello"));
        queue.enqueue(Bytes::from_static(b"world"));

        let mut writer = ThrottledWriter {
            inner: Vec::new(),
            limit: usize::MAX,
            capacity: 3,
        };
        let result = queue.try_flush(&mut writer).unwrap();
        assert_eq!(result, FlushResult::WouldBlock { bytes_written: 3 });
        assert_eq!(queue.pending_bytes(), 7);
        assert_eq!(queue.pending_entries(), 2);

        writer.capacity = usize::MAX;
        queue.try_flush(&mut writer).unwrap();
        assert_eq!(writer.inner, b"helloworld");
    }

    #[test]
    fn test_messages_are_all_or_nothing() {
        let mut queue = WriteQueue::with_limit(10);
        assert!(queue.enqueue(Bytes::from_static(b"123456")));
        assert!(!queue.enqueue(Bytes::from_static(b"abcde")));
        assert_eq!(queue.pending_bytes(), 6);
        assert!(queue.enqueue(Bytes::from_static(b"abcd")));
        assert_eq!(queue.pending_bytes(), 10);
    }

    #[test]
    fn test_closed_writer() {
        struct Closed;
        impl Write for Closed {
            fn write(&mut self, _: &[u8]) -> io::Result<usize> {
                Ok(0)
            }
            fn flush(&mut self) -> io::Result<()> {
                Ok(())
            }
        }

        let mut queue = WriteQueue::new();
        queue.enqueue(Bytes::from_static(b"x"));
        assert_eq!(queue.try_flush(&mut Closed).unwrap(), FlushResult::Closed);
    }
}
