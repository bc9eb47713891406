// src/srt/broadcaster.rs - Client registry and per-chunk fan-out
//
// One call per outgoing chunk, always under the registry lock:
// 1. Every active client first, in registry order (newest at the front)
//    - backpressure is detected from unacknowledged bytes, never by blocking
//    - backpressure only counts, eviction at the failure threshold
//    - a transport send error evicts immediately
// 2. Then the pending queue is drained: header replay, current chunk, promote
//
// Established clients are never delayed behind join storms: the cost of new
// connections is paid after the live chunk reached everyone already active.
//
// Removed clients are closed here, under the lock. Their notifications are
// returned to the caller and must be emitted after the lock is released, so an
// observer may call back into the sink.

use crate::srt::chunk::Chunk;
use crate::srt::client::{Client, ClientState, Delivery};
use crate::srt::event::ClientEvent;
use crate::srt::pending::PendingQueue;
use crate::srt::preroll::Preroll;
use crate::srt::stats::ClientStats;
use crate::srt::transport::SocketId;
use bytes::Bytes;
use log::{debug, info, trace, warn};
use std::collections::VecDeque;

/// Slow-client eviction policy
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct BackpressurePolicy {
    /// Consecutive failed rounds before eviction
    pub max_send_failures: u32,
    /// Unacknowledged bytes allowed per client
    pub send_buffer_budget: usize,
    /// Size assumed for the next chunk when projecting buffer use
    pub typical_chunk_size: usize,
}

impl BackpressurePolicy {
    fn should_evict(&self, client: &Client) -> bool {
        client.consecutive_send_failures() >= self.max_send_failures
    }
}

/// What one broadcast did.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub(crate) struct BroadcastReport {
    pub delivered: usize,
    pub backpressured: usize,
    pub evicted: usize,
    pub promoted: usize,
    pub rejected: usize,
    /// `Removed` notifications owed to observers, in removal order
    pub removed: Vec<ClientEvent>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Removal {
    SendFailed,
    TooManyFailures,
    HeaderReplayFailed,
    Shutdown,
}

/// Closes the client's socket and returns the one removal notification it is owed.
fn remove_client(mut client: Client, reason: Removal) -> ClientEvent {
    match reason {
        Removal::SendFailed => warn!("Removing SRT client {} ({}) after a send error", client.id(), client.peer_address()),
        Removal::TooManyFailures => warn!(
            "Removing SRT client {} ({}) as a result of too many send fails",
            client.id(),
            client.peer_address()
        ),
        Removal::HeaderReplayFailed => warn!(
            "Dropping SRT client {} ({}), sending stream headers failed",
            client.id(),
            client.peer_address()
        ),
        Removal::Shutdown => debug!("Closing SRT client {} ({})", client.id(), client.peer_address()),
    }
    let event = ClientEvent::Removed {
        id: client.id(),
        address: client.peer_address(),
    };
    client.close();
    event
}

/// Registry of active clients plus the preroll they are initialized with.
pub(crate) struct Broadcaster {
    clients: VecDeque<Client>,
    preroll: Preroll,
    policy: BackpressurePolicy,
}

impl Broadcaster {
    pub(crate) fn new(policy: BackpressurePolicy, gop_limit: usize) -> Self {
        Self {
            clients: VecDeque::new(),
            preroll: Preroll::new(gop_limit),
            policy,
        }
    }

    pub(crate) fn len(&self) -> usize {
        self.clients.len()
    }

    pub(crate) fn client_ids(&self) -> Vec<SocketId> {
        self.clients.iter().map(|c| c.id()).collect()
    }

    pub(crate) fn set_stream_headers(&mut self, headers: Vec<Bytes>) {
        debug!("Stream headers replaced ({} chunks)", headers.len());
        self.preroll.set_headers(headers);
    }

    pub(crate) fn stream_headers(&self) -> Vec<Bytes> {
        self.preroll.headers().to_vec()
    }

    /// Delivers `chunk` to every active client, then promotes pending ones.
    pub(crate) fn broadcast(&mut self, chunk: &Chunk, pending: &PendingQueue) -> BroadcastReport {
        let mut report = BroadcastReport::default();
        self.deliver_to_active(chunk, &mut report);
        self.promote_pending(chunk, pending, &mut report);
        // Recorded after delivery so a promoted client never gets this chunk twice
        self.preroll.record(chunk);

        trace!(
            "Chunk of {} bytes: delivered={} backpressured={} evicted={} promoted={} rejected={}",
            chunk.len(),
            report.delivered,
            report.backpressured,
            report.evicted,
            report.promoted,
            report.rejected
        );
        report
    }

    fn deliver_to_active(&mut self, chunk: &Chunk, report: &mut BroadcastReport) {
        let policy = self.policy;
        let mut kept = VecDeque::with_capacity(self.clients.len());

        for mut client in self.clients.drain(..) {
            match client.deliver(chunk.data(), policy.typical_chunk_size, policy.send_buffer_budget) {
                Delivery::Sent => {
                    report.delivered += 1;
                    kept.push_back(client);
                }
                Delivery::Backpressured => {
                    report.backpressured += 1;
                    if policy.should_evict(&client) {
                        report.evicted += 1;
                        report.removed.push(remove_client(client, Removal::TooManyFailures));
                    } else {
                        debug!(
                            "SRT client {} backpressured ({}/{})",
                            client.id(),
                            client.consecutive_send_failures(),
                            policy.max_send_failures
                        );
                        kept.push_back(client);
                    }
                }
                Delivery::Failed(e) => {
                    debug!("Send to SRT client {} failed: {}", client.id(), e);
                    report.evicted += 1;
                    report.removed.push(remove_client(client, Removal::SendFailed));
                }
            }
        }

        self.clients = kept;
    }

    fn promote_pending(&mut self, chunk: &Chunk, pending: &PendingQueue, report: &mut BroadcastReport) {
        if pending.is_empty() {
            return;
        }
        let preroll = self.preroll.snapshot();

        while let Some(mut client) = pending.try_pop() {
            if let Err(e) = client.replay(&preroll) {
                debug!("Header replay to SRT client {} failed: {}", client.id(), e);
                report.rejected += 1;
                report.removed.push(remove_client(client, Removal::HeaderReplayFailed));
                continue;
            }
            trace!("Sent {} header chunks to SRT client {}", preroll.len(), client.id());

            // The chunk in flight, so the new client does not miss it
            if let Err(e) = client.send(chunk.data()) {
                debug!("First chunk to SRT client {} failed: {}", client.id(), e);
                report.rejected += 1;
                report.removed.push(remove_client(client, Removal::HeaderReplayFailed));
                continue;
            }

            client.activate();
            info!("SRT client {} ({}) is now receiving the stream", client.id(), client.peer_address());
            report.promoted += 1;
            self.clients.push_front(client);
        }
    }

    /// Closes every active client and discards every pending one.
    ///
    /// Returns the `Removed` notifications, one per client, for the caller to emit once
    /// the registry lock is released.
    pub(crate) fn shutdown(&mut self, pending: &PendingQueue) -> Vec<ClientEvent> {
        let mut removed = Vec::with_capacity(self.clients.len() + pending.len());
        for client in self.clients.drain(..) {
            removed.push(remove_client(client, Removal::Shutdown));
        }
        while let Some(client) = pending.try_pop() {
            debug_assert_eq!(client.state(), ClientState::Pending);
            removed.push(remove_client(client, Removal::Shutdown));
        }
        removed
    }

    /// Read from each client's cached counters, no transport call.
    pub(crate) fn stats(&self) -> Vec<ClientStats> {
        self.clients.iter().map(Client::stats).collect()
    }
}
