use crate::srt::client::Client;
use crossbeam::queue::SegQueue;

/// Handoff of accepted, not yet initialized clients from the acceptor to the delivery path.
///
/// Lock-free, so a slow delivery cycle holding the registry lock never stops the acceptor
/// from queueing more connections. A client sits either here or in the registry, never in
/// both.
#[derive(Default)]
pub(crate) struct PendingQueue {
    queue: SegQueue<Client>,
}

impl PendingQueue {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn push(&self, client: Client) {
        self.queue.push(client);
    }

    /// Non-blocking pop, `None` once empty.
    pub(crate) fn try_pop(&self) -> Option<Client> {
        self.queue.pop()
    }

    pub(crate) fn len(&self) -> usize {
        self.queue.len()
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }
}
