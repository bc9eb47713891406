use crate::srt::transport::{PollEvents, PollId, SocketId, Transport, TransportError, TransportResult};
use log::warn;
use std::sync::Arc;

/// Transport socket owned by exactly one holder, closed exactly once.
///
/// Closing happens on [`close`](OwnedSocket::close) or, failing that, on drop.
pub(crate) struct OwnedSocket {
    id: SocketId,
    transport: Arc<dyn Transport>,
    closed: bool,
}

impl OwnedSocket {
    pub(crate) fn new(id: SocketId, transport: Arc<dyn Transport>) -> Self {
        Self {
            id,
            transport,
            closed: false,
        }
    }

    pub(crate) fn id(&self) -> SocketId {
        self.id
    }

    pub(crate) fn transport(&self) -> &dyn Transport {
        self.transport.as_ref()
    }

    pub(crate) fn send(&self, data: &[u8]) -> TransportResult<()> {
        if self.closed {
            return Err(TransportError::InvalidSocket(self.id));
        }
        self.transport.send(self.id, data)
    }

    pub(crate) fn close(&mut self) {
        if self.closed {
            return;
        }
        self.closed = true;
        // Close errors are logged, they never block teardown
        if let Err(e) = self.transport.close(self.id) {
            warn!("Failed to close SRT socket {}: {}", self.id, e);
        }
    }
}

impl Drop for OwnedSocket {
    fn drop(&mut self) {
        self.close();
    }
}

/// Poll context released exactly once, after every watched socket was removed from it.
pub(crate) struct OwnedPoll {
    id: PollId,
    transport: Arc<dyn Transport>,
    watched: Vec<SocketId>,
    released: bool,
}

impl OwnedPoll {
    pub(crate) fn new(id: PollId, transport: Arc<dyn Transport>) -> Self {
        Self {
            id,
            transport,
            watched: Vec::new(),
            released: false,
        }
    }

    pub(crate) fn id(&self) -> PollId {
        self.id
    }

    pub(crate) fn add(&mut self, socket: SocketId, events: PollEvents) -> TransportResult<()> {
        self.transport.poll_add(self.id, socket, events)?;
        self.watched.push(socket);
        Ok(())
    }

    pub(crate) fn release(&mut self) {
        if self.released {
            return;
        }
        self.released = true;
        for socket in self.watched.drain(..) {
            if let Err(e) = self.transport.poll_remove(self.id, socket) {
                warn!("Failed to remove SRT socket {} from {}: {}", socket, self.id, e);
            }
        }
        if let Err(e) = self.transport.poll_release(self.id) {
            warn!("Failed to release SRT {}: {}", self.id, e);
        }
    }
}

impl Drop for OwnedPoll {
    fn drop(&mut self) {
        self.release();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::srt::testing::MockTransport;
    use crate::srt::transport::AddressFamily;

    #[test]
    fn test_socket_closed_once() {
        let transport = Arc::new(MockTransport::new());
        let id = transport.create(AddressFamily::Inet).unwrap();
        let mut socket = OwnedSocket::new(id, transport.clone());

        socket.close();
        socket.close();
        assert!(socket.send(b"late").is_err());
        drop(socket);

        assert_eq!(transport.close_calls(id), 1);
        assert_eq!(transport.sends_after_close(), 0);
    }

    #[test]
    fn test_socket_closed_on_drop() {
        let transport = Arc::new(MockTransport::new());
        let id = transport.create(AddressFamily::Inet).unwrap();
        drop(OwnedSocket::new(id, transport.clone()));
        assert_eq!(transport.close_calls(id), 1);
    }

    #[test]
    fn test_poll_released_on_drop() {
        let transport = Arc::new(MockTransport::new());
        let socket = transport.create(AddressFamily::Inet).unwrap();
        let mut poll = OwnedPoll::new(transport.poll_create().unwrap(), transport.clone());
        poll.add(socket, PollEvents::IN).unwrap();
        assert_eq!(transport.live_polls(), 1);

        drop(poll);
        assert_eq!(transport.live_polls(), 0);
        assert_eq!(transport.released_polls(), 1);
    }
}
