use crate::srt::handle::OwnedSocket;
use crate::srt::stats::ClientStats;
use crate::srt::transport::{SocketId, TransportError, TransportResult};
use bytes::Bytes;
use log::debug;
use std::net::SocketAddr;

/// Client lifecycle state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum ClientState {
    /// Accepted, headers not replayed yet
    Pending,
    /// Receiving ordinary chunks
    Active,
}

/// Outcome of one delivery attempt to an active client.
#[derive(Debug)]
pub(crate) enum Delivery {
    Sent,
    /// Unacknowledged data would exceed the send-buffer budget, nothing was sent
    Backpressured,
    /// The transport refused the send, the client is gone
    Failed(TransportError),
}

/// One connected peer.
pub(crate) struct Client {
    socket: OwnedSocket,
    peer_address: SocketAddr,
    state: ClientState,
    consecutive_send_failures: u32,
    chunks_sent: u64,
    bytes_sent: u64,
    /// Last value read from the transport, reused by stats
    last_unacknowledged: Option<usize>,
}

impl Client {
    pub(crate) fn new(socket: OwnedSocket, peer_address: SocketAddr) -> Self {
        debug!("New SRT client {} from {}", socket.id(), peer_address);
        Self {
            socket,
            peer_address,
            state: ClientState::Pending,
            consecutive_send_failures: 0,
            chunks_sent: 0,
            bytes_sent: 0,
            last_unacknowledged: None,
        }
    }

    pub(crate) fn id(&self) -> SocketId {
        self.socket.id()
    }

    pub(crate) fn peer_address(&self) -> SocketAddr {
        self.peer_address
    }

    pub(crate) fn state(&self) -> ClientState {
        self.state
    }

    pub(crate) fn consecutive_send_failures(&self) -> u32 {
        self.consecutive_send_failures
    }

    /// Queries the transport and remembers the answer for [`stats`](Client::stats).
    pub(crate) fn refresh_unacknowledged(&mut self) -> TransportResult<usize> {
        let unacknowledged = self.socket.transport().unacknowledged_bytes(self.socket.id());
        self.last_unacknowledged = unacknowledged.as_ref().ok().copied();
        unacknowledged
    }

    /// Counters as of the last delivery. Never touches the transport.
    pub(crate) fn stats(&self) -> ClientStats {
        ClientStats {
            id: self.id(),
            peer_address: self.peer_address,
            consecutive_send_failures: self.consecutive_send_failures,
            chunks_sent: self.chunks_sent,
            bytes_sent: self.bytes_sent,
            unacknowledged_bytes: self.last_unacknowledged,
        }
    }

    /// Raw send, no backpressure accounting.
    pub(crate) fn send(&mut self, data: &[u8]) -> TransportResult<()> {
        self.socket.send(data)?;
        self.chunks_sent += 1;
        self.bytes_sent += data.len() as u64;
        Ok(())
    }

    /// Replays the header/preroll sequence, stopping at the first failure.
    pub(crate) fn replay(&mut self, preroll: &[Bytes]) -> TransportResult<()> {
        debug_assert_eq!(self.state, ClientState::Pending);
        for data in preroll {
            self.send(data)?;
        }
        Ok(())
    }

    /// Pending -> Active, at most once.
    pub(crate) fn activate(&mut self) {
        debug_assert_eq!(self.state, ClientState::Pending);
        self.state = ClientState::Active;
    }

    /// Delivers a live chunk, checking the unacknowledged-bytes projection first.
    ///
    /// The failure counter is reset on an accepted send and incremented on backpressure.
    pub(crate) fn deliver(&mut self, data: &[u8], projected_chunk_size: usize, budget: usize) -> Delivery {
        let backpressured = match self.refresh_unacknowledged() {
            Ok(unacknowledged) => unacknowledged.saturating_add(projected_chunk_size) >= budget,
            Err(e) => return Delivery::Failed(e),
        };
        if backpressured {
            self.consecutive_send_failures += 1;
            return Delivery::Backpressured;
        }

        match self.send(data) {
            Ok(()) => {
                self.consecutive_send_failures = 0;
                Delivery::Sent
            }
            Err(e) => {
                self.consecutive_send_failures += 1;
                Delivery::Failed(e)
            }
        }
    }

    /// Closes the socket. Safe to call more than once, only the first call reaches
    /// the transport.
    pub(crate) fn close(&mut self) {
        self.socket.close();
    }
}

impl std::fmt::Debug for Client {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Client")
            .field("id", &self.id())
            .field("peer_address", &self.peer_address)
            .field("state", &self.state)
            .field("consecutive_send_failures", &self.consecutive_send_failures)
            .finish()
    }
}
