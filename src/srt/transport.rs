//! The transport collaborator.
//!
//! Connection establishment, encryption, congestion control and retransmission all live
//! behind this trait. The engine only sees opaque socket and poll handles, mirroring the
//! way a native SRT binding exposes `SRTSOCKET` and epoll ids.

use std::fmt;
use std::io;
use std::net::SocketAddr;
use std::time::Duration;

/// Opaque handle of one connection or listening endpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SocketId(pub i32);

impl fmt::Display for SocketId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "@{}", self.0)
    }
}

/// Opaque handle of a readiness polling context.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct PollId(pub i32);

impl fmt::Display for PollId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "poll#{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AddressFamily {
    Inet,
    Inet6,
}

impl AddressFamily {
    pub fn of(address: &SocketAddr) -> AddressFamily {
        match address {
            SocketAddr::V4(_) => AddressFamily::Inet,
            SocketAddr::V6(_) => AddressFamily::Inet6,
        }
    }
}

/// Readiness interest for [`Transport::poll_add`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PollEvents {
    pub readable: bool,
    pub writable: bool,
    pub error: bool,
}

impl PollEvents {
    /// Incoming connections on a listener, or data on a connection.
    pub const IN: PollEvents = PollEvents {
        readable: true,
        writable: false,
        error: true,
    };

    pub const OUT: PollEvents = PollEvents {
        readable: false,
        writable: true,
        error: true,
    };
}

/// Result of a readiness wait. A timeout is an expected outcome, not an error.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PollOutcome {
    Ready(Vec<SocketId>),
    TimedOut,
}

/// Socket options the sinks push down to the transport before binding or connecting.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SocketOption {
    /// `false` makes `send` return immediately instead of waiting for buffer space.
    SendBlocking(bool),
    SendBufferSize(usize),
    Linger(bool),
    /// Marks the socket as the sending side of the stream.
    Sender(bool),
    /// Minimum latency the receiving peer is allowed to use.
    PeerLatency(Duration),
    /// Maximum bandwidth in bytes per second, 0 = relative to input rate.
    MaxBandwidth(i64),
    Passphrase(String),
    KeyLength(u32),
}

#[derive(thiserror::Error, Debug)]
pub enum TransportError {
    #[error("operation would block")]
    WouldBlock,

    #[error("invalid socket {0}")]
    InvalidSocket(SocketId),

    #[error("invalid poll context {0}")]
    InvalidPoll(PollId),

    #[error("socket {0} is not listening")]
    NotListening(SocketId),

    #[error("connection {0} was lost")]
    ConnectionLost(SocketId),

    #[error("send buffer of {0} is full")]
    BufferFull(SocketId),

    #[error("unsupported socket option {0:?}")]
    Unsupported(SocketOption),

    #[error("transport I/O error: {0}")]
    Io(#[from] io::Error),
}

pub type TransportResult<T> = std::result::Result<T, TransportError>;

/// Socket-like primitives of a reliable, non-blocking datagram transport.
///
/// Implementations must be callable from several threads at once: the acceptor polls and
/// accepts on the listening socket while the delivery path sends to client sockets.
pub trait Transport: Send + Sync {
    /// Process-wide library initialization. Called once before the first socket exists.
    fn startup(&self) -> TransportResult<()> {
        Ok(())
    }

    /// Process-wide library teardown. Called once after the last socket is closed.
    fn cleanup(&self) {}

    fn create(&self, family: AddressFamily) -> TransportResult<SocketId>;

    fn set_option(&self, socket: SocketId, option: SocketOption) -> TransportResult<()>;

    fn bind(&self, socket: SocketId, address: SocketAddr) -> TransportResult<()>;

    fn listen(&self, socket: SocketId, backlog: u32) -> TransportResult<()>;

    /// Accepts one pending connection. Returns [`TransportError::WouldBlock`] when none is
    /// queued.
    fn accept(&self, socket: SocketId) -> TransportResult<(SocketId, SocketAddr)>;

    fn connect(&self, socket: SocketId, address: SocketAddr) -> TransportResult<()>;

    fn local_addr(&self, socket: SocketId) -> TransportResult<SocketAddr>;

    /// Sends one whole message without blocking the caller.
    fn send(&self, socket: SocketId, data: &[u8]) -> TransportResult<()>;

    /// Bytes handed to the transport that the peer has not acknowledged yet.
    fn unacknowledged_bytes(&self, socket: SocketId) -> TransportResult<usize>;

    fn close(&self, socket: SocketId) -> TransportResult<()>;

    fn poll_create(&self) -> TransportResult<PollId>;

    fn poll_add(&self, poll: PollId, socket: SocketId, events: PollEvents) -> TransportResult<()>;

    fn poll_remove(&self, poll: PollId, socket: SocketId) -> TransportResult<()>;

    /// Waits for readiness. `None` waits indefinitely.
    fn poll_wait(&self, poll: PollId, timeout: Option<Duration>) -> TransportResult<PollOutcome>;

    fn poll_release(&self, poll: PollId) -> TransportResult<()>;
}
