use crate::error::{Error, Result};
use crate::srt::transport::SocketOption;
use std::net::{SocketAddr, ToSocketAddrs};
use std::time::Duration;

pub const DEFAULT_PORT: u16 = 7001;
/// How many times a send may fail in a row before the client is disconnected
pub const DEFAULT_MAX_SEND_FAILURES: u32 = 10;
/// Recommended size of the send buffer, in bytes
pub const DEFAULT_SEND_BUFFER_BUDGET: usize = 1024 * 1024;
/// 7 MPEG-TS packets, the usual SRT payload
pub const DEFAULT_TYPICAL_CHUNK_SIZE: usize = 1316;
pub const DEFAULT_LISTEN_BACKLOG: u32 = 5;
pub const DEFAULT_LATENCY: Duration = Duration::from_millis(125);
pub const DEFAULT_MAX_POLL_ERRORS: u32 = 50;
pub const DEFAULT_KEY_LENGTH: u32 = 16;

/// Resolves `host:port`. An empty host (`":7001"`) means every IPv4 interface.
pub(crate) fn resolve_address(address: &str) -> Result<SocketAddr> {
    let address = address.trim();
    let resolved = if let Some(port) = address.strip_prefix(':') {
        let port: u16 = port
            .parse()
            .map_err(|_| Error::InvalidAddress(address.to_string()))?;
        Some(SocketAddr::from(([0, 0, 0, 0], port)))
    } else {
        address
            .to_socket_addrs()
            .map_err(|_| Error::InvalidAddress(address.to_string()))?
            .next()
    };
    resolved.ok_or_else(|| Error::InvalidAddress(address.to_string()))
}

/// Tunables of a [`ServerSink`](crate::srt::server_sink::ServerSink).
#[derive(Debug, Clone)]
pub struct ServerSinkConfig {
    pub(crate) address: String,
    pub(crate) listen_backlog: u32,
    pub(crate) max_send_failures: u32,
    pub(crate) send_buffer_budget: usize,
    pub(crate) typical_chunk_size: usize,
    pub(crate) poll_timeout: Option<Duration>,
    pub(crate) max_poll_errors: u32,
    pub(crate) latency: Duration,
    pub(crate) passphrase: Option<String>,
    pub(crate) key_length: u32,
    pub(crate) gop_limit: usize,
}

impl Default for ServerSinkConfig {
    fn default() -> Self {
        Self::new(format!(":{DEFAULT_PORT}"))
    }
}

impl ServerSinkConfig {
    /// Listens on `address` (`host:port`, empty host = any interface).
    pub fn new(address: impl Into<String>) -> Self {
        Self {
            address: address.into(),
            listen_backlog: DEFAULT_LISTEN_BACKLOG,
            max_send_failures: DEFAULT_MAX_SEND_FAILURES,
            send_buffer_budget: DEFAULT_SEND_BUFFER_BUDGET,
            typical_chunk_size: DEFAULT_TYPICAL_CHUNK_SIZE,
            poll_timeout: None,
            max_poll_errors: DEFAULT_MAX_POLL_ERRORS,
            latency: DEFAULT_LATENCY,
            passphrase: None,
            key_length: DEFAULT_KEY_LENGTH,
            gop_limit: 0,
        }
    }

    pub fn set_address(mut self, address: impl Into<String>) -> Self {
        self.address = address.into();
        self
    }

    pub fn set_listen_backlog(mut self, backlog: u32) -> Self {
        self.listen_backlog = backlog;
        self
    }

    /// Consecutive backpressured sends tolerated before a client is evicted.
    ///
    /// Values below 1 are treated as 1.
    pub fn set_max_send_failures(mut self, max_send_failures: u32) -> Self {
        self.max_send_failures = max_send_failures.max(1);
        self
    }

    /// Per-client budget of unacknowledged bytes.
    ///
    /// A client is backpressured when `unacknowledged + typical_chunk_size >= budget`.
    pub fn set_send_buffer_budget(mut self, budget: usize) -> Self {
        self.send_buffer_budget = budget;
        self
    }

    pub fn set_typical_chunk_size(mut self, size: usize) -> Self {
        self.typical_chunk_size = size;
        self
    }

    /// Bound on each acceptor poll. `None` polls indefinitely.
    pub fn set_poll_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.poll_timeout = timeout;
        self
    }

    /// Consecutive poll errors after which the acceptor gives up and the server is
    /// reported broken.
    pub fn set_max_poll_errors(mut self, max_poll_errors: u32) -> Self {
        self.max_poll_errors = max_poll_errors.max(1);
        self
    }

    /// Minimum latency the receiving peers are allowed to use.
    pub fn set_latency(mut self, latency: Duration) -> Self {
        self.latency = latency;
        self
    }

    pub fn set_passphrase(mut self, passphrase: impl Into<String>, key_length: u32) -> Self {
        self.passphrase = Some(passphrase.into());
        self.key_length = key_length;
        self
    }

    /// Number of GOPs replayed to late joiners after the stream headers. 0 replays
    /// headers only.
    pub fn set_gop_limit(mut self, gop_limit: usize) -> Self {
        self.gop_limit = gop_limit;
        self
    }

    pub fn address(&self) -> &str {
        &self.address
    }

    pub fn listen_backlog(&self) -> u32 {
        self.listen_backlog
    }

    pub fn gop_limit(&self) -> usize {
        self.gop_limit
    }

    pub fn max_send_failures(&self) -> u32 {
        self.max_send_failures
    }

    pub fn send_buffer_budget(&self) -> usize {
        self.send_buffer_budget
    }

    pub fn typical_chunk_size(&self) -> usize {
        self.typical_chunk_size
    }

    pub fn poll_timeout(&self) -> Option<Duration> {
        self.poll_timeout
    }

    /// Options applied to the listening socket, inherited by accepted connections.
    pub(crate) fn socket_options(&self) -> Vec<SocketOption> {
        let mut options = vec![
            SocketOption::SendBlocking(false),
            SocketOption::SendBufferSize(self.send_buffer_budget),
            SocketOption::Linger(false),
            SocketOption::MaxBandwidth(0),
            SocketOption::Sender(true),
            SocketOption::PeerLatency(self.latency),
        ];
        push_security(&mut options, self.passphrase.as_deref(), self.key_length);
        options
    }
}

fn push_security(options: &mut Vec<SocketOption>, passphrase: Option<&str>, key_length: u32) {
    if let Some(passphrase) = passphrase {
        options.push(SocketOption::Passphrase(passphrase.to_string()));
        options.push(SocketOption::KeyLength(key_length));
    }
}

/// Tunables of a [`ClientSink`](crate::srt::client_sink::ClientSink).
#[derive(Debug, Clone)]
pub struct ClientSinkConfig {
    pub(crate) address: String,
    pub(crate) bind_address: Option<String>,
    pub(crate) latency: Duration,
    pub(crate) poll_timeout: Option<Duration>,
    pub(crate) passphrase: Option<String>,
    pub(crate) key_length: u32,
}

impl ClientSinkConfig {
    /// Connects to `address` (`host:port`).
    pub fn new(address: impl Into<String>) -> Self {
        Self {
            address: address.into(),
            bind_address: None,
            latency: DEFAULT_LATENCY,
            poll_timeout: None,
            passphrase: None,
            key_length: DEFAULT_KEY_LENGTH,
        }
    }

    /// Local address to bind before connecting.
    pub fn set_bind_address(mut self, address: impl Into<String>) -> Self {
        self.bind_address = Some(address.into());
        self
    }

    pub fn set_latency(mut self, latency: Duration) -> Self {
        self.latency = latency;
        self
    }

    pub fn set_poll_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.poll_timeout = timeout;
        self
    }

    pub fn set_passphrase(mut self, passphrase: impl Into<String>, key_length: u32) -> Self {
        self.passphrase = Some(passphrase.into());
        self.key_length = key_length;
        self
    }

    pub fn address(&self) -> &str {
        &self.address
    }

    pub(crate) fn socket_options(&self) -> Vec<SocketOption> {
        let mut options = vec![
            SocketOption::SendBlocking(false),
            SocketOption::Linger(false),
            SocketOption::Sender(true),
            SocketOption::PeerLatency(self.latency),
        ];
        push_security(&mut options, self.passphrase.as_deref(), self.key_length);
        options
    }
}
