use crate::srt::transport::SocketId;
use std::net::SocketAddr;

/// Snapshot of one active client.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientStats {
    pub id: SocketId,
    pub peer_address: SocketAddr,
    pub consecutive_send_failures: u32,
    /// Chunks handed to the transport, header replay included
    pub chunks_sent: u64,
    pub bytes_sent: u64,
    /// Unacknowledged bytes read during the last delivery round. `None` before the first
    /// round or when the transport could not report it. Reading stats never does I/O.
    pub unacknowledged_bytes: Option<usize>,
}
