//! The **SRT** module streams an already-muxed live feed (typically MPEG-TS) to remote peers
//! over a reliable, congestion-controlled datagram transport.
//!
//! Two sinks share one lifecycle (`start` → `render`* → `stop`, with `unlock`/`unlock_stop`
//! to interrupt blocking work), exposed through the [`ChunkSink`] trait:
//!
//! - [`ServerSink`]: listens on an address and fans every chunk out to all connected clients.
//! - [`ClientSink`]: connects to one remote listener and pushes every chunk to it.
//!
//! # Architecture
//!
//! The server sink uses two threads:
//! - **Acceptor** (`srt-server-acceptor`): polls the listening socket, accepts every queued
//!   connection and hands it over through a lock-free pending queue.
//! - **Caller**: each `render` delivers the chunk to every active client, then folds the
//!   pending ones in after replaying the stream headers to them.
//!
//! ## Key Components
//!
//! - [`Transport`]: socket-like primitives of the underlying library (SRT binding, or the
//!   bundled [`TcpTransport`](tcp::TcpTransport) with the `tcp` feature)
//! - [`Library`]: reference-counted process-wide startup/cleanup of the transport
//! - `Broadcaster`: client registry, per-chunk fan-out and slow-client eviction
//! - [`Preroll`]: stream headers plus an optional GOP cache replayed to late joiners
//!
//! ## Slow Clients
//!
//! | Condition | Behavior |
//! |-----------|----------|
//! | unacknowledged + typical chunk < budget | Chunk sent, failure counter reset |
//! | unacknowledged + typical chunk ≥ budget | Chunk skipped for that client, counter + 1 |
//! | counter reaches `max_send_failures` | Client evicted |
//! | transport send error | Client evicted immediately |
//!
//! # Example
//!
//! ```rust,ignore
//! let library = Library::new(Arc::new(TcpTransport::new()));
//! let sink = ServerSink::new(&library, ServerSinkConfig::new(":7001").set_gop_limit(1));
//! sink.start()?;
//!
//! sink.on_client_event(|event| match event {
//!     ClientEvent::Added { id, address } => println!("{id} joined from {address}"),
//!     ClientEvent::Removed { id, .. } => println!("{id} left"),
//! });
//!
//! sink.render(&Chunk::header(pat_pmt))?;
//! for packet in ts_packets {
//!     sink.render(&Chunk::new(packet))?;
//! }
//! sink.stop()?;
//! ```

mod acceptor;
mod broadcaster;
pub mod chunk;
mod client;
pub mod client_sink;
pub mod config;
pub mod event;
mod handle;
pub mod library;
mod pending;
pub mod preroll;
pub mod server_sink;
pub mod sink;
pub mod stats;
pub mod transport;

#[cfg(all(feature = "tcp", unix))]
pub mod tcp;

#[cfg(test)]
mod testing;

pub use chunk::Chunk;
pub use client_sink::ClientSink;
pub use config::{
    ClientSinkConfig, ServerSinkConfig, DEFAULT_KEY_LENGTH, DEFAULT_LATENCY, DEFAULT_LISTEN_BACKLOG,
    DEFAULT_MAX_POLL_ERRORS, DEFAULT_MAX_SEND_FAILURES, DEFAULT_PORT, DEFAULT_SEND_BUFFER_BUDGET,
    DEFAULT_TYPICAL_CHUNK_SIZE,
};
pub use event::ClientEvent;
pub use library::{Library, LibraryGuard};
pub use preroll::{Preroll, PrerollSnapshot};
pub use server_sink::ServerSink;
pub use sink::ChunkSink;
pub use stats::ClientStats;
pub use transport::{
    AddressFamily, PollEvents, PollId, PollOutcome, SocketId, SocketOption, Transport, TransportError,
    TransportResult,
};

#[cfg(all(feature = "tcp", unix))]
pub use tcp::TcpTransport;
