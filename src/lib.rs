//! `ez-srt` streams a live feed to any number of concurrently connected clients over a
//! reliable, congestion-controlled datagram transport such as SRT.
//!
//! Although the transport is datagram based, [`ServerSink`](srt::server_sink::ServerSink)
//! behaves like a connection-oriented server: a background acceptor thread picks up new
//! peers, the delivery path folds them in on the next chunk after replaying the stream
//! headers, and clients that stop draining their send buffer are evicted without ever
//! stalling delivery to the healthy ones.
//!
//! ```rust,ignore
//! use ez_srt::srt::{Chunk, ChunkSink, Library, ServerSink, ServerSinkConfig, TcpTransport};
//! use std::sync::Arc;
//!
//! let library = Library::new(Arc::new(TcpTransport::new()));
//! let sink = ServerSink::new(&library, ServerSinkConfig::new("0.0.0.0:7001"));
//! sink.start()?;
//!
//! let events = sink.subscribe();
//! sink.render(&Chunk::header(pat_pmt))?;
//! for packet in ts_packets {
//!     sink.render(&Chunk::new(packet))?;
//! }
//! sink.stop()?;
//! ```

pub mod error;
pub mod srt;

pub use error::{Error, Result};
