use crate::error::Result;
use crate::srt::chunk::Chunk;
use bytes::Bytes;

/// Something a stream can be rendered into, one chunk at a time.
///
/// Implemented by [`ServerSink`](crate::srt::ServerSink), which fans every chunk out to all
/// connected clients, and by [`ClientSink`](crate::srt::ClientSink), which sends to a single
/// peer it connected to itself. The producer picks one at construction and drives both the
/// same way:
///
/// ```rust,ignore
/// fn pump(sink: &dyn ChunkSink, chunks: impl Iterator<Item = Chunk>) -> ez_srt::Result<()> {
///     sink.start()?;
///     for chunk in chunks {
///         sink.render(&chunk)?;
///     }
///     sink.stop()
/// }
/// ```
pub trait ChunkSink: Send + Sync {
    /// Acquires every network resource. Nothing is left behind when this fails.
    fn start(&self) -> Result<()>;

    /// Delivers one chunk.
    fn render(&self, chunk: &Chunk) -> Result<()>;

    /// Releases every network resource. Calling it again is a no-op.
    fn stop(&self) -> Result<()>;

    /// Interrupts any blocking wait. `render` drops chunks until [`unlock_stop`](ChunkSink::unlock_stop).
    fn unlock(&self) -> Result<()>;

    /// Ends an [`unlock`](ChunkSink::unlock).
    fn unlock_stop(&self) -> Result<()>;

    /// Replaces the stream headers sent ahead of the live stream.
    fn set_stream_headers(&self, headers: Vec<Bytes>);
}
