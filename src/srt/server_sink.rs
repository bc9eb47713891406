use crate::error::{Error, Result, SetupStage};
use crate::srt::acceptor::{Acceptor, AcceptorExit, Handoff};
use crate::srt::broadcaster::{BackpressurePolicy, Broadcaster};
use crate::srt::chunk::Chunk;
use crate::srt::config::{resolve_address, ServerSinkConfig};
use crate::srt::event::ClientEvent;
use crate::srt::handle::{OwnedPoll, OwnedSocket};
use crate::srt::library::{Library, LibraryGuard};
use crate::srt::sink::ChunkSink;
use crate::srt::stats::ClientStats;
use crate::srt::transport::{AddressFamily, PollEvents, TransportError};
use bytes::Bytes;
use log::{debug, error, info, trace, warn};
use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::thread::JoinHandle;

const STATUS_INIT: usize = 0;
const STATUS_RUN: usize = 1;
const STATUS_END: usize = 2;

/// Network resources held between `start` and `stop`.
struct Running {
    poll: OwnedPoll,
    listener: OwnedSocket,
    local_addr: SocketAddr,
    acceptor: Option<JoinHandle<AcceptorExit>>,
    // Dropped last, after every socket of this sink is closed
    library: LibraryGuard,
}

/// Multi-client SRT sink: listens for connections and fans every rendered chunk out to all
/// of them.
///
/// A background acceptor thread picks up new connections while the caller keeps rendering.
/// Each new client first receives the stream headers (and the cached GOPs, if enabled) and
/// then the live stream, starting with the chunk that was being rendered when it joined.
/// Clients whose send buffer stays above the configured budget for too many chunks in a
/// row are evicted, as is any client whose send fails outright.
///
/// # Example
///
/// ```rust,ignore
/// let library = Library::new(Arc::new(TcpTransport::new()));
/// let sink = ServerSink::new(&library, ServerSinkConfig::new("127.0.0.1:0"));
/// sink.start()?;
/// println!("Listening on {}", sink.local_addr().unwrap());
///
/// let events = sink.subscribe();
/// std::thread::spawn(move || {
///     for event in events {
///         println!("{event:?}");
///     }
/// });
///
/// sink.render(&Chunk::header(pat_pmt))?;
/// sink.render(&Chunk::new(ts_payload))?;
/// sink.stop()?;
/// ```
pub struct ServerSink {
    library: Arc<Library>,
    config: ServerSinkConfig,
    status: AtomicUsize,
    handoff: Arc<Handoff>,
    broadcaster: Mutex<Broadcaster>,
    running: Mutex<Option<Running>>,
}

impl ServerSink {
    /// Creates a server sink that will listen on the configured address once
    /// [`start`](ServerSink::start) is called.
    ///
    /// # Parameters
    ///
    /// * `library` - The transport library shared by every sink of the process.
    /// * `config` - Address and tunables, see [`ServerSinkConfig`].
    pub fn new(library: &Arc<Library>, config: ServerSinkConfig) -> ServerSink {
        let policy = BackpressurePolicy {
            max_send_failures: config.max_send_failures,
            send_buffer_budget: config.send_buffer_budget,
            typical_chunk_size: config.typical_chunk_size,
        };
        ServerSink {
            library: library.clone(),
            broadcaster: Mutex::new(Broadcaster::new(policy, config.gop_limit)),
            config,
            status: AtomicUsize::new(STATUS_INIT),
            handoff: Arc::new(Handoff::default()),
            running: Mutex::new(None),
        }
    }

    pub fn config(&self) -> &ServerSinkConfig {
        &self.config
    }

    /// Returns the actual bound address, useful when listening on port 0.
    ///
    /// `None` unless the sink is running.
    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.lock_running().as_ref().map(|r| r.local_addr)
    }

    pub fn is_running(&self) -> bool {
        self.status.load(Ordering::Acquire) == STATUS_RUN
    }

    /// Returns `true` once [`stop`](ServerSink::stop) has run.
    pub fn is_stopped(&self) -> bool {
        self.status.load(Ordering::Acquire) == STATUS_END
    }

    /// Subscribes to client added/removed notifications.
    ///
    /// The channel is unbounded, so a slow reader never delays the stream. Dropping the
    /// receiver unsubscribes.
    pub fn subscribe(&self) -> crossbeam_channel::Receiver<ClientEvent> {
        self.handoff.events.subscribe()
    }

    /// Registers a callback for client added/removed notifications.
    ///
    /// Callbacks run synchronously on the acceptor thread (added) or the thread calling
    /// `render`/`stop` (removed) and must return quickly. No lock of the sink is held while
    /// they run, so they may query it.
    ///
    /// Stats reflect the last delivery round and never touch the network.
    pub fn on_client_event<F>(&self, callback: F)
    where
        F: Fn(&ClientEvent) + Send + Sync + 'static,
    {
        self.handoff.events.on_event(Arc::new(callback));
    }

    /// Per-client statistics of every active client, as of the last rendered chunk.
    pub fn stats(&self) -> Vec<ClientStats> {
        self.lock_broadcaster().stats()
    }

    pub fn active_clients(&self) -> usize {
        self.lock_broadcaster().len()
    }

    /// Accepted clients that will join on the next rendered chunk.
    pub fn pending_clients(&self) -> usize {
        self.handoff.pending.len()
    }

    pub fn stream_headers(&self) -> Vec<Bytes> {
        self.lock_broadcaster().stream_headers()
    }

    fn lock_running(&self) -> MutexGuard<'_, Option<Running>> {
        self.running.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn lock_broadcaster(&self) -> MutexGuard<'_, Broadcaster> {
        self.broadcaster.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn spawn_acceptor(&self, running: &Running) -> Result<JoinHandle<AcceptorExit>> {
        Acceptor::new(
            running.library.transport().clone(),
            running.listener.id(),
            running.poll.id(),
            self.config.poll_timeout,
            self.config.max_poll_errors,
            self.handoff.clone(),
        )
        .spawn()
        .map_err(|e| {
            error!("Thread[srt-server-acceptor] exited with error: {e}");
            Error::Setup {
                stage: SetupStage::SpawnThread,
                source: TransportError::Io(e),
            }
        })
    }

    /// Opens the listening socket and starts accepting clients.
    ///
    /// Creates, configures, binds and listens on the socket, registers it with a fresh
    /// poll context and spawns the acceptor thread. If any step fails, everything
    /// acquired before it is released again and the failing step is reported.
    ///
    /// # Returns
    ///
    /// * `Ok(())` once the sink is accepting connections.
    /// * [`Error::AlreadyStarted`] if the sink is running.
    /// * [`Error::InvalidAddress`] or [`Error::Setup`] if the socket could not be set up.
    pub fn start(&self) -> Result<()> {
        let mut running = self.lock_running();
        if running.is_some() {
            return Err(Error::AlreadyStarted);
        }

        let address = resolve_address(&self.config.address)?;
        let library = self.library.acquire()?;
        let transport = library.transport().clone();

        let id = transport
            .create(AddressFamily::of(&address))
            .map_err(Error::setup(SetupStage::CreateSocket))?;
        let listener = OwnedSocket::new(id, transport.clone());
        for option in self.config.socket_options() {
            transport
                .set_option(id, option)
                .map_err(Error::setup(SetupStage::Configure))?;
        }

        transport
            .bind(id, address)
            .map_err(Error::setup(SetupStage::Bind))?;
        let local_addr = transport
            .local_addr(id)
            .map_err(Error::setup(SetupStage::Bind))?;
        transport
            .listen(id, self.config.listen_backlog)
            .map_err(Error::setup(SetupStage::Listen))?;

        let mut poll = OwnedPoll::new(
            transport
                .poll_create()
                .map_err(Error::setup(SetupStage::CreatePoll))?,
            transport.clone(),
        );
        poll.add(id, PollEvents::IN)
            .map_err(Error::setup(SetupStage::CreatePoll))?;

        self.handoff.reset();
        let mut state = Running {
            poll,
            listener,
            local_addr,
            acceptor: None,
            library,
        };
        state.acceptor = Some(self.spawn_acceptor(&state)?);

        self.status.store(STATUS_RUN, Ordering::Release);
        info!(
            "SRT server sink listening for connections on {} (actual: {}).",
            self.config.address, local_addr
        );
        *running = Some(state);
        Ok(())
    }

    /// Sends one chunk to every active client, then admits the clients accepted since the
    /// previous chunk.
    ///
    /// A failing client is evicted and reported through a [`ClientEvent::Removed`]; it never
    /// makes this call fail. While unlocked the chunk is dropped.
    ///
    /// # Returns
    ///
    /// * `Ok(())` after the chunk was handled.
    /// * [`Error::NotStarted`] before [`start`](ServerSink::start) or after [`stop`](ServerSink::stop).
    /// * [`Error::ServerBroken`] once the acceptor gave up on the listening socket.
    pub fn render(&self, chunk: &Chunk) -> Result<()> {
        if !self.is_running() {
            return Err(Error::NotStarted);
        }
        if let Some(reason) = self.handoff.broken() {
            return Err(Error::ServerBroken(reason));
        }
        if self.handoff.is_cancelled() {
            trace!("SRT server sink unlocked, dropping chunk of {} bytes", chunk.len());
            return Ok(());
        }

        let report = {
            let mut broadcaster = self.lock_broadcaster();
            // stop() may have emptied the registry while this call waited for the lock
            if !self.is_running() {
                return Err(Error::NotStarted);
            }
            broadcaster.broadcast(chunk, &self.handoff.pending)
        };
        // Observers may call back into the sink
        self.handoff.events.emit_all(report.removed);
        Ok(())
    }

    /// Stops accepting, disconnects every client and closes the listening socket.
    ///
    /// Every active or pending client gets exactly one [`ClientEvent::Removed`]. Calling
    /// `stop` on a sink that is not running does nothing.
    pub fn stop(&self) -> Result<()> {
        let mut guard = self.lock_running();
        let mut running = match guard.take() {
            Some(running) => running,
            None => return Ok(()),
        };

        self.status.store(STATUS_END, Ordering::Release);
        self.handoff.cancel();
        if let Some(acceptor) = running.acceptor.take() {
            let exit = join_acceptor(acceptor);
            debug!("SRT acceptor exited: {:?}", exit);
        }

        let removed = self.lock_broadcaster().shutdown(&self.handoff.pending);

        running.poll.release();
        running.listener.close();
        info!(
            "SRT server sink on {} stopped, {} clients disconnected.",
            running.local_addr,
            removed.len()
        );
        drop(running);
        drop(guard);
        self.handoff.events.emit_all(removed);
        Ok(())
    }

    /// Interrupts the acceptor and makes `render` drop chunks until
    /// [`unlock_stop`](ServerSink::unlock_stop).
    pub fn unlock(&self) -> Result<()> {
        debug!("Unlocking SRT server sink");
        self.handoff.cancel();
        Ok(())
    }

    /// Resumes after [`unlock`](ServerSink::unlock), restarting the acceptor over the same
    /// listening socket.
    pub fn unlock_stop(&self) -> Result<()> {
        let mut running = self.lock_running();
        let running = match running.as_mut() {
            Some(running) => running,
            None => {
                self.handoff.resume();
                return Ok(());
            }
        };
        if !self.handoff.is_cancelled() {
            return Ok(());
        }

        // Still cancelled, so the old acceptor is bound to exit
        let exit = running.acceptor.take().map(join_acceptor);
        self.handoff.resume();
        if matches!(exit, Some(AcceptorExit::GaveUp(_))) || self.handoff.broken().is_some() {
            warn!("SRT acceptor gave up earlier, not restarting it");
            return Ok(());
        }

        match self.spawn_acceptor(running) {
            Ok(acceptor) => {
                running.acceptor = Some(acceptor);
                debug!("SRT server sink resumed");
                Ok(())
            }
            Err(e) => {
                self.handoff.mark_broken(e.to_string());
                Err(e)
            }
        }
    }

    /// Replaces the header chunks sent to every client before the live stream.
    pub fn set_stream_headers(&self, headers: Vec<Bytes>) {
        self.lock_broadcaster().set_stream_headers(headers);
    }
}

fn join_acceptor(handle: JoinHandle<AcceptorExit>) -> AcceptorExit {
    match handle.join() {
        Ok(exit) => exit,
        Err(_) => {
            error!("Thread[srt-server-acceptor] panicked");
            AcceptorExit::GaveUp("acceptor thread panicked".to_string())
        }
    }
}

impl ChunkSink for ServerSink {
    fn start(&self) -> Result<()> {
        ServerSink::start(self)
    }

    fn render(&self, chunk: &Chunk) -> Result<()> {
        ServerSink::render(self, chunk)
    }

    fn stop(&self) -> Result<()> {
        ServerSink::stop(self)
    }

    fn unlock(&self) -> Result<()> {
        ServerSink::unlock(self)
    }

    fn unlock_stop(&self) -> Result<()> {
        ServerSink::unlock_stop(self)
    }

    fn set_stream_headers(&self, headers: Vec<Bytes>) {
        ServerSink::set_stream_headers(self, headers)
    }
}

impl Drop for ServerSink {
    fn drop(&mut self) {
        if let Err(e) = self.stop() {
            warn!("Failed to stop SRT server sink: {e}");
        }
    }
}
