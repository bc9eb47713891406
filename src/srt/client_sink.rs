use crate::error::{Error, Result, SetupStage};
use crate::srt::chunk::Chunk;
use crate::srt::client::{Client, ClientState};
use crate::srt::config::{resolve_address, ClientSinkConfig};
use crate::srt::handle::{OwnedPoll, OwnedSocket};
use crate::srt::library::{Library, LibraryGuard};
use crate::srt::preroll::Preroll;
use crate::srt::sink::ChunkSink;
use crate::srt::stats::ClientStats;
use crate::srt::transport::{AddressFamily, PollEvents, PollOutcome, TransportError};
use bytes::Bytes;
use log::{debug, info, trace, warn};
use std::io;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

const STATUS_INIT: usize = 0;
const STATUS_RUN: usize = 1;
const STATUS_END: usize = 2;

struct Connection {
    poll: OwnedPoll,
    peer: Client,
    headers_sent: bool,
    local_addr: Option<SocketAddr>,
    _library: LibraryGuard,
}

struct Inner {
    preroll: Preroll,
    connection: Option<Connection>,
}

/// Single-peer SRT sink: connects to one remote receiver and sends every chunk to it.
///
/// The stream headers go out ahead of the first chunk, and again after they are replaced.
/// With nobody else to serve, a failed send is reported to the caller as
/// [`Error::PeerLost`].
pub struct ClientSink {
    library: Arc<Library>,
    config: ClientSinkConfig,
    status: AtomicUsize,
    unlocked: AtomicBool,
    inner: Mutex<Inner>,
}

impl ClientSink {
    pub fn new(library: &Arc<Library>, config: ClientSinkConfig) -> ClientSink {
        ClientSink {
            library: library.clone(),
            config,
            status: AtomicUsize::new(STATUS_INIT),
            unlocked: AtomicBool::new(false),
            inner: Mutex::new(Inner {
                preroll: Preroll::new(0),
                connection: None,
            }),
        }
    }

    pub fn config(&self) -> &ClientSinkConfig {
        &self.config
    }

    pub fn is_running(&self) -> bool {
        self.status.load(Ordering::Acquire) == STATUS_RUN
    }

    pub fn peer_address(&self) -> Option<SocketAddr> {
        self.lock().connection.as_ref().map(|c| c.peer.peer_address())
    }

    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.lock().connection.as_ref().and_then(|c| c.local_addr)
    }

    pub fn stats(&self) -> Option<ClientStats> {
        self.lock().connection.as_ref().map(|c| c.peer.stats())
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Connects to the configured peer.
    ///
    /// Creates and configures the socket, registers it for writability, binds it if a local
    /// address is configured and connects. Waits up to the poll timeout for the connection to
    /// become writable. On failure everything acquired so far is released.
    pub fn start(&self) -> Result<()> {
        let mut inner = self.lock();
        if inner.connection.is_some() {
            return Err(Error::AlreadyStarted);
        }

        let address = resolve_address(&self.config.address)?;
        let bind_address = self
            .config
            .bind_address
            .as_deref()
            .map(resolve_address)
            .transpose()?;
        let library = self.library.acquire()?;
        let transport = library.transport().clone();

        let id = transport
            .create(AddressFamily::of(&address))
            .map_err(Error::setup(SetupStage::CreateSocket))?;
        let socket = OwnedSocket::new(id, transport.clone());
        for option in self.config.socket_options() {
            transport
                .set_option(id, option)
                .map_err(Error::setup(SetupStage::Configure))?;
        }

        let mut poll = OwnedPoll::new(
            transport
                .poll_create()
                .map_err(Error::setup(SetupStage::CreatePoll))?,
            transport.clone(),
        );
        poll.add(id, PollEvents::OUT)
            .map_err(Error::setup(SetupStage::CreatePoll))?;

        if let Some(bind_address) = bind_address {
            transport
                .bind(id, bind_address)
                .map_err(Error::setup(SetupStage::Bind))?;
        }
        transport
            .connect(id, address)
            .map_err(Error::setup(SetupStage::Connect))?;
        match transport
            .poll_wait(poll.id(), self.config.poll_timeout)
            .map_err(Error::setup(SetupStage::Connect))?
        {
            PollOutcome::Ready(_) => {}
            PollOutcome::TimedOut => {
                return Err(Error::Setup {
                    stage: SetupStage::Connect,
                    source: TransportError::Io(io::Error::new(
                        io::ErrorKind::TimedOut,
                        format!("{address} did not become writable"),
                    )),
                });
            }
        }

        let local_addr = transport.local_addr(id).ok();
        inner.connection = Some(Connection {
            poll,
            peer: Client::new(socket, address),
            headers_sent: false,
            local_addr,
            _library: library,
        });
        self.unlocked.store(false, Ordering::Release);
        self.status.store(STATUS_RUN, Ordering::Release);
        info!("SRT client sink connected to {}", address);
        Ok(())
    }

    /// Sends one chunk to the peer, preceded by the stream headers if they are still owed.
    pub fn render(&self, chunk: &Chunk) -> Result<()> {
        if !self.is_running() {
            return Err(Error::NotStarted);
        }
        if self.unlocked.load(Ordering::Acquire) {
            trace!("SRT client sink unlocked, dropping chunk of {} bytes", chunk.len());
            return Ok(());
        }

        let mut inner = self.lock();
        let Inner {
            preroll,
            connection,
        } = &mut *inner;
        let connection = connection.as_mut().ok_or(Error::NotStarted)?;

        if !connection.headers_sent && !chunk.is_header() {
            for header in preroll.headers() {
                connection.peer.send(header).map_err(Error::PeerLost)?;
            }
            debug!("Sent {} header chunks to {}", preroll.headers().len(), connection.peer.peer_address());
        }
        connection.headers_sent = true;
        if connection.peer.state() == ClientState::Pending {
            connection.peer.activate();
        }

        connection.peer.send(chunk.data()).map_err(|e| {
            warn!("Send to SRT peer {} failed: {}", connection.peer.peer_address(), e);
            Error::PeerLost(e)
        })?;
        if let Err(e) = connection.peer.refresh_unacknowledged() {
            trace!("Unacknowledged bytes of {} unavailable: {}", connection.peer.id(), e);
        }
        preroll.record(chunk);
        Ok(())
    }

    /// Closes the connection. Calling it again is a no-op.
    pub fn stop(&self) -> Result<()> {
        let mut inner = self.lock();
        let mut connection = match inner.connection.take() {
            Some(connection) => connection,
            None => return Ok(()),
        };
        self.status.store(STATUS_END, Ordering::Release);
        debug!("Closing SRT connection to {}", connection.peer.peer_address());
        connection.poll.release();
        connection.peer.close();
        drop(connection);
        Ok(())
    }

    pub fn unlock(&self) -> Result<()> {
        self.unlocked.store(true, Ordering::Release);
        Ok(())
    }

    pub fn unlock_stop(&self) -> Result<()> {
        self.unlocked.store(false, Ordering::Release);
        Ok(())
    }

    /// Replaces the stream headers; they are sent again ahead of the next chunk.
    pub fn set_stream_headers(&self, headers: Vec<Bytes>) {
        let mut inner = self.lock();
        inner.preroll.set_headers(headers);
        if let Some(connection) = inner.connection.as_mut() {
            connection.headers_sent = false;
        }
    }
}

impl ChunkSink for ClientSink {
    fn start(&self) -> Result<()> {
        ClientSink::start(self)
    }

    fn render(&self, chunk: &Chunk) -> Result<()> {
        ClientSink::render(self, chunk)
    }

    fn stop(&self) -> Result<()> {
        ClientSink::stop(self)
    }

    fn unlock(&self) -> Result<()> {
        ClientSink::unlock(self)
    }

    fn unlock_stop(&self) -> Result<()> {
        ClientSink::unlock_stop(self)
    }

    fn set_stream_headers(&self, headers: Vec<Bytes>) {
        ClientSink::set_stream_headers(self, headers)
    }
}

impl Drop for ClientSink {
    fn drop(&mut self) {
        if let Err(e) = self.stop() {
            warn!("Failed to stop SRT client sink: {e}");
        }
    }
}
