// src/srt/tcp/mod.rs - Plain TCP stand-in for an SRT library
//
// Lets the sinks run end to end without a native SRT binding:
// - Listener backlog and readiness via libc::poll (level-triggered)
// - Message-atomic non-blocking sends through a per-connection WriteQueue
// - Unacknowledged bytes = queued bytes + kernel send queue depth
// - No encryption: Passphrase and KeyLength are rejected as unsupported

mod poller;
mod sys;
mod write_queue;

use crate::srt::transport::{
    AddressFamily, PollEvents, PollId, PollOutcome, SocketId, SocketOption, Transport, TransportError,
    TransportResult,
};
use bytes::Bytes;
use dashmap::DashMap;
use log::{debug, trace};
use poller::Registration;
use std::io;
use std::mem;
use std::net::{SocketAddr, TcpListener, TcpStream};
use std::os::unix::io::{AsRawFd, OwnedFd, RawFd};
use std::sync::atomic::{AtomicI32, Ordering};
use std::time::Duration;
use write_queue::{FlushResult, WriteQueue};

enum State {
    /// Created, possibly bound, not yet listening or connected
    Fresh(OwnedFd),
    Listening(TcpListener),
    Connected { stream: TcpStream, queue: WriteQueue },
}

struct TcpSocket {
    state: State,
    /// Last value of each option kind, inherited by accepted connections
    options: Vec<SocketOption>,
}

impl TcpSocket {
    fn new(fd: OwnedFd) -> Self {
        Self {
            state: State::Fresh(fd),
            options: Vec::new(),
        }
    }

    fn raw_fd(&self) -> RawFd {
        match &self.state {
            State::Fresh(fd) => fd.as_raw_fd(),
            State::Listening(listener) => listener.as_raw_fd(),
            State::Connected { stream, .. } => stream.as_raw_fd(),
        }
    }

    fn store(&mut self, option: SocketOption) {
        self.options
            .retain(|o| mem::discriminant(o) != mem::discriminant(&option));
        self.options.push(option);
    }

    fn send_buffer_size(&self) -> Option<usize> {
        self.options.iter().find_map(|o| match o {
            SocketOption::SendBufferSize(size) => Some(*size),
            _ => None,
        })
    }
}

fn in_use(socket: SocketId) -> TransportError {
    TransportError::Io(io::Error::new(
        io::ErrorKind::InvalidInput,
        format!("socket {socket} is already listening or connected"),
    ))
}

fn is_disconnect(e: &io::Error) -> bool {
    matches!(
        e.kind(),
        io::ErrorKind::BrokenPipe
            | io::ErrorKind::ConnectionReset
            | io::ErrorKind::ConnectionAborted
            | io::ErrorKind::NotConnected
    )
}

/// Flushes what the kernel takes now. A gone peer becomes `ConnectionLost`.
fn flush(socket: SocketId, stream: &mut TcpStream, queue: &mut WriteQueue) -> TransportResult<()> {
    match queue.try_flush(stream) {
        Ok(FlushResult::Complete { .. }) | Ok(FlushResult::WouldBlock { .. }) => Ok(()),
        Ok(FlushResult::Closed) => Err(TransportError::ConnectionLost(socket)),
        Err(e) if is_disconnect(&e) => Err(TransportError::ConnectionLost(socket)),
        Err(e) => Err(TransportError::Io(e)),
    }
}

/// [`Transport`] over kernel TCP sockets.
///
/// Every handle is a plain file descriptor kept in a concurrent table, so the acceptor
/// thread and the delivery path can work on different sockets without contending.
pub struct TcpTransport {
    sockets: DashMap<SocketId, TcpSocket>,
    polls: DashMap<PollId, Vec<(SocketId, PollEvents)>>,
    next_socket: AtomicI32,
    next_poll: AtomicI32,
}

impl TcpTransport {
    pub fn new() -> Self {
        Self {
            sockets: DashMap::new(),
            polls: DashMap::new(),
            next_socket: AtomicI32::new(1),
            next_poll: AtomicI32::new(1),
        }
    }

    fn insert(&self, socket: TcpSocket) -> SocketId {
        let id = SocketId(self.next_socket.fetch_add(1, Ordering::Relaxed));
        self.sockets.insert(id, socket);
        id
    }

    /// Removes the entry for a state transition. The caller must put it back.
    fn take(&self, socket: SocketId) -> TransportResult<TcpSocket> {
        self.sockets
            .remove(&socket)
            .map(|(_, entry)| entry)
            .ok_or(TransportError::InvalidSocket(socket))
    }

    fn put(&self, socket: SocketId, entry: TcpSocket) {
        self.sockets.insert(socket, entry);
    }
}

impl Default for TcpTransport {
    fn default() -> Self {
        Self::new()
    }
}

impl Transport for TcpTransport {
    fn create(&self, family: AddressFamily) -> TransportResult<SocketId> {
        let fd = sys::socket(family)?;
        let id = self.insert(TcpSocket::new(fd));
        trace!("tcp: created socket {id}");
        Ok(id)
    }

    fn set_option(&self, socket: SocketId, option: SocketOption) -> TransportResult<()> {
        let mut entry = self
            .sockets
            .get_mut(&socket)
            .ok_or(TransportError::InvalidSocket(socket))?;
        match option {
            SocketOption::Passphrase(_) | SocketOption::KeyLength(_) => {
                return Err(TransportError::Unsupported(option));
            }
            SocketOption::SendBufferSize(size) => sys::set_send_buffer_size(entry.raw_fd(), size)?,
            _ => {}
        }
        entry.store(option);
        Ok(())
    }

    fn bind(&self, socket: SocketId, address: SocketAddr) -> TransportResult<()> {
        let entry = self
            .sockets
            .get(&socket)
            .ok_or(TransportError::InvalidSocket(socket))?;
        let State::Fresh(fd) = &entry.state else {
            return Err(in_use(socket));
        };
        sys::set_reuse_address(fd.as_raw_fd())?;
        sys::bind(fd.as_raw_fd(), &address)?;
        Ok(())
    }

    fn listen(&self, socket: SocketId, backlog: u32) -> TransportResult<()> {
        let TcpSocket { state, options } = self.take(socket)?;
        let fd = match state {
            State::Fresh(fd) => fd,
            state => {
                self.put(socket, TcpSocket { state, options });
                return Err(in_use(socket));
            }
        };
        if let Err(e) = sys::listen(fd.as_raw_fd(), backlog) {
            self.put(socket, TcpSocket { state: State::Fresh(fd), options });
            return Err(e.into());
        }

        let listener = TcpListener::from(fd);
        let result = listener.set_nonblocking(true);
        self.put(
            socket,
            TcpSocket {
                state: State::Listening(listener),
                options,
            },
        );
        result?;
        Ok(())
    }

    fn accept(&self, socket: SocketId) -> TransportResult<(SocketId, SocketAddr)> {
        // The listener guard must be gone before the new entry is inserted, both may
        // live in the same shard.
        let (stream, peer, send_buffer_size, options) = {
            let entry = self
                .sockets
                .get(&socket)
                .ok_or(TransportError::InvalidSocket(socket))?;
            let State::Listening(listener) = &entry.state else {
                return Err(TransportError::NotListening(socket));
            };
            let (stream, peer) = match listener.accept() {
                Ok(accepted) => accepted,
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => return Err(TransportError::WouldBlock),
                Err(e) => return Err(e.into()),
            };
            (stream, peer, entry.send_buffer_size(), entry.options.clone())
        };

        stream.set_nonblocking(true)?;
        stream.set_nodelay(true)?;
        if let Some(size) = send_buffer_size {
            sys::set_send_buffer_size(stream.as_raw_fd(), size)?;
        }

        let id = self.insert(TcpSocket {
            state: State::Connected {
                stream,
                queue: WriteQueue::new(),
            },
            options,
        });
        debug!("tcp: {socket} accepted {id} from {peer}");
        Ok((id, peer))
    }

    fn connect(&self, socket: SocketId, address: SocketAddr) -> TransportResult<()> {
        let TcpSocket { state, options } = self.take(socket)?;
        let fd = match state {
            State::Fresh(fd) => fd,
            state => {
                self.put(socket, TcpSocket { state, options });
                return Err(in_use(socket));
            }
        };
        if let Err(e) = sys::connect(fd.as_raw_fd(), &address) {
            self.put(socket, TcpSocket { state: State::Fresh(fd), options });
            return Err(e.into());
        }

        let stream = TcpStream::from(fd);
        let result = stream
            .set_nonblocking(true)
            .and_then(|_| stream.set_nodelay(true));
        self.put(
            socket,
            TcpSocket {
                state: State::Connected {
                    stream,
                    queue: WriteQueue::new(),
                },
                options,
            },
        );
        result?;
        debug!("tcp: {socket} connected to {address}");
        Ok(())
    }

    fn local_addr(&self, socket: SocketId) -> TransportResult<SocketAddr> {
        let entry = self
            .sockets
            .get(&socket)
            .ok_or(TransportError::InvalidSocket(socket))?;
        let address = match &entry.state {
            State::Fresh(fd) => sys::local_addr(fd.as_raw_fd())?,
            State::Listening(listener) => listener.local_addr()?,
            State::Connected { stream, .. } => stream.local_addr()?,
        };
        Ok(address)
    }

    fn send(&self, socket: SocketId, data: &[u8]) -> TransportResult<()> {
        let mut entry = self
            .sockets
            .get_mut(&socket)
            .ok_or(TransportError::InvalidSocket(socket))?;
        let State::Connected { stream, queue } = &mut entry.state else {
            return Err(TransportError::InvalidSocket(socket));
        };

        // Make room first, a message is queued whole or not at all
        flush(socket, stream, queue)?;
        if !queue.enqueue(Bytes::copy_from_slice(data)) {
            return Err(TransportError::BufferFull(socket));
        }
        flush(socket, stream, queue)
    }

    fn unacknowledged_bytes(&self, socket: SocketId) -> TransportResult<usize> {
        let mut entry = self
            .sockets
            .get_mut(&socket)
            .ok_or(TransportError::InvalidSocket(socket))?;
        match &mut entry.state {
            State::Connected { stream, queue } => {
                flush(socket, stream, queue)?;
                let kernel = sys::unsent_bytes(stream.as_raw_fd())?;
                Ok(queue.pending_bytes() + kernel)
            }
            _ => Ok(0),
        }
    }

    fn close(&self, socket: SocketId) -> TransportResult<()> {
        let entry = self.take(socket)?;
        if let State::Connected { queue, .. } = &entry.state {
            if !queue.is_empty() {
                debug!("tcp: closing {socket} with {} bytes unsent", queue.pending_bytes());
            }
        }
        trace!("tcp: closed socket {socket}");
        Ok(())
    }

    fn poll_create(&self) -> TransportResult<PollId> {
        let id = PollId(self.next_poll.fetch_add(1, Ordering::Relaxed));
        self.polls.insert(id, Vec::new());
        Ok(id)
    }

    fn poll_add(&self, poll: PollId, socket: SocketId, events: PollEvents) -> TransportResult<()> {
        if !self.sockets.contains_key(&socket) {
            return Err(TransportError::InvalidSocket(socket));
        }
        let mut watched = self.polls.get_mut(&poll).ok_or(TransportError::InvalidPoll(poll))?;
        match watched.iter_mut().find(|(id, _)| *id == socket) {
            Some(existing) => existing.1 = events,
            None => watched.push((socket, events)),
        }
        Ok(())
    }

    fn poll_remove(&self, poll: PollId, socket: SocketId) -> TransportResult<()> {
        let mut watched = self.polls.get_mut(&poll).ok_or(TransportError::InvalidPoll(poll))?;
        watched.retain(|(id, _)| *id != socket);
        Ok(())
    }

    fn poll_wait(&self, poll: PollId, timeout: Option<Duration>) -> TransportResult<PollOutcome> {
        let watched = self
            .polls
            .get(&poll)
            .map(|w| w.clone())
            .ok_or(TransportError::InvalidPoll(poll))?;

        // Closed sockets drop out of the wait instead of failing it
        let registrations: Vec<Registration> = watched
            .into_iter()
            .filter_map(|(token, events)| {
                self.sockets.get(&token).map(|entry| Registration {
                    token,
                    fd: entry.raw_fd(),
                    events,
                })
            })
            .collect();

        let ready = poller::wait(&registrations, timeout)?;
        if ready.is_empty() {
            Ok(PollOutcome::TimedOut)
        } else {
            Ok(PollOutcome::Ready(ready))
        }
    }

    fn poll_release(&self, poll: PollId) -> TransportResult<()> {
        self.polls
            .remove(&poll)
            .map(|_| ())
            .ok_or(TransportError::InvalidPoll(poll))
    }
}
