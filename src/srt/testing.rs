// Scripted in-memory transport for tests.
//
// Models accept backlogs and unacknowledged bytes, scripts send, accept and
// poll failures, and counts every close so double-close and send-after-close
// show up as assertion failures.

use crate::srt::transport::{
    AddressFamily, PollEvents, PollId, PollOutcome, SocketId, SocketOption, Transport,
    TransportError, TransportResult,
};
use bytes::Bytes;
use std::collections::{HashMap, VecDeque};
use std::io;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Condvar, Mutex, MutexGuard};
use std::time::{Duration, Instant};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub(crate) enum Op {
    Create,
    SetOption,
    Bind,
    Listen,
    Connect,
    PollCreate,
    PollAdd,
}

#[derive(Default)]
struct MockSocket {
    bound: Option<SocketAddr>,
    listening: bool,
    incoming: VecDeque<(SocketId, SocketAddr)>,
    peer: Option<SocketAddr>,
    options: Vec<SocketOption>,
    sent: Vec<Bytes>,
    unacknowledged: usize,
    /// Successful sends left before every send fails
    sends_before_failure: Option<usize>,
    unacknowledged_fails: bool,
    unacknowledged_queries: usize,
    close_calls: usize,
    sends_after_close: usize,
}

impl MockSocket {
    fn is_closed(&self) -> bool {
        self.close_calls > 0
    }
}

#[derive(Default)]
struct State {
    next_socket: i32,
    next_poll: i32,
    sockets: HashMap<SocketId, MockSocket>,
    polls: HashMap<PollId, Vec<(SocketId, PollEvents)>>,
    released_polls: usize,
    failing_ops: Vec<Op>,
    poll_errors: usize,
    accept_errors: usize,
    /// Every accept fails and leaves the connection queued
    accept_broken: bool,
    accept_calls: usize,
}

pub(crate) struct MockTransport {
    state: Mutex<State>,
    changed: Condvar,
    startup_calls: AtomicUsize,
    cleanup_calls: AtomicUsize,
    fail_startup: AtomicBool,
}

impl MockTransport {
    pub(crate) fn new() -> Self {
        Self {
            state: Mutex::new(State {
                next_socket: 100,
                next_poll: 1,
                ..Default::default()
            }),
            changed: Condvar::new(),
            startup_calls: AtomicUsize::new(0),
            cleanup_calls: AtomicUsize::new(0),
            fail_startup: AtomicBool::new(false),
        }
    }

    fn lock(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn check(state: &mut State, op: Op) -> TransportResult<()> {
        if let Some(pos) = state.failing_ops.iter().position(|o| *o == op) {
            state.failing_ops.remove(pos);
            return Err(TransportError::Io(io::Error::new(
                io::ErrorKind::Other,
                format!("scripted {op:?} failure"),
            )));
        }
        Ok(())
    }

    // ---- scripting ----

    pub(crate) fn fail_startup(&self, fail: bool) {
        self.fail_startup.store(fail, Ordering::SeqCst);
    }

    /// The next call of `op` fails once.
    pub(crate) fn fail_next(&self, op: Op) {
        self.lock().failing_ops.push(op);
    }

    pub(crate) fn fail_polls(&self, count: usize) {
        self.lock().poll_errors = count;
        self.changed.notify_all();
    }

    pub(crate) fn fail_accepts(&self, count: usize) {
        self.lock().accept_errors = count;
    }

    /// Every accept fails while the queued connection stays pending, so the listener keeps
    /// polling readable. Models a process out of file descriptors.
    pub(crate) fn break_accepts(&self, broken: bool) {
        self.lock().accept_broken = broken;
    }

    /// Queues an inbound connection on the listening socket and returns the id it will be
    /// accepted as.
    pub(crate) fn connect_peer(&self, address: SocketAddr) -> SocketId {
        let mut state = self.lock();
        let id = SocketId(state.next_socket);
        state.next_socket += 1;
        state.sockets.insert(
            id,
            MockSocket {
                peer: Some(address),
                ..Default::default()
            },
        );
        let listener = state
            .sockets
            .iter_mut()
            .find(|(_, s)| s.listening && !s.is_closed())
            .map(|(_, s)| s);
        match listener {
            Some(listener) => listener.incoming.push_back((id, address)),
            None => panic!("no listening socket"),
        }
        drop(state);
        self.changed.notify_all();
        id
    }

    pub(crate) fn set_unacknowledged(&self, socket: SocketId, bytes: usize) {
        if let Some(s) = self.lock().sockets.get_mut(&socket) {
            s.unacknowledged = bytes;
        }
    }

    /// Every unacknowledged-bytes query on `socket` fails.
    pub(crate) fn fail_unacknowledged(&self, socket: SocketId) {
        if let Some(s) = self.lock().sockets.get_mut(&socket) {
            s.unacknowledged_fails = true;
        }
    }

    /// After `successes` more accepted sends, every send on `socket` fails.
    pub(crate) fn fail_sends_after(&self, socket: SocketId, successes: usize) {
        if let Some(s) = self.lock().sockets.get_mut(&socket) {
            s.sends_before_failure = Some(successes);
        }
    }

    // ---- inspection ----

    pub(crate) fn startup_calls(&self) -> usize {
        self.startup_calls.load(Ordering::SeqCst)
    }

    pub(crate) fn cleanup_calls(&self) -> usize {
        self.cleanup_calls.load(Ordering::SeqCst)
    }

    pub(crate) fn sent(&self, socket: SocketId) -> Vec<Bytes> {
        self.lock()
            .sockets
            .get(&socket)
            .map(|s| s.sent.clone())
            .unwrap_or_default()
    }

    pub(crate) fn unacknowledged_queries(&self, socket: SocketId) -> usize {
        self.lock()
            .sockets
            .get(&socket)
            .map(|s| s.unacknowledged_queries)
            .unwrap_or(0)
    }

    pub(crate) fn close_calls(&self, socket: SocketId) -> usize {
        self.lock()
            .sockets
            .get(&socket)
            .map(|s| s.close_calls)
            .unwrap_or(0)
    }

    pub(crate) fn options(&self, socket: SocketId) -> Vec<SocketOption> {
        self.lock()
            .sockets
            .get(&socket)
            .map(|s| s.options.clone())
            .unwrap_or_default()
    }

    /// Sockets created and not closed, accept backlog included.
    pub(crate) fn open_sockets(&self) -> usize {
        self.lock().sockets.values().filter(|s| !s.is_closed()).count()
    }

    pub(crate) fn sockets_created(&self) -> usize {
        self.lock().sockets.len()
    }

    pub(crate) fn double_closes(&self) -> usize {
        self.lock()
            .sockets
            .values()
            .filter(|s| s.close_calls > 1)
            .count()
    }

    pub(crate) fn sends_after_close(&self) -> usize {
        self.lock().sockets.values().map(|s| s.sends_after_close).sum()
    }

    pub(crate) fn live_polls(&self) -> usize {
        self.lock().polls.len()
    }

    pub(crate) fn released_polls(&self) -> usize {
        self.lock().released_polls
    }

    pub(crate) fn accept_calls(&self) -> usize {
        self.lock().accept_calls
    }

    pub(crate) fn listener(&self) -> Option<SocketId> {
        self.lock()
            .sockets
            .iter()
            .find(|(_, s)| s.listening)
            .map(|(id, _)| *id)
    }
}

impl Transport for MockTransport {
    fn startup(&self) -> TransportResult<()> {
        if self.fail_startup.load(Ordering::SeqCst) {
            return Err(TransportError::Io(io::Error::new(
                io::ErrorKind::Other,
                "scripted startup failure",
            )));
        }
        self.startup_calls.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn cleanup(&self) {
        self.cleanup_calls.fetch_add(1, Ordering::SeqCst);
    }

    fn create(&self, _family: AddressFamily) -> TransportResult<SocketId> {
        let mut state = self.lock();
        Self::check(&mut state, Op::Create)?;
        let id = SocketId(state.next_socket);
        state.next_socket += 1;
        state.sockets.insert(id, MockSocket::default());
        Ok(id)
    }

    fn set_option(&self, socket: SocketId, option: SocketOption) -> TransportResult<()> {
        let mut state = self.lock();
        Self::check(&mut state, Op::SetOption)?;
        let s = state
            .sockets
            .get_mut(&socket)
            .ok_or(TransportError::InvalidSocket(socket))?;
        s.options.push(option);
        Ok(())
    }

    fn bind(&self, socket: SocketId, address: SocketAddr) -> TransportResult<()> {
        let mut state = self.lock();
        Self::check(&mut state, Op::Bind)?;
        let s = state
            .sockets
            .get_mut(&socket)
            .ok_or(TransportError::InvalidSocket(socket))?;
        s.bound = Some(address);
        Ok(())
    }

    fn listen(&self, socket: SocketId, _backlog: u32) -> TransportResult<()> {
        let mut state = self.lock();
        Self::check(&mut state, Op::Listen)?;
        let s = state
            .sockets
            .get_mut(&socket)
            .ok_or(TransportError::InvalidSocket(socket))?;
        s.listening = true;
        Ok(())
    }

    fn accept(&self, socket: SocketId) -> TransportResult<(SocketId, SocketAddr)> {
        let mut state = self.lock();
        state.accept_calls += 1;
        if state.accept_broken {
            return Err(TransportError::Io(io::Error::from_raw_os_error(24)));
        }
        if state.accept_errors > 0 {
            state.accept_errors -= 1;
            // A failed accept consumes the connection attempt, like a broken handshake
            if let Some(s) = state.sockets.get_mut(&socket) {
                if let Some((id, _)) = s.incoming.pop_front() {
                    if let Some(peer) = state.sockets.get_mut(&id) {
                        peer.close_calls += 1;
                    }
                }
            }
            return Err(TransportError::Io(io::Error::new(
                io::ErrorKind::ConnectionAborted,
                "scripted accept failure",
            )));
        }
        let s = state
            .sockets
            .get_mut(&socket)
            .ok_or(TransportError::InvalidSocket(socket))?;
        if !s.listening || s.is_closed() {
            return Err(TransportError::NotListening(socket));
        }
        s.incoming.pop_front().ok_or(TransportError::WouldBlock)
    }

    fn connect(&self, socket: SocketId, address: SocketAddr) -> TransportResult<()> {
        let mut state = self.lock();
        Self::check(&mut state, Op::Connect)?;
        let s = state
            .sockets
            .get_mut(&socket)
            .ok_or(TransportError::InvalidSocket(socket))?;
        s.peer = Some(address);
        Ok(())
    }

    fn local_addr(&self, socket: SocketId) -> TransportResult<SocketAddr> {
        let state = self.lock();
        let s = state
            .sockets
            .get(&socket)
            .ok_or(TransportError::InvalidSocket(socket))?;
        s.bound.ok_or(TransportError::InvalidSocket(socket))
    }

    fn send(&self, socket: SocketId, data: &[u8]) -> TransportResult<()> {
        let mut state = self.lock();
        let s = state
            .sockets
            .get_mut(&socket)
            .ok_or(TransportError::InvalidSocket(socket))?;
        if s.is_closed() {
            s.sends_after_close += 1;
            return Err(TransportError::InvalidSocket(socket));
        }
        match s.sends_before_failure {
            Some(0) => return Err(TransportError::ConnectionLost(socket)),
            Some(ref mut left) => *left -= 1,
            None => {}
        }
        s.sent.push(Bytes::copy_from_slice(data));
        Ok(())
    }

    fn unacknowledged_bytes(&self, socket: SocketId) -> TransportResult<usize> {
        let mut state = self.lock();
        let s = state
            .sockets
            .get_mut(&socket)
            .ok_or(TransportError::InvalidSocket(socket))?;
        s.unacknowledged_queries += 1;
        if s.is_closed() {
            return Err(TransportError::InvalidSocket(socket));
        }
        if s.unacknowledged_fails {
            return Err(TransportError::ConnectionLost(socket));
        }
        Ok(s.unacknowledged)
    }

    fn close(&self, socket: SocketId) -> TransportResult<()> {
        let mut state = self.lock();
        let s = state
            .sockets
            .get_mut(&socket)
            .ok_or(TransportError::InvalidSocket(socket))?;
        s.close_calls += 1;
        if s.close_calls > 1 {
            return Err(TransportError::InvalidSocket(socket));
        }
        // Closing a listener drops its unaccepted backlog
        let backlog: Vec<SocketId> = s.incoming.drain(..).map(|(id, _)| id).collect();
        for id in backlog {
            if let Some(peer) = state.sockets.get_mut(&id) {
                peer.close_calls += 1;
            }
        }
        drop(state);
        self.changed.notify_all();
        Ok(())
    }

    fn poll_create(&self) -> TransportResult<PollId> {
        let mut state = self.lock();
        Self::check(&mut state, Op::PollCreate)?;
        let id = PollId(state.next_poll);
        state.next_poll += 1;
        state.polls.insert(id, Vec::new());
        Ok(id)
    }

    fn poll_add(&self, poll: PollId, socket: SocketId, events: PollEvents) -> TransportResult<()> {
        let mut state = self.lock();
        Self::check(&mut state, Op::PollAdd)?;
        state
            .polls
            .get_mut(&poll)
            .ok_or(TransportError::InvalidPoll(poll))?
            .push((socket, events));
        Ok(())
    }

    fn poll_remove(&self, poll: PollId, socket: SocketId) -> TransportResult<()> {
        let mut state = self.lock();
        state
            .polls
            .get_mut(&poll)
            .ok_or(TransportError::InvalidPoll(poll))?
            .retain(|(s, _)| *s != socket);
        Ok(())
    }

    fn poll_wait(&self, poll: PollId, timeout: Option<Duration>) -> TransportResult<PollOutcome> {
        let deadline = timeout.map(|t| Instant::now() + t);
        let mut state = self.lock();
        loop {
            if state.poll_errors > 0 {
                state.poll_errors -= 1;
                return Err(TransportError::Io(io::Error::new(
                    io::ErrorKind::Other,
                    "scripted poll failure",
                )));
            }
            let watched = state
                .polls
                .get(&poll)
                .ok_or(TransportError::InvalidPoll(poll))?;
            let ready: Vec<SocketId> = watched
                .iter()
                .filter(|(id, events)| {
                    state
                        .sockets
                        .get(id)
                        .map(|s| {
                            (events.readable && !s.incoming.is_empty())
                                || (events.writable && s.peer.is_some() && !s.is_closed())
                        })
                        .unwrap_or(false)
                })
                .map(|(id, _)| *id)
                .collect();
            if !ready.is_empty() {
                return Ok(PollOutcome::Ready(ready));
            }
            state = match deadline {
                Some(deadline) => {
                    let now = Instant::now();
                    if now >= deadline {
                        return Ok(PollOutcome::TimedOut);
                    }
                    self.changed
                        .wait_timeout(state, deadline - now)
                        .unwrap_or_else(|e| e.into_inner())
                        .0
                }
                None => self
                    .changed
                    .wait(state)
                    .unwrap_or_else(|e| e.into_inner()),
            };
        }
    }

    fn poll_release(&self, poll: PollId) -> TransportResult<()> {
        let mut state = self.lock();
        state
            .polls
            .remove(&poll)
            .ok_or(TransportError::InvalidPoll(poll))?;
        state.released_polls += 1;
        drop(state);
        self.changed.notify_all();
        Ok(())
    }
}

/// Polls `condition` until it holds, failing the test after five seconds.
pub(crate) fn wait_for(mut condition: impl FnMut() -> bool) {
    let deadline = Instant::now() + Duration::from_secs(5);
    while !condition() {
        assert!(Instant::now() < deadline, "condition not reached in time");
        std::thread::sleep(Duration::from_millis(5));
    }
}
