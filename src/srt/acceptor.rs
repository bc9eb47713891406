// src/srt/acceptor.rs - Background connection acceptor
//
// Polls the listening socket and materializes every accepted connection as a
// pending client. It never touches the registry: clients are handed off through
// the lock-free pending queue and picked up by the next broadcast.
//
// The acceptor does not own the listening socket or the poll context, the
// server shutdown sequence releases both after joining this thread.

use crate::srt::client::Client;
use crate::srt::event::EventBus;
use crate::srt::handle::OwnedSocket;
use crate::srt::pending::PendingQueue;
use crate::srt::transport::{PollId, PollOutcome, SocketId, Transport, TransportError};
use log::{debug, error, info, trace, warn};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;
use std::time::Duration;

/// Longest single poll wait, so cancellation is observed promptly.
pub(crate) const CANCEL_CHECK_INTERVAL: Duration = Duration::from_millis(100);
const POLL_ERROR_BACKOFF: Duration = Duration::from_millis(10);
/// First pause after a failed accept, doubled on each further failure up to
/// `CANCEL_CHECK_INTERVAL`.
const ACCEPT_ERROR_BACKOFF: Duration = Duration::from_millis(10);
/// A persistent accept failure is logged at warn level once per this many attempts.
const ACCEPT_ERROR_LOG_EVERY: u32 = 100;

/// State shared between the acceptor thread and the delivery path.
#[derive(Default)]
pub(crate) struct Handoff {
    pub(crate) pending: PendingQueue,
    pub(crate) events: EventBus,
    cancelled: AtomicBool,
    broken: Mutex<Option<String>>,
}

impl Handoff {
    pub(crate) fn cancel(&self) {
        self.cancelled.store(true, Ordering::Release);
    }

    pub(crate) fn resume(&self) {
        self.cancelled.store(false, Ordering::Release);
    }

    pub(crate) fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::Acquire)
    }

    pub(crate) fn mark_broken(&self, reason: String) {
        *self.broken.lock().unwrap_or_else(|e| e.into_inner()) = Some(reason);
    }

    pub(crate) fn broken(&self) -> Option<String> {
        self.broken.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }

    pub(crate) fn reset(&self) {
        self.resume();
        *self.broken.lock().unwrap_or_else(|e| e.into_inner()) = None;
    }
}

/// Why the acceptor loop returned.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum AcceptorExit {
    Cancelled,
    GaveUp(String),
}

pub(crate) struct Acceptor {
    transport: Arc<dyn Transport>,
    listener: SocketId,
    poll: PollId,
    poll_timeout: Option<Duration>,
    max_poll_errors: u32,
    handoff: Arc<Handoff>,
}

impl Acceptor {
    pub(crate) fn new(
        transport: Arc<dyn Transport>,
        listener: SocketId,
        poll: PollId,
        poll_timeout: Option<Duration>,
        max_poll_errors: u32,
        handoff: Arc<Handoff>,
    ) -> Self {
        Self {
            transport,
            listener,
            poll,
            poll_timeout,
            max_poll_errors: max_poll_errors.max(1),
            handoff,
        }
    }

    pub(crate) fn spawn(self) -> std::io::Result<JoinHandle<AcceptorExit>> {
        std::thread::Builder::new()
            .name("srt-server-acceptor".to_string())
            .spawn(move || self.run())
    }

    pub(crate) fn run(self) -> AcceptorExit {
        // The configured timeout bounds every wait, the cancel interval caps it
        let wait = self
            .poll_timeout
            .map_or(CANCEL_CHECK_INTERVAL, |t| t.min(CANCEL_CHECK_INTERVAL));
        let mut poll_errors = 0u32;
        let mut accept_errors = 0u32;
        debug!("SRT acceptor waiting for connections on {}", self.listener);

        loop {
            if self.handoff.is_cancelled() {
                debug!("SRT acceptor cancelled.");
                return AcceptorExit::Cancelled;
            }

            match self.transport.poll_wait(self.poll, Some(wait)) {
                Ok(PollOutcome::TimedOut) => {
                    trace!("SRT acceptor poll timed out");
                    poll_errors = 0;
                }
                Ok(PollOutcome::Ready(ready)) => {
                    poll_errors = 0;
                    if ready.contains(&self.listener) {
                        match self.accept_all() {
                            Ok(()) => {
                                if accept_errors > 0 {
                                    info!("SRT acceptor recovered after {} failed accepts", accept_errors);
                                }
                                accept_errors = 0;
                            }
                            Err(e) => {
                                accept_errors = accept_errors.saturating_add(1);
                                if accept_errors == 1 || accept_errors % ACCEPT_ERROR_LOG_EVERY == 0 {
                                    warn!("Failed to accept SRT client ({} in a row): {}", accept_errors, e);
                                } else {
                                    debug!("Failed to accept SRT client ({} in a row): {}", accept_errors, e);
                                }
                                // The listener stays readable while the backlog is stuck
                                std::thread::sleep(accept_backoff(accept_errors));
                            }
                        }
                    }
                }
                Err(e) => {
                    poll_errors += 1;
                    error!(
                        "SRT acceptor poll failed ({}/{}): {}",
                        poll_errors, self.max_poll_errors, e
                    );
                    if poll_errors >= self.max_poll_errors {
                        let reason = format!("listening socket poll failed {poll_errors} times in a row: {e}");
                        error!("SRT acceptor giving up: {}", reason);
                        self.handoff.mark_broken(reason.clone());
                        return AcceptorExit::GaveUp(reason);
                    }
                    std::thread::sleep(POLL_ERROR_BACKOFF);
                }
            }
        }
    }

    /// Accepts until the backlog is empty, or until the first accept error.
    fn accept_all(&self) -> Result<(), TransportError> {
        loop {
            match self.transport.accept(self.listener) {
                Ok((id, address)) => {
                    let socket = OwnedSocket::new(id, self.transport.clone());
                    info!("Added SRT client {} from {}", id, address);
                    self.handoff.events.added(id, address);
                    self.handoff.pending.push(Client::new(socket, address));
                }
                Err(TransportError::WouldBlock) => return Ok(()),
                // The next poll reports the listener again if more are queued
                Err(e) => return Err(e),
            }
        }
    }
}

fn accept_backoff(consecutive_errors: u32) -> Duration {
    let doublings = consecutive_errors.saturating_sub(1).min(16);
    ACCEPT_ERROR_BACKOFF
        .saturating_mul(1 << doublings)
        .min(CANCEL_CHECK_INTERVAL)
}
