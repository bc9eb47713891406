// src/srt/tcp/poller.rs - Level-triggered readiness wait over libc::poll
//
// Level-triggered on purpose: a listener with a non-empty backlog is reported
// on every wait, so an acceptor that stops draining early loses nothing.
// - Stateless: the caller passes the registrations of one wait
// - EINTR auto-retry

use crate::srt::transport::{PollEvents, SocketId};
use std::io;
use std::os::unix::io::RawFd;
use std::time::Duration;

#[derive(Debug, Clone, Copy)]
pub(crate) struct Registration {
    pub token: SocketId,
    pub fd: RawFd,
    pub events: PollEvents,
}

fn interest_to_poll(events: &PollEvents) -> libc::c_short {
    let mut flags: libc::c_short = 0;
    if events.readable {
        flags |= libc::POLLIN;
    }
    if events.writable {
        flags |= libc::POLLOUT;
    }
    flags
}

fn timeout_ms(timeout: Option<Duration>) -> libc::c_int {
    match timeout {
        // Round up so a sub-millisecond timeout does not turn into a busy loop
        Some(d) => d
            .as_millis()
            .max(u128::from(!d.is_zero()))
            .min(libc::c_int::MAX as u128) as libc::c_int,
        None => -1,
    }
}

/// Waits until at least one registration is ready. Returns the ready tokens, empty on
/// timeout. Errors and hang-ups count as ready so the owner finds out on its next call.
pub(crate) fn wait(registrations: &[Registration], timeout: Option<Duration>) -> io::Result<Vec<SocketId>> {
    if registrations.is_empty() {
        if let Some(d) = timeout {
            std::thread::sleep(d);
        }
        return Ok(Vec::new());
    }

    let mut pollfds: Vec<libc::pollfd> = registrations
        .iter()
        .map(|r| libc::pollfd {
            fd: r.fd,
            events: interest_to_poll(&r.events),
            revents: 0,
        })
        .collect();
    let timeout = timeout_ms(timeout);

    loop {
        // SAFETY: poll requires:
        // - pollfds.as_mut_ptr() points to a valid, writable pollfd array
        // - pollfds.len() correctly reports the array length
        // Error is checked immediately
        let ret = unsafe { libc::poll(pollfds.as_mut_ptr(), pollfds.len() as libc::nfds_t, timeout) };
        if ret < 0 {
            let err = io::Error::last_os_error();
            if err.kind() == io::ErrorKind::Interrupted {
                continue;
            }
            return Err(err);
        }

        let ready = registrations
            .iter()
            .zip(pollfds.iter())
            .filter(|(_, pollfd)| pollfd.revents != 0)
            .map(|(r, _)| r.token)
            .collect();
        return Ok(ready);
    }
}
