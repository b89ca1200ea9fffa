//! Default reactor: `poll(2)` over registered fds plus an eventfd wakeup.
//!
//! The shared timer is a deadline folded into the poll timeout, so the whole
//! reactor is one blocking syscall per turn. Close acknowledgments are queued
//! and delivered at the head of the following turn's batch, which is what
//! makes the two-step close of socket contexts safe: a token is never
//! recycled while an event for its previous life could still be dispatched.

use std::io;
use std::os::fd::RawFd;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use crate::reactor::{Interest, Reactor, ReactorEvent, Readiness, RemoteWake, SocketToken};

/// Wakeup handle backed by an eventfd.
///
/// Foreign threads hold clones of this for the life of the loop; the fd is
/// closed when the last clone drops, and writes stop at shutdown via the
/// retired flag, so no write can race the close.
pub(crate) struct EventFdWaker {
    fd: RawFd,
    retired: AtomicBool,
}

impl EventFdWaker {
    fn new() -> io::Result<Self> {
        let fd = unsafe { libc::eventfd(0, libc::EFD_NONBLOCK | libc::EFD_CLOEXEC) };
        if fd < 0 {
            return Err(io::Error::last_os_error());
        }
        Ok(Self {
            fd,
            retired: AtomicBool::new(false),
        })
    }

    fn retire(&self) {
        self.retired.store(true, Ordering::Release);
    }

    fn drain(&self) {
        let mut buf = [0u8; 8];
        unsafe {
            libc::read(self.fd, buf.as_mut_ptr() as *mut libc::c_void, 8);
        }
    }
}

impl RemoteWake for EventFdWaker {
    fn wake(&self) {
        if self.retired.load(Ordering::Acquire) {
            return;
        }
        let val: u64 = 1;
        unsafe {
            libc::write(self.fd, &val as *const u64 as *const libc::c_void, 8);
        }
    }
}

impl Drop for EventFdWaker {
    fn drop(&mut self) {
        unsafe {
            libc::close(self.fd);
        }
    }
}

struct PollEntry {
    fd: RawFd,
    interest: Option<Interest>,
    closing: bool,
}

/// `poll(2)`-based [`Reactor`].
pub struct PollReactor {
    wake: Arc<EventFdWaker>,
    entries: Vec<Option<PollEntry>>,
    timer_deadline: Option<Instant>,
    /// Close acknowledgments staged for the next turn.
    pending: Vec<ReactorEvent>,
    /// Reused poll set; index 0 is the eventfd while the wakeup is open.
    pollfds: Vec<libc::pollfd>,
    /// Tokens parallel to the socket slice of `pollfds`.
    poll_tokens: Vec<SocketToken>,
    shutting_down: bool,
}

impl PollReactor {
    pub fn new() -> io::Result<Self> {
        Ok(Self {
            wake: Arc::new(EventFdWaker::new()?),
            entries: Vec::new(),
            timer_deadline: None,
            pending: Vec::new(),
            pollfds: Vec::new(),
            poll_tokens: Vec::new(),
            shutting_down: false,
        })
    }

    fn entry_mut(&mut self, token: SocketToken) -> Option<&mut PollEntry> {
        self.entries.get_mut(token.0).and_then(Option::as_mut)
    }

    /// Poll timeout in milliseconds: 0 when acknowledgments are staged, the
    /// time to the timer deadline when one is armed, infinite otherwise.
    fn poll_timeout_ms(&self, now: Instant) -> libc::c_int {
        if !self.pending.is_empty() {
            return 0;
        }
        match self.timer_deadline {
            Some(deadline) => {
                let remaining = deadline.saturating_duration_since(now);
                if remaining.is_zero() {
                    0
                } else {
                    // Round up so a sub-millisecond remainder doesn't spin.
                    remaining
                        .as_millis()
                        .saturating_add(1)
                        .min(libc::c_int::MAX as u128) as libc::c_int
                }
            }
            None => -1,
        }
    }
}

impl Reactor for PollReactor {
    fn waker(&self) -> Arc<dyn RemoteWake> {
        self.wake.clone()
    }

    fn register(&mut self, token: SocketToken, fd: RawFd, interest: Interest) -> io::Result<()> {
        if token.0 >= self.entries.len() {
            self.entries.resize_with(token.0 + 1, || None);
        }
        if self.entries[token.0].is_some() {
            return Err(io::Error::new(
                io::ErrorKind::AlreadyExists,
                "poll token already registered",
            ));
        }
        self.entries[token.0] = Some(PollEntry {
            fd,
            interest: Some(interest),
            closing: false,
        });
        Ok(())
    }

    fn set_interest(&mut self, token: SocketToken, interest: Interest) -> io::Result<()> {
        match self.entry_mut(token) {
            Some(entry) if !entry.closing => {
                entry.interest = Some(interest);
                Ok(())
            }
            _ => Err(io::Error::new(
                io::ErrorKind::NotFound,
                "poll token not registered",
            )),
        }
    }

    fn close(&mut self, token: SocketToken) {
        if let Some(entry) = self.entry_mut(token)
            && !entry.closing
        {
            entry.closing = true;
            entry.interest = None;
            self.pending.push(ReactorEvent::PollClosed { token });
        }
    }

    fn arm_timer(&mut self, after: Duration) {
        self.timer_deadline = Some(Instant::now() + after);
    }

    fn stop_timer(&mut self) {
        self.timer_deadline = None;
    }

    fn begin_shutdown(&mut self) {
        if self.shutting_down {
            return;
        }
        self.shutting_down = true;
        self.timer_deadline = None;
        // No further wakes land once the waker is retired, so the eventfd
        // can drop out of the poll set before the acknowledgment goes out.
        self.wake.retire();
        self.pending.push(ReactorEvent::WakeupClosed);
        self.pending.push(ReactorEvent::TimerClosed);
    }

    fn turn(&mut self, out: &mut Vec<ReactorEvent>) -> io::Result<()> {
        let timeout = self.poll_timeout_ms(Instant::now());

        self.pollfds.clear();
        self.poll_tokens.clear();
        if !self.shutting_down {
            self.pollfds.push(libc::pollfd {
                fd: self.wake.fd,
                events: libc::POLLIN,
                revents: 0,
            });
        }
        let wakeup_slots = self.pollfds.len();
        for (index, slot) in self.entries.iter().enumerate() {
            if let Some(entry) = slot
                && let Some(interest) = entry.interest
            {
                let events = match interest {
                    Interest::Readable => libc::POLLIN,
                    Interest::Writable => libc::POLLOUT,
                };
                self.pollfds.push(libc::pollfd {
                    fd: entry.fd,
                    events,
                    revents: 0,
                });
                self.poll_tokens.push(SocketToken(index));
            }
        }

        let ready = loop {
            let rc = unsafe {
                libc::poll(
                    self.pollfds.as_mut_ptr(),
                    self.pollfds.len() as libc::nfds_t,
                    timeout,
                )
            };
            if rc >= 0 {
                break rc;
            }
            let err = io::Error::last_os_error();
            if err.kind() != io::ErrorKind::Interrupted {
                return Err(err);
            }
        };

        // Staged acknowledgments go first; the slots they retire produced no
        // readiness this turn because their interest was already cleared.
        for event in self.pending.drain(..) {
            if let ReactorEvent::PollClosed { token } = event {
                self.entries[token.0] = None;
            }
            out.push(event);
        }

        if let Some(deadline) = self.timer_deadline
            && deadline.saturating_duration_since(Instant::now()).is_zero()
        {
            self.timer_deadline = None;
            out.push(ReactorEvent::Timer);
        }

        if ready > 0 {
            if wakeup_slots == 1 && self.pollfds[0].revents & libc::POLLIN != 0 {
                self.wake.drain();
                out.push(ReactorEvent::Wakeup);
            }
            for (slot, token) in self.pollfds[wakeup_slots..]
                .iter()
                .zip(self.poll_tokens.iter())
            {
                let revents = slot.revents;
                if revents == 0 {
                    continue;
                }
                let readiness = Readiness {
                    readable: revents & libc::POLLIN != 0,
                    writable: revents & libc::POLLOUT != 0,
                    error: revents & (libc::POLLERR | libc::POLLHUP | libc::POLLNVAL) != 0,
                };
                out.push(ReactorEvent::PollReady {
                    token: *token,
                    readiness,
                });
            }
        }

        Ok(())
    }
}
