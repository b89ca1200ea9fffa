//! The transfer-engine seam.
//!
//! The engine owns the protocol state machines for many concurrent HTTP
//! transfers; the core only drives it. Everything the engine asks of the
//! core (watch this fd, arm a timer) flows through [`EngineDriver`], a typed
//! boundary standing in for the C-style `user_data` callback registration
//! such engines usually expose.

use std::os::fd::RawFd;
use std::time::Duration;

use thiserror::Error;

use crate::reactor::{Interest, SocketToken};
use crate::request::{Request, TransferStatus};

/// Identity of one in-flight transfer inside the loop's arena.
///
/// The engine stores this in its per-transfer private slot and yields it back
/// on completion; the core maps it to the owning request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TransferId(pub(crate) usize);

impl TransferId {
    /// Raw arena index, stable for the flight's duration.
    pub fn index(self) -> usize {
        self.0
    }
}

/// Errors reported by a transfer engine.
#[derive(Debug, Error)]
pub enum EngineError {
    /// Engine construction failed.
    #[error("engine init: {0}")]
    Init(String),
    /// The engine refused a new transfer.
    #[error("add transfer: {0}")]
    AddRejected(String),
    /// The driver call failed in a way that is not tied to one transfer.
    #[error("engine drive: {0}")]
    Drive(String),
}

/// Socket event bits fed to [`TransferEngine::socket_action`].
///
/// Layout:
/// ```text
/// Bit 0: IN  (fd readable)
/// Bit 1: OUT (fd writable)
/// Bit 2: ERR (error condition on fd)
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EventMask(u8);

impl EventMask {
    pub const NONE: EventMask = EventMask(0);
    pub const IN: EventMask = EventMask(1);
    pub const OUT: EventMask = EventMask(1 << 1);
    pub const ERR: EventMask = EventMask(1 << 2);

    #[inline]
    pub fn contains(self, other: EventMask) -> bool {
        self.0 & other.0 == other.0
    }

    #[inline]
    pub fn is_empty(self) -> bool {
        self.0 == 0
    }
}

impl std::ops::BitOr for EventMask {
    type Output = EventMask;

    fn bitor(self, rhs: EventMask) -> EventMask {
        EventMask(self.0 | rhs.0)
    }
}

impl std::ops::BitOrAssign for EventMask {
    fn bitor_assign(&mut self, rhs: EventMask) {
        self.0 |= rhs.0;
    }
}

/// What a driver call is reacting to: a specific socket, or a timeout.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ActionTarget {
    /// The shared timeout timer fired (or the loop is driving proactively).
    Timeout,
    /// A watched socket became ready.
    Socket(RawFd),
}

/// Outcome of one [`TransferEngine::socket_action`] call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Drive {
    /// The engine made progress and wants to be called again immediately.
    CallAgain,
    /// The engine has settled; completions may now be drained.
    Settled,
}

/// Timer request emitted by the engine through [`EngineDriver::set_timer`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimerRequest {
    /// Call back after this delay.
    After(Duration),
    /// Call back as soon as possible, on the loop thread, after the current
    /// engine call unwinds. Never dispatched recursively from inside the
    /// engine call that requested it.
    Now,
    /// No timer needed.
    Cancel,
}

/// One finished transfer, drained from the engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Completion {
    /// The id the core stashed at `add_transfer` time.
    pub id: TransferId,
    /// Success or the error kind, propagated verbatim to the request.
    pub status: TransferStatus,
}

/// Loop-side services available to the engine while it is being driven.
///
/// Passed to every engine entry point that may need to change what the
/// reactor watches. Calls are only valid for the duration of that entry
/// point; the engine must not stash the reference.
pub trait EngineDriver {
    /// Declare interest in `fd`. `slot` is whatever token this driver
    /// returned for the fd previously (the engine's per-socket slot), or
    /// `None` for an fd the core has not seen. Returns the token the engine
    /// must store and pass back on subsequent calls for this fd. Replaces any
    /// previous interest.
    ///
    /// If the reactor refuses the watch, the core tears it down and drives
    /// the engine with an error event for `fd` after the current call
    /// unwinds, so the engine can fail the affected transfers the same way
    /// it would for any socket error.
    fn update_socket(
        &mut self,
        fd: RawFd,
        interest: Interest,
        slot: Option<SocketToken>,
    ) -> SocketToken;

    /// The engine no longer cares about `fd`. The engine clears its slot;
    /// the core tears the watch down. Unknown or already-closing slots are
    /// ignored.
    fn remove_socket(&mut self, fd: RawFd, slot: Option<SocketToken>);

    /// Adjust the single shared timeout timer. Any previously armed timer is
    /// stopped first, whatever the request.
    fn set_timer(&mut self, request: TimerRequest);
}

/// A multi-transfer HTTP engine, driven by the event loop.
///
/// The engine is constructed on the loop thread and never leaves it. It owns
/// each transfer between `add_transfer` and the completion drain; the core
/// owns the request value itself the whole time, keyed by [`TransferId`].
pub trait TransferEngine {
    /// Take ownership of a new transfer. The request is borrowed for setup
    /// only (url, body, timeout hint); the engine keys all later work off
    /// `id`. May emit socket/timer requests through `driver`.
    ///
    /// On `Err`, the engine must undo any socket watches or timers it
    /// already requested through `driver` before returning: the core's only
    /// follow-up for the failed id is [`remove_transfer`], which has no
    /// driver access, so this call is the last chance to unwind a partial
    /// registration.
    ///
    /// [`remove_transfer`]: TransferEngine::remove_transfer
    fn add_transfer(
        &mut self,
        id: TransferId,
        request: &Request,
        driver: &mut dyn EngineDriver,
    ) -> Result<(), EngineError>;

    /// Release a transfer the core is about to reclaim. Called for every
    /// drained completion before the user callback runs, and also for an id
    /// whose [`add_transfer`] returned `Err`. Implementations must tolerate
    /// an id they never took ownership of.
    ///
    /// [`add_transfer`]: TransferEngine::add_transfer
    fn remove_transfer(&mut self, id: TransferId);

    /// Advance protocol state machines after a socket or timer event. The
    /// core calls this in a loop while it returns [`Drive::CallAgain`].
    fn socket_action(
        &mut self,
        target: ActionTarget,
        events: EventMask,
        driver: &mut dyn EngineDriver,
    ) -> Result<Drive, EngineError>;

    /// Move every finished transfer since the last drain into `out`.
    fn drain_completions(&mut self, out: &mut Vec<Completion>);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mask_bits_combine() {
        let mask = EventMask::IN | EventMask::ERR;
        assert!(mask.contains(EventMask::IN));
        assert!(mask.contains(EventMask::ERR));
        assert!(!mask.contains(EventMask::OUT));
        assert!(!mask.is_empty());
    }

    #[test]
    fn empty_mask_contains_nothing_but_none() {
        assert!(EventMask::NONE.is_empty());
        assert!(EventMask::NONE.contains(EventMask::NONE));
        assert!(!EventMask::NONE.contains(EventMask::IN));
    }

    #[test]
    fn mask_or_assign() {
        let mut mask = EventMask::NONE;
        mask |= EventMask::OUT;
        assert_eq!(mask, EventMask::OUT);
    }
}
