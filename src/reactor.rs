//! The reactor seam.
//!
//! A reactor watches file descriptors and a single shared timer, and hands
//! the loop thread batches of events to dispatch. The trait is pull-style:
//! the worker blocks in [`Reactor::turn`] and then walks the batch, so every
//! callback in the system runs serialized on one thread.

use std::io;
use std::os::fd::RawFd;
use std::sync::Arc;
use std::time::Duration;

/// Identity of one registered poll handle.
///
/// Chosen by the caller at registration time (the worker uses its socket
/// table key), echoed back in every event for that handle. Also the value
/// the engine stores in its per-socket slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SocketToken(pub usize);

/// Poll interest for one handle. Registering a new interest replaces the
/// previous one.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Interest {
    Readable,
    Writable,
}

/// Readiness flags delivered with [`ReactorEvent::PollReady`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Readiness {
    pub readable: bool,
    pub writable: bool,
    pub error: bool,
}

/// One reactor event, dispatched on the loop thread.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReactorEvent {
    /// The wakeup primitive was signalled (possibly coalescing several
    /// signals into one event).
    Wakeup,
    /// The shared timer expired.
    Timer,
    /// A watched fd is ready.
    PollReady {
        token: SocketToken,
        readiness: Readiness,
    },
    /// Acknowledgment that a poll handle closed via [`Reactor::close`] is
    /// fully retired. The token may be reused after this event.
    PollClosed { token: SocketToken },
    /// Acknowledgment that the wakeup primitive is closed (shutdown).
    WakeupClosed,
    /// Acknowledgment that the shared timer is closed (shutdown).
    TimerClosed,
}

/// Handle for waking the reactor from any thread.
///
/// The only reactor surface foreign threads may touch.
pub trait RemoteWake: Send + Sync {
    /// Schedule one pass of the wakeup event. Signals may coalesce.
    fn wake(&self);
}

/// An I/O reactor driving the event loop.
///
/// Apart from [`Reactor::waker`] handles, a reactor is only ever touched by
/// the loop thread. Ordering guarantees implementations must uphold:
///
/// - Events are delivered in batches and dispatched serially.
/// - A close acknowledgment for a token is delivered strictly after any event
///   already batched for that token, and the token is not reusable until the
///   acknowledgment has been delivered.
/// - After [`Reactor::begin_shutdown`], `WakeupClosed` and `TimerClosed` are
///   each delivered exactly once, and no `Wakeup` or `Timer` event follows
///   its own closure acknowledgment.
pub trait Reactor {
    /// A wakeup handle, signalable from any thread for the life of the loop.
    fn waker(&self) -> Arc<dyn RemoteWake>;

    /// Start watching `fd` under `token`.
    fn register(&mut self, token: SocketToken, fd: RawFd, interest: Interest) -> io::Result<()>;

    /// Replace the interest for an already-registered token.
    fn set_interest(&mut self, token: SocketToken, interest: Interest) -> io::Result<()>;

    /// Stop watching and retire the handle. The handle stays allocated until
    /// the `PollClosed` acknowledgment is delivered; events for it may still
    /// be sitting in an undispatched batch.
    fn close(&mut self, token: SocketToken);

    /// Arm the shared timer to fire once after `after`.
    fn arm_timer(&mut self, after: Duration);

    /// Disarm the shared timer.
    fn stop_timer(&mut self);

    /// Begin closing the wakeup primitive and the shared timer. The
    /// acknowledgments arrive as events on a later turn.
    fn begin_shutdown(&mut self);

    /// Block until at least one event is available and append the batch to
    /// `out`. Called only on the loop thread.
    fn turn(&mut self, out: &mut Vec<ReactorEvent>) -> io::Result<()>;
}
