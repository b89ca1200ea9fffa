use std::os::fd::RawFd;

/// Lifecycle of a socket context.
///
/// There is no `Closed` state: the context is removed from the table when the
/// reactor acknowledges the close, so `Closing` is the last state a live
/// context can be observed in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SocketState {
    Active,
    Closing,
}

/// Per-socket binding between an engine fd and a reactor poll handle.
///
/// One exists for every fd the engine has asked the core to watch and has not
/// yet finished un-watching. Lives in the worker's socket table; the table
/// key doubles as the reactor poll token and as the engine's per-socket slot
/// value.
#[derive(Debug)]
pub(crate) struct SocketContext {
    fd: RawFd,
    state: SocketState,
}

impl SocketContext {
    pub(crate) fn new(fd: RawFd) -> Self {
        Self {
            fd,
            state: SocketState::Active,
        }
    }

    pub(crate) fn fd(&self) -> RawFd {
        self.fd
    }

    /// Still watched: readiness events for it get dispatched to the engine.
    pub(crate) fn is_active(&self) -> bool {
        self.state == SocketState::Active
    }

    /// Transition `Active -> Closing`. Returns true on the first call only;
    /// the caller must request the reactor close exactly when this returns
    /// true, which keeps the close single-shot even if the engine repeats a
    /// remove for the same fd.
    pub(crate) fn begin_close(&mut self) -> bool {
        if self.state == SocketState::Active {
            self.state = SocketState::Closing;
            true
        } else {
            false
        }
    }
}
