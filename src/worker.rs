//! The loop thread: reactor turns, engine driving, completion dispatch.

use std::os::fd::RawFd;
use std::sync::Arc;
use std::sync::atomic::Ordering;

use slab::Slab;

use crate::engine::{
    ActionTarget, Completion, Drive, EngineDriver, EventMask, TimerRequest, TransferEngine,
    TransferId,
};
use crate::event_loop::{LoopHandle, STATE_STOPPING, Shared};
use crate::metrics;
use crate::reactor::{Interest, Reactor, ReactorEvent, Readiness, SocketToken};
use crate::request::{Request, TransferStatus};
use crate::socket::SocketContext;

/// A watch request the reactor refused.
///
/// The fd will never produce a readiness event, so the engine is driven with
/// an error event for it after the call that requested the watch unwinds;
/// that lets the engine fail the affected transfers through its normal path.
struct FailedWatch {
    fd: RawFd,
    token: SocketToken,
    /// False when the reactor never accepted the handle at all. No close
    /// acknowledgment will arrive for such a token, so the context is
    /// retired directly once the error drive is done.
    registered: bool,
}

/// Loop-side implementation of [`EngineDriver`], built inline from disjoint
/// worker fields for the duration of one engine call.
struct DriverCtx<'a, R: Reactor> {
    reactor: &'a mut R,
    sockets: &'a mut Slab<SocketContext>,
    pending_check: &'a mut bool,
    failed_watches: &'a mut Vec<FailedWatch>,
}

impl<R: Reactor> EngineDriver for DriverCtx<'_, R> {
    fn update_socket(
        &mut self,
        fd: RawFd,
        interest: Interest,
        slot: Option<SocketToken>,
    ) -> SocketToken {
        if let Some(token) = slot
            && let Some(ctx) = self.sockets.get_mut(token.0)
            && ctx.is_active()
        {
            if self.reactor.set_interest(token, interest).is_err() {
                metrics::SOCKET_REGISTER_FAILURES.increment();
                tracing::warn!(fd, "failed to update poll interest");
                // Leaving the context Active would stall its transfers for
                // good. Tear the watch down and fail the fd back to the
                // engine once this call unwinds.
                if ctx.begin_close() {
                    self.reactor.close(token);
                }
                self.failed_watches.push(FailedWatch {
                    fd,
                    token,
                    registered: true,
                });
            }
            return token;
        }

        let token = SocketToken(self.sockets.insert(SocketContext::new(fd)));
        metrics::SOCKETS_OPENED.increment();
        if self.reactor.register(token, fd, interest).is_err() {
            metrics::SOCKET_REGISTER_FAILURES.increment();
            tracing::warn!(fd, "failed to register socket with reactor");
            self.sockets[token.0].begin_close();
            self.failed_watches.push(FailedWatch {
                fd,
                token,
                registered: false,
            });
        }
        token
    }

    fn remove_socket(&mut self, _fd: RawFd, slot: Option<SocketToken>) {
        if let Some(token) = slot
            && let Some(ctx) = self.sockets.get_mut(token.0)
            && ctx.begin_close()
        {
            self.reactor.close(token);
        }
    }

    fn set_timer(&mut self, request: TimerRequest) {
        // The previous timer is stopped whatever the new request is.
        self.reactor.stop_timer();
        match request {
            TimerRequest::After(after) => self.reactor.arm_timer(after),
            // Deferred to the loop body so the engine call that asked for it
            // fully unwinds first.
            TimerRequest::Now => *self.pending_check = true,
            TimerRequest::Cancel => {}
        }
    }
}

pub(crate) struct Worker<E, R, C> {
    // Field order is drop order: the engine goes before the reactor, because
    // while the loop runs the reactor's close acknowledgments refer back to
    // sockets the engine asked the core to watch.
    engine: E,
    reactor: R,
    /// In-flight requests, keyed by the id the engine stashes per transfer.
    transfers: Slab<Request>,
    /// Socket contexts, keyed by the reactor poll token.
    sockets: Slab<SocketContext>,
    callback: C,
    handle: LoopHandle,
    shared: Arc<Shared>,
    /// Reused reactor event batch.
    events: Vec<ReactorEvent>,
    /// Reused completion drain batch.
    completions: Vec<Completion>,
    /// The engine asked to be driven again after the current call unwinds.
    pending_check: bool,
    /// Watch requests the reactor refused, awaiting an error drive.
    failed_watches: Vec<FailedWatch>,
    close_begun: bool,
}

impl<E, R, C> Worker<E, R, C>
where
    E: TransferEngine,
    R: Reactor,
    C: FnMut(&LoopHandle, Request),
{
    pub(crate) fn new(
        engine: E,
        reactor: R,
        callback: C,
        handle: LoopHandle,
        shared: Arc<Shared>,
        transfer_capacity: usize,
    ) -> Self {
        Self {
            engine,
            reactor,
            transfers: Slab::with_capacity(transfer_capacity),
            sockets: Slab::new(),
            callback,
            handle,
            shared,
            events: Vec::new(),
            completions: Vec::new(),
            pending_check: false,
            failed_watches: Vec::new(),
            close_begun: false,
        }
    }

    /// Run until the shutdown handshake completes. Blocks the loop thread.
    pub(crate) fn run(&mut self) {
        tracing::debug!("event loop running");
        loop {
            self.events.clear();
            if let Err(error) = self.reactor.turn(&mut self.events) {
                tracing::warn!(%error, "reactor turn failed, shutting down");
                self.shared.state.store(STATE_STOPPING, Ordering::Release);
                break;
            }

            for i in 0..self.events.len() {
                let event = self.events[i];
                self.dispatch(event);
            }

            while self.pending_check || !self.failed_watches.is_empty() {
                if let Some(failed) = self.failed_watches.pop() {
                    self.check_actions(ActionTarget::Socket(failed.fd), EventMask::ERR);
                    if !failed.registered && self.sockets.try_remove(failed.token.0).is_some() {
                        metrics::SOCKETS_CLOSED.increment();
                    }
                    continue;
                }
                self.pending_check = false;
                self.check_actions(ActionTarget::Timeout, EventMask::NONE);
            }

            if self.shared.state.load(Ordering::Acquire) >= STATE_STOPPING && !self.close_begun {
                self.close_begun = true;
                self.reactor.stop_timer();
                self.reactor.begin_shutdown();
            }

            if self.close_begun
                && self.shared.wakeup_closed.load(Ordering::Acquire)
                && self.shared.timer_closed.load(Ordering::Acquire)
            {
                break;
            }
        }
        tracing::debug!("event loop exited");
    }

    fn dispatch(&mut self, event: ReactorEvent) {
        match event {
            ReactorEvent::Wakeup => {
                metrics::WAKEUPS.increment();
                self.accept_pending();
            }
            ReactorEvent::Timer => {
                metrics::TIMER_FIRES.increment();
                self.check_actions(ActionTarget::Timeout, EventMask::NONE);
            }
            ReactorEvent::PollReady { token, readiness } => self.socket_ready(token, readiness),
            ReactorEvent::PollClosed { token } => {
                if self.sockets.try_remove(token.0).is_some() {
                    metrics::SOCKETS_CLOSED.increment();
                }
            }
            ReactorEvent::WakeupClosed => {
                self.shared.wakeup_closed.store(true, Ordering::Release);
            }
            ReactorEvent::TimerClosed => {
                self.shared.timer_closed.store(true, Ordering::Release);
            }
        }
    }

    /// Drain the pending queue into the engine.
    fn accept_pending(&mut self) {
        let drained = self.shared.queue.drain();
        if drained.is_empty() {
            return;
        }
        // Bumped together with the drain; a failed add comes back off through
        // the normal completion path below.
        self.shared
            .active
            .fetch_add(drained.len() as u64, Ordering::AcqRel);
        metrics::REQUESTS_ACTIVE.add(drained.len() as i64);

        for request in drained {
            let id = TransferId(self.transfers.insert(request));
            let mut ctx = DriverCtx {
                reactor: &mut self.reactor,
                sockets: &mut self.sockets,
                pending_check: &mut self.pending_check,
                failed_watches: &mut self.failed_watches,
            };
            if let Err(error) = self.engine.add_transfer(id, &self.transfers[id.0], &mut ctx) {
                metrics::ENGINE_ERRORS.increment();
                tracing::warn!(%error, url = self.transfers[id.0].url(), "engine rejected transfer");
                self.finish(Completion {
                    id,
                    status: TransferStatus::Error,
                });
            }
        }
    }

    /// Translate reactor readiness into engine event bits and drive.
    fn socket_ready(&mut self, token: SocketToken, readiness: Readiness) {
        let Some(ctx) = self.sockets.get(token.0) else {
            return;
        };
        if !ctx.is_active() {
            // Close already requested; late readiness for the old life of
            // this handle is dropped on the floor.
            return;
        }
        let fd = ctx.fd();

        let mut events = EventMask::NONE;
        if readiness.readable {
            events |= EventMask::IN;
        }
        if readiness.writable {
            events |= EventMask::OUT;
        }
        if readiness.error {
            events |= EventMask::ERR;
        }

        self.check_actions(ActionTarget::Socket(fd), events);
    }

    /// The engine driver entrypoint: advance state machines until the engine
    /// settles, then reap everything it finished.
    fn check_actions(&mut self, target: ActionTarget, events: EventMask) {
        loop {
            let mut ctx = DriverCtx {
                reactor: &mut self.reactor,
                sockets: &mut self.sockets,
                pending_check: &mut self.pending_check,
                failed_watches: &mut self.failed_watches,
            };
            match self.engine.socket_action(target, events, &mut ctx) {
                Ok(Drive::CallAgain) => continue,
                Ok(Drive::Settled) => break,
                Err(error) => {
                    metrics::ENGINE_ERRORS.increment();
                    tracing::warn!(%error, "engine socket_action failed");
                    break;
                }
            }
        }

        self.completions.clear();
        self.engine.drain_completions(&mut self.completions);
        for i in 0..self.completions.len() {
            let done = self.completions[i];
            self.finish(done);
        }
    }

    /// Completion dispatch for one finished transfer.
    fn finish(&mut self, done: Completion) {
        self.engine.remove_transfer(done.id);
        let Some(mut request) = self.transfers.try_remove(done.id.0) else {
            return;
        };
        request.set_status(done.status);
        metrics::REQUESTS_COMPLETED.increment();
        if !done.status.is_success() {
            metrics::REQUESTS_FAILED.increment();
        }
        (self.callback)(&self.handle, request);
        // After the callback, so a completion may observe itself in the
        // active count.
        self.shared.active.fetch_sub(1, Ordering::AcqRel);
        metrics::REQUESTS_ACTIVE.sub(1);
    }
}
