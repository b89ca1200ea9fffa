//! The public face of the runtime: loop construction, submission, shutdown.

use std::io;
use std::sync::atomic::{AtomicBool, AtomicU8, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::{Duration, Instant};

use crate::config::Config;
use crate::engine::{EngineError, TransferEngine};
use crate::error::Error;
use crate::metrics;
use crate::poller::PollReactor;
use crate::queue::PendingQueue;
use crate::reactor::{Reactor, RemoteWake};
use crate::request::Request;
use crate::worker::Worker;

pub(crate) const STATE_RUNNING: u8 = 0;
pub(crate) const STATE_STOPPING: u8 = 1;
pub(crate) const STATE_STOPPED: u8 = 2;

const SHUTDOWN_SPIN: Duration = Duration::from_millis(1);

/// State shared between producer threads and the loop thread.
pub(crate) struct Shared {
    pub(crate) queue: PendingQueue,
    /// Requests owned by the engine plus the queue length as of the last
    /// drain. Bumped with each drain, decremented as completions deliver.
    pub(crate) active: AtomicU64,
    /// True while the worker is inside its run loop.
    pub(crate) running: AtomicBool,
    /// RUNNING -> STOPPING -> STOPPED.
    pub(crate) state: AtomicU8,
    /// Reactor acknowledged the wakeup handle closure.
    pub(crate) wakeup_closed: AtomicBool,
    /// Reactor acknowledged the timer handle closure.
    pub(crate) timer_closed: AtomicBool,
    max_in_flight: u64,
}

/// Publishes the flags `stop()` spin-waits on whenever the loop thread
/// exits, including when a panic in the engine or a user callback unwinds
/// the worker. A panicking callback must not leave `stop()` waiting forever.
struct ShutdownGuard(Arc<Shared>);

impl Drop for ShutdownGuard {
    fn drop(&mut self) {
        self.0.wakeup_closed.store(true, Ordering::Release);
        self.0.timer_closed.store(true, Ordering::Release);
        self.0.running.store(false, Ordering::Release);
    }
}

impl Shared {
    fn new(config: &Config) -> Self {
        Self {
            queue: PendingQueue::with_capacity(config.pending_capacity),
            active: AtomicU64::new(0),
            running: AtomicBool::new(false),
            state: AtomicU8::new(STATE_RUNNING),
            wakeup_closed: AtomicBool::new(false),
            timer_closed: AtomicBool::new(false),
            max_in_flight: config.max_in_flight as u64,
        }
    }

    /// First caller transitions RUNNING -> STOPPING and gets true.
    fn request_stop(&self) -> bool {
        self.state
            .compare_exchange(
                STATE_RUNNING,
                STATE_STOPPING,
                Ordering::AcqRel,
                Ordering::Acquire,
            )
            .is_ok()
    }
}

/// Cheap, cloneable entry point into a running loop.
///
/// Safe to use from any thread, including from inside the completion
/// callback on the loop thread itself: every operation here touches only the
/// queue mutex, the wakeup primitive, and atomic snapshots.
#[derive(Clone)]
pub struct LoopHandle {
    shared: Arc<Shared>,
    waker: Arc<dyn RemoteWake>,
}

impl LoopHandle {
    /// Queue a request for execution.
    ///
    /// Runs [`Request::prepare_for_perform`] on the calling thread so no
    /// blocking setup lands on the loop, then stages the request and wakes
    /// the loop. Completion arrives through the loop's callback, in engine
    /// completion order (not submission order).
    pub fn submit(&self, mut request: Request) -> Result<(), Error> {
        if !self.is_running() {
            return Err(Error::NotRunning);
        }
        request.prepare_for_perform()?;
        let staged = self.shared.queue.len() as u64;
        if self.shared.active.load(Ordering::Acquire) + staged >= self.shared.max_in_flight {
            return Err(Error::CapacityExhausted);
        }
        self.shared.queue.push(request);
        metrics::REQUESTS_SUBMITTED.increment();
        self.waker.wake();
        Ok(())
    }

    /// Snapshot of requests owned by the engine (plus any counted at the
    /// last queue drain). A completion callback may still see its own
    /// request counted here.
    pub fn active_requests(&self) -> u64 {
        self.shared.active.load(Ordering::Acquire)
    }

    /// True between the end of construction and the first `stop` request.
    pub fn is_running(&self) -> bool {
        self.shared.state.load(Ordering::Acquire) == STATE_RUNNING
            && self.shared.running.load(Ordering::Acquire)
    }

    /// Ask the loop to stop, without waiting for it to finish.
    ///
    /// This is the form of `stop` that is always safe inside a completion
    /// callback; the owning [`EventLoop`] (or its `Drop`) performs the join.
    /// Idempotent.
    pub fn stop(&self) {
        self.shared.request_stop();
        self.waker.wake();
    }
}

/// An event loop multiplexing many in-flight HTTP transfers on one
/// background thread.
///
/// Construction spawns the loop thread and blocks until it is running, so
/// requests may be submitted the moment `start` returns. Completed requests
/// come back through the callback, on the loop thread, one at a time.
///
/// # Example
///
/// ```rust,ignore
/// let event_loop = EventLoop::start(Config::default(), make_engine, |_, request| {
///     println!("{} -> {:?}", request.url(), request.status());
/// })?;
/// event_loop.submit(Request::new("http://example.com/"))?;
/// ```
pub struct EventLoop {
    handle: LoopHandle,
    worker_thread: thread::ThreadId,
    join: Mutex<Option<thread::JoinHandle<()>>>,
    shutdown_warn_after: Duration,
}

impl EventLoop {
    /// Start a loop over the default [`PollReactor`].
    ///
    /// `make_engine` runs on the loop thread, so the engine never has to
    /// cross threads. A construction failure from either factory is returned
    /// here synchronously, with the dead worker already joined.
    pub fn start<E, FE, C>(config: Config, make_engine: FE, callback: C) -> Result<Self, Error>
    where
        E: TransferEngine + 'static,
        FE: FnOnce() -> Result<E, EngineError> + Send + 'static,
        C: FnMut(&LoopHandle, Request) + Send + 'static,
    {
        Self::start_with_reactor(config, make_engine, PollReactor::new, callback)
    }

    /// Start a loop over a caller-supplied reactor.
    pub fn start_with_reactor<E, R, FE, FR, C>(
        config: Config,
        make_engine: FE,
        make_reactor: FR,
        callback: C,
    ) -> Result<Self, Error>
    where
        E: TransferEngine + 'static,
        R: Reactor + 'static,
        FE: FnOnce() -> Result<E, EngineError> + Send + 'static,
        FR: FnOnce() -> io::Result<R> + Send + 'static,
        C: FnMut(&LoopHandle, Request) + Send + 'static,
    {
        config.validate()?;

        let shared = Arc::new(Shared::new(&config));
        let shutdown_warn_after = Duration::from_millis(config.shutdown_warn_after_ms);
        let transfer_capacity = config.transfer_capacity;
        let (ready_tx, ready_rx) = crossbeam_channel::bounded(1);

        let thread_shared = Arc::clone(&shared);
        let join = thread::Builder::new()
            .name(config.thread_name.clone())
            .spawn(move || {
                let _guard = ShutdownGuard(Arc::clone(&thread_shared));
                let mut reactor = match make_reactor() {
                    Ok(reactor) => reactor,
                    Err(error) => {
                        let _ = ready_tx.send(Err(Error::Io(error)));
                        return;
                    }
                };
                let engine = match make_engine() {
                    Ok(engine) => engine,
                    Err(error) => {
                        let _ = ready_tx.send(Err(Error::Engine(error)));
                        return;
                    }
                };

                let waker = reactor.waker();
                let handle = LoopHandle {
                    shared: Arc::clone(&thread_shared),
                    waker: Arc::clone(&waker),
                };
                let mut worker = Worker::new(
                    engine,
                    reactor,
                    callback,
                    handle,
                    Arc::clone(&thread_shared),
                    transfer_capacity,
                );

                // Publish `running` before releasing the caller, so `start`
                // returning implies submissions are accepted.
                thread_shared.running.store(true, Ordering::Release);
                if ready_tx.send(Ok(waker)).is_err() {
                    // Caller vanished between spawn and readiness.
                    return;
                }
                worker.run();
            })
            .map_err(Error::Io)?;

        match ready_rx.recv() {
            Ok(Ok(waker)) => Ok(EventLoop {
                handle: LoopHandle { shared, waker },
                worker_thread: join.thread().id(),
                join: Mutex::new(Some(join)),
                shutdown_warn_after,
            }),
            Ok(Err(error)) => {
                let _ = join.join();
                Err(error)
            }
            // The worker died before signalling readiness.
            Err(_) => {
                let _ = join.join();
                Err(Error::WorkerStartup)
            }
        }
    }

    /// See [`LoopHandle::submit`].
    pub fn submit(&self, request: Request) -> Result<(), Error> {
        self.handle.submit(request)
    }

    /// See [`LoopHandle::active_requests`].
    pub fn active_requests(&self) -> u64 {
        self.handle.active_requests()
    }

    /// See [`LoopHandle::is_running`].
    pub fn is_running(&self) -> bool {
        self.handle.is_running()
    }

    /// A cloneable handle for producers and for use inside the callback.
    pub fn handle(&self) -> LoopHandle {
        self.handle.clone()
    }

    /// Stop the loop and join the worker thread.
    ///
    /// Aborts whatever is still in flight: the engine is destroyed without
    /// delivering further completions. Waits for the reactor to acknowledge
    /// closure of both the wakeup handle and the timer handle before the
    /// join, spinning at 1 ms. Idempotent; concurrent callers serialize on
    /// the join. When called on the loop thread itself (from a completion
    /// callback), only the stop request is made and the join is left to the
    /// owner's later `stop` or `Drop`.
    pub fn stop(&self) {
        let shared = &self.handle.shared;
        if shared.state.load(Ordering::Acquire) == STATE_STOPPED {
            return;
        }
        self.handle.stop();

        if thread::current().id() == self.worker_thread {
            // The loop is beneath us on this stack; it winds down once the
            // current callback returns.
            return;
        }

        let started = Instant::now();
        let mut warned = false;
        while !(shared.wakeup_closed.load(Ordering::Acquire)
            && shared.timer_closed.load(Ordering::Acquire))
        {
            if !warned
                && !self.shutdown_warn_after.is_zero()
                && started.elapsed() >= self.shutdown_warn_after
            {
                warned = true;
                tracing::warn!(
                    elapsed_ms = started.elapsed().as_millis() as u64,
                    "still waiting for reactor close acknowledgments"
                );
            }
            thread::sleep(SHUTDOWN_SPIN);
        }

        let mut slot = self.join.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(join) = slot.take() {
            let _ = join.join();
        }
        shared.state.store(STATE_STOPPED, Ordering::Release);
    }
}

impl Drop for EventLoop {
    fn drop(&mut self) {
        self.stop();
    }
}
