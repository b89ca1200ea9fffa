//! towline — event-driven core for a concurrent HTTP client.
//!
//! towline multiplexes many in-flight HTTP(S) transfers on a single
//! background thread. It owns neither the HTTP protocol machinery nor the
//! OS polling primitives: a [`TransferEngine`] drives protocol state and a
//! [`Reactor`] watches sockets and the shared timer; towline binds the two
//! together, accepts requests from any thread, and hands completed requests
//! back through a callback.
//!
//! # Quick Start
//!
//! ```rust,ignore
//! use towline::{Config, EventLoop, Request};
//!
//! let event_loop = EventLoop::start(
//!     Config::default(),
//!     || MyEngine::new(),
//!     |_handle, request| {
//!         println!("{} finished: {:?}", request.url(), request.status());
//!     },
//! )?;
//!
//! event_loop.submit(Request::new("https://example.com/"))?;
//! event_loop.stop();
//! ```
//!
//! # Threading
//!
//! One background thread runs the reactor loop; every engine call, socket
//! binding, and completion callback happens there, serially. Producer
//! threads only ever touch the submission queue, the wakeup primitive, and
//! atomic snapshots. The completion callback receives a [`LoopHandle`] and
//! may resubmit or request a stop from inside itself.

// ── Internal modules ────────────────────────────────────────────────────
pub(crate) mod event_loop;
pub(crate) mod metrics;
pub(crate) mod poller;
pub(crate) mod queue;
pub(crate) mod socket;
pub(crate) mod worker;

// ── Public modules ──────────────────────────────────────────────────────
pub mod config;
pub mod engine;
pub mod error;
pub mod reactor;
pub mod request;

// ── Re-exports: core types ──────────────────────────────────────────────

/// Event loop configuration.
pub use config::Config;
/// The event loop: one background thread, many in-flight transfers.
pub use event_loop::EventLoop;
/// Cloneable submit/stop handle, also passed to the completion callback.
pub use event_loop::LoopHandle;
/// Core errors.
pub use error::Error;
/// A single HTTP request travelling through the loop.
pub use request::Request;
/// Final status the engine reported for a transfer.
pub use request::TransferStatus;

// ── Re-exports: engine seam ─────────────────────────────────────────────

/// What a driver call is reacting to: a socket or the timer.
pub use engine::ActionTarget;
/// One finished transfer drained from the engine.
pub use engine::Completion;
/// Outcome of a single engine drive call.
pub use engine::Drive;
/// Loop-side services available to the engine while it is driven.
pub use engine::EngineDriver;
/// Engine-reported errors.
pub use engine::EngineError;
/// Socket event bits fed to the engine.
pub use engine::EventMask;
/// Timer changes the engine may request.
pub use engine::TimerRequest;
/// A multi-transfer HTTP engine, driven by the event loop.
pub use engine::TransferEngine;
/// Identity of one in-flight transfer.
pub use engine::TransferId;

// ── Re-exports: reactor seam ────────────────────────────────────────────

/// Default `poll(2)` + eventfd reactor.
pub use poller::PollReactor;
/// Poll interest for one handle.
pub use reactor::Interest;
/// An I/O reactor driving the event loop.
pub use reactor::Reactor;
/// One reactor event, dispatched on the loop thread.
pub use reactor::ReactorEvent;
/// Readiness flags for a watched fd.
pub use reactor::Readiness;
/// Wakeup handle, signalable from any thread.
pub use reactor::RemoteWake;
/// Identity of one registered poll handle.
pub use reactor::SocketToken;
