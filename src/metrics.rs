//! towline runtime metrics.
//!
//! Counters for the request pipeline and the reactor binding. Exposed via
//! Prometheus when registered with an exporter; the core itself stays quiet
//! and lets these tell the story.

use metriken::{Counter, Gauge, metric};

// ── Request pipeline ─────────────────────────────────────────────

#[metric(
    name = "towline/requests/submitted",
    description = "Requests accepted by submit()"
)]
pub static REQUESTS_SUBMITTED: Counter = Counter::new();

#[metric(
    name = "towline/requests/completed",
    description = "Completion callbacks delivered"
)]
pub static REQUESTS_COMPLETED: Counter = Counter::new();

#[metric(
    name = "towline/requests/failed",
    description = "Completions with a non-success status"
)]
pub static REQUESTS_FAILED: Counter = Counter::new();

#[metric(
    name = "towline/requests/active",
    description = "Requests currently queued or owned by the engine"
)]
pub static REQUESTS_ACTIVE: Gauge = Gauge::new();

// ── Loop activity ────────────────────────────────────────────────

#[metric(name = "towline/loop/wakeups", description = "Wakeup events dispatched")]
pub static WAKEUPS: Counter = Counter::new();

#[metric(name = "towline/loop/timer_fires", description = "Timer events dispatched")]
pub static TIMER_FIRES: Counter = Counter::new();

#[metric(
    name = "towline/engine/errors",
    description = "Engine driver calls that returned an error"
)]
pub static ENGINE_ERRORS: Counter = Counter::new();

// ── Socket contexts ──────────────────────────────────────────────

#[metric(
    name = "towline/sockets/opened",
    description = "Socket contexts created on engine watch requests"
)]
pub static SOCKETS_OPENED: Counter = Counter::new();

#[metric(
    name = "towline/sockets/closed",
    description = "Socket contexts retired after reactor close acknowledgment"
)]
pub static SOCKETS_CLOSED: Counter = Counter::new();

#[metric(
    name = "towline/sockets/register_failures",
    description = "Reactor registration failures for engine watch requests"
)]
pub static SOCKET_REGISTER_FAILURES: Counter = Counter::new();
