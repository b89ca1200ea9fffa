use std::io;

use thiserror::Error;

use crate::engine::EngineError;
use crate::request::PrepareError;

/// Errors returned by the towline core.
#[derive(Debug, Error)]
pub enum Error {
    /// Reactor setup or operation failed.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
    /// Transfer engine construction or operation failed.
    #[error("engine error: {0}")]
    Engine(#[from] EngineError),
    /// Request preparation failed on the submitting thread.
    #[error("request preparation: {0}")]
    Prepare(#[from] PrepareError),
    /// Configuration value out of range.
    #[error("configuration: {0}")]
    Config(String),
    /// The event loop has been stopped (or never finished starting).
    #[error("event loop is not running")]
    NotRunning,
    /// The in-flight request limit was reached.
    #[error("in-flight request limit reached")]
    CapacityExhausted,
    /// The worker thread exited before signalling readiness.
    #[error("event loop thread failed to start")]
    WorkerStartup,
}
