/// Configuration for the event loop.
#[derive(Clone)]
pub struct Config {
    /// Soft limit on requests in flight (queued + owned by the engine).
    /// `submit` returns `Error::CapacityExhausted` once the snapshot of
    /// queued + active reaches this value. The check is best-effort: two
    /// racing producers may briefly overshoot by a handful of requests.
    pub max_in_flight: u32,
    /// Initial capacity of the pending-request queue.
    pub pending_capacity: usize,
    /// Initial capacity of the in-flight transfer arena.
    pub transfer_capacity: usize,
    /// Name given to the background loop thread.
    pub thread_name: String,
    /// Log a warning if `stop()` has been waiting longer than this many
    /// milliseconds for the reactor to acknowledge its handle closures.
    /// 0 disables the warning. The wait itself is unbounded either way.
    pub shutdown_warn_after_ms: u64,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            max_in_flight: 65_536,
            pending_capacity: 64,
            transfer_capacity: 256,
            thread_name: "towline-loop".to_string(),
            shutdown_warn_after_ms: 5_000,
        }
    }
}

impl Config {
    /// Validate configuration values. Returns an error if any value is out of range.
    pub fn validate(&self) -> Result<(), crate::error::Error> {
        if self.max_in_flight == 0 {
            return Err(crate::error::Error::Config(
                "max_in_flight must be > 0".into(),
            ));
        }
        if self.thread_name.is_empty() {
            return Err(crate::error::Error::Config(
                "thread_name must not be empty".into(),
            ));
        }
        Ok(())
    }
}
