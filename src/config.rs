//! Engine sizing and timing configuration.
//!
//! Defaults live in `constants`. All values are fixed for the lifetime of an engine.

use std::time::Duration;

use crate::constants::{
    DEFAULT_MAX_SIZE, DEFAULT_POLL_INTERVAL, DEFAULT_TIMEOUT, DEFAULT_WORKER_NAME,
};
use crate::error::{BatchError, BatchResult};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EngineConfig {
    /// Upper bound on requests per handler invocation.
    pub max_size: usize,
    /// Max wait before an under-full batch is flushed. Each request's deadline
    /// is its enqueue time plus this value.
    pub timeout: Duration,
    /// Sleep between empty polls of the intake queue. Also the lookahead used
    /// to decide that the oldest request is about to expire.
    pub poll_interval: Duration,
    /// Thread name for the background worker.
    pub worker_name: String,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            max_size: DEFAULT_MAX_SIZE,
            timeout: DEFAULT_TIMEOUT,
            poll_interval: DEFAULT_POLL_INTERVAL,
            worker_name: DEFAULT_WORKER_NAME.to_string(),
        }
    }
}

impl EngineConfig {
    pub fn new(max_size: usize, timeout: Duration) -> BatchResult<Self> {
        let cfg = Self {
            max_size,
            timeout,
            ..Self::default()
        };
        cfg.validate()?;
        Ok(cfg)
    }

    /// Build from float seconds, e.g. `from_secs_f64(5, 0.01)`.
    pub fn from_secs_f64(max_size: usize, timeout_secs: f64) -> BatchResult<Self> {
        let timeout = secs_to_duration(
            timeout_secs,
            "timeout must be a positive, finite number of seconds",
        )?;
        Self::new(max_size, timeout)
    }

    pub fn with_poll_interval(mut self, poll_interval: Duration) -> BatchResult<Self> {
        self.poll_interval = poll_interval;
        self.validate()?;
        Ok(self)
    }

    pub fn with_poll_interval_secs_f64(self, secs: f64) -> BatchResult<Self> {
        let d = secs_to_duration(
            secs,
            "poll_interval must be a positive, finite number of seconds",
        )?;
        self.with_poll_interval(d)
    }

    pub fn with_worker_name(mut self, name: impl Into<String>) -> Self {
        self.worker_name = name.into();
        self
    }

    pub fn validate(&self) -> BatchResult<()> {
        if self.max_size == 0 {
            return Err(BatchError::InvalidConfig("max_size must be positive"));
        }
        if self.timeout.is_zero() {
            return Err(BatchError::InvalidConfig("timeout must be positive"));
        }
        if self.poll_interval.is_zero() {
            return Err(BatchError::InvalidConfig("poll_interval must be positive"));
        }
        Ok(())
    }
}

fn secs_to_duration(secs: f64, invalid: &'static str) -> BatchResult<Duration> {
    if !secs.is_finite() || secs <= 0.0 {
        return Err(BatchError::InvalidConfig(invalid));
    }
    Duration::try_from_secs_f64(secs)
        .map_err(|_| BatchError::InvalidConfig("duration out of range"))
}
