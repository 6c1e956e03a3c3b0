//! Error taxonomy shared by the engine and its callers.
//!
//! Every variant is `Clone`: a single handler failure is fanned out to each
//! caller whose request sat in the failed batch.

use std::sync::Arc;
use std::time::Duration;

/// Boxed error accepted from user handlers.
pub type HandlerError = Box<dyn std::error::Error + Send + Sync>;

#[derive(Debug, Clone, thiserror::Error)]
pub enum BatchError {
    // ===== Batch outcome =====
    /// Handler returned a different number of outputs than it was given inputs.
    #[error("batch handler returned {actual} outputs for {expected} inputs")]
    OutputSizeMismatch { expected: usize, actual: usize },

    /// Handler returned an error. The same source is shared by every caller in the batch.
    #[error("batch handler failed: {0}")]
    Handler(#[source] Arc<dyn std::error::Error + Send + Sync>),

    /// Handler panicked while processing the batch.
    #[error("batch handler panicked: {0}")]
    HandlerPanicked(String),

    // ===== Configuration =====
    #[error("no batch handler set")]
    HandlerNotSet,

    #[error("batch handler already set")]
    HandlerAlreadySet,

    #[error("invalid engine configuration: {0}")]
    InvalidConfig(&'static str),

    // ===== Admission / delivery =====
    /// Append on a buffer that already holds `capacity` requests.
    #[error("admission buffer full (capacity {capacity})")]
    BufferFull { capacity: usize },

    /// Caller stopped waiting before the engine delivered a result.
    #[error("no result within {0:?}")]
    Timeout(Duration),

    /// The request was dropped without a result (engine stopped mid-assembly or torn down).
    #[error("request abandoned before dispatch")]
    Abandoned,

    #[error("failed to spawn batch worker: {0}")]
    Spawn(#[source] Arc<std::io::Error>),
}

impl BatchError {
    pub fn handler(e: impl Into<HandlerError>) -> Self {
        BatchError::Handler(Arc::from(e.into()))
    }

    /// True for errors that describe the outcome of a dispatched batch
    /// rather than the caller's own misuse or wait policy.
    pub fn is_batch_failure(&self) -> bool {
        matches!(
            self,
            BatchError::OutputSizeMismatch { .. }
                | BatchError::Handler(_)
                | BatchError::HandlerPanicked(_)
        )
    }
}

impl From<std::io::Error> for BatchError {
    fn from(e: std::io::Error) -> Self {
        BatchError::Spawn(Arc::new(e))
    }
}

pub type BatchResult<T> = Result<T, BatchError>;
