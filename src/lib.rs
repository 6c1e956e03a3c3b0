//! Library crate for microbatch: intake queue, admission buffer, batch engine and the
//! `MicroBatcher` facade.
//!
//! Callers on any thread `submit` one input at a time; one background worker
//! groups inputs into batches, runs the user's batch handler once per batch and
//! routes each output (or the batch's shared error) back to its caller.
//!
//! The **binary** (`main.rs`) is a demo/load driver only; everything it uses is
//! public here so tests and benches drive the same code.

pub mod batcher;
pub mod buffer;
pub mod config;
pub mod constants;
pub mod engine;
pub mod error;
pub mod intake;
pub mod pending;
pub mod stats;

pub use batcher::MicroBatcher;
pub use config::EngineConfig;
pub use engine::{BatchReport, FlushReason};
pub use error::{BatchError, BatchResult, HandlerError};
pub use pending::{Completion, ResultHandle};
pub use stats::StatsSnapshot;
