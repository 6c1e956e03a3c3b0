//! Caller-facing facade: blocking `submit` plus worker lifecycle.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, OnceLock};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use parking_lot::Mutex;
use tracing::error;

use crate::config::EngineConfig;
use crate::engine::{BatchEngine, BoxedHandler};
use crate::error::{BatchError, BatchResult, HandlerError};
use crate::intake::{IntakeConsumer, IntakeProducer, intake_queue};
use crate::pending::{PendingRequest, ResultHandle};
use crate::stats::{EngineStats, StatsSnapshot};

struct Worker {
    stop: Arc<AtomicBool>,
    thread: JoinHandle<()>,
}

/// Micro-batching engine.
///
/// Any number of threads call [`submit`](Self::submit); a single background
/// worker groups their inputs into batches of at most `max_size`, calls the
/// handler once per batch and routes each output back to its caller.
///
/// ```no_run
/// use std::time::Duration;
/// use microbatch::{EngineConfig, MicroBatcher};
///
/// let batcher = MicroBatcher::new(EngineConfig::new(5, Duration::from_millis(10))?)?;
/// batcher.set_handler(|xs: Vec<u64>| Ok::<_, std::convert::Infallible>(
///     xs.into_iter().map(|x| x * x).collect(),
/// ))?;
/// batcher.start()?;
/// assert_eq!(batcher.submit(7)?, 49);
/// # Ok::<(), microbatch::BatchError>(())
/// ```
///
/// Instances are independent: each owns its queue, handler, stats and worker.
pub struct MicroBatcher<T, S> {
    config: EngineConfig,
    producer: IntakeProducer<T, S>,
    consumer: IntakeConsumer<T, S>,
    handler: OnceLock<BoxedHandler<T, S>>,
    stats: Arc<EngineStats>,
    worker: Mutex<Option<Worker>>,
}

impl<T, S> MicroBatcher<T, S> {
    pub fn new(config: EngineConfig) -> BatchResult<Self> {
        config.validate()?;
        let (producer, consumer) = intake_queue();
        Ok(Self {
            config,
            producer,
            consumer,
            handler: OnceLock::new(),
            stats: Arc::new(EngineStats::default()),
            worker: Mutex::new(None),
        })
    }

    /// Bind the batch handler. Only one binding per instance; a second call
    /// fails with [`BatchError::HandlerAlreadySet`].
    pub fn set_handler<F, E>(&self, handler: F) -> BatchResult<()>
    where
        F: Fn(Vec<T>) -> Result<Vec<S>, E> + Send + Sync + 'static,
        E: Into<HandlerError>,
    {
        let boxed: BoxedHandler<T, S> =
            Arc::new(move |inputs: Vec<T>| -> Result<Vec<S>, HandlerError> {
                handler(inputs).map_err(Into::into)
            });
        self.handler
            .set(boxed)
            .map_err(|_| BatchError::HandlerAlreadySet)
    }

    pub fn has_handler(&self) -> bool {
        self.handler.get().is_some()
    }

    /// Signal the worker and wait for it to exit. No-op when not running.
    ///
    /// A batch already handed to the handler still completes. A partially
    /// assembled batch is discarded and its callers see
    /// [`BatchError::Abandoned`]; requests not yet popped stay queued until
    /// the next [`start`](Self::start).
    pub fn stop(&self) {
        let mut slot = self.worker.lock();
        let Some(worker) = slot.take() else {
            return;
        };
        worker.stop.store(true, Ordering::Release);
        if worker.thread.join().is_err() {
            error!("batch worker panicked");
        }
    }

    pub fn is_running(&self) -> bool {
        self.worker
            .lock()
            .as_ref()
            .is_some_and(|w| !w.thread.is_finished())
    }

    /// Queue a request without waiting. The returned handle yields the result.
    pub fn enqueue(&self, input: T) -> BatchResult<ResultHandle<S>> {
        if !self.has_handler() {
            return Err(BatchError::HandlerNotSet);
        }
        let (req, handle) = PendingRequest::new(input, self.config.timeout);
        // The consumer half lives as long as `self`, so the push cannot fail.
        self.producer.push(req).map_err(|_| BatchError::Abandoned)?;
        self.stats.inc_submitted();
        Ok(handle)
    }

    /// Submit one input and block until its batch has been processed.
    ///
    /// Errors other than configuration errors describe the whole batch the
    /// input landed in, not the input itself.
    pub fn submit(&self, input: T) -> BatchResult<S> {
        self.enqueue(input)?.wait_for_result(None)
    }

    /// Like [`submit`](Self::submit) but gives up after `timeout`.
    pub fn submit_timeout(&self, input: T, timeout: Duration) -> BatchResult<S> {
        self.enqueue(input)?.wait_for_result(Some(timeout))
    }

    /// Requests queued but not yet taken into a batch.
    pub fn pending(&self) -> usize {
        self.consumer.len()
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn stats(&self) -> StatsSnapshot {
        self.stats.snapshot()
    }
}

impl<T, S> MicroBatcher<T, S>
where
    T: Send + 'static,
    S: Send + 'static,
{
    /// Spawn the background worker. Idempotent while a worker is running.
    pub fn start(&self) -> BatchResult<()> {
        let handler = self.handler.get().cloned().ok_or(BatchError::HandlerNotSet)?;

        let mut slot = self.worker.lock();
        if let Some(w) = slot.as_ref()
            && !w.thread.is_finished()
        {
            return Ok(());
        }
        if let Some(dead) = slot.take()
            && dead.thread.join().is_err()
        {
            error!("previous batch worker panicked");
        }

        let engine = BatchEngine::new(
            self.consumer.clone(),
            handler,
            &self.config,
            self.stats.clone(),
        );
        let stop = Arc::new(AtomicBool::new(false));
        let thread = thread::Builder::new()
            .name(self.config.worker_name.clone())
            .spawn({
                let stop = stop.clone();
                move || engine.run(&stop)
            })?;

        *slot = Some(Worker { stop, thread });
        Ok(())
    }
}

impl<T, S> Drop for MicroBatcher<T, S> {
    fn drop(&mut self) {
        self.stop();
    }
}
