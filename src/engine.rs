use std::any::Any;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;
use std::time::{Duration, Instant};

use tracing::{debug, info, warn};

use crate::buffer::AdmissionBuffer;
use crate::config::EngineConfig;
use crate::error::{BatchError, BatchResult, HandlerError};
use crate::intake::IntakeConsumer;
use crate::stats::EngineStats;

/// Type-erased batch handler: ordered inputs in, equally many ordered outputs out.
pub type BoxedHandler<T, S> =
    Arc<dyn Fn(Vec<T>) -> Result<Vec<S>, HandlerError> + Send + Sync + 'static>;

/// Why assembly stopped and the buffer was handed to the handler.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlushReason {
    /// Buffer reached `max_size`.
    Full,
    /// Queue ran dry and the oldest request would expire before the next poll.
    Deadline,
}

/// What happened to one dispatched batch.
#[derive(Debug, Clone)]
pub struct BatchReport {
    pub reason: FlushReason,
    pub len: usize,
    pub handler_time: Duration,
    /// `None` when every caller got its own output.
    pub error: Option<BatchError>,
}

impl BatchReport {
    pub fn succeeded(&self) -> bool {
        self.error.is_none()
    }
}

/// Batch engine: drains the intake queue into admission buffers, runs the
/// handler once per buffer, fans results back to callers.
///
/// Runs on exactly one thread. Owns the buffer for its whole life, so the
/// only synchronisation is the intake queue and the per-request completions.
pub struct BatchEngine<T, S> {
    pub intake: IntakeConsumer<T, S>,
    pub handler: BoxedHandler<T, S>,
    pub max_size: usize,
    pub poll_interval: Duration,
    pub stats: Arc<EngineStats>,
}

impl<T, S> BatchEngine<T, S> {
    pub fn new(
        intake: IntakeConsumer<T, S>,
        handler: BoxedHandler<T, S>,
        config: &EngineConfig,
        stats: Arc<EngineStats>,
    ) -> Self {
        Self {
            intake,
            handler,
            max_size: config.max_size,
            poll_interval: config.poll_interval,
            stats,
        }
    }

    /// Main loop. Returns once `stop` is observed between polls.
    pub fn run(self, stop: &AtomicBool) {
        info!(
            max_size = self.max_size,
            poll_interval = ?self.poll_interval,
            "batch worker started"
        );
        while self.process_one_cycle(stop).is_some() {}
        info!(queued = self.intake.len(), "batch worker stopped");
    }

    /// Assemble and dispatch one batch. `None` once the engine is stopped.
    pub fn process_one_cycle(&self, stop: &AtomicBool) -> Option<BatchReport> {
        let (reason, buffer) = self.assemble(stop)?;
        Some(self.dispatch(reason, buffer))
    }

    /// Fill a fresh buffer until it is full or its oldest request is about to
    /// expire. Polls without blocking and sleeps `poll_interval` between empty
    /// polls.
    ///
    /// On stop, an empty buffer is discarded silently. A partial buffer is
    /// dropped too, which wakes its callers with [`BatchError::Abandoned`];
    /// requests still in the queue stay there for a later worker.
    pub fn assemble(&self, stop: &AtomicBool) -> Option<(FlushReason, AdmissionBuffer<T, S>)> {
        let mut buffer = AdmissionBuffer::new(self.max_size);

        while !stop.load(Ordering::Acquire) {
            match self.intake.try_pop() {
                Some(req) => {
                    if let Err(rejected) = buffer.append(req) {
                        // Unreachable while we flush on full(); fail the caller rather than lose it.
                        let capacity = rejected.capacity;
                        let (_, completer) = rejected.request.into_parts();
                        completer.complete(Err(BatchError::BufferFull { capacity }));
                        continue;
                    }
                    if buffer.full() {
                        return Some((FlushReason::Full, buffer));
                    }
                }
                None => {
                    if buffer.deadline_imminent(Instant::now(), self.poll_interval) {
                        return Some((FlushReason::Deadline, buffer));
                    }
                    thread::sleep(self.poll_interval);
                }
            }
        }

        if !buffer.is_empty() {
            warn!(
                abandoned = buffer.len(),
                "stopped mid-assembly; partial batch discarded"
            );
            self.stats.inc_abandoned(buffer.len());
        }
        None
    }

    /// Run the handler on `buffer` and deliver the outcome to every caller in it.
    pub fn dispatch(&self, reason: FlushReason, mut buffer: AdmissionBuffer<T, S>) -> BatchReport {
        let inputs = buffer.take_inputs();
        let len = inputs.len();
        self.stats.record_flush(reason, len);

        let started = Instant::now();
        let result = self.invoke(inputs);
        let handler_time = started.elapsed();
        self.stats.record_handler_time(handler_time);

        let error = match &result {
            Ok(_) => None,
            Err(e) => {
                if matches!(e, BatchError::OutputSizeMismatch { .. }) {
                    self.stats.inc_size_mismatch();
                }
                self.stats.inc_failed();
                warn!(len, ?reason, error = %e, "batch failed");
                Some(e.clone())
            }
        };

        let fan = buffer.complete(result);
        self.stats.record_latency(fan.max_latency);
        debug!(
            len,
            ?reason,
            ?handler_time,
            max_latency = ?fan.max_latency,
            ok = error.is_none(),
            "batch dispatched"
        );

        BatchReport {
            reason,
            len,
            handler_time,
            error,
        }
    }

    fn invoke(&self, inputs: Vec<T>) -> BatchResult<Vec<S>> {
        let expected = inputs.len();
        match panic::catch_unwind(AssertUnwindSafe(|| (self.handler)(inputs))) {
            Ok(Ok(outputs)) if outputs.len() == expected => Ok(outputs),
            Ok(Ok(outputs)) => Err(BatchError::OutputSizeMismatch {
                expected,
                actual: outputs.len(),
            }),
            Ok(Err(e)) => Err(BatchError::Handler(Arc::from(e))),
            Err(payload) => Err(BatchError::HandlerPanicked(panic_message(payload.as_ref()))),
        }
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "non-string panic payload".to_string()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use super::*;
    use crate::intake::{IntakeProducer, intake_queue};
    use crate::pending::{PendingRequest, ResultHandle};

    fn engine_with<F>(
        max_size: usize,
        poll: Duration,
        f: F,
    ) -> (IntakeProducer<u32, u32>, BatchEngine<u32, u32>)
    where
        F: Fn(Vec<u32>) -> Result<Vec<u32>, HandlerError> + Send + Sync + 'static,
    {
        let (tx, rx) = intake_queue();
        let engine = BatchEngine {
            intake: rx,
            handler: Arc::new(f),
            max_size,
            poll_interval: poll,
            stats: Arc::new(EngineStats::default()),
        };
        (tx, engine)
    }

    fn push(tx: &IntakeProducer<u32, u32>, input: u32, timeout: Duration) -> ResultHandle<u32> {
        let (req, h) = PendingRequest::new(input, timeout);
        assert!(tx.push(req).is_ok());
        h
    }

    #[test]
    fn full_buffer_dispatches_immediately() {
        let calls = Arc::new(Mutex::new(Vec::new()));
        let seen = calls.clone();
        let (tx, engine) = engine_with(3, Duration::from_millis(1), move |xs| {
            seen.lock().unwrap().push(xs.clone());
            Ok(xs.into_iter().map(|x| x + 100).collect())
        });

        let handles: Vec<_> = (0..3)
            .map(|i| push(&tx, i, Duration::from_secs(60)))
            .collect();

        let stop = AtomicBool::new(false);
        let report = engine.process_one_cycle(&stop).unwrap();
        assert_eq!(report.reason, FlushReason::Full);
        assert_eq!(report.len, 3);
        assert!(report.succeeded());
        assert_eq!(*calls.lock().unwrap(), vec![vec![0, 1, 2]]);

        let outs: Vec<u32> = handles
            .into_iter()
            .map(|h| h.wait_for_result(None).unwrap())
            .collect();
        assert_eq!(outs, vec![100, 101, 102]);
    }

    #[test]
    fn overflow_waits_for_next_cycle() {
        let (tx, engine) = engine_with(2, Duration::from_millis(1), |xs| Ok(xs));
        let _h: Vec<_> = (0..5)
            .map(|i| push(&tx, i, Duration::from_millis(5)))
            .collect();

        let stop = AtomicBool::new(false);
        let lens: Vec<usize> = (0..3)
            .map(|_| engine.process_one_cycle(&stop).unwrap().len)
            .collect();
        assert_eq!(lens, vec![2, 2, 1]);
        assert!(engine.intake.is_empty());
    }

    #[test]
    fn lone_request_flushes_on_deadline() {
        let (tx, engine) = engine_with(100, Duration::from_millis(1), |xs| Ok(xs));
        let timeout = Duration::from_millis(20);
        let h = push(&tx, 42, timeout);

        let stop = AtomicBool::new(false);
        let started = Instant::now();
        let report = engine.process_one_cycle(&stop).unwrap();
        let waited = started.elapsed();

        assert_eq!(report.reason, FlushReason::Deadline);
        assert_eq!(report.len, 1);
        // Flushes one poll interval ahead of the deadline, never long after it.
        assert!(waited + Duration::from_millis(2) >= timeout / 2);
        assert!(waited < Duration::from_secs(1));
        assert_eq!(h.wait_for_result(None).unwrap(), 42);
    }

    #[test]
    fn stop_with_empty_buffer_never_calls_handler() {
        let called = Arc::new(AtomicBool::new(false));
        let flag = called.clone();
        let (_tx, engine) = engine_with(4, Duration::from_millis(1), move |xs| {
            flag.store(true, Ordering::SeqCst);
            Ok(xs)
        });

        let stop = AtomicBool::new(true);
        assert!(engine.process_one_cycle(&stop).is_none());
        assert!(!called.load(Ordering::SeqCst));
    }

    #[test]
    fn stop_mid_assembly_abandons_partial_batch() {
        let (tx, engine) = engine_with(8, Duration::from_millis(1), |xs| Ok(xs));
        let h = push(&tx, 1, Duration::from_secs(60));

        let stop = Arc::new(AtomicBool::new(false));
        let worker = {
            let stop = stop.clone();
            thread::spawn(move || {
                let out = engine.process_one_cycle(&stop).map(|r| r.len);
                (out, engine.stats.snapshot().abandoned)
            })
        };
        thread::sleep(Duration::from_millis(30));
        stop.store(true, Ordering::Release);
        let (out, abandoned) = worker.join().unwrap();

        assert!(out.is_none());
        assert_eq!(abandoned, 1);
        assert!(matches!(
            h.wait_for_result(None),
            Err(BatchError::Abandoned)
        ));
    }

    #[test]
    fn short_output_is_a_size_mismatch_for_all() {
        let (tx, engine) = engine_with(3, Duration::from_millis(1), |mut xs| {
            xs.pop();
            Ok(xs)
        });
        let handles: Vec<_> = (0..3)
            .map(|i| push(&tx, i, Duration::from_secs(60)))
            .collect();

        let stop = AtomicBool::new(false);
        let report = engine.process_one_cycle(&stop).unwrap();
        assert!(matches!(
            report.error,
            Some(BatchError::OutputSizeMismatch {
                expected: 3,
                actual: 2
            })
        ));
        for h in handles {
            assert!(matches!(
                h.wait_for_result(None),
                Err(BatchError::OutputSizeMismatch { .. })
            ));
        }
        let snap = engine.stats.snapshot();
        assert_eq!(snap.size_mismatches, 1);
        assert_eq!(snap.failed_batches, 1);
    }

    #[test]
    fn handler_error_is_shared_by_the_batch() {
        let (tx, engine) = engine_with(2, Duration::from_millis(1), |_| Err("bad batch".into()));
        let handles: Vec<_> = (0..2)
            .map(|i| push(&tx, i, Duration::from_secs(60)))
            .collect();

        let stop = AtomicBool::new(false);
        assert!(!engine.process_one_cycle(&stop).unwrap().succeeded());

        let errs: Vec<BatchError> = handles
            .into_iter()
            .map(|h| h.wait_for_result(None).unwrap_err())
            .collect();
        match (&errs[0], &errs[1]) {
            (BatchError::Handler(a), BatchError::Handler(b)) => assert!(Arc::ptr_eq(a, b)),
            other => panic!("expected shared handler error, got {other:?}"),
        }
    }

    #[test]
    fn handler_panic_is_caught_at_the_boundary() {
        let (tx, engine) = engine_with(1, Duration::from_millis(1), |_| panic!("kernel oops"));
        let h = push(&tx, 9, Duration::from_secs(60));

        let stop = AtomicBool::new(false);
        let report = engine.process_one_cycle(&stop).unwrap();
        assert!(!report.succeeded());
        match h.wait_for_result(None) {
            Err(BatchError::HandlerPanicked(msg)) => assert_eq!(msg, "kernel oops"),
            other => panic!("expected HandlerPanicked, got {other:?}"),
        }
    }
}
