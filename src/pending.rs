//! One caller's unit of work and its one-shot completion channel.
//!
//! A [`PendingRequest`] travels through the intake queue to the engine thread,
//! where it is split into its input (handed to the handler) and a [`Completer`]
//! (kept in the admission buffer). The caller keeps the matching
//! [`ResultHandle`] and blocks on it. Each pair is single-use.

use std::time::{Duration, Instant};

use crossbeam_channel::{Receiver, RecvTimeoutError, Sender, bounded};
use tracing::trace;

use crate::error::{BatchError, BatchResult};

struct Delivery<S> {
    result: BatchResult<S>,
    completed_at: Instant,
}

/// Request as it sits in the intake queue.
pub struct PendingRequest<T, S> {
    input: T,
    completer: Completer<S>,
}

impl<T, S> PendingRequest<T, S> {
    /// Create a request whose deadline is `timeout` after now.
    pub fn new(input: T, timeout: Duration) -> (Self, ResultHandle<S>) {
        Self::new_at(input, Instant::now(), timeout)
    }

    pub fn new_at(input: T, enqueued_at: Instant, timeout: Duration) -> (Self, ResultHandle<S>) {
        let (tx, rx) = bounded(1);
        let req = Self {
            input,
            completer: Completer {
                enqueued_at,
                deadline: enqueued_at.checked_add(timeout),
                tx,
            },
        };
        let handle = ResultHandle { enqueued_at, rx };
        (req, handle)
    }

    pub fn input(&self) -> &T {
        &self.input
    }

    pub fn enqueued_at(&self) -> Instant {
        self.completer.enqueued_at
    }

    /// `None` when `enqueued_at + timeout` overflowed; treat as due now.
    pub fn deadline(&self) -> Option<Instant> {
        self.completer.deadline
    }

    pub fn into_parts(self) -> (T, Completer<S>) {
        (self.input, self.completer)
    }
}

/// Engine-side write half of a request. Consumed by the single write.
pub struct Completer<S> {
    enqueued_at: Instant,
    deadline: Option<Instant>,
    tx: Sender<Delivery<S>>,
}

impl<S> Completer<S> {
    pub fn enqueued_at(&self) -> Instant {
        self.enqueued_at
    }

    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    /// Deliver the outcome and wake the caller. Returns the caller-observed latency.
    pub fn complete(self, result: BatchResult<S>) -> Duration {
        let completed_at = Instant::now();
        let latency = completed_at.saturating_duration_since(self.enqueued_at);
        // Capacity 1 and a single send: never blocks.
        if self.tx.send(Delivery { result, completed_at }).is_err() {
            trace!("caller stopped waiting; result dropped");
        }
        latency
    }
}

/// Outcome plus the time from enqueue to completion.
#[derive(Debug)]
pub struct Completion<S> {
    pub result: BatchResult<S>,
    pub latency: Duration,
}

/// Caller-side read half of a request.
pub struct ResultHandle<S> {
    enqueued_at: Instant,
    rx: Receiver<Delivery<S>>,
}

impl<S> ResultHandle<S> {
    /// Block until the engine delivers, then return the output or the batch error.
    ///
    /// `Some(timeout)` bounds the wait; on expiry the request stays queued and
    /// its eventual result is discarded.
    pub fn wait_for_result(self, timeout: Option<Duration>) -> BatchResult<S> {
        self.wait_completion(timeout)?.result
    }

    /// Like [`wait_for_result`](Self::wait_for_result) but also reports latency.
    /// The outer error covers only caller-side failures (timeout, abandonment).
    pub fn wait_completion(self, timeout: Option<Duration>) -> BatchResult<Completion<S>> {
        let delivery = match timeout {
            None => self.rx.recv().map_err(|_| BatchError::Abandoned)?,
            Some(t) => self.rx.recv_timeout(t).map_err(|e| match e {
                RecvTimeoutError::Timeout => BatchError::Timeout(t),
                RecvTimeoutError::Disconnected => BatchError::Abandoned,
            })?,
        };
        Ok(Completion {
            result: delivery.result,
            latency: delivery
                .completed_at
                .saturating_duration_since(self.enqueued_at),
        })
    }

    /// Non-blocking check. `None` while the request is still in flight.
    pub fn try_result(&self) -> Option<BatchResult<S>> {
        match self.rx.try_recv() {
            Ok(d) => Some(d.result),
            Err(crossbeam_channel::TryRecvError::Empty) => None,
            Err(crossbeam_channel::TryRecvError::Disconnected) => Some(Err(BatchError::Abandoned)),
        }
    }

    pub fn enqueued_at(&self) -> Instant {
        self.enqueued_at
    }
}
