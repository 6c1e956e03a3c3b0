//! Admission buffer: the bounded, in-progress batch for one handler call.
//!
//! Owned by the engine thread for its whole life, so nothing here is locked.
//! Inputs and completers are stored side by side; index `i` of one always
//! belongs to index `i` of the other. That positional pairing is what routes
//! `outputs[i]` back to the caller who submitted `inputs[i]`.

use std::time::{Duration, Instant};

use crate::error::{BatchError, BatchResult};
use crate::pending::{Completer, PendingRequest};

/// Returned by [`AdmissionBuffer::append`] when the buffer is already full.
/// Hands the request back so it is not lost.
pub struct AppendError<T, S> {
    pub request: PendingRequest<T, S>,
    pub capacity: usize,
}

impl<T, S> From<AppendError<T, S>> for BatchError {
    fn from(e: AppendError<T, S>) -> Self {
        BatchError::BufferFull {
            capacity: e.capacity,
        }
    }
}

/// Summary of one fan-out, for stats.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FanOut {
    pub delivered: usize,
    /// Longest enqueue-to-completion time in the batch.
    pub max_latency: Duration,
}

pub struct AdmissionBuffer<T, S> {
    capacity: usize,
    inputs: Vec<T>,
    completers: Vec<Completer<S>>,
    earliest_deadline: Option<Instant>,
    /// Some request's deadline overflowed `Instant`; treated as due now.
    deadline_overflow: bool,
}

impl<T, S> AdmissionBuffer<T, S> {
    pub fn new(capacity: usize) -> Self {
        debug_assert!(capacity > 0, "zero-capacity buffer can never flush");
        Self {
            capacity,
            inputs: Vec::with_capacity(capacity),
            completers: Vec::with_capacity(capacity),
            earliest_deadline: None,
            deadline_overflow: false,
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn len(&self) -> usize {
        self.completers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.completers.is_empty()
    }

    pub fn full(&self) -> bool {
        self.completers.len() >= self.capacity
    }

    pub fn append(&mut self, request: PendingRequest<T, S>) -> Result<(), AppendError<T, S>> {
        if self.full() {
            return Err(AppendError {
                request,
                capacity: self.capacity,
            });
        }

        match request.deadline() {
            Some(d) => {
                self.earliest_deadline = Some(self.earliest_deadline.map_or(d, |e| e.min(d)));
            }
            None => self.deadline_overflow = true,
        }

        let (input, completer) = request.into_parts();
        self.inputs.push(input);
        self.completers.push(completer);
        Ok(())
    }

    /// Earliest deadline across buffered requests.
    pub fn earliest_deadline(&self) -> Option<Instant> {
        self.earliest_deadline
    }

    /// True iff the earliest deadline falls at or before `now + horizon`.
    /// Always false for an empty buffer.
    pub fn deadline_imminent(&self, now: Instant, horizon: Duration) -> bool {
        if self.is_empty() {
            return false;
        }
        if self.deadline_overflow {
            return true;
        }
        match (self.earliest_deadline, now.checked_add(horizon)) {
            (Some(deadline), Some(limit)) => deadline <= limit,
            // Horizon past the end of time: everything is within it.
            _ => true,
        }
    }

    /// Buffered inputs in arrival order.
    pub fn inputs(&self) -> &[T] {
        &self.inputs
    }

    /// Move the inputs out for dispatch, preserving arrival order.
    /// The completers stay behind to receive the outputs.
    pub fn take_inputs(&mut self) -> Vec<T> {
        std::mem::take(&mut self.inputs)
    }

    /// Deliver `outputs[i]` to the caller of `inputs[i]`.
    ///
    /// A length mismatch never leaves callers unfired: every caller receives
    /// [`BatchError::OutputSizeMismatch`] instead.
    pub fn set_outputs(self, outputs: Vec<S>) -> FanOut {
        if outputs.len() != self.completers.len() {
            let err = BatchError::OutputSizeMismatch {
                expected: self.completers.len(),
                actual: outputs.len(),
            };
            return self.set_exception(err);
        }

        let mut max_latency = Duration::ZERO;
        let delivered = self.completers.len();
        for (completer, output) in self.completers.into_iter().zip(outputs) {
            max_latency = max_latency.max(completer.complete(Ok(output)));
        }
        FanOut {
            delivered,
            max_latency,
        }
    }

    /// Deliver a copy of `err` to every buffered caller.
    pub fn set_exception(self, err: BatchError) -> FanOut {
        let mut max_latency = Duration::ZERO;
        let delivered = self.completers.len();
        for completer in self.completers {
            max_latency = max_latency.max(completer.complete(Err(err.clone())));
        }
        FanOut {
            delivered,
            max_latency,
        }
    }

    /// Route a handler result: outputs on success, shared error otherwise.
    pub fn complete(self, result: BatchResult<Vec<S>>) -> FanOut {
        match result {
            Ok(outputs) => self.set_outputs(outputs),
            Err(err) => self.set_exception(err),
        }
    }
}
