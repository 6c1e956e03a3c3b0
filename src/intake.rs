//! Intake path: caller threads push pending requests, the engine thread pops.
//!
//! Unbounded MPSC FIFO. Producers never block; the single consumer polls
//! without blocking and decides itself when to sleep.

use crossbeam_channel::{Receiver, Sender, TryRecvError, unbounded};

use crate::pending::PendingRequest;

/// Build a matched producer/consumer pair.
pub fn intake_queue<T, S>() -> (IntakeProducer<T, S>, IntakeConsumer<T, S>) {
    let (tx, rx) = unbounded();
    (IntakeProducer { tx }, IntakeConsumer { rx })
}

/// Producer half. Cloned freely across caller threads.
pub struct IntakeProducer<T, S> {
    tx: Sender<PendingRequest<T, S>>,
}

impl<T, S> Clone for IntakeProducer<T, S> {
    fn clone(&self) -> Self {
        Self {
            tx: self.tx.clone(),
        }
    }
}

impl<T, S> IntakeProducer<T, S> {
    /// Push a request. On the (teardown-only) failure path the request is
    /// returned; dropping it wakes its caller with `Abandoned`.
    pub fn push(&self, request: PendingRequest<T, S>) -> Result<(), PendingRequest<T, S>> {
        self.tx.send(request).map_err(|e| e.into_inner())
    }

    /// Requests pushed but not yet popped.
    pub fn len(&self) -> usize {
        self.tx.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tx.is_empty()
    }
}

/// Consumer half. Only one engine thread pops at a time; the facade keeps a
/// clone so a restarted worker drains what an earlier one left queued.
pub struct IntakeConsumer<T, S> {
    rx: Receiver<PendingRequest<T, S>>,
}

impl<T, S> Clone for IntakeConsumer<T, S> {
    fn clone(&self) -> Self {
        Self {
            rx: self.rx.clone(),
        }
    }
}

impl<T, S> IntakeConsumer<T, S> {
    /// Non-blocking pop. `None` when the queue is empty (or all producers are gone).
    pub fn try_pop(&self) -> Option<PendingRequest<T, S>> {
        match self.rx.try_recv() {
            Ok(req) => Some(req),
            Err(TryRecvError::Empty) | Err(TryRecvError::Disconnected) => None,
        }
    }

    pub fn len(&self) -> usize {
        self.rx.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rx.is_empty()
    }
}
