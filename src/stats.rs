//! Per-engine counters. Lock-free; every engine owns its own set.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use crate::engine::FlushReason;

#[derive(Debug, Default)]
pub struct EngineStats {
    // Throughput (cumulative)
    submitted: AtomicU64,
    batches: AtomicU64,
    items_batched: AtomicU64,
    // Flush decisions
    full_flushes: AtomicU64,
    deadline_flushes: AtomicU64,
    // Failures
    failed_batches: AtomicU64,
    size_mismatches: AtomicU64,
    abandoned: AtomicU64,
    // Timing
    handler_nanos: AtomicU64,
    // Gauges (high-water marks)
    max_batch_len: AtomicU64,
    max_latency_nanos: AtomicU64,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StatsSnapshot {
    pub submitted: u64,
    pub batches: u64,
    pub items_batched: u64,
    pub full_flushes: u64,
    pub deadline_flushes: u64,
    pub failed_batches: u64,
    pub size_mismatches: u64,
    pub abandoned: u64,
    pub handler_time: Duration,
    pub max_batch_len: u64,
    /// Longest enqueue-to-completion time any caller has seen.
    pub max_latency: Duration,
}

impl StatsSnapshot {
    /// Average dispatched batch size (0.0 before the first batch).
    pub fn avg_batch_size(&self) -> f64 {
        if self.batches == 0 {
            return 0.0;
        }
        self.items_batched as f64 / self.batches as f64
    }

    /// Counter deltas since `earlier`. High-water marks are carried as-is.
    pub fn delta_since(&self, earlier: &StatsSnapshot) -> StatsSnapshot {
        StatsSnapshot {
            submitted: self.submitted.saturating_sub(earlier.submitted),
            batches: self.batches.saturating_sub(earlier.batches),
            items_batched: self.items_batched.saturating_sub(earlier.items_batched),
            full_flushes: self.full_flushes.saturating_sub(earlier.full_flushes),
            deadline_flushes: self.deadline_flushes.saturating_sub(earlier.deadline_flushes),
            failed_batches: self.failed_batches.saturating_sub(earlier.failed_batches),
            size_mismatches: self.size_mismatches.saturating_sub(earlier.size_mismatches),
            abandoned: self.abandoned.saturating_sub(earlier.abandoned),
            handler_time: self.handler_time.saturating_sub(earlier.handler_time),
            max_batch_len: self.max_batch_len,
            max_latency: self.max_latency,
        }
    }
}

fn update_max(target: &AtomicU64, value: u64) {
    let mut prev = target.load(Ordering::Relaxed);
    while value > prev {
        match target.compare_exchange_weak(prev, value, Ordering::Relaxed, Ordering::Relaxed) {
            Ok(_) => break,
            Err(next) => prev = next,
        }
    }
}

fn nanos(d: Duration) -> u64 {
    u64::try_from(d.as_nanos()).unwrap_or(u64::MAX)
}

impl EngineStats {
    pub fn inc_submitted(&self) {
        self.submitted.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_abandoned(&self, n: usize) {
        self.abandoned.fetch_add(n as u64, Ordering::Relaxed);
    }

    pub fn record_flush(&self, reason: FlushReason, len: usize) {
        self.batches.fetch_add(1, Ordering::Relaxed);
        self.items_batched.fetch_add(len as u64, Ordering::Relaxed);
        update_max(&self.max_batch_len, len as u64);
        match reason {
            FlushReason::Full => self.full_flushes.fetch_add(1, Ordering::Relaxed),
            FlushReason::Deadline => self.deadline_flushes.fetch_add(1, Ordering::Relaxed),
        };
    }

    pub fn record_handler_time(&self, elapsed: Duration) {
        self.handler_nanos.fetch_add(nanos(elapsed), Ordering::Relaxed);
    }

    pub fn record_latency(&self, latency: Duration) {
        update_max(&self.max_latency_nanos, nanos(latency));
    }

    pub fn inc_failed(&self) {
        self.failed_batches.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_size_mismatch(&self) {
        self.size_mismatches.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            submitted: self.submitted.load(Ordering::Relaxed),
            batches: self.batches.load(Ordering::Relaxed),
            items_batched: self.items_batched.load(Ordering::Relaxed),
            full_flushes: self.full_flushes.load(Ordering::Relaxed),
            deadline_flushes: self.deadline_flushes.load(Ordering::Relaxed),
            failed_batches: self.failed_batches.load(Ordering::Relaxed),
            size_mismatches: self.size_mismatches.load(Ordering::Relaxed),
            abandoned: self.abandoned.load(Ordering::Relaxed),
            handler_time: Duration::from_nanos(self.handler_nanos.load(Ordering::Relaxed)),
            max_batch_len: self.max_batch_len.load(Ordering::Relaxed),
            max_latency: Duration::from_nanos(self.max_latency_nanos.load(Ordering::Relaxed)),
        }
    }
}
