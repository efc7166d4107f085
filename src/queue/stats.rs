//! Per-queue counters.

use std::sync::atomic::{AtomicUsize, Ordering};

use serde::Serialize;

/// Running totals for one queue manager.
///
/// Atomic counters so worker tasks can update them without locking.
#[derive(Debug, Default)]
pub struct QueueStats {
    completed: AtomicUsize,
    failed: AtomicUsize,
    retried: AtomicUsize,
    cancelled: AtomicUsize,
    recovered: AtomicUsize,
    dropped_progress_writes: AtomicUsize,
}

/// Plain copy of [`QueueStats`] for reporting.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct QueueStatsSnapshot {
    /// Tasks finished successfully.
    pub completed: usize,
    /// Tasks that ended `Failed`.
    pub failed: usize,
    /// Automatic retries scheduled.
    pub retried: usize,
    /// Tasks cancelled by the caller.
    pub cancelled: usize,
    /// Tasks found `Active` at startup and returned to the queue.
    pub recovered: usize,
    /// Progress writes that failed and were skipped.
    pub dropped_progress_writes: usize,
}

impl QueueStats {
    /// Creates a stats tracker with zero counts.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the number of completed tasks.
    #[must_use]
    pub fn completed(&self) -> usize {
        self.completed.load(Ordering::SeqCst)
    }

    /// Returns the number of failed tasks.
    #[must_use]
    pub fn failed(&self) -> usize {
        self.failed.load(Ordering::SeqCst)
    }

    /// Returns the number of retries scheduled.
    #[must_use]
    pub fn retried(&self) -> usize {
        self.retried.load(Ordering::SeqCst)
    }

    /// Returns the number of cancelled tasks.
    #[must_use]
    pub fn cancelled(&self) -> usize {
        self.cancelled.load(Ordering::SeqCst)
    }

    /// Returns the number of tasks recovered at startup.
    #[must_use]
    pub fn recovered(&self) -> usize {
        self.recovered.load(Ordering::SeqCst)
    }

    /// Returns the number of dropped progress writes.
    #[must_use]
    pub fn dropped_progress_writes(&self) -> usize {
        self.dropped_progress_writes.load(Ordering::SeqCst)
    }

    /// Copies all counters.
    #[must_use]
    pub fn snapshot(&self) -> QueueStatsSnapshot {
        QueueStatsSnapshot {
            completed: self.completed(),
            failed: self.failed(),
            retried: self.retried(),
            cancelled: self.cancelled(),
            recovered: self.recovered(),
            dropped_progress_writes: self.dropped_progress_writes(),
        }
    }

    pub(crate) fn increment_completed(&self) {
        self.completed.fetch_add(1, Ordering::SeqCst);
    }

    pub(crate) fn increment_failed(&self) {
        self.failed.fetch_add(1, Ordering::SeqCst);
    }

    pub(crate) fn increment_retried(&self) {
        self.retried.fetch_add(1, Ordering::SeqCst);
    }

    pub(crate) fn increment_cancelled(&self) {
        self.cancelled.fetch_add(1, Ordering::SeqCst);
    }

    pub(crate) fn add_recovered(&self, count: usize) {
        self.recovered.fetch_add(count, Ordering::SeqCst);
    }

    pub(crate) fn add_dropped_progress_writes(&self, count: usize) {
        self.dropped_progress_writes
            .fetch_add(count, Ordering::SeqCst);
    }
}
