//! Lock-free counters describing what a queue has flushed so far.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::sync::atomic::{AtomicI64, AtomicU64, Ordering};

/// Snapshot of queue activity. Advisory only, like `pending_count()`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct QueueStats {
    /// Executor calls that returned an execution id.
    pub batches_flushed: u64,
    /// Executor calls that returned an error.
    pub batches_failed: u64,
    /// Detached batches dropped before the executor returned.
    pub batches_cancelled: u64,
    /// Merged actions handed to the executor, successful or not.
    pub actions_flushed: u64,
    /// Waiters resolved by a completed or cancelled executor call.
    pub waiters_resolved: u64,
    pub last_flush_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Default)]
pub(crate) struct StatsRecorder {
    batches_flushed: AtomicU64,
    batches_failed: AtomicU64,
    batches_cancelled: AtomicU64,
    actions_flushed: AtomicU64,
    waiters_resolved: AtomicU64,
    last_flush_ms: AtomicI64,
}

impl StatsRecorder {
    pub(crate) fn record(&self, succeeded: bool, actions: usize, waiters: usize) {
        let counter = if succeeded {
            &self.batches_flushed
        } else {
            &self.batches_failed
        };
        counter.fetch_add(1, Ordering::Relaxed);
        self.actions_flushed
            .fetch_add(actions as u64, Ordering::Relaxed);
        self.waiters_resolved
            .fetch_add(waiters as u64, Ordering::Relaxed);
        self.last_flush_ms
            .store(Utc::now().timestamp_millis(), Ordering::Relaxed);
    }

    pub(crate) fn record_cancelled(&self, waiters: usize) {
        self.batches_cancelled.fetch_add(1, Ordering::Relaxed);
        self.waiters_resolved
            .fetch_add(waiters as u64, Ordering::Relaxed);
    }

    pub(crate) fn snapshot(&self) -> QueueStats {
        let last_flush_ms = self.last_flush_ms.load(Ordering::Relaxed);
        QueueStats {
            batches_flushed: self.batches_flushed.load(Ordering::Relaxed),
            batches_failed: self.batches_failed.load(Ordering::Relaxed),
            batches_cancelled: self.batches_cancelled.load(Ordering::Relaxed),
            actions_flushed: self.actions_flushed.load(Ordering::Relaxed),
            waiters_resolved: self.waiters_resolved.load(Ordering::Relaxed),
            last_flush_at: (last_flush_ms > 0)
                .then(|| DateTime::from_timestamp_millis(last_flush_ms))
                .flatten(),
        }
    }
}
