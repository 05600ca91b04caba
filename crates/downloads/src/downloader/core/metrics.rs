//! Activity metrics of a download manager
//!
//! Counters are updated by the manager and by download runs using atomics,
//! so they can be read at any time without taking the registry lock.

use std::sync::atomic::{AtomicU64, Ordering};

/// Counters describing what a manager has done since it was opened
#[derive(Debug, Default)]
pub struct DownloadMetrics {
    pub enqueued: AtomicU64,
    pub deduplicated: AtomicU64,
    pub recovered: AtomicU64,
    pub completed: AtomicU64,
    pub taken: AtomicU64,
    pub failed: AtomicU64,
    pub cancelled: AtomicU64,
    pub paused: AtomicU64,
    pub resumed: AtomicU64,
    pub bytes_received: AtomicU64,
}

impl DownloadMetrics {
    pub fn record_enqueued(&self) {
        self.enqueued.fetch_add(1, Ordering::Relaxed);
    }

    /// Record an enqueue that was folded into an existing download
    pub fn record_deduplicated(&self) {
        self.deduplicated.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_recovered(&self) {
        self.recovered.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_completed(&self) {
        self.completed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_taken(&self) {
        self.taken.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_failed(&self) {
        self.failed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_cancelled(&self) {
        self.cancelled.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_paused(&self) {
        self.paused.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_resumed(&self) {
        self.resumed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_bytes(&self, bytes: u64) {
        self.bytes_received.fetch_add(bytes, Ordering::Relaxed);
    }

    /// Get a snapshot of current metrics
    pub fn snapshot(&self) -> DownloadMetricsSnapshot {
        DownloadMetricsSnapshot {
            enqueued: self.enqueued.load(Ordering::Relaxed),
            deduplicated: self.deduplicated.load(Ordering::Relaxed),
            recovered: self.recovered.load(Ordering::Relaxed),
            completed: self.completed.load(Ordering::Relaxed),
            taken: self.taken.load(Ordering::Relaxed),
            failed: self.failed.load(Ordering::Relaxed),
            cancelled: self.cancelled.load(Ordering::Relaxed),
            paused: self.paused.load(Ordering::Relaxed),
            resumed: self.resumed.load(Ordering::Relaxed),
            bytes_received: self.bytes_received.load(Ordering::Relaxed),
        }
    }
}

/// Immutable snapshot of metrics
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DownloadMetricsSnapshot {
    pub enqueued: u64,
    pub deduplicated: u64,
    pub recovered: u64,
    pub completed: u64,
    pub taken: u64,
    pub failed: u64,
    pub cancelled: u64,
    pub paused: u64,
    pub resumed: u64,
    pub bytes_received: u64,
}

impl DownloadMetricsSnapshot {
    /// Share of finished downloads that completed rather than failed
    pub fn success_rate(&self) -> f64 {
        let finished = self.completed + self.failed;
        if finished == 0 {
            0.0
        } else {
            self.completed as f64 / finished as f64
        }
    }
}
