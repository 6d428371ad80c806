//! Engine counters and the point-in-time metrics snapshot.

use crate::store::StatusCounts;
use serde::Serialize;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};

/// Counters updated by the submission path, workers and reaper.
#[derive(Debug, Default)]
pub struct EngineStats {
    busy_workers: AtomicUsize,
    submitted: AtomicU64,
    succeeded: AtomicU64,
    failed: AtomicU64,
    reaped: AtomicU64,
}

impl EngineStats {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn job_submitted(&self) {
        self.submitted.fetch_add(1, Ordering::Relaxed);
    }

    pub fn job_succeeded(&self) {
        self.succeeded.fetch_add(1, Ordering::Relaxed);
    }

    pub fn job_failed(&self) {
        self.failed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn records_reaped(&self, count: usize) {
        self.reaped.fetch_add(count as u64, Ordering::Relaxed);
    }

    /// Marks one worker slot busy until the returned guard is dropped.
    pub fn busy_guard(&self) -> BusyGuard<'_> {
        self.busy_workers.fetch_add(1, Ordering::SeqCst);
        BusyGuard(&self.busy_workers)
    }

    pub fn busy_workers(&self) -> usize {
        self.busy_workers.load(Ordering::SeqCst)
    }

    pub fn totals(&self) -> LifetimeTotals {
        LifetimeTotals {
            submitted: self.submitted.load(Ordering::Relaxed),
            succeeded: self.succeeded.load(Ordering::Relaxed),
            failed: self.failed.load(Ordering::Relaxed),
            reaped: self.reaped.load(Ordering::Relaxed),
        }
    }
}

pub struct BusyGuard<'a>(&'a AtomicUsize);

impl Drop for BusyGuard<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

/// Counters since process start.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct LifetimeTotals {
    pub submitted: u64,
    pub succeeded: u64,
    pub failed: u64,
    pub reaped: u64,
}

/// Response body of `GET /admin/jobs/metrics`.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MetricsSnapshot {
    #[serde(flatten)]
    pub counts: StatusCounts,
    pub queue_depth: usize,
    pub queue_capacity: Option<usize>,
    pub workers: usize,
    pub busy_workers: usize,
    /// `busy_workers / workers`, in [0, 1].
    pub utilization: f64,
    pub totals: LifetimeTotals,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_busy_guard_releases_slot() {
        let stats = EngineStats::new();
        {
            let _a = stats.busy_guard();
            let _b = stats.busy_guard();
            assert_eq!(stats.busy_workers(), 2);
        }
        assert_eq!(stats.busy_workers(), 0);
    }

    #[test]
    fn test_snapshot_serializes_flat_counts() {
        let stats = EngineStats::new();
        stats.job_submitted();
        stats.job_failed();
        stats.records_reaped(3);

        let snapshot = MetricsSnapshot {
            counts: StatusCounts {
                queued: 1,
                running: 2,
                succeeded: 3,
                failed: 4,
            },
            queue_depth: 1,
            queue_capacity: None,
            workers: 4,
            busy_workers: 2,
            utilization: 0.5,
            totals: stats.totals(),
        };

        let json = serde_json::to_value(&snapshot).unwrap();
        assert_eq!(json["queued"], 1);
        assert_eq!(json["running"], 2);
        assert_eq!(json["queueDepth"], 1);
        assert_eq!(json["busyWorkers"], 2);
        assert_eq!(json["totals"]["submitted"], 1);
        assert_eq!(json["totals"]["reaped"], 3);
    }
}
