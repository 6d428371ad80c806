//! TTL reaper: deletes expired artifacts and their job records.
//!
//! A sweep removes, in this order, the record and then the artifact file of
//! every job past the retention window, followed by stray files in the
//! output directory that no record owns. Records go first so new downloads
//! of an expiring job already answer `not_found`; a download stream that has
//! its file open keeps reading from the unlinked inode. Platforms that refuse
//! to unlink an open file leave it behind as an orphan, and the next sweep
//! retries it.

use crate::artifact::{self, ContainmentError};
use crate::job::{JobRecord, JobStatus};
use crate::metrics::EngineStats;
use crate::store::JobStore;
use crate::telemetry;
use crate::worker::CancelRegistry;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, SystemTime};
use tokio::task::JoinHandle;
use tokio::time::{interval, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

/// Minimum age of a stray file before it is considered orphaned. Protects
/// temporary files of writes that are still in progress.
const ORPHAN_MIN_AGE: Duration = Duration::from_secs(60);

/// Outcome of one sweep.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SweepReport {
    pub records_removed: usize,
    pub files_removed: usize,
    pub errors: usize,
}

pub struct Reaper {
    store: Arc<JobStore>,
    cancels: Arc<CancelRegistry>,
    stats: Arc<EngineStats>,
    output_dir: PathBuf,
    retention: Duration,
    /// Serializes sweeps.
    sweep_lock: Mutex<()>,
}

impl Reaper {
    pub fn new(
        store: Arc<JobStore>,
        cancels: Arc<CancelRegistry>,
        stats: Arc<EngineStats>,
        output_dir: PathBuf,
        retention: Duration,
    ) -> Self {
        Self {
            store,
            cancels,
            stats,
            output_dir,
            retention,
            sweep_lock: Mutex::new(()),
        }
    }

    pub fn retention(&self) -> Duration {
        self.retention
    }

    /// Runs one sweep, waiting for a concurrent sweep to finish first.
    pub async fn run_once(self: &Arc<Self>) -> SweepReport {
        let reaper = self.clone();
        match tokio::task::spawn_blocking(move || {
            let _guard = reaper.sweep_lock.lock();
            reaper.sweep()
        })
        .await
        {
            Ok(report) => report,
            Err(e) => {
                error!(error = %e, "Reaper sweep task failed");
                SweepReport {
                    errors: 1,
                    ..SweepReport::default()
                }
            }
        }
    }

    /// Runs one sweep unless another one is in progress, in which case
    /// `None` is returned and nothing is done.
    pub async fn try_run_once(self: &Arc<Self>) -> Option<SweepReport> {
        let reaper = self.clone();
        match tokio::task::spawn_blocking(move || {
            let _guard = reaper.sweep_lock.try_lock()?;
            Some(reaper.sweep())
        })
        .await
        {
            Ok(report) => report,
            Err(e) => {
                error!(error = %e, "Reaper sweep task failed");
                None
            }
        }
    }

    /// Starts the periodic sweep loop.
    pub fn spawn(self: Arc<Self>, every: Duration, shutdown: CancellationToken) -> JoinHandle<()> {
        tokio::spawn(async move {
            info!(
                interval_secs = every.as_secs(),
                retention_secs = self.retention.as_secs(),
                "Reaper started"
            );
            let mut ticker = interval(every);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            // The first tick completes immediately; skip it so startup is quiet.
            ticker.tick().await;

            loop {
                tokio::select! {
                    _ = shutdown.cancelled() => break,
                    _ = ticker.tick() => {
                        self.run_once().await;
                    }
                }
            }
            debug!("Reaper stopped");
        })
    }

    fn sweep(&self) -> SweepReport {
        let now = Utc::now();
        let cutoff = chrono::Duration::from_std(self.retention)
            .ok()
            .and_then(|retention| now.checked_sub_signed(retention));
        let mut report = SweepReport::default();

        if let Some(cutoff) = cutoff {
            for record in self.store.list_all() {
                if !is_expired(&record, cutoff) {
                    continue;
                }
                // Re-check under the store lock: the job may have moved on.
                let Some(removed) = self.store.delete_if(&record.id, |r| is_expired(r, cutoff)) else {
                    continue;
                };
                report.records_removed += 1;
                self.cancels.remove(&removed.id);
                debug!(job_id = %removed.id, status = %removed.status, "Reaped job record");

                if let Some(path) = &removed.output_path {
                    self.remove_artifact(removed.id, path, &mut report);
                }
            }
        }

        self.sweep_orphans(&mut report);

        self.stats.records_reaped(report.records_removed);
        if report.records_removed > 0 || report.files_removed > 0 || report.errors > 0 {
            info!(
                records_removed = report.records_removed,
                files_removed = report.files_removed,
                errors = report.errors,
                "Reaper sweep finished"
            );
        }
        telemetry::record_sweep_telemetry(&report);
        report
    }

    fn remove_artifact(&self, job_id: Uuid, path: &Path, report: &mut SweepReport) {
        let resolved = match artifact::resolve_contained(&self.output_dir, path) {
            Ok(resolved) => resolved,
            Err(ContainmentError::Outside(_)) => {
                warn!(
                    target: "security",
                    job_id = %job_id,
                    path = %path.display(),
                    "Reaper refused to delete a file outside the output directory"
                );
                return;
            }
            // Already gone.
            Err(ContainmentError::Unavailable(_)) => return,
        };

        match artifact::remove_if_exists(&resolved) {
            Ok(true) => report.files_removed += 1,
            Ok(false) => {}
            Err(e) => {
                report.errors += 1;
                warn!(job_id = %job_id, error = %e, "Failed to delete artifact; will retry as orphan");
            }
        }
    }

    /// Deletes files in the output directory that no record owns and that
    /// are older than the retention window.
    fn sweep_orphans(&self, report: &mut SweepReport) {
        let min_age = self.retention.max(ORPHAN_MIN_AGE);
        let Some(cutoff) = SystemTime::now().checked_sub(min_age) else {
            return;
        };

        let entries = match std::fs::read_dir(&self.output_dir) {
            Ok(entries) => entries,
            Err(e) => {
                report.errors += 1;
                error!(dir = %self.output_dir.display(), error = %e, "Failed to list output directory");
                return;
            }
        };

        for entry in entries.flatten() {
            let path = entry.path();
            // Symlinks are inspected, not followed.
            let Ok(meta) = std::fs::symlink_metadata(&path) else {
                continue;
            };
            if meta.is_dir() {
                continue;
            }
            if owning_job(&path).is_some_and(|id| self.store.contains(&id)) {
                continue;
            }
            let modified = meta.modified().unwrap_or(SystemTime::UNIX_EPOCH);
            if modified > cutoff {
                continue;
            }

            match artifact::remove_if_exists(&path) {
                Ok(true) => {
                    report.files_removed += 1;
                    debug!(path = %path.display(), "Removed orphaned file");
                }
                Ok(false) => {}
                Err(e) => {
                    report.errors += 1;
                    warn!(path = %path.display(), error = %e, "Failed to remove orphaned file");
                }
            }
        }
    }
}

/// Terminal records expire by `finished_at`, queued records by `created_at`.
/// Running records never expire.
fn is_expired(record: &JobRecord, cutoff: DateTime<Utc>) -> bool {
    match record.status {
        JobStatus::Running => false,
        JobStatus::Queued => record.created_at <= cutoff,
        JobStatus::Succeeded | JobStatus::Failed => {
            record.finished_at.unwrap_or(record.created_at) <= cutoff
        }
    }
}

/// Job id encoded in an artifact filename (`<uuid>.<ext>`).
fn owning_job(path: &Path) -> Option<Uuid> {
    let name = path.file_name()?.to_str()?;
    let stem = name.split('.').next()?;
    Uuid::parse_str(stem).ok()
}
