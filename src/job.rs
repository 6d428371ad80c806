//! Job records and the lifecycle state machine.

use crate::error::{JobError, TransitionError};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use uuid::Uuid;

/// Opaque job identifier.
pub type JobId = Uuid;

/// One submitted unit of conversion work and its tracked state.
///
/// Fields are public for reading and serialization; state changes go through
/// [`JobRecord::start`], [`JobRecord::succeed`], [`JobRecord::fail`] and
/// [`JobRecord::set_progress`], which uphold the lifecycle invariants.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobRecord {
    pub id: JobId,
    pub kind: String,
    pub status: JobStatus,
    pub progress: u8,
    pub output_path: Option<PathBuf>,
    /// Sanitized attachment filename used when the artifact is served.
    pub download_name: String,
    pub error: Option<JobError>,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    Queued,
    Running,
    Succeeded,
    Failed,
}

impl JobStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, JobStatus::Succeeded | JobStatus::Failed)
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            JobStatus::Queued => write!(f, "queued"),
            JobStatus::Running => write!(f, "running"),
            JobStatus::Succeeded => write!(f, "succeeded"),
            JobStatus::Failed => write!(f, "failed"),
        }
    }
}

impl JobRecord {
    pub fn new(kind: impl Into<String>, download_name: impl Into<String>) -> Self {
        Self::with_id(Uuid::new_v4(), kind, download_name)
    }

    pub fn with_id(id: JobId, kind: impl Into<String>, download_name: impl Into<String>) -> Self {
        Self {
            id,
            kind: kind.into(),
            status: JobStatus::Queued,
            progress: 0,
            output_path: None,
            download_name: download_name.into(),
            error: None,
            created_at: Utc::now(),
            started_at: None,
            finished_at: None,
        }
    }

    /// `queued -> running`, performed once when a worker claims the job.
    pub fn start(&mut self) -> Result<(), TransitionError> {
        self.ensure_status(JobStatus::Queued, JobStatus::Running)?;
        self.status = JobStatus::Running;
        self.started_at = Some(not_before(self.created_at));
        Ok(())
    }

    /// Raises progress while running. Lower values, values after a terminal
    /// transition, and values before the claim are ignored.
    ///
    /// Returns `true` if the stored progress changed.
    pub fn set_progress(&mut self, percent: u8) -> bool {
        let percent = percent.min(100);
        if self.status != JobStatus::Running || percent <= self.progress {
            return false;
        }
        self.progress = percent;
        true
    }

    /// `running -> succeeded`. The artifact must already be on disk.
    pub fn succeed(&mut self, output_path: PathBuf) -> Result<(), TransitionError> {
        self.ensure_status(JobStatus::Running, JobStatus::Succeeded)?;
        self.status = JobStatus::Succeeded;
        self.progress = 100;
        self.output_path = Some(output_path);
        self.error = None;
        self.finished_at = Some(not_before(self.started_at.unwrap_or(self.created_at)));
        Ok(())
    }

    /// `running -> failed`.
    pub fn fail(&mut self, error: JobError) -> Result<(), TransitionError> {
        self.ensure_status(JobStatus::Running, JobStatus::Failed)?;
        self.status = JobStatus::Failed;
        self.output_path = None;
        self.error = Some(error);
        self.finished_at = Some(not_before(self.started_at.unwrap_or(self.created_at)));
        Ok(())
    }

    pub fn processing_duration_ms(&self) -> Option<i64> {
        match (self.started_at, self.finished_at) {
            (Some(started), Some(finished)) => {
                Some(finished.signed_duration_since(started).num_milliseconds())
            }
            _ => None,
        }
    }

    fn ensure_status(&self, expected: JobStatus, to: JobStatus) -> Result<(), TransitionError> {
        if self.status == expected {
            Ok(())
        } else {
            Err(TransitionError {
                job_id: self.id.to_string(),
                from: self.status.to_string(),
                to: to.to_string(),
            })
        }
    }
}

/// Current time, clamped so lifecycle timestamps never go backwards when the
/// wall clock does.
fn not_before(previous: DateTime<Utc>) -> DateTime<Utc> {
    Utc::now().max(previous)
}
