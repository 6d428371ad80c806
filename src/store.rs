//! In-memory job store, the single source of truth for job status.

use crate::job::{JobId, JobRecord, JobStatus};
use parking_lot::Mutex;
use serde::Serialize;
use std::collections::HashMap;

/// Number of records per status at one instant.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct StatusCounts {
    pub queued: usize,
    pub running: usize,
    pub succeeded: usize,
    pub failed: usize,
}

/// Concurrency-safe table of job records.
///
/// One coarse lock guards the whole map. Every operation, including the
/// mutator passed to [`JobStore::update`], runs entirely under that lock and
/// never across an `.await`, so updates cannot be lost or interleaved.
#[derive(Debug, Default)]
pub struct JobStore {
    jobs: Mutex<HashMap<JobId, JobRecord>>,
}

impl JobStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Inserts a record, replacing any record with the same id.
    pub fn put(&self, record: JobRecord) {
        self.jobs.lock().insert(record.id, record);
    }

    pub fn get(&self, id: &JobId) -> Option<JobRecord> {
        self.jobs.lock().get(id).cloned()
    }

    /// Applies `mutator` atomically to the record with the given id.
    ///
    /// Returns `None` if no such record exists.
    pub fn update<T>(&self, id: &JobId, mutator: impl FnOnce(&mut JobRecord) -> T) -> Option<T> {
        let mut jobs = self.jobs.lock();
        jobs.get_mut(id).map(mutator)
    }

    pub fn delete(&self, id: &JobId) -> Option<JobRecord> {
        self.jobs.lock().remove(id)
    }

    /// Removes the record only if `predicate` still holds at deletion time.
    pub fn delete_if(&self, id: &JobId, predicate: impl FnOnce(&JobRecord) -> bool) -> Option<JobRecord> {
        let mut jobs = self.jobs.lock();
        match jobs.get(id) {
            Some(record) if predicate(record) => jobs.remove(id),
            _ => None,
        }
    }

    /// Point-in-time copy of every record.
    pub fn list_all(&self) -> Vec<JobRecord> {
        self.jobs.lock().values().cloned().collect()
    }

    pub fn contains(&self, id: &JobId) -> bool {
        self.jobs.lock().contains_key(id)
    }

    pub fn len(&self) -> usize {
        self.jobs.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.jobs.lock().is_empty()
    }

    pub fn counts(&self) -> StatusCounts {
        let jobs = self.jobs.lock();
        let mut counts = StatusCounts::default();
        for record in jobs.values() {
            match record.status {
                JobStatus::Queued => counts.queued += 1,
                JobStatus::Running => counts.running += 1,
                JobStatus::Succeeded => counts.succeeded += 1,
                JobStatus::Failed => counts.failed += 1,
            }
        }
        counts
    }
}
