//! In-memory FIFO job queue feeding the worker pool.

use crate::converter::{ConversionRequest, Converter, OutputFormat};
use crate::error::{ErrorCode, JobError};
use crate::job::JobId;
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::Arc;
use tokio::sync::Notify;
use tokio_util::sync::CancellationToken;
use tracing::debug;

/// Work item handed from the submission path to a worker.
#[derive(Clone)]
pub struct QueuedJob {
    pub job_id: JobId,
    pub request: Arc<ConversionRequest>,
    pub converter: Arc<dyn Converter>,
    pub format: OutputFormat,
    /// Cooperative cancellation flag shared with the running conversion.
    pub cancel: CancellationToken,
}

impl std::fmt::Debug for QueuedJob {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("QueuedJob")
            .field("job_id", &self.job_id)
            .field("kind", &self.request.kind)
            .finish()
    }
}

/// FIFO queue with an optional depth bound.
///
/// Jobs are handed out strictly in enqueue order. The claim callback passed
/// to [`JobQueue::dequeue`] runs under the queue lock, so the `queued ->
/// running` transition happens in submission order as well.
pub struct JobQueue {
    items: Mutex<VecDeque<QueuedJob>>,
    notify: Notify,
    capacity: Option<usize>,
}

impl JobQueue {
    /// Creates a queue. `None` means unbounded.
    pub fn new(capacity: Option<usize>) -> Self {
        Self {
            items: Mutex::new(VecDeque::new()),
            notify: Notify::new(),
            capacity,
        }
    }

    /// Enqueues a job, failing fast with `queue_full` when the bound is hit.
    ///
    /// `register` runs under the queue lock after the capacity check and
    /// before the job becomes visible to workers; the submission path uses it
    /// to insert the job record so no worker can dequeue an unknown job.
    pub fn enqueue(&self, job: QueuedJob, register: impl FnOnce()) -> Result<(), JobError> {
        {
            let mut items = self.items.lock();
            if let Some(capacity) = self.capacity {
                if items.len() >= capacity {
                    return Err(JobError::new(
                        ErrorCode::QueueFull,
                        format!("job queue is full ({} pending)", items.len()),
                    ));
                }
            }
            register();
            debug!(job_id = %job.job_id, depth = items.len() + 1, "Enqueued job");
            items.push_back(job);
        }
        self.notify.notify_one();
        Ok(())
    }

    /// Waits for the next claimable job.
    ///
    /// Items for which `claim` returns `false` (for example because their
    /// record was reaped while waiting) are dropped and the next one is tried.
    pub async fn dequeue(&self, mut claim: impl FnMut(&QueuedJob) -> bool) -> QueuedJob {
        loop {
            let notified = self.notify.notified();
            {
                let mut items = self.items.lock();
                while let Some(job) = items.pop_front() {
                    if claim(&job) {
                        if !items.is_empty() {
                            // Pass the wakeup on so idle workers drain the backlog.
                            self.notify.notify_one();
                        }
                        return job;
                    }
                    debug!(job_id = %job.job_id, "Dropping unclaimable job from queue");
                }
            }
            notified.await;
        }
    }

    /// Returns the current queue length.
    pub fn queue_length(&self) -> usize {
        self.items.lock().len()
    }

    pub fn capacity(&self) -> Option<usize> {
        self.capacity
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::converter::{self, JobContext};
    use std::time::Duration;

    fn queued(kind: &str) -> QueuedJob {
        QueuedJob {
            job_id: uuid::Uuid::new_v4(),
            request: Arc::new(ConversionRequest::new(kind)),
            converter: converter::from_fn(|_req: &ConversionRequest, _ctx: &JobContext| Ok(Vec::new())),
            format: OutputFormat::new("bin", "application/octet-stream"),
            cancel: CancellationToken::new(),
        }
    }

    #[tokio::test]
    async fn test_enqueue_dequeue_fifo() {
        let queue = JobQueue::new(None);
        let first = queued("a");
        let second = queued("b");
        let (first_id, second_id) = (first.job_id, second.job_id);

        queue.enqueue(first, || {}).unwrap();
        queue.enqueue(second, || {}).unwrap();
        assert_eq!(queue.queue_length(), 2);

        assert_eq!(queue.dequeue(|_| true).await.job_id, first_id);
        assert_eq!(queue.dequeue(|_| true).await.job_id, second_id);
        assert_eq!(queue.queue_length(), 0);
    }

    #[tokio::test]
    async fn test_capacity_bound_fails_fast() {
        let queue = JobQueue::new(Some(1));
        queue.enqueue(queued("a"), || {}).unwrap();

        let mut registered = false;
        let err = queue.enqueue(queued("b"), || registered = true).unwrap_err();
        assert_eq!(err.code, ErrorCode::QueueFull);
        assert!(!registered, "rejected jobs must not be registered");
    }

    #[tokio::test]
    async fn test_unclaimable_jobs_are_skipped() {
        let queue = JobQueue::new(None);
        let stale = queued("stale");
        let live = queued("live");
        let (stale_id, live_id) = (stale.job_id, live.job_id);
        queue.enqueue(stale, || {}).unwrap();
        queue.enqueue(live, || {}).unwrap();

        let job = queue.dequeue(|j| j.job_id != stale_id).await;
        assert_eq!(job.job_id, live_id);
        assert_eq!(queue.queue_length(), 0);
    }

    #[tokio::test]
    async fn test_dequeue_waits_for_enqueue() {
        let queue = Arc::new(JobQueue::new(None));
        let waiter = {
            let queue = queue.clone();
            tokio::spawn(async move { queue.dequeue(|_| true).await.job_id })
        };

        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!waiter.is_finished());

        let job = queued("late");
        let id = job.job_id;
        queue.enqueue(job, || {}).unwrap();

        let got = tokio::time::timeout(Duration::from_secs(2), waiter)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(got, id);
    }
}
