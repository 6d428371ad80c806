//! Worker pool executing queued conversions.
//!
//! Each of the `N` workers loops: dequeue and claim the next job, run its
//! conversion on the blocking thread pool, persist the output, finalize the
//! record. A failing, panicking or overrunning conversion only ever affects
//! its own job record.

use crate::artifact;
use crate::converter::JobContext;
use crate::error::{ErrorCode, JobError};
use crate::job::JobId;
use crate::metrics::EngineStats;
use crate::queue::{JobQueue, QueuedJob};
use crate::store::JobStore;
use crate::telemetry;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Cancellation tokens of jobs that have not finished yet, keyed by job id.
#[derive(Debug, Default)]
pub struct CancelRegistry {
    tokens: Mutex<HashMap<JobId, CancellationToken>>,
}

impl CancelRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, id: JobId, token: CancellationToken) {
        self.tokens.lock().insert(id, token);
    }

    /// Signals cancellation. Returns `true` if the job was still tracked.
    pub fn cancel(&self, id: &JobId) -> bool {
        match self.tokens.lock().get(id) {
            Some(token) => {
                token.cancel();
                true
            }
            None => false,
        }
    }

    pub fn remove(&self, id: &JobId) {
        self.tokens.lock().remove(id);
    }

    pub fn len(&self) -> usize {
        self.tokens.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.tokens.lock().is_empty()
    }
}

/// Everything a worker needs, shared by all workers of a pool.
pub struct WorkerContext {
    pub store: Arc<JobStore>,
    pub queue: Arc<JobQueue>,
    pub cancels: Arc<CancelRegistry>,
    pub stats: Arc<EngineStats>,
    /// Canonical output directory.
    pub output_dir: PathBuf,
    pub job_timeout: Option<Duration>,
}

/// A fixed-size pool of workers.
pub struct WorkerPool {
    workers: usize,
    shutdown: CancellationToken,
    tasks: Mutex<Option<JoinSet<()>>>,
}

impl WorkerPool {
    /// Spawns `workers` worker tasks. Must be called within a tokio runtime.
    pub fn start(ctx: Arc<WorkerContext>, workers: usize) -> Self {
        let workers = workers.max(1);
        let shutdown = CancellationToken::new();
        let mut join_set = JoinSet::new();

        info!("Starting worker pool with {} workers", workers);

        for worker_id in 0..workers {
            let ctx = ctx.clone();
            let shutdown = shutdown.clone();
            join_set.spawn(async move { worker_loop(worker_id, ctx, shutdown).await });
        }

        Self {
            workers,
            shutdown,
            tasks: Mutex::new(Some(join_set)),
        }
    }

    pub fn size(&self) -> usize {
        self.workers
    }

    /// Stops accepting work and waits for in-flight jobs to finish.
    pub async fn shutdown(&self) {
        self.shutdown.cancel();
        let tasks = self.tasks.lock().take();
        if let Some(mut join_set) = tasks {
            while let Some(result) = join_set.join_next().await {
                if let Err(e) = result {
                    error!("Worker task ended abnormally: {}", e);
                }
            }
        }
        info!("Worker pool stopped");
    }
}

/// Main worker loop. Runs until the pool is shut down.
async fn worker_loop(worker_id: usize, ctx: Arc<WorkerContext>, shutdown: CancellationToken) {
    debug!("Worker {} started", worker_id);

    loop {
        let job = tokio::select! {
            _ = shutdown.cancelled() => break,
            job = ctx.queue.dequeue(|job| claim(&ctx, job)) => job,
        };

        let _busy = ctx.stats.busy_guard();
        process_job(&ctx, job).await;
    }

    debug!("Worker {} shutting down", worker_id);
}

/// `queued -> running`, under the queue lock. Returns `false` for jobs that
/// cannot be claimed; those are dropped from the queue.
fn claim(ctx: &WorkerContext, job: &QueuedJob) -> bool {
    match ctx.store.update(&job.job_id, |r| r.start()) {
        Some(Ok(())) => true,
        Some(Err(e)) => {
            error!(job_id = %job.job_id, error = %e, "Refusing to claim job");
            ctx.cancels.remove(&job.job_id);
            false
        }
        None => {
            warn!(job_id = %job.job_id, "Job record removed before it was claimed");
            ctx.cancels.remove(&job.job_id);
            false
        }
    }
}

/// Processes a single claimed job through to a terminal state.
pub(crate) async fn process_job(ctx: &WorkerContext, job: QueuedJob) {
    info!(job_id = %job.job_id, kind = %job.request.kind, "Processing job");

    let outcome = if job.cancel.is_cancelled() {
        Err(JobError::new(
            ErrorCode::Cancelled,
            "job was cancelled before it started",
        ))
    } else {
        execute(ctx, &job).await
    };

    finalize(ctx, &job, outcome);
    ctx.cancels.remove(&job.job_id);

    if let Some(record) = ctx.store.get(&job.job_id) {
        telemetry::record_job_telemetry(&record);
    }
}

/// Runs the conversion and writes its output. Returns the artifact path.
///
/// On timeout the worker slot is released while the blocking conversion keeps
/// running until it observes its cancellation token. A converter that never
/// checks the token can leave more than `N` conversions executing, although
/// at most `N` records are ever `running`.
async fn execute(ctx: &WorkerContext, job: &QueuedJob) -> Result<PathBuf, JobError> {
    let converter = job.converter.clone();
    let request = job.request.clone();
    let job_ctx = JobContext::new(job.job_id, ctx.store.clone(), job.cancel.clone());

    let handle = tokio::task::spawn_blocking(move || converter.convert(&request, &job_ctx));

    let joined = match ctx.job_timeout {
        Some(limit) => match tokio::time::timeout(limit, handle).await {
            Ok(joined) => joined,
            Err(_) => {
                // The blocking thread cannot be aborted; ask it to stop and
                // drop whatever it eventually returns.
                job.cancel.cancel();
                warn!(job_id = %job.job_id, timeout_ms = limit.as_millis() as u64, "Conversion timed out");
                return Err(JobError::new(
                    ErrorCode::Timeout,
                    format!("conversion exceeded {} ms", limit.as_millis()),
                ));
            }
        },
        None => handle.await,
    };

    let bytes = match joined {
        Ok(result) => result,
        Err(e) if e.is_panic() => {
            error!(job_id = %job.job_id, "Conversion panicked");
            return Err(JobError::internal("conversion crashed unexpectedly"));
        }
        Err(e) => {
            error!(job_id = %job.job_id, error = %e, "Conversion task failed");
            return Err(JobError::internal("conversion task failed"));
        }
    };

    if job.cancel.is_cancelled() {
        return Err(JobError::new(ErrorCode::Cancelled, "job was cancelled"));
    }
    let bytes = bytes?;

    let target = artifact::artifact_path(&ctx.output_dir, job.job_id, &job.format.extension);
    let write_target = target.clone();
    let written = tokio::task::spawn_blocking(move || artifact::write_atomic(&write_target, &bytes)).await;

    match written {
        Ok(Ok(())) => Ok(target),
        Ok(Err(e)) => {
            error!(job_id = %job.job_id, error = %e, "Failed to store conversion output");
            Err(JobError::internal("failed to store conversion output"))
        }
        Err(e) => {
            error!(job_id = %job.job_id, error = %e, "Artifact write task failed");
            Err(JobError::internal("failed to store conversion output"))
        }
    }
}

/// Moves the record into its terminal state.
fn finalize(ctx: &WorkerContext, job: &QueuedJob, outcome: Result<PathBuf, JobError>) {
    match outcome {
        Ok(path) => match ctx.store.update(&job.job_id, |r| r.succeed(path.clone())) {
            Some(Ok(())) => {
                ctx.stats.job_succeeded();
                info!(job_id = %job.job_id, "Job completed");
            }
            Some(Err(e)) => {
                error!(job_id = %job.job_id, error = %e, "Could not mark job succeeded");
                discard_artifact(job.job_id, &path);
            }
            None => {
                warn!(job_id = %job.job_id, "Job record removed while running; discarding artifact");
                discard_artifact(job.job_id, &path);
            }
        },
        Err(err) => {
            let code = err.code;
            match ctx.store.update(&job.job_id, |r| r.fail(err)) {
                Some(Ok(())) => {
                    ctx.stats.job_failed();
                    warn!(job_id = %job.job_id, code = %code, "Job failed");
                }
                Some(Err(e)) => {
                    error!(job_id = %job.job_id, error = %e, "Could not mark job failed");
                }
                None => {
                    warn!(job_id = %job.job_id, "Job record removed while running");
                }
            }
        }
    }
}

fn discard_artifact(job_id: JobId, path: &std::path::Path) {
    if let Err(e) = artifact::remove_if_exists(path) {
        error!(job_id = %job_id, error = %e, "Failed to remove orphaned artifact");
    }
}
