//! The job engine: submission, status, download resolution and admin
//! operations over one explicitly constructed set of components.
//!
//! There is no process-global queue. Callers build a [`JobEngine`] and pass
//! it (usually inside an `Arc`) to whatever needs it.

use crate::artifact::{self, ContainmentError};
use crate::config::EngineConfig;
use crate::converter::{ConversionRequest, ConverterRegistry};
use crate::error::{ErrorCode, JobError};
use crate::job::{JobId, JobRecord, JobStatus};
use crate::metrics::{EngineStats, MetricsSnapshot};
use crate::queue::{JobQueue, QueuedJob};
use crate::reaper::{Reaper, SweepReport};
use crate::store::JobStore;
use crate::worker::{CancelRegistry, WorkerContext, WorkerPool};
use anyhow::Context;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use uuid::Uuid;

const DEFAULT_CONTENT_TYPE: &str = "application/octet-stream";

/// A completed artifact that passed the containment check.
#[derive(Debug, Clone)]
pub struct Artifact {
    /// Canonical path inside the output directory.
    pub path: PathBuf,
    pub download_name: String,
    pub content_type: String,
}

/// Result of a forced cleanup.
#[derive(Debug, Clone, Copy)]
pub struct CleanupOutcome {
    /// `false` if a sweep was already running and this request did nothing.
    pub ran: bool,
    pub report: SweepReport,
}

pub struct JobEngine {
    store: Arc<JobStore>,
    queue: Arc<JobQueue>,
    cancels: Arc<CancelRegistry>,
    stats: Arc<EngineStats>,
    registry: ConverterRegistry,
    output_dir: PathBuf,
    pool: WorkerPool,
    reaper: Arc<Reaper>,
    reaper_task: parking_lot::Mutex<Option<JoinHandle<()>>>,
    shutdown: CancellationToken,
}

impl JobEngine {
    /// Creates the output directory, starts the worker pool and, if
    /// configured, the periodic reaper. Must be called within a tokio
    /// runtime.
    pub fn start(config: EngineConfig, registry: ConverterRegistry) -> anyhow::Result<Self> {
        std::fs::create_dir_all(&config.output_dir).with_context(|| {
            format!("Failed to create output directory {}", config.output_dir.display())
        })?;
        let output_dir = config.output_dir.canonicalize().with_context(|| {
            format!("Failed to resolve output directory {}", config.output_dir.display())
        })?;

        let store = Arc::new(JobStore::new());
        let queue = Arc::new(JobQueue::new(config.queue_capacity));
        let cancels = Arc::new(CancelRegistry::new());
        let stats = Arc::new(EngineStats::new());

        let pool = WorkerPool::start(
            Arc::new(WorkerContext {
                store: store.clone(),
                queue: queue.clone(),
                cancels: cancels.clone(),
                stats: stats.clone(),
                output_dir: output_dir.clone(),
                job_timeout: config.job_timeout,
            }),
            config.workers,
        );

        let reaper = Arc::new(Reaper::new(
            store.clone(),
            cancels.clone(),
            stats.clone(),
            output_dir.clone(),
            config.retention,
        ));
        let shutdown = CancellationToken::new();
        let reaper_task = config
            .reaper_interval
            .map(|every| reaper.clone().spawn(every, shutdown.clone()));

        info!(
            output_dir = %output_dir.display(),
            workers = pool.size(),
            queue_capacity = ?config.queue_capacity,
            job_timeout_ms = ?config.job_timeout.map(|t| t.as_millis() as u64),
            kinds = ?registry.kinds(),
            "Job engine started"
        );

        Ok(Self {
            store,
            queue,
            cancels,
            stats,
            registry,
            output_dir,
            pool,
            reaper,
            reaper_task: parking_lot::Mutex::new(reaper_task),
            shutdown,
        })
    }

    /// Canonical output directory.
    pub fn output_dir(&self) -> &std::path::Path {
        &self.output_dir
    }

    pub fn store(&self) -> &Arc<JobStore> {
        &self.store
    }

    pub fn registry(&self) -> &ConverterRegistry {
        &self.registry
    }

    /// Validates the request, records a `queued` job and hands it to the
    /// worker pool. Never waits for the conversion.
    pub fn submit(&self, request: ConversionRequest) -> Result<JobId, JobError> {
        let entry = self.registry.get(&request.kind).ok_or_else(|| {
            JobError::validation(format!(
                "unknown conversion kind '{}' (supported: {})",
                request.kind,
                self.registry.kinds().join(", ")
            ))
        })?;
        if request.inputs.is_empty() {
            return Err(JobError::validation("at least one input file is required"));
        }
        entry.converter.validate(&request)?;

        let job_id = Uuid::new_v4();
        let download_name = artifact::safe_download_name(
            request.inputs.first().map(|input| input.name.as_str()),
            &entry.format.extension,
            job_id,
        );
        let record = JobRecord::with_id(job_id, request.kind.clone(), download_name);
        let cancel = CancellationToken::new();
        let kind = request.kind.clone();
        let inputs = request.inputs.len();

        let job = QueuedJob {
            job_id,
            request: Arc::new(request),
            converter: entry.converter.clone(),
            format: entry.format.clone(),
            cancel: cancel.clone(),
        };

        self.queue.enqueue(job, || {
            self.store.put(record);
            self.cancels.insert(job_id, cancel);
        })?;
        self.stats.job_submitted();

        info!(job_id = %job_id, kind = %kind, inputs, "Job submitted");
        Ok(job_id)
    }

    /// Current record of a job.
    pub fn status(&self, id: &JobId) -> Result<JobRecord, JobError> {
        self.store
            .get(id)
            .ok_or_else(|| JobError::not_found(format!("job {} not found", id)))
    }

    /// Requests cooperative cancellation. The worker performs the transition
    /// to `failed` with code `cancelled`.
    pub fn cancel(&self, id: &JobId) -> Result<JobRecord, JobError> {
        let record = self.status(id)?;
        if record.status.is_terminal() {
            return Err(JobError::validation(format!(
                "job {} already finished ({})",
                id, record.status
            )));
        }
        if self.cancels.cancel(id) {
            info!(job_id = %id, "Job cancellation requested");
        }
        Ok(record)
    }

    /// Looks up a succeeded job's artifact and enforces that it lies inside
    /// the output directory.
    pub fn resolve_download(&self, id: &JobId) -> Result<Artifact, JobError> {
        let record = self.status(id)?;
        if record.status != JobStatus::Succeeded {
            return Err(JobError::not_ready(format!(
                "job {} is not finished successfully (status: {})",
                id, record.status
            )));
        }

        let stored = record
            .output_path
            .as_deref()
            .ok_or_else(|| JobError::internal("succeeded job has no artifact"))?;

        let path = match artifact::resolve_contained(&self.output_dir, stored) {
            Ok(path) => path,
            Err(ContainmentError::Outside(_)) => {
                warn!(
                    target: "security",
                    job_id = %id,
                    path = %stored.display(),
                    "Blocked download of a path outside the output directory"
                );
                return Err(JobError::forbidden("access to this artifact is not allowed"));
            }
            Err(ContainmentError::Unavailable(e)) => {
                debug!(job_id = %id, error = %e, "Artifact missing");
                return Err(JobError::new(
                    ErrorCode::NotFound,
                    format!("artifact for job {} has expired", id),
                ));
            }
        };

        let content_type = self
            .registry
            .get(&record.kind)
            .map(|entry| entry.format.content_type.clone())
            .unwrap_or_else(|| DEFAULT_CONTENT_TYPE.to_string());

        Ok(Artifact {
            path,
            download_name: record.download_name,
            content_type,
        })
    }

    pub fn metrics(&self) -> MetricsSnapshot {
        let workers = self.pool.size();
        let busy_workers = self.stats.busy_workers().min(workers);
        MetricsSnapshot {
            counts: self.store.counts(),
            queue_depth: self.queue.queue_length(),
            queue_capacity: self.queue.capacity(),
            workers,
            busy_workers,
            utilization: busy_workers as f64 / workers as f64,
            totals: self.stats.totals(),
        }
    }

    /// Runs one reaper sweep now, unless one is already in progress.
    pub async fn force_cleanup(&self) -> CleanupOutcome {
        match self.reaper.try_run_once().await {
            Some(report) => CleanupOutcome { ran: true, report },
            None => CleanupOutcome {
                ran: false,
                report: SweepReport::default(),
            },
        }
    }

    /// Runs one reaper sweep now, waiting for any sweep in progress.
    pub async fn sweep(&self) -> SweepReport {
        self.reaper.run_once().await
    }

    /// Stops the reaper and waits for workers to finish their current job.
    pub async fn shutdown(&self) {
        self.shutdown.cancel();
        let reaper_task = self.reaper_task.lock().take();
        if let Some(task) = reaper_task {
            let _ = task.await;
        }
        self.pool.shutdown().await;
        info!("Job engine stopped");
    }
}
