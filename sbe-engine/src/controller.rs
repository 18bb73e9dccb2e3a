//! Job control surface
//!
//! `start`, `pause`, `resume`, and `status` over batch jobs. Each running job
//! owns a cancellation token and a task handle; jobs with the same rate limit
//! share one limiter, so they draw on one provider quota.
//!
//! A job slot is claimed under the `jobs` write lock before any task is
//! spawned, so one job never has two live tasks.

use crate::analyzer::Analyzer;
use crate::error::{EngineError, EngineResult};
use crate::models::{Manifest, SampleStatus};
use crate::services::{JobSummary, Orchestrator, RateLimiter, SampleCatalog, SharedProgress};
use crate::store::{CacheStore, CheckpointStore};
use crate::utils::retry_storage;
use chrono::{DateTime, Utc};
use sbe_common::config::{EngineConfig, RateLimitConfig, StorageRetryConfig};
use sbe_common::events::{EventBus, JobState, ProgressReport};
use serde::Serialize;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;
use tokio::task::JoinHandle;
use tokio_util::sync::{CancellationToken, DropGuard};
use tracing::info;
use uuid::Uuid;

/// Snapshot returned by `status()`
#[derive(Debug, Clone, Serialize)]
pub struct StatusReport {
    pub job_id: Uuid,
    pub state: JobState,
    pub collection_root: PathBuf,
    pub progress: ProgressReport,
    /// Pause or abort reason
    pub last_error: Option<String>,
    /// Whether a task for this job is live in this process
    pub running: bool,
    pub updated_at: DateTime<Utc>,
}

struct JobHandle {
    cancel: CancellationToken,
    /// Cancelled when the job task ends, however it ends
    finished: CancellationToken,
    /// Taken by the first `wait`
    task: Option<JoinHandle<EngineResult<JobSummary>>>,
    progress: SharedProgress,
}

impl JobHandle {
    fn is_running(&self) -> bool {
        !self.finished.is_cancelled()
    }
}

/// A claimed job slot, consumed by `spawn_job`
struct JobClaim {
    cancel: CancellationToken,
    finished: DropGuard,
    progress: SharedProgress,
}

/// Job controller shared by front ends
#[derive(Clone)]
pub struct JobController {
    analyzer: Arc<dyn Analyzer>,
    cache: Arc<dyn CacheStore>,
    checkpoints: Arc<dyn CheckpointStore>,
    config: EngineConfig,
    event_bus: EventBus,
    catalog: SampleCatalog,
    limiters: Arc<RwLock<HashMap<RateLimitConfig, Arc<RateLimiter>>>>,
    jobs: Arc<RwLock<HashMap<Uuid, JobHandle>>>,
}

impl JobController {
    pub fn new(
        analyzer: Arc<dyn Analyzer>,
        cache: Arc<dyn CacheStore>,
        checkpoints: Arc<dyn CheckpointStore>,
        config: EngineConfig,
        event_bus: EventBus,
    ) -> Self {
        let catalog = SampleCatalog::new(config.scan_workers);
        Self {
            analyzer,
            cache,
            checkpoints,
            config,
            event_bus,
            catalog,
            limiters: Arc::new(RwLock::new(HashMap::new())),
            jobs: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    pub fn event_bus(&self) -> &EventBus {
        &self.event_bus
    }

    /// Scan `collection_root`, create a job, and start dispatching
    ///
    /// `batch_size` and `rate_limit` fall back to the engine configuration.
    pub async fn start(
        &self,
        collection_root: &Path,
        batch_size: Option<usize>,
        rate_limit: Option<RateLimitConfig>,
    ) -> EngineResult<Uuid> {
        let batch_size = batch_size.unwrap_or(self.config.batch_size);
        let rate_limit = rate_limit.unwrap_or(self.config.rate_limit);
        if batch_size == 0 {
            return Err(EngineError::Config("batch_size must be at least 1".to_string()));
        }
        rate_limit.validate()?;

        let catalog = self.catalog.clone();
        let root = collection_root.to_path_buf();
        let samples = tokio::task::spawn_blocking(move || catalog.scan_parallel(&root))
            .await
            .map_err(|e| EngineError::Internal(format!("Scan task failed: {}", e)))??;

        let manifest = Manifest::new(
            collection_root.to_path_buf(),
            samples,
            batch_size,
            rate_limit,
            self.config.checkpoint_interval,
        );
        info!(
            job_id = %manifest.job_id,
            root = %collection_root.display(),
            samples = manifest.total(),
            batch_size,
            max_calls = rate_limit.max_calls,
            window_secs = rate_limit.window_secs,
            "Created batch job"
        );

        retry_storage("manifest save", &self.config.storage_retry, || {
            self.checkpoints.save_manifest(&manifest)
        })
        .await?;

        let job_id = manifest.job_id;
        let claim = self.claim(job_id).await?;
        self.spawn_job(manifest, claim).await;
        Ok(job_id)
    }

    /// Ask a running job to stop after its in-flight batch
    pub async fn pause(&self, job_id: Uuid) -> EngineResult<()> {
        {
            let jobs = self.jobs.read().await;
            if let Some(handle) = jobs.get(&job_id).filter(|h| h.is_running()) {
                info!(%job_id, "Pause requested");
                handle.cancel.cancel();
                return Ok(());
            }
        }

        let manifest = self.load_manifest(job_id).await?;
        Err(EngineError::InvalidState {
            job_id,
            state: manifest.status,
            message: "job is not running".to_string(),
        })
    }

    /// Restart a paused (or interrupted) job from its checkpoint
    pub async fn resume(&self, job_id: Uuid) -> EngineResult<()> {
        let claim = self.claim(job_id).await?;

        let manifest = match self.load_manifest(job_id).await {
            Ok(manifest) if manifest.status.is_resumable() => manifest,
            Ok(manifest) => {
                self.release(job_id).await;
                return Err(EngineError::InvalidState {
                    job_id,
                    state: manifest.status,
                    message: "job cannot be resumed".to_string(),
                });
            }
            Err(e) => {
                self.release(job_id).await;
                return Err(e);
            }
        };

        info!(%job_id, state = %manifest.status, "Resuming batch job");
        self.spawn_job(manifest, claim).await;
        Ok(())
    }

    /// Current state and counts for `job_id`
    ///
    /// Jobs not running in this process are reconstructed from the stores.
    pub async fn status(&self, job_id: Uuid) -> EngineResult<StatusReport> {
        let live = {
            let jobs = self.jobs.read().await;
            match jobs.get(&job_id) {
                Some(handle) => Some((handle.progress.read().await.clone(), handle.is_running())),
                None => None,
            }
        };

        let Some((progress, running)) = live else {
            return stored_status(self.cache.as_ref(), self.checkpoints.as_ref(), &self.config.storage_retry, job_id)
                .await;
        };

        let manifest = load_manifest(self.checkpoints.as_ref(), &self.config.storage_retry, job_id).await?;
        Ok(StatusReport::new(manifest, progress, running))
    }

    /// Wait for the job's task to finish
    ///
    /// Only the first caller receives the summary. Waiting does not affect
    /// `pause` or `status`.
    pub async fn wait(&self, job_id: Uuid) -> EngineResult<JobSummary> {
        let task = self.jobs.write().await.get_mut(&job_id).and_then(|h| h.task.take());

        match task {
            Some(task) => task
                .await
                .map_err(|e| EngineError::Internal(format!("Job task failed: {}", e)))?,
            None => {
                let manifest = self.load_manifest(job_id).await?;
                Err(EngineError::InvalidState {
                    job_id,
                    state: manifest.status,
                    message: "no job task to wait for".to_string(),
                })
            }
        }
    }

    /// Every job known to the checkpoint store
    pub async fn list(&self) -> EngineResult<Vec<StatusReport>> {
        let ids = retry_storage("job listing", &self.config.storage_retry, || self.checkpoints.list_jobs()).await?;

        let mut reports = Vec::with_capacity(ids.len());
        for id in ids {
            reports.push(self.status(id).await?);
        }
        Ok(reports)
    }

    /// Reserve the slot for `job_id`, failing if a task already owns it
    async fn claim(&self, job_id: Uuid) -> EngineResult<JobClaim> {
        let mut jobs = self.jobs.write().await;
        if jobs.get(&job_id).is_some_and(JobHandle::is_running) {
            return Err(EngineError::InvalidState {
                job_id,
                state: JobState::Running,
                message: "job is already running".to_string(),
            });
        }

        let handle = JobHandle {
            cancel: CancellationToken::new(),
            finished: CancellationToken::new(),
            task: None,
            progress: Arc::new(RwLock::new(ProgressReport::empty(0))),
        };
        let claim = JobClaim {
            cancel: handle.cancel.clone(),
            finished: handle.finished.clone().drop_guard(),
            progress: Arc::clone(&handle.progress),
        };
        jobs.insert(job_id, handle);
        Ok(claim)
    }

    /// Drop a claim that will not be spawned
    async fn release(&self, job_id: Uuid) {
        self.jobs.write().await.remove(&job_id);
    }

    async fn spawn_job(&self, manifest: Manifest, claim: JobClaim) {
        let job_id = manifest.job_id;
        let JobClaim {
            cancel,
            finished,
            progress,
        } = claim;
        *progress.write().await = ProgressReport::empty(manifest.total());
        let limiter = self.limiter_for(manifest.rate_limit).await;

        let orchestrator = Orchestrator::new(
            Arc::clone(&self.analyzer),
            Arc::clone(&self.cache),
            Arc::clone(&self.checkpoints),
            limiter,
            self.event_bus.clone(),
            self.config.clone(),
        )
        .with_progress(progress);

        let task = tokio::spawn(async move {
            let _finished = finished;
            orchestrator.run(manifest, cancel).await
        });

        if let Some(handle) = self.jobs.write().await.get_mut(&job_id) {
            handle.task = Some(task);
        }
    }

    async fn limiter_for(&self, rate_limit: RateLimitConfig) -> Arc<RateLimiter> {
        let mut limiters = self.limiters.write().await;
        Arc::clone(
            limiters
                .entry(rate_limit)
                .or_insert_with(|| Arc::new(RateLimiter::new(rate_limit))),
        )
    }

    async fn load_manifest(&self, job_id: Uuid) -> EngineResult<Manifest> {
        load_manifest(self.checkpoints.as_ref(), &self.config.storage_retry, job_id).await
    }
}

impl StatusReport {
    fn new(manifest: Manifest, progress: ProgressReport, running: bool) -> Self {
        Self {
            job_id: manifest.job_id,
            state: manifest.status,
            collection_root: manifest.collection_root,
            progress,
            last_error: manifest.last_error,
            running,
            updated_at: manifest.updated_at,
        }
    }
}

/// Status of a job that is not running, rebuilt from its checkpoint and
/// the cache
///
/// Needs no analyzer, so front ends can report on jobs without one.
pub async fn stored_status(
    cache: &dyn CacheStore,
    checkpoints: &dyn CheckpointStore,
    retry: &StorageRetryConfig,
    job_id: Uuid,
) -> EngineResult<StatusReport> {
    let manifest = load_manifest(checkpoints, retry, job_id).await?;
    let checkpoint = retry_storage("checkpoint load", retry, || checkpoints.load_checkpoint(job_id)).await?;

    let mut progress = ProgressReport::empty(manifest.total());
    if let Some(mut checkpoint) = checkpoint {
        checkpoint.retain_known(&manifest);
        for id in &checkpoint.resolved_sample_ids {
            let entry = retry_storage("cache lookup", retry, || cache.lookup(id)).await?;
            let status = entry.map_or(SampleStatus::Succeeded, |e| e.status_for(job_id));
            match status {
                SampleStatus::Skipped => progress.skipped += 1,
                status if status.is_resolved() => progress.succeeded += 1,
                _ => {}
            }
        }
        progress.processed = progress.succeeded + progress.skipped;
    }
    progress.percentage = if progress.total == 0 {
        100.0
    } else {
        progress.processed as f64 / progress.total as f64 * 100.0
    };
    if progress.processed == progress.total {
        progress.eta = Some(Duration::ZERO);
    }

    Ok(StatusReport::new(manifest, progress, false))
}

/// Stored status of every job, in job id order
pub async fn stored_statuses(
    cache: &dyn CacheStore,
    checkpoints: &dyn CheckpointStore,
    retry: &StorageRetryConfig,
) -> EngineResult<Vec<StatusReport>> {
    let ids = retry_storage("job listing", retry, || checkpoints.list_jobs()).await?;
    let mut reports = Vec::with_capacity(ids.len());
    for id in ids {
        reports.push(stored_status(cache, checkpoints, retry, id).await?);
    }
    Ok(reports)
}

async fn load_manifest(
    checkpoints: &dyn CheckpointStore,
    retry: &StorageRetryConfig,
    job_id: Uuid,
) -> EngineResult<Manifest> {
    retry_storage("manifest load", retry, || checkpoints.load_manifest(job_id))
        .await?
        .ok_or(EngineError::JobNotFound(job_id))
}
