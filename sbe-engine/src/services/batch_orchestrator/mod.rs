//! Batch orchestrator
//!
//! Drives one job from its manifest to a terminal or paused state.
//!
//! # State Progression
//! PLANNING → RUNNING → {COMPLETED | PAUSED | ABORTED}
//!
//! # Startup
//! 1. Load the checkpoint; `remaining = all samples - resolved`
//! 2. Resolve samples the catalog already marked as failed (skip markers)
//! 3. Resolve cache hits without any external call
//! 4. Plan the rest into batches
//!
//! # Per batch (see `dispatch.rs`)
//! Re-check the cache, acquire a rate-limit permit, call Analyze under a
//! timeout, classify, persist, checkpoint every `checkpoint_interval`
//! batches, update progress.
//!
//! Cancellation is honoured between batches, while waiting for a permit and
//! during backoff, never while a call is in flight. Storage failures that
//! survive `retry_storage` pause the job; fatal analysis failures abort it.

mod dispatch;

use crate::analyzer::Analyzer;
use crate::error::{EngineError, EngineResult};
use crate::models::{Batch, Checkpoint, FailureKind, Manifest, Sample, SampleId};
use crate::services::{BatchPlanner, ProgressTracker, RateLimiter, RetryPolicy, SkippedSample};
use crate::store::{CacheStore, CheckpointStore, StorageError};
use crate::utils::retry_storage;
use chrono::Utc;
use sbe_common::config::EngineConfig;
use sbe_common::events::{EventBus, JobEvent, JobState, ProgressReport};
use serde::Serialize;
use std::collections::{BTreeSet, HashMap, VecDeque};
use std::sync::Arc;
use tokio::sync::RwLock;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use uuid::Uuid;

/// Live progress of a running job, readable by `status()`
pub type SharedProgress = Arc<RwLock<ProgressReport>>;

/// Result of a run that completed or paused
#[derive(Debug, Clone, Serialize)]
pub struct JobSummary {
    pub job_id: Uuid,
    pub state: JobState,
    pub progress: ProgressReport,
    /// Analyze calls made by this run
    pub calls_made: usize,
    /// Pause reason, if paused
    pub reason: Option<String>,
}

/// Why dispatch stopped before the queue drained
#[derive(Debug)]
enum Stop {
    Cancelled,
    Storage(StorageError),
    Fatal { kind: FailureKind, message: String },
}

impl From<StorageError> for Stop {
    fn from(e: StorageError) -> Self {
        Stop::Storage(e)
    }
}

/// Planned batch waiting in the dispatch queue
#[derive(Debug)]
struct QueuedBatch {
    batch: Batch,
    /// Retries already made for this batch
    attempt: u32,
    /// Requeued after a failure (counts as pending retry)
    is_retry: bool,
}

/// Batch orchestrator service
pub struct Orchestrator {
    analyzer: Arc<dyn Analyzer>,
    cache: Arc<dyn CacheStore>,
    checkpoints: Arc<dyn CheckpointStore>,
    limiter: Arc<RateLimiter>,
    event_bus: EventBus,
    config: EngineConfig,
    retry_policy: RetryPolicy,
    progress: SharedProgress,
}

impl Orchestrator {
    /// Create new orchestrator
    ///
    /// # Arguments
    /// * `analyzer` - External analysis service
    /// * `cache` - Shared result cache
    /// * `checkpoints` - Manifest and checkpoint persistence
    /// * `limiter` - Rate limiter for the provider quota this job draws on
    /// * `event_bus` - Event bus for progress updates
    /// * `config` - Engine settings (timeouts, retry, clustering)
    pub fn new(
        analyzer: Arc<dyn Analyzer>,
        cache: Arc<dyn CacheStore>,
        checkpoints: Arc<dyn CheckpointStore>,
        limiter: Arc<RateLimiter>,
        event_bus: EventBus,
        config: EngineConfig,
    ) -> Self {
        let retry_policy = RetryPolicy::from(&config.retry);
        Self {
            analyzer,
            cache,
            checkpoints,
            limiter,
            event_bus,
            config,
            retry_policy,
            progress: Arc::new(RwLock::new(ProgressReport::empty(0))),
        }
    }

    /// Publish live progress into `progress` instead of a private handle
    pub fn with_progress(mut self, progress: SharedProgress) -> Self {
        self.progress = progress;
        self
    }

    pub fn progress_handle(&self) -> SharedProgress {
        Arc::clone(&self.progress)
    }

    /// Run (or resume) the job described by `manifest`
    ///
    /// Returns `Ok` for completed and paused jobs and `EngineError::Aborted`
    /// for fatal outcomes. The checkpoint is persisted in every case.
    pub async fn run(&self, manifest: Manifest, cancel: CancellationToken) -> EngineResult<JobSummary> {
        if manifest.is_terminal() {
            return Err(EngineError::InvalidState {
                job_id: manifest.job_id,
                state: manifest.status,
                message: "job already finished".to_string(),
            });
        }

        info!(
            job_id = %manifest.job_id,
            root = %manifest.collection_root.display(),
            total = manifest.total(),
            analyzer = self.analyzer.name(),
            "Starting batch job"
        );

        let mut run = JobRun::new(self, manifest, cancel);
        let stopped = match run.prepare().await {
            Ok(()) => run.dispatch_all().await,
            Err(stop) => Err(stop),
        };

        match stopped {
            Ok(()) => run.complete().await,
            Err(Stop::Cancelled) => run.pause("Cancelled".to_string()).await,
            Err(Stop::Storage(e)) => run.pause(format!("Storage failure: {}", e)).await,
            Err(Stop::Fatal { kind, message }) => run.abort(kind, message).await,
        }
    }
}

/// State of one run of one job
struct JobRun<'a> {
    orch: &'a Orchestrator,
    manifest: Manifest,
    cancel: CancellationToken,
    resolved: BTreeSet<SampleId>,
    /// Position of each sample in `manifest.samples`
    sample_index: HashMap<SampleId, usize>,
    tracker: ProgressTracker,
    queue: VecDeque<QueuedBatch>,
    next_sequence: u64,
    batches_since_checkpoint: usize,
    calls_made: usize,
}

impl<'a> JobRun<'a> {
    fn new(orch: &'a Orchestrator, manifest: Manifest, cancel: CancellationToken) -> Self {
        let sample_index = manifest
            .samples
            .iter()
            .enumerate()
            .map(|(i, s)| (s.id.clone(), i))
            .collect();
        let total = manifest.total();

        Self {
            orch,
            manifest,
            cancel,
            resolved: BTreeSet::new(),
            sample_index,
            tracker: ProgressTracker::new(total, 0, 0),
            queue: VecDeque::new(),
            next_sequence: 1,
            batches_since_checkpoint: 0,
            calls_made: 0,
        }
    }

    fn job_id(&self) -> Uuid {
        self.manifest.job_id
    }

    /// Compute the resume set, resolve what needs no call, and plan the rest
    async fn prepare(&mut self) -> Result<(), Stop> {
        let orch = self.orch;
        let job_id = self.job_id();

        if self.manifest.status != JobState::Planning {
            self.transition(JobState::Planning, None);
        }

        let mut checkpoint = retry_storage("checkpoint load", &orch.config.storage_retry, || {
            orch.checkpoints.load_checkpoint(job_id)
        })
        .await?
        .unwrap_or_else(|| Checkpoint::empty(job_id));

        let dropped = checkpoint.retain_known(&self.manifest);
        if dropped > 0 {
            warn!(%job_id, dropped, "Checkpoint listed samples missing from the manifest");
        }
        self.resolved = checkpoint.resolved_sample_ids;

        // Split earlier progress into results and skips
        let (mut prior_succeeded, mut prior_skipped) = (0, 0);
        for id in &self.resolved {
            let entry = retry_storage("cache lookup", &orch.config.storage_retry, || orch.cache.lookup(id)).await?;
            match entry {
                Some(entry) if entry.is_skip_marker() => prior_skipped += 1,
                Some(_) => prior_succeeded += 1,
                None => {
                    warn!(%job_id, sample_id = %id, "Checkpointed sample has no cache entry");
                    prior_succeeded += 1;
                }
            }
        }
        self.tracker = ProgressTracker::new(self.manifest.total(), prior_succeeded, prior_skipped);

        if !self.resolved.is_empty() {
            info!(
                %job_id,
                resolved = self.resolved.len(),
                remaining = self.manifest.total() - self.resolved.len(),
                "Resuming from checkpoint"
            );
        }

        // Resolve local failures and cache hits
        let remaining: Vec<Sample> = self.manifest.remaining(&self.resolved).cloned().collect();

        let mut pending = Vec::new();
        let mut resolved_locally = 0;
        for sample in remaining {
            if let Some(kind) = sample.local_failure {
                let skipped = SkippedSample {
                    id: sample.id.clone(),
                    kind,
                    message: format!("{} ({})", kind, sample.path.display()),
                };
                self.skip_samples(vec![skipped]).await?;
                self.tracker.record_resolved_locally(0, 1);
                resolved_locally += 1;
                continue;
            }

            let id = sample.id.clone();
            let entry = retry_storage("cache lookup", &orch.config.storage_retry, || orch.cache.lookup(&id)).await?;
            match entry {
                Some(entry) if entry.resolves_for(job_id) => {
                    if entry.is_skip_marker() {
                        self.tracker.record_resolved_locally(0, 1);
                    } else {
                        self.tracker.record_resolved_locally(1, 0);
                    }
                    self.resolved.insert(id);
                    resolved_locally += 1;
                }
                _ => pending.push(sample),
            }
        }

        let planner = BatchPlanner::new(self.manifest.batch_size, orch.config.cluster_by_category);
        let batches = planner.plan(&pending, self.next_sequence);
        self.next_sequence += batches.len() as u64;

        info!(
            %job_id,
            resolved_locally,
            pending = pending.len(),
            batches = batches.len(),
            batch_size = self.manifest.batch_size,
            "Batch plan ready"
        );

        self.queue = batches
            .into_iter()
            .map(|batch| QueuedBatch {
                batch,
                attempt: 0,
                is_retry: false,
            })
            .collect();

        if resolved_locally > 0 {
            self.save_checkpoint().await?;
        }

        self.transition(JobState::Running, None);
        self.save_manifest().await?;
        self.publish_progress().await;
        Ok(())
    }

    async fn complete(&mut self) -> EngineResult<JobSummary> {
        if let Err(e) = self.save_checkpoint().await {
            return self.pause(format!("Storage failure: {}", e)).await;
        }

        self.transition(JobState::Completed, None);
        if let Err(e) = self.save_manifest().await {
            error!(job_id = %self.job_id(), error = %e, "Failed to persist completed manifest");
        }
        self.publish_progress().await;

        let summary = self.summary();
        info!(
            job_id = %summary.job_id,
            processed = summary.progress.processed,
            succeeded = summary.progress.succeeded,
            skipped = summary.progress.skipped,
            calls = summary.calls_made,
            "Batch job completed"
        );
        Ok(summary)
    }

    async fn pause(&mut self, reason: String) -> EngineResult<JobSummary> {
        if let Err(e) = self.save_checkpoint().await {
            warn!(job_id = %self.job_id(), error = %e, "Checkpoint not saved while pausing");
        }

        warn!(job_id = %self.job_id(), reason = %reason, "Pausing batch job");
        self.transition(JobState::Paused, Some(reason));
        if let Err(e) = self.save_manifest().await {
            warn!(job_id = %self.job_id(), error = %e, "Manifest not saved while pausing");
        }
        self.publish_progress().await;
        Ok(self.summary())
    }

    async fn abort(&mut self, kind: FailureKind, message: String) -> EngineResult<JobSummary> {
        let job_id = self.job_id();
        if let Err(e) = self.save_checkpoint().await {
            error!(%job_id, error = %e, "Checkpoint not saved while aborting");
        }

        error!(%job_id, kind = %kind, message = %message, "Fatal failure, aborting batch job");
        self.transition(JobState::Aborted, Some(format!("{}: {}", kind, message)));
        if let Err(e) = self.save_manifest().await {
            error!(%job_id, error = %e, "Manifest not saved while aborting");
        }
        self.publish_progress().await;

        Err(EngineError::Aborted { job_id, kind, message })
    }

    fn transition(&mut self, new_state: JobState, reason: Option<String>) {
        let transition = self.manifest.transition_to(new_state);
        self.manifest.last_error = reason.clone();

        info!(
            job_id = %transition.job_id,
            old_state = %transition.old_state,
            new_state = %transition.new_state,
            "Job state changed"
        );
        self.emit(JobEvent::JobStateChanged {
            job_id: transition.job_id,
            old_state: transition.old_state,
            new_state: transition.new_state,
            reason,
            timestamp: transition.transitioned_at,
        });
    }

    async fn save_manifest(&self) -> Result<(), StorageError> {
        let orch = self.orch;
        retry_storage("manifest save", &orch.config.storage_retry, || {
            orch.checkpoints.save_manifest(&self.manifest)
        })
        .await
    }

    async fn save_checkpoint(&mut self) -> Result<(), StorageError> {
        let orch = self.orch;
        let job_id = self.job_id();
        let resolved = &self.resolved;
        let now = Utc::now();

        retry_storage("checkpoint save", &orch.config.storage_retry, || {
            orch.checkpoints.save_checkpoint(job_id, resolved, now)
        })
        .await?;

        self.batches_since_checkpoint = 0;
        self.emit(JobEvent::CheckpointSaved {
            job_id,
            resolved: self.resolved.len(),
            timestamp: now,
        });
        Ok(())
    }

    async fn publish_progress(&mut self) {
        let pending_retry = self
            .queue
            .iter()
            .filter(|q| q.is_retry)
            .map(|q| q.batch.len())
            .sum();
        self.tracker.set_pending_retry(pending_retry);

        let report = self.tracker.report();
        *self.orch.progress.write().await = report.clone();
        self.emit(JobEvent::ProgressUpdated {
            job_id: self.job_id(),
            progress: report,
            timestamp: Utc::now(),
        });
    }

    fn emit(&self, event: JobEvent) {
        self.orch.event_bus.emit_lossy(event);
    }

    fn summary(&self) -> JobSummary {
        JobSummary {
            job_id: self.job_id(),
            state: self.manifest.status,
            progress: self.tracker.report(),
            calls_made: self.calls_made,
            reason: self.manifest.last_error.clone(),
        }
    }
}
