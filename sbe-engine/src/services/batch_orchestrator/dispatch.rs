//! Per-batch dispatch and outcome handling

use super::{JobRun, QueuedBatch, Stop};
use crate::analyzer::{AnalyzeFailure, AnalyzeResponse, SampleDescriptor};
use crate::models::{Batch, CachedValue, FailureKind, SampleId};
use crate::services::{classify, Outcome, RetryDecision, SkippedSample};
use crate::utils::retry_storage;
use chrono::Utc;
use sbe_common::events::{BatchState, JobEvent};
use serde_json::Value;
use std::time::Duration;
use tracing::{debug, info, warn};

impl JobRun<'_> {
    /// Dispatch queued batches until the queue drains or the job stops
    pub(super) async fn dispatch_all(&mut self) -> Result<(), Stop> {
        while let Some(queued) = self.queue.pop_front() {
            if self.cancel.is_cancelled() {
                self.queue.push_front(queued);
                return Err(Stop::Cancelled);
            }
            self.dispatch(queued).await?;
        }
        Ok(())
    }

    async fn dispatch(&mut self, mut queued: QueuedBatch) -> Result<(), Stop> {
        let job_id = self.job_id();
        let sequence = queued.batch.sequence;

        // Another job may have analyzed some members since planning
        queued.batch.members = self.resolve_cached(&queued.batch.members).await?;
        if queued.batch.is_empty() {
            debug!(%job_id, batch = sequence, "Every member already cached, skipping dispatch");
            self.publish_progress().await;
            return Ok(());
        }

        let cancelled = tokio::select! {
            biased;
            _ = self.cancel.cancelled() => true,
            _ = self.orch.limiter.acquire() => false,
        };
        if cancelled {
            self.queue.push_front(queued);
            return Err(Stop::Cancelled);
        }

        queued.batch.status = BatchState::Dispatched;
        info!(
            %job_id,
            batch = sequence,
            samples = queued.batch.len(),
            attempt = queued.attempt,
            "Dispatching batch"
        );
        self.emit(JobEvent::BatchDispatched {
            job_id,
            sequence,
            sample_count: queued.batch.len(),
            attempt: queued.attempt,
            timestamp: Utc::now(),
        });

        let descriptors: Vec<SampleDescriptor> = queued
            .batch
            .members
            .iter()
            .filter_map(|id| self.sample_index.get(id))
            .map(|&i| SampleDescriptor::from(&self.manifest.samples[i]))
            .collect();

        let call_timeout = self.orch.config.call_timeout();
        let response = match tokio::time::timeout(call_timeout, self.orch.analyzer.analyze(&descriptors)).await {
            Ok(response) => response,
            Err(_) => AnalyzeResponse::Batch(AnalyzeFailure::new(
                FailureKind::Timeout,
                format!("No response within {}s", call_timeout.as_secs()),
            )),
        };
        self.calls_made += 1;

        let outcome = classify(&queued.batch.members, response);
        debug!(%job_id, batch = sequence, outcome = ?outcome.category(), "Batch classified");
        self.apply_outcome(queued, outcome).await
    }

    /// Members not yet resolved for this job, in order
    async fn resolve_cached(&mut self, members: &[SampleId]) -> Result<Vec<SampleId>, Stop> {
        let orch = self.orch;
        let job_id = self.job_id();
        let mut unresolved = Vec::with_capacity(members.len());

        for id in members {
            if self.resolved.contains(id) {
                continue;
            }
            let entry = retry_storage("cache lookup", &orch.config.storage_retry, || orch.cache.lookup(id)).await?;
            match entry {
                Some(entry) if entry.resolves_for(job_id) => {
                    if entry.is_skip_marker() {
                        self.tracker.record_resolved_locally(0, 1);
                    } else {
                        self.tracker.record_resolved_locally(1, 0);
                    }
                    self.resolved.insert(id.clone());
                }
                _ => unresolved.push(id.clone()),
            }
        }
        Ok(unresolved)
    }

    async fn apply_outcome(&mut self, mut queued: QueuedBatch, outcome: Outcome) -> Result<(), Stop> {
        let job_id = self.job_id();
        let sequence = queued.batch.sequence;

        match outcome {
            Outcome::Success { results } => {
                let succeeded = results.len();
                self.store_results(results).await?;
                self.tracker.record_batch(succeeded, 0);
                self.batch_finished(sequence, BatchState::Completed, succeeded, 0, 0).await
            }

            Outcome::Partial { succeeded, skipped, retry } => {
                let (n_ok, n_skip, n_retry) = (succeeded.len(), skipped.len(), retry.len());
                self.store_results(succeeded).await?;
                self.skip_samples(skipped).await?;
                self.tracker.record_batch(n_ok, n_skip);

                if !retry.is_empty() {
                    // Remainder gets its own sequence and a fresh retry budget
                    let remainder = Batch::new(self.next_sequence, retry);
                    self.next_sequence += 1;
                    info!(
                        %job_id,
                        batch = sequence,
                        requeued_as = remainder.sequence,
                        samples = remainder.len(),
                        "Requeueing transiently failed members"
                    );
                    self.queue.push_front(QueuedBatch {
                        batch: remainder,
                        attempt: 0,
                        is_retry: true,
                    });
                }
                self.batch_finished(sequence, BatchState::PartiallyFailed, n_ok, n_skip, n_retry)
                    .await
            }

            Outcome::Skippable { skipped } => {
                let n_skip = skipped.len();
                self.skip_samples(skipped).await?;
                self.tracker.record_batch(0, n_skip);
                self.batch_finished(sequence, BatchState::Failed, 0, n_skip, 0).await
            }

            Outcome::Recoverable {
                kind,
                message,
                retry_after,
            } => match self.orch.retry_policy.decide(queued.attempt, retry_after) {
                RetryDecision::RetryAfter(delay) => {
                    self.tracker.record_batch(0, 0);
                    warn!(
                        %job_id,
                        batch = sequence,
                        attempt = queued.attempt,
                        kind = %kind,
                        delay_ms = delay.as_millis() as u64,
                        message = %message,
                        "Recoverable failure, retrying after backoff"
                    );
                    self.emit(JobEvent::BatchRetryScheduled {
                        job_id,
                        sequence,
                        attempt: queued.attempt + 1,
                        delay_ms: delay.as_millis() as u64,
                        reason: format!("{}: {}", kind, message),
                        timestamp: Utc::now(),
                    });

                    queued.attempt += 1;
                    queued.is_retry = true;
                    queued.batch.status = BatchState::Pending;
                    self.queue.push_front(queued);
                    self.publish_progress().await;

                    self.backoff(delay).await
                }
                RetryDecision::GiveUp => {
                    warn!(
                        %job_id,
                        batch = sequence,
                        attempts = queued.attempt + 1,
                        kind = %kind,
                        "Retries exhausted, skipping batch members"
                    );
                    let skipped: Vec<SkippedSample> = queued
                        .batch
                        .members
                        .iter()
                        .map(|id| SkippedSample {
                            id: id.clone(),
                            kind: FailureKind::RetriesExhausted,
                            message: format!("last failure {}: {}", kind, message),
                        })
                        .collect();
                    let n_skip = skipped.len();
                    self.skip_samples(skipped).await?;
                    self.tracker.record_batch(0, n_skip);
                    self.batch_finished(sequence, BatchState::Failed, 0, n_skip, 0).await
                }
            },

            Outcome::Fatal { kind, message } => Err(Stop::Fatal { kind, message }),
        }
    }

    /// Sleep before a retry; cancellation cuts the wait short
    async fn backoff(&self, delay: Duration) -> Result<(), Stop> {
        tokio::select! {
            biased;
            _ = self.cancel.cancelled() => Err(Stop::Cancelled),
            _ = tokio::time::sleep(delay) => Ok(()),
        }
    }

    async fn store_results(&mut self, results: Vec<(SampleId, Value)>) -> Result<(), Stop> {
        let orch = self.orch;
        for (id, result) in results {
            let value = CachedValue::Analyzed { result };
            retry_storage("cache put", &orch.config.storage_retry, || orch.cache.put(&id, value.clone())).await?;
            self.resolved.insert(id);
        }
        Ok(())
    }

    /// Write skip markers and resolve the samples
    pub(super) async fn skip_samples(&mut self, skipped: Vec<SkippedSample>) -> Result<(), Stop> {
        let orch = self.orch;
        let job_id = self.job_id();

        for sample in skipped {
            let value = CachedValue::Skipped {
                job_id,
                reason: sample.kind,
                message: sample.message.clone(),
            };
            retry_storage("cache put", &orch.config.storage_retry, || orch.cache.put(&sample.id, value.clone()))
                .await?;

            warn!(%job_id, sample_id = %sample.id, kind = %sample.kind, message = %sample.message, "Sample skipped");
            self.emit(JobEvent::SampleSkipped {
                job_id,
                sample_id: sample.id.to_string(),
                reason: sample.kind.to_string(),
                timestamp: Utc::now(),
            });
            self.resolved.insert(sample.id);
        }
        Ok(())
    }

    async fn batch_finished(
        &mut self,
        sequence: u64,
        state: BatchState,
        succeeded: usize,
        skipped: usize,
        requeued: usize,
    ) -> Result<(), Stop> {
        self.emit(JobEvent::BatchCompleted {
            job_id: self.job_id(),
            sequence,
            state,
            succeeded,
            skipped,
            requeued,
            timestamp: Utc::now(),
        });

        self.batches_since_checkpoint += 1;
        if self.batches_since_checkpoint >= self.manifest.checkpoint_interval.max(1) {
            self.save_checkpoint().await?;
        }
        self.publish_progress().await;
        Ok(())
    }
}
