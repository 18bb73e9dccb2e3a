//! Error classifier & retry policy
//!
//! `classify` maps one Analyze response onto exactly one [`Outcome`]:
//!
//! | members                          | outcome       |
//! |----------------------------------|---------------|
//! | all succeeded                    | Success       |
//! | any fatal                        | Fatal         |
//! | only retryable failures          | Recoverable   |
//! | only skippable failures          | Skippable     |
//! | any other mix                    | Partial       |
//!
//! Batch-level errors follow the failure kind's severity. Members absent
//! from a per-sample response are retryable (`MissingResult`).

use crate::analyzer::{AnalyzeFailure, AnalyzeResponse};
use crate::models::{FailureKind, SampleId, Severity};
use sbe_common::config::RetryConfig;
use serde_json::Value;
use std::collections::HashMap;
use std::time::Duration;
use tracing::warn;

/// Member resolved with a skip marker
#[derive(Debug, Clone, PartialEq)]
pub struct SkippedSample {
    pub id: SampleId,
    pub kind: FailureKind,
    pub message: String,
}

/// Classified result of one Analyze call
#[derive(Debug, Clone, PartialEq)]
pub enum Outcome {
    /// Every member has a result
    Success { results: Vec<(SampleId, Value)> },

    /// Retry the whole batch after backoff
    Recoverable {
        kind: FailureKind,
        message: String,
        retry_after: Option<Duration>,
    },

    /// Cache `succeeded`, skip-mark `skipped`, requeue `retry` as a new batch
    Partial {
        succeeded: Vec<(SampleId, Value)>,
        skipped: Vec<SkippedSample>,
        retry: Vec<SampleId>,
    },

    /// Abort the job
    Fatal { kind: FailureKind, message: String },

    /// Every member is permanently failed
    Skippable { skipped: Vec<SkippedSample> },
}

/// Outcome discriminant, for logging and assertions
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OutcomeCategory {
    Success,
    Recoverable,
    Partial,
    Fatal,
    Skippable,
}

impl Outcome {
    pub fn category(&self) -> OutcomeCategory {
        match self {
            Outcome::Success { .. } => OutcomeCategory::Success,
            Outcome::Recoverable { .. } => OutcomeCategory::Recoverable,
            Outcome::Partial { .. } => OutcomeCategory::Partial,
            Outcome::Fatal { .. } => OutcomeCategory::Fatal,
            Outcome::Skippable { .. } => OutcomeCategory::Skippable,
        }
    }
}

/// Classify the response to a call made for `requested`
pub fn classify(requested: &[SampleId], response: AnalyzeResponse) -> Outcome {
    match response {
        AnalyzeResponse::Batch(failure) => classify_batch_failure(requested, failure),
        AnalyzeResponse::PerSample(results) => {
            let mut by_id: HashMap<SampleId, Result<Value, AnalyzeFailure>> = HashMap::with_capacity(results.len());
            for entry in results {
                if !requested.contains(&entry.id) {
                    warn!(sample_id = %entry.id, "Ignoring result for sample not in request");
                    continue;
                }
                if by_id.contains_key(&entry.id) {
                    warn!(sample_id = %entry.id, "Ignoring duplicate result for sample");
                    continue;
                }
                by_id.insert(entry.id, entry.result);
            }

            let mut succeeded = Vec::new();
            let mut skipped = Vec::new();
            let mut retry = Vec::new();
            let mut first_retry: Option<AnalyzeFailure> = None;

            for id in requested {
                let result = by_id.remove(id).unwrap_or_else(|| {
                    Err(AnalyzeFailure::new(FailureKind::MissingResult, "No entry in response"))
                });

                match result {
                    Ok(value) => succeeded.push((id.clone(), value)),
                    Err(failure) => match failure.kind.severity() {
                        Severity::Fatal => {
                            return Outcome::Fatal {
                                kind: failure.kind,
                                message: format!("{}: {}", id, failure.message),
                            }
                        }
                        Severity::Skippable => skipped.push(SkippedSample {
                            id: id.clone(),
                            kind: failure.kind,
                            message: failure.message,
                        }),
                        Severity::Recoverable => {
                            retry.push(id.clone());
                            match &mut first_retry {
                                None => first_retry = Some(failure),
                                Some(first) => first.retry_after = first.retry_after.max(failure.retry_after),
                            }
                        }
                    },
                }
            }

            match (succeeded.is_empty(), skipped.is_empty(), first_retry) {
                (_, true, None) => Outcome::Success { results: succeeded },
                (true, true, Some(failure)) => Outcome::Recoverable {
                    kind: failure.kind,
                    message: failure.message,
                    retry_after: failure.retry_after,
                },
                (true, false, None) => Outcome::Skippable { skipped },
                _ => Outcome::Partial { succeeded, skipped, retry },
            }
        }
    }
}

fn classify_batch_failure(requested: &[SampleId], failure: AnalyzeFailure) -> Outcome {
    match failure.kind.severity() {
        Severity::Recoverable => Outcome::Recoverable {
            kind: failure.kind,
            message: failure.message,
            retry_after: failure.retry_after,
        },
        Severity::Fatal => Outcome::Fatal {
            kind: failure.kind,
            message: failure.message,
        },
        Severity::Skippable => Outcome::Skippable {
            skipped: requested
                .iter()
                .map(|id| SkippedSample {
                    id: id.clone(),
                    kind: failure.kind,
                    message: failure.message.clone(),
                })
                .collect(),
        },
    }
}

/// What to do with a batch after a recoverable failure
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryDecision {
    /// Dispatch again after waiting this long
    RetryAfter(Duration),
    /// Retry budget spent; members become `RetriesExhausted` skips
    GiveUp,
}

/// Exponential backoff: `base * 2^attempt`, capped at `max_delay`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl RetryPolicy {
    pub fn new(max_retries: u32, base_delay: Duration, max_delay: Duration) -> Self {
        Self {
            max_retries,
            base_delay,
            max_delay,
        }
    }

    /// Delay before retry number `attempt + 1`
    pub fn backoff(&self, attempt: u32) -> Duration {
        let factor = 1u32.checked_shl(attempt).unwrap_or(u32::MAX);
        self.base_delay.saturating_mul(factor).min(self.max_delay)
    }

    /// Decide after a batch failed recoverably on its `attempt`-th retry
    /// (0 for the first dispatch)
    ///
    /// A provider `retry_after` hint raises the wait to at least the hint.
    pub fn decide(&self, attempt: u32, retry_after: Option<Duration>) -> RetryDecision {
        if attempt >= self.max_retries {
            return RetryDecision::GiveUp;
        }
        let delay = self.backoff(attempt);
        RetryDecision::RetryAfter(retry_after.map_or(delay, |hint| delay.max(hint)))
    }
}

impl From<&RetryConfig> for RetryPolicy {
    fn from(config: &RetryConfig) -> Self {
        Self::new(
            config.max_retries,
            Duration::from_secs(config.base_delay_secs),
            Duration::from_secs(config.max_delay_secs),
        )
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::from(&RetryConfig::default())
    }
}
