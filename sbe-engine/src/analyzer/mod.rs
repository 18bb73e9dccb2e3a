//! Analyze collaborator boundary
//!
//! The analysis service is a black box called once per batch. A call returns
//! either one result or error per sample, or a single batch-level error that
//! applies to every member. The dispatcher handles both shapes.

pub mod http_client;

pub use http_client::HttpAnalyzer;

use crate::models::{FailureKind, Sample, SampleId};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// Minimal metadata the service needs to analyze one sample
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SampleDescriptor {
    /// Content hash
    pub id: SampleId,
    pub path: PathBuf,
    pub size_bytes: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub duration_secs: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub category: Option<String>,
}

impl From<&Sample> for SampleDescriptor {
    fn from(sample: &Sample) -> Self {
        Self {
            id: sample.id.clone(),
            path: sample.path.clone(),
            size_bytes: sample.size_bytes,
            duration_secs: sample.duration_secs,
            category: sample.category.clone(),
        }
    }
}

/// Failure reported for one sample or a whole batch
#[derive(Debug, Clone, PartialEq)]
pub struct AnalyzeFailure {
    pub kind: FailureKind,
    pub message: String,
    /// Provider-suggested cooldown before retrying
    pub retry_after: Option<Duration>,
}

impl AnalyzeFailure {
    pub fn new(kind: FailureKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            retry_after: None,
        }
    }

    pub fn with_retry_after(mut self, retry_after: Duration) -> Self {
        self.retry_after = Some(retry_after);
        self
    }
}

/// Per-sample outcome within a successful call
#[derive(Debug, Clone, PartialEq)]
pub struct SampleResult {
    pub id: SampleId,
    pub result: Result<serde_json::Value, AnalyzeFailure>,
}

impl SampleResult {
    pub fn ok(id: SampleId, payload: serde_json::Value) -> Self {
        Self {
            id,
            result: Ok(payload),
        }
    }

    pub fn failed(id: SampleId, kind: FailureKind, message: impl Into<String>) -> Self {
        Self {
            id,
            result: Err(AnalyzeFailure::new(kind, message)),
        }
    }
}

/// Raw response from one Analyze call
#[derive(Debug, Clone, PartialEq)]
pub enum AnalyzeResponse {
    /// One entry per sample the service answered for
    PerSample(Vec<SampleResult>),
    /// The call as a whole failed
    Batch(AnalyzeFailure),
}

/// External analysis service
#[async_trait]
pub trait Analyzer: Send + Sync {
    /// Service name for logging
    fn name(&self) -> &str;

    /// Analyze up to `batch_size` samples in one call
    ///
    /// Transport and protocol failures are reported as
    /// `AnalyzeResponse::Batch`, never as a panic or a lost batch.
    async fn analyze(&self, samples: &[SampleDescriptor]) -> AnalyzeResponse;
}
