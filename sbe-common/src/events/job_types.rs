//! Batch job type definitions
//!
//! Supporting types for job progress and state reporting.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;

/// Overall job status
///
/// `Planning → Running → {Completed | Paused | Aborted}`; a paused job may
/// return to `Planning` when resumed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobState {
    /// Computing the resume set and batch plan
    Planning,
    /// Dispatching batches
    Running,
    /// Stopped cooperatively or by a storage failure; resumable
    Paused,
    /// Every sample resolved
    Completed,
    /// Stopped by a fatal analysis failure
    Aborted,
}

impl JobState {
    /// Terminal states never run again
    pub fn is_terminal(&self) -> bool {
        matches!(self, JobState::Completed | JobState::Aborted)
    }

    /// Whether a job in this state may be resumed
    pub fn is_resumable(&self) -> bool {
        matches!(self, JobState::Paused | JobState::Planning | JobState::Running)
    }
}

impl fmt::Display for JobState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            JobState::Planning => "planning",
            JobState::Running => "running",
            JobState::Paused => "paused",
            JobState::Completed => "completed",
            JobState::Aborted => "aborted",
        };
        f.write_str(s)
    }
}

/// Batch-level status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BatchState {
    Pending,
    Dispatched,
    Completed,
    PartiallyFailed,
    Failed,
}

/// Progress snapshot reported by `status()`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProgressReport {
    /// Samples resolved (succeeded + skipped), including earlier runs
    pub processed: usize,
    /// Samples resolved by the current run only
    pub processed_this_run: usize,
    /// Samples in the manifest
    pub total: usize,
    /// Percentage complete (0.0 - 100.0)
    pub percentage: f64,
    /// Remaining time at the smoothed rate; `None` when the rate is zero
    pub eta: Option<Duration>,
    /// Time since the current run started
    pub elapsed: Duration,
    /// Samples with a cached analysis result
    pub succeeded: usize,
    /// Samples resolved with a skip marker
    pub skipped: usize,
    /// Samples that failed transiently and are waiting for a retry
    pub pending_retry: usize,
}

impl ProgressReport {
    /// Empty report for a job of `total` samples
    pub fn empty(total: usize) -> Self {
        Self {
            processed: 0,
            processed_this_run: 0,
            total,
            percentage: 0.0,
            eta: None,
            elapsed: Duration::ZERO,
            succeeded: 0,
            skipped: 0,
            pending_retry: 0,
        }
    }

    pub fn display_string(&self) -> String {
        let eta = match self.eta {
            Some(eta) => format!("{}s remaining", eta.as_secs()),
            None => "ETA unknown".to_string(),
        };
        format!(
            "{}/{} ({:.1}%), {} succeeded, {} skipped, {} awaiting retry, {}",
            self.processed,
            self.total,
            self.percentage,
            self.succeeded,
            self.skipped,
            self.pending_retry,
            eta
        )
    }
}
