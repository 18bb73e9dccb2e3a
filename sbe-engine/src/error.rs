//! Error types for sbe-engine
//!
//! Recoverable, partial, and skippable analysis outcomes are handled inside
//! the orchestrator and never appear here. What surfaces is what the
//! job-control caller must see: a fatal abort, a broken durability layer, or
//! a misuse of the control surface.

use crate::models::FailureKind;
use crate::services::CatalogError;
use crate::store::StorageError;
use sbe_common::events::JobState;
use thiserror::Error;
use uuid::Uuid;

/// Engine error type
#[derive(Debug, Error)]
pub enum EngineError {
    /// Collection root could not be scanned
    #[error("Catalog error: {0}")]
    Catalog(#[from] CatalogError),

    /// Cache or checkpoint I/O failed after retries
    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    /// Job stopped by a fatal analysis failure
    #[error("Job {job_id} aborted ({kind}): {message}")]
    Aborted {
        job_id: Uuid,
        kind: FailureKind,
        message: String,
    },

    /// No manifest for this job id
    #[error("Job not found: {0}")]
    JobNotFound(Uuid),

    /// Operation not valid in the job's current state
    #[error("Job {job_id} is {state}: {message}")]
    InvalidState {
        job_id: Uuid,
        state: JobState,
        message: String,
    },

    /// Invalid engine or analyzer configuration
    #[error("Configuration error: {0}")]
    Config(String),

    /// Background task failed to complete
    #[error("Internal error: {0}")]
    Internal(String),

    /// sbe-common error
    #[error("Common error: {0}")]
    Common(#[from] sbe_common::Error),
}

/// Result type for engine operations
pub type EngineResult<T> = Result<T, EngineError>;
