//! Cache & checkpoint persistence
//!
//! Two injected stores back the engine:
//! - `CacheStore`: content-addressed results and skip markers, shared by every
//!   job and designed for concurrent access.
//! - `CheckpointStore`: per-job manifests and checkpoints, owned by the
//!   orchestrator running that job.
//!
//! Durable implementations are `SqliteCacheStore` and `FileCheckpointStore`;
//! the in-memory ones serve tests and dry runs.

pub mod file_checkpoint;
pub mod memory;
pub mod sqlite_cache;

pub use file_checkpoint::FileCheckpointStore;
pub use memory::{MemoryCacheStore, MemoryCheckpointStore};
pub use sqlite_cache::SqliteCacheStore;

use crate::models::{CacheEntry, CachedValue, Checkpoint, Manifest, SampleId};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::BTreeSet;
use thiserror::Error;
use uuid::Uuid;

/// Storage layer errors
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Stored data could not be interpreted
    #[error("Corrupt store data: {0}")]
    Corrupt(String),

    /// Blocking task panicked or was cancelled
    #[error("Storage task failed: {0}")]
    Task(String),
}

impl StorageError {
    /// Whether retrying the same operation may succeed
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            StorageError::Io(_) | StorageError::Database(_) | StorageError::Task(_)
        )
    }
}

/// Content-addressed result cache
#[async_trait]
pub trait CacheStore: Send + Sync {
    /// Keyed lookup; side-effect free
    async fn lookup(&self, hash: &SampleId) -> Result<Option<CacheEntry>, StorageError>;

    /// Idempotent upsert; a second put for the same hash replaces the first
    async fn put(&self, hash: &SampleId, value: CachedValue) -> Result<(), StorageError>;

    /// Number of active entries
    async fn len(&self) -> Result<usize, StorageError>;

    /// Every active entry, ordered by hash
    async fn entries(&self) -> Result<Vec<CacheEntry>, StorageError>;
}

/// Per-job manifest and checkpoint persistence
#[async_trait]
pub trait CheckpointStore: Send + Sync {
    /// Atomically write (or replace) the job manifest
    async fn save_manifest(&self, manifest: &Manifest) -> Result<(), StorageError>;

    async fn load_manifest(&self, job_id: Uuid) -> Result<Option<Manifest>, StorageError>;

    /// Ids of every job with a stored manifest
    async fn list_jobs(&self) -> Result<Vec<Uuid>, StorageError>;

    /// Atomically replace the job checkpoint
    ///
    /// A crash mid-write leaves the previous checkpoint intact.
    async fn save_checkpoint(
        &self,
        job_id: Uuid,
        resolved: &BTreeSet<SampleId>,
        updated_at: DateTime<Utc>,
    ) -> Result<(), StorageError>;

    /// Last saved checkpoint, or `None` if the job never checkpointed
    async fn load_checkpoint(&self, job_id: Uuid) -> Result<Option<Checkpoint>, StorageError>;
}
