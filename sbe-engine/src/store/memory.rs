//! In-memory stores

use super::{CacheStore, CheckpointStore, StorageError};
use crate::models::{CacheEntry, CachedValue, Checkpoint, Manifest, SampleId};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::{BTreeSet, HashMap};
use std::sync::atomic::{AtomicUsize, Ordering};
use tokio::sync::RwLock;
use uuid::Uuid;

/// HashMap-backed cache
#[derive(Debug, Default)]
pub struct MemoryCacheStore {
    entries: RwLock<HashMap<SampleId, CacheEntry>>,
    puts: AtomicUsize,
}

impl MemoryCacheStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Total `put` calls, including overwrites
    pub fn put_count(&self) -> usize {
        self.puts.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl CacheStore for MemoryCacheStore {
    async fn lookup(&self, hash: &SampleId) -> Result<Option<CacheEntry>, StorageError> {
        Ok(self.entries.read().await.get(hash).cloned())
    }

    async fn put(&self, hash: &SampleId, value: CachedValue) -> Result<(), StorageError> {
        let entry = CacheEntry {
            hash: hash.clone(),
            value,
            updated_at: Utc::now(),
        };
        self.entries.write().await.insert(hash.clone(), entry);
        self.puts.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn len(&self) -> Result<usize, StorageError> {
        Ok(self.entries.read().await.len())
    }

    async fn entries(&self) -> Result<Vec<CacheEntry>, StorageError> {
        let mut entries: Vec<CacheEntry> = self.entries.read().await.values().cloned().collect();
        entries.sort_by(|a, b| a.hash.cmp(&b.hash));
        Ok(entries)
    }
}

/// HashMap-backed manifest and checkpoint store
#[derive(Debug, Default)]
pub struct MemoryCheckpointStore {
    manifests: RwLock<HashMap<Uuid, Manifest>>,
    checkpoints: RwLock<HashMap<Uuid, Checkpoint>>,
    checkpoint_saves: AtomicUsize,
}

impl MemoryCheckpointStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Total `save_checkpoint` calls
    pub fn checkpoint_saves(&self) -> usize {
        self.checkpoint_saves.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl CheckpointStore for MemoryCheckpointStore {
    async fn save_manifest(&self, manifest: &Manifest) -> Result<(), StorageError> {
        self.manifests
            .write()
            .await
            .insert(manifest.job_id, manifest.clone());
        Ok(())
    }

    async fn load_manifest(&self, job_id: Uuid) -> Result<Option<Manifest>, StorageError> {
        Ok(self.manifests.read().await.get(&job_id).cloned())
    }

    async fn list_jobs(&self) -> Result<Vec<Uuid>, StorageError> {
        let mut ids: Vec<Uuid> = self.manifests.read().await.keys().copied().collect();
        ids.sort();
        Ok(ids)
    }

    async fn save_checkpoint(
        &self,
        job_id: Uuid,
        resolved: &BTreeSet<SampleId>,
        updated_at: DateTime<Utc>,
    ) -> Result<(), StorageError> {
        let checkpoint = Checkpoint {
            job_id,
            resolved_sample_ids: resolved.clone(),
            updated_at,
        };
        self.checkpoints.write().await.insert(job_id, checkpoint);
        self.checkpoint_saves.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn load_checkpoint(&self, job_id: Uuid) -> Result<Option<Checkpoint>, StorageError> {
        Ok(self.checkpoints.read().await.get(&job_id).cloned())
    }
}
