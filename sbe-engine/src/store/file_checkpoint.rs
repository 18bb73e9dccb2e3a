//! JSON file manifests and checkpoints
//!
//! Layout under the data directory:
//! ```text
//! jobs/<job_id>/manifest.json
//! jobs/<job_id>/checkpoint.json
//! ```
//! Every write is a temp-file + fsync + rename, so a crash leaves either the
//! previous file or the new one.

use super::{CheckpointStore, StorageError};
use crate::models::{Checkpoint, Manifest, SampleId};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sbe_common::atomic_file::write_atomic;
use serde::de::DeserializeOwned;
use std::collections::BTreeSet;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};
use uuid::Uuid;

const JOBS_DIR: &str = "jobs";
const MANIFEST_FILE: &str = "manifest.json";
const CHECKPOINT_FILE: &str = "checkpoint.json";

/// Manifest and checkpoint files under a data directory
#[derive(Debug, Clone)]
pub struct FileCheckpointStore {
    root: PathBuf,
}

impl FileCheckpointStore {
    pub fn new(data_dir: impl Into<PathBuf>) -> Self {
        Self { root: data_dir.into() }
    }

    fn jobs_dir(&self) -> PathBuf {
        self.root.join(JOBS_DIR)
    }

    fn job_dir(&self, job_id: Uuid) -> PathBuf {
        self.jobs_dir().join(job_id.to_string())
    }

    pub fn manifest_path(&self, job_id: Uuid) -> PathBuf {
        self.job_dir(job_id).join(MANIFEST_FILE)
    }

    pub fn checkpoint_path(&self, job_id: Uuid) -> PathBuf {
        self.job_dir(job_id).join(CHECKPOINT_FILE)
    }
}

/// Serialize and atomically write on the blocking pool
async fn write_json<T: serde::Serialize>(path: PathBuf, value: &T) -> Result<(), StorageError> {
    let bytes = serde_json::to_vec_pretty(value)?;
    tokio::task::spawn_blocking(move || write_atomic(&path, &bytes, None))
        .await
        .map_err(|e| StorageError::Task(e.to_string()))??;
    Ok(())
}

/// Read and parse a JSON file; `None` if it does not exist
async fn read_json<T: DeserializeOwned>(path: &Path) -> Result<Option<T>, StorageError> {
    let bytes = match tokio::fs::read(path).await {
        Ok(bytes) => bytes,
        Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(e.into()),
    };

    serde_json::from_slice(&bytes)
        .map(Some)
        .map_err(|e| StorageError::Corrupt(format!("{}: {}", path.display(), e)))
}

#[async_trait]
impl CheckpointStore for FileCheckpointStore {
    async fn save_manifest(&self, manifest: &Manifest) -> Result<(), StorageError> {
        let path = self.manifest_path(manifest.job_id);
        write_json(path, manifest).await?;
        debug!(job_id = %manifest.job_id, status = %manifest.status, "Manifest saved");
        Ok(())
    }

    async fn load_manifest(&self, job_id: Uuid) -> Result<Option<Manifest>, StorageError> {
        read_json(&self.manifest_path(job_id)).await
    }

    async fn list_jobs(&self) -> Result<Vec<Uuid>, StorageError> {
        let mut dir = match tokio::fs::read_dir(self.jobs_dir()).await {
            Ok(dir) => dir,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };

        let mut ids = Vec::new();
        while let Some(entry) = dir.next_entry().await? {
            let name = entry.file_name();
            let Some(name) = name.to_str() else { continue };
            match Uuid::parse_str(name) {
                Ok(id) if tokio::fs::try_exists(self.manifest_path(id)).await.unwrap_or(false) => ids.push(id),
                Ok(_) => {}
                Err(_) => warn!(entry = %name, "Ignoring unexpected entry in jobs directory"),
            }
        }
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
        write_json(self.checkpoint_path(job_id), &checkpoint).await?;
        debug!(%job_id, resolved = resolved.len(), "Checkpoint saved");
        Ok(())
    }

    async fn load_checkpoint(&self, job_id: Uuid) -> Result<Option<Checkpoint>, StorageError> {
        read_json(&self.checkpoint_path(job_id)).await
    }
}
