//! Sample identity and descriptors

use super::FailureKind;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;
use std::path::{Path, PathBuf};

/// Prefix for ids of samples whose bytes could not be hashed
const PATH_ID_PREFIX: &str = "path:";

/// Stable sample identity
///
/// Normally the hex SHA-256 of the file contents, which doubles as the cache
/// key. Samples that could not be read are identified by `path:` plus the
/// SHA-256 of their display path instead.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SampleId(String);

impl SampleId {
    /// Id from a hex content hash
    pub fn from_content_hash(hash: impl Into<String>) -> Self {
        Self(hash.into())
    }

    /// Id for a file whose contents could not be read
    pub fn for_unreadable_path(path: &Path) -> Self {
        let digest = Sha256::digest(path.to_string_lossy().as_bytes());
        Self(format!("{}{:x}", PATH_ID_PREFIX, digest))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Whether this id is a content hash (usable as a cache key for results)
    pub fn is_content_hash(&self) -> bool {
        !self.0.starts_with(PATH_ID_PREFIX)
    }
}

impl fmt::Display for SampleId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for SampleId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// Per-sample processing status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SampleStatus {
    Pending,
    InBatch,
    Succeeded,
    /// Failed transiently, waiting for a retry
    Failed,
    Skipped,
}

impl SampleStatus {
    pub fn is_resolved(self) -> bool {
        matches!(self, SampleStatus::Succeeded | SampleStatus::Skipped)
    }
}

/// One audio sample discovered by the catalog
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Sample {
    pub id: SampleId,
    /// Display path
    pub path: PathBuf,
    pub size_bytes: u64,
    /// Duration in seconds, when the container could be parsed locally
    #[serde(default)]
    pub duration_secs: Option<f64>,
    /// Cheap local category label (kick, snare, pad, ...)
    #[serde(default)]
    pub category: Option<String>,
    /// Set when the catalog already knows this sample cannot be analyzed
    #[serde(default)]
    pub local_failure: Option<FailureKind>,
}
