//! Content-addressed cache entries

use super::{FailureKind, SampleId, SampleStatus};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Cached value for one sample hash
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum CachedValue {
    /// Analysis result payload from the external service
    Analyzed { result: serde_json::Value },
    /// Permanent failure marker
    Skipped {
        /// Job that gave up on the sample
        job_id: Uuid,
        reason: FailureKind,
        message: String,
    },
}

/// One cache record, keyed by sample hash
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CacheEntry {
    pub hash: SampleId,
    pub value: CachedValue,
    pub updated_at: DateTime<Utc>,
}

impl CacheEntry {
    pub fn analyzed(hash: SampleId, result: serde_json::Value) -> Self {
        Self {
            hash,
            value: CachedValue::Analyzed { result },
            updated_at: Utc::now(),
        }
    }

    pub fn skipped(hash: SampleId, job_id: Uuid, reason: FailureKind, message: impl Into<String>) -> Self {
        Self {
            hash,
            value: CachedValue::Skipped {
                job_id,
                reason,
                message: message.into(),
            },
            updated_at: Utc::now(),
        }
    }

    /// Whether this entry resolves the sample for `job_id`
    ///
    /// Results resolve a sample for every job. Skip markers only resolve it
    /// for the job that wrote them, so other jobs try the sample again.
    pub fn resolves_for(&self, job_id: Uuid) -> bool {
        match &self.value {
            CachedValue::Analyzed { .. } => true,
            CachedValue::Skipped { job_id: owner, .. } => *owner == job_id,
        }
    }

    pub fn is_skip_marker(&self) -> bool {
        matches!(self.value, CachedValue::Skipped { .. })
    }

    /// Status of the sample as seen by `job_id`
    pub fn status_for(&self, job_id: Uuid) -> SampleStatus {
        match &self.value {
            CachedValue::Analyzed { .. } => SampleStatus::Succeeded,
            CachedValue::Skipped { job_id: owner, .. } if *owner == job_id => SampleStatus::Skipped,
            CachedValue::Skipped { .. } => SampleStatus::Pending,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_results_resolve_for_any_job() {
        let entry = CacheEntry::analyzed(SampleId::from("h"), json!({"vibe": "warm"}));
        assert!(entry.resolves_for(Uuid::new_v4()));
        assert!(!entry.is_skip_marker());
        assert_eq!(entry.status_for(Uuid::new_v4()), SampleStatus::Succeeded);
    }

    #[test]
    fn test_skip_marker_only_resolves_owner() {
        let owner = Uuid::new_v4();
        let entry = CacheEntry::skipped(SampleId::from("h"), owner, FailureKind::CorruptInput, "bad header");
        assert!(entry.resolves_for(owner));
        assert!(!entry.resolves_for(Uuid::new_v4()));
        assert!(entry.is_skip_marker());
        assert_eq!(entry.status_for(owner), SampleStatus::Skipped);
        assert_eq!(entry.status_for(Uuid::new_v4()), SampleStatus::Pending);
    }

    #[test]
    fn test_value_serialization_is_tagged() {
        let value = CachedValue::Skipped {
            job_id: Uuid::nil(),
            reason: FailureKind::RetriesExhausted,
            message: "gave up".to_string(),
        };
        let json = serde_json::to_value(&value).unwrap();
        assert_eq!(json["kind"], "skipped");
        assert_eq!(json["reason"], "retries_exhausted");
    }
}
