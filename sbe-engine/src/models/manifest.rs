//! Job manifest state machine and checkpoint
//!
//! A job progresses `Planning → Running → {Completed | Paused | Aborted}`.
//! The manifest's sample list is fixed when the job is created; only the
//! status fields change afterwards.

use super::{Sample, SampleId};
use chrono::{DateTime, Utc};
use sbe_common::config::RateLimitConfig;
use sbe_common::events::JobState;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashSet};
use std::path::PathBuf;
use uuid::Uuid;

/// State transition record
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StateTransition {
    pub job_id: Uuid,
    pub old_state: JobState,
    pub new_state: JobState,
    pub transitioned_at: DateTime<Utc>,
}

/// Job-level record
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Manifest {
    /// Unique job identifier
    pub job_id: Uuid,

    /// Collection root that was scanned
    pub collection_root: PathBuf,

    /// Every sample discovered at scan time, in discovery order
    pub samples: Vec<Sample>,

    /// Maximum samples per external call
    pub batch_size: usize,

    /// Provider budget used for this job
    pub rate_limit: RateLimitConfig,

    /// Checkpoint after every N completed batches
    pub checkpoint_interval: usize,

    /// Current job status
    pub status: JobState,

    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,

    /// Reason for the latest pause or abort
    #[serde(default)]
    pub last_error: Option<String>,
}

impl Manifest {
    /// Create new manifest in `Planning` state
    pub fn new(
        collection_root: PathBuf,
        samples: Vec<Sample>,
        batch_size: usize,
        rate_limit: RateLimitConfig,
        checkpoint_interval: usize,
    ) -> Self {
        let now = Utc::now();
        Self {
            job_id: Uuid::new_v4(),
            collection_root,
            samples,
            batch_size,
            rate_limit,
            checkpoint_interval,
            status: JobState::Planning,
            created_at: now,
            updated_at: now,
            last_error: None,
        }
    }

    /// Transition to new state
    pub fn transition_to(&mut self, new_state: JobState) -> StateTransition {
        let now = Utc::now();
        let transition = StateTransition {
            job_id: self.job_id,
            old_state: self.status,
            new_state,
            transitioned_at: now,
        };
        self.status = new_state;
        self.updated_at = now;
        transition
    }

    pub fn total(&self) -> usize {
        self.samples.len()
    }

    /// Samples not yet in `resolved`, in discovery order
    pub fn remaining<'a>(&'a self, resolved: &'a BTreeSet<SampleId>) -> impl Iterator<Item = &'a Sample> + 'a {
        self.samples.iter().filter(move |s| !resolved.contains(&s.id))
    }

    /// Check if the job is finished
    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }
}

/// Durable snapshot of resolved samples
///
/// Always a subset of the manifest's samples; never shrinks within a job.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Checkpoint {
    pub job_id: Uuid,
    pub resolved_sample_ids: BTreeSet<SampleId>,
    pub updated_at: DateTime<Utc>,
}

impl Checkpoint {
    pub fn empty(job_id: Uuid) -> Self {
        Self {
            job_id,
            resolved_sample_ids: BTreeSet::new(),
            updated_at: Utc::now(),
        }
    }

    /// Drop ids the manifest does not know about
    ///
    /// Returns the number of ids removed.
    pub fn retain_known(&mut self, manifest: &Manifest) -> usize {
        let known: HashSet<&SampleId> = manifest.samples.iter().map(|s| &s.id).collect();
        let before = self.resolved_sample_ids.len();
        self.resolved_sample_ids.retain(|id| known.contains(id));
        before - self.resolved_sample_ids.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample(id: &str) -> Sample {
        Sample {
            id: SampleId::from(id),
            path: PathBuf::from(format!("/s/{id}.wav")),
            size_bytes: 10,
            duration_secs: None,
            category: None,
            local_failure: None,
        }
    }

    fn manifest(ids: &[&str]) -> Manifest {
        Manifest::new(
            PathBuf::from("/s"),
            ids.iter().map(|id| sample(id)).collect(),
            5,
            RateLimitConfig::default(),
            1,
        )
    }

    #[test]
    fn test_new_manifest_is_planning() {
        let m = manifest(&["a", "b"]);
        assert_eq!(m.status, JobState::Planning);
        assert_eq!(m.total(), 2);
        assert!(!m.is_terminal());
    }

    #[test]
    fn test_transition_records_states() {
        let mut m = manifest(&["a"]);
        let t = m.transition_to(JobState::Running);
        assert_eq!(t.old_state, JobState::Planning);
        assert_eq!(t.new_state, JobState::Running);
        assert_eq!(m.status, JobState::Running);

        m.transition_to(JobState::Completed);
        assert!(m.is_terminal());
    }

    #[test]
    fn test_remaining_excludes_resolved_in_order() {
        let m = manifest(&["a", "b", "c", "d"]);
        let resolved: BTreeSet<SampleId> = ["b", "d"].iter().map(|s| SampleId::from(*s)).collect();

        let remaining: Vec<&str> = m.remaining(&resolved).map(|s| s.id.as_str()).collect();
        assert_eq!(remaining, vec!["a", "c"]);
    }

    #[test]
    fn test_checkpoint_retain_known() {
        let m = manifest(&["a", "b"]);
        let mut cp = Checkpoint::empty(m.job_id);
        cp.resolved_sample_ids.insert(SampleId::from("a"));
        cp.resolved_sample_ids.insert(SampleId::from("zzz"));

        assert_eq!(cp.retain_known(&m), 1);
        assert_eq!(cp.resolved_sample_ids.len(), 1);
    }
}
