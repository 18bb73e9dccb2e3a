//! Batch of samples sent together in one external call

use super::SampleId;
use sbe_common::events::BatchState;
use serde::{Deserialize, Serialize};

/// Ordered group of sample references for one Analyze call
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Batch {
    /// Sequence number, unique within a run
    pub sequence: u64,
    /// Member sample ids in dispatch order
    pub members: Vec<SampleId>,
    pub status: BatchState,
}

impl Batch {
    pub fn new(sequence: u64, members: Vec<SampleId>) -> Self {
        Self {
            sequence,
            members,
            status: BatchState::Pending,
        }
    }

    pub fn len(&self) -> usize {
        self.members.len()
    }

    pub fn is_empty(&self) -> bool {
        self.members.is_empty()
    }
}
