//! Data models for the batch engine
//!
//! - Samples and their content-hash identity
//! - Batches of samples sent together in one external call
//! - Job manifest (state machine) and checkpoint
//! - Cache entries (analysis results and skip markers)
//! - Failure kinds and their severity

pub mod batch;
pub mod cache_entry;
pub mod failure;
pub mod manifest;
pub mod sample;

pub use batch::Batch;
pub use cache_entry::{CacheEntry, CachedValue};
pub use failure::{FailureKind, Severity};
pub use manifest::{Checkpoint, Manifest, StateTransition};
pub use sample::{Sample, SampleId, SampleStatus};
