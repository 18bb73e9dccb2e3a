//! sbe-engine library interface
//!
//! Batch analysis of a local sample collection against a rate-limited
//! external service. Samples are cataloged by content hash, grouped into
//! batches, dispatched under a rolling call budget, and resolved into a
//! persistent cache. Jobs checkpoint as they go and resume after a crash or
//! pause without re-analyzing anything.

pub mod analyzer;
pub mod controller;
pub mod error;
pub mod models;
pub mod services;
pub mod store;
pub mod utils;

pub use crate::controller::{JobController, StatusReport};
pub use crate::error::{EngineError, EngineResult};
