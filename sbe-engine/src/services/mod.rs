//! Service modules for the batch engine
//!
//! Leaf-first: catalog, rate limiter, planner, classifier, progress tracker,
//! and the orchestrator that drives them.

pub mod batch_orchestrator;
pub mod batch_planner;
pub mod error_classifier;
pub mod progress_tracker;
pub mod rate_limiter;
pub mod sample_catalog;

pub use batch_orchestrator::{JobSummary, Orchestrator, SharedProgress};
pub use batch_planner::BatchPlanner;
pub use error_classifier::{classify, Outcome, OutcomeCategory, RetryDecision, RetryPolicy, SkippedSample};
pub use progress_tracker::ProgressTracker;
pub use rate_limiter::RateLimiter;
pub use sample_catalog::{CatalogError, CatalogScan, SampleCatalog};
