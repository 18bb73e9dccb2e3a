//! # Sample Batch Engine Common Library
//!
//! Shared code for the sample batch engine crates:
//! - Error types
//! - TOML configuration and path resolution
//! - Job event types and the broadcast EventBus
//! - Atomic file replacement

pub mod atomic_file;
pub mod config;
pub mod error;
pub mod events;

pub use error::{Error, Result};
