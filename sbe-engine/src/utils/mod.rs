//! Utility modules for sbe-engine

pub mod storage_retry;

pub use storage_retry::retry_storage;
