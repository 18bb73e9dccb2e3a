//! Storage Retry Logic
//!
//! Exponential backoff for transient cache/checkpoint failures (locked
//! database, interrupted I/O). Corrupt data and serialization errors fail
//! immediately.

use crate::store::StorageError;
use sbe_common::config::StorageRetryConfig;
use std::future::Future;
use std::time::Duration;

/// Retry a storage operation with exponential backoff
///
/// **Algorithm:**
/// 1. Attempt operation
/// 2. If successful, return result
/// 3. If the error is transient and attempts remain: log WARN, back off, retry
/// 4. Otherwise return the error
///
/// **Backoff Strategy:**
/// - Initial delay: `initial_backoff_ms`
/// - Max delay: `max_backoff_ms`
/// - Multiplier: 2
///
/// # Arguments
/// * `operation_name` - Name for logging (e.g., "cache put", "checkpoint save")
/// * `config` - Attempt budget and backoff bounds
/// * `operation` - Async closure that performs the storage operation
pub async fn retry_storage<F, Fut, T>(
    operation_name: &str,
    config: &StorageRetryConfig,
    mut operation: F,
) -> Result<T, StorageError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, StorageError>>,
{
    let max_attempts = config.max_attempts.max(1);
    let max_backoff_ms = config.max_backoff_ms.max(config.initial_backoff_ms);
    let mut backoff_ms = config.initial_backoff_ms;
    let mut attempt = 0;

    loop {
        attempt += 1;

        match operation().await {
            Ok(result) => {
                if attempt > 1 {
                    tracing::debug!(
                        operation = operation_name,
                        attempt,
                        "Storage operation succeeded after retry"
                    );
                }
                return Ok(result);
            }
            Err(err) if !err.is_transient() => return Err(err),
            Err(err) if attempt >= max_attempts => {
                tracing::error!(
                    operation = operation_name,
                    attempt,
                    error = %err,
                    "Storage operation failed: retry budget exhausted"
                );
                return Err(err);
            }
            Err(err) => {
                let delay_ms = backoff_ms.min(max_backoff_ms);
                tracing::warn!(
                    operation = operation_name,
                    attempt,
                    backoff_ms = delay_ms,
                    error = %err,
                    "Storage operation failed, will retry after backoff"
                );

                tokio::time::sleep(Duration::from_millis(delay_ms)).await;
                backoff_ms = backoff_ms.saturating_mul(2).min(max_backoff_ms);
            }
        }
    }
}
