//! SQLite-backed result cache
//!
//! One row per sample hash. `put` is an upsert, so replaying a batch after a
//! crash overwrites rather than duplicates. WAL mode lets several jobs read
//! while one writes.

use super::{CacheStore, StorageError};
use crate::models::{CacheEntry, CachedValue, FailureKind, SampleId};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePool, SqlitePoolOptions, SqliteRow, SqliteSynchronous};
use sqlx::Row;
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;
use tracing::{debug, info};
use uuid::Uuid;

const MAX_CONNECTIONS: u32 = 8;
const BUSY_TIMEOUT: Duration = Duration::from_secs(5);

const KIND_ANALYZED: &str = "analyzed";
const KIND_SKIPPED: &str = "skipped";

/// Result cache in a SQLite database
#[derive(Clone)]
pub struct SqliteCacheStore {
    pool: SqlitePool,
}

impl SqliteCacheStore {
    /// Open (creating if needed) the cache database at `path`
    pub async fn open(path: &Path) -> Result<Self, StorageError> {
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }

        let newly_created = !path.exists();
        let pool = SqlitePoolOptions::new()
            .max_connections(MAX_CONNECTIONS)
            .connect_with(
                SqliteConnectOptions::new()
                    .filename(path)
                    .busy_timeout(BUSY_TIMEOUT)
                    .journal_mode(SqliteJournalMode::Wal)
                    .synchronous(SqliteSynchronous::Normal)
                    .create_if_missing(true),
            )
            .await?;

        if newly_created {
            info!(path = %path.display(), "Initialized new cache database");
        } else {
            info!(path = %path.display(), "Opened existing cache database");
        }

        Self::from_pool(pool).await
    }

    /// Private in-memory database, for tests
    pub async fn in_memory() -> Result<Self, StorageError> {
        // A single connection that never recycles, since each connection to
        // `:memory:` sees its own database
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .min_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
            .connect_with(SqliteConnectOptions::from_str("sqlite::memory:")?)
            .await?;

        Self::from_pool(pool).await
    }

    async fn from_pool(pool: SqlitePool) -> Result<Self, StorageError> {
        create_cache_table(&pool).await?;
        Ok(Self { pool })
    }

    pub async fn close(&self) {
        self.pool.close().await;
    }
}

async fn create_cache_table(pool: &SqlitePool) -> Result<(), StorageError> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS cache_entries (
            hash TEXT PRIMARY KEY,
            kind TEXT NOT NULL CHECK (kind IN ('analyzed', 'skipped')),
            payload TEXT,
            job_id TEXT,
            failure TEXT,
            message TEXT,
            updated_at TEXT NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    Ok(())
}

/// Decode one `cache_entries` row
fn entry_from_row(row: &SqliteRow) -> Result<CacheEntry, StorageError> {
    let hash: String = row.try_get("hash")?;
    let kind: String = row.try_get("kind")?;
    let updated_at: String = row.try_get("updated_at")?;

    let updated_at = DateTime::parse_from_rfc3339(&updated_at)
        .map(|t| t.with_timezone(&Utc))
        .map_err(|e| StorageError::Corrupt(format!("Bad timestamp for {}: {}", hash, e)))?;

    let value = match kind.as_str() {
        KIND_ANALYZED => {
            let payload: Option<String> = row.try_get("payload")?;
            let payload = payload
                .ok_or_else(|| StorageError::Corrupt(format!("Analyzed entry {} has no payload", hash)))?;
            CachedValue::Analyzed {
                result: serde_json::from_str(&payload)?,
            }
        }
        KIND_SKIPPED => {
            let job_id: Option<String> = row.try_get("job_id")?;
            let failure: Option<String> = row.try_get("failure")?;
            let message: Option<String> = row.try_get("message")?;

            let job_id = job_id
                .as_deref()
                .map(Uuid::parse_str)
                .transpose()
                .map_err(|e| StorageError::Corrupt(format!("Bad job id for {}: {}", hash, e)))?
                .ok_or_else(|| StorageError::Corrupt(format!("Skip marker {} has no job id", hash)))?;
            let reason = failure
                .as_deref()
                .map(FailureKind::from_str)
                .transpose()
                .map_err(StorageError::Corrupt)?
                .ok_or_else(|| StorageError::Corrupt(format!("Skip marker {} has no reason", hash)))?;

            CachedValue::Skipped {
                job_id,
                reason,
                message: message.unwrap_or_default(),
            }
        }
        other => {
            return Err(StorageError::Corrupt(format!(
                "Unknown cache entry kind '{}' for {}",
                other, hash
            )))
        }
    };

    Ok(CacheEntry {
        hash: SampleId::from_content_hash(hash),
        value,
        updated_at,
    })
}

#[async_trait]
impl CacheStore for SqliteCacheStore {
    async fn lookup(&self, hash: &SampleId) -> Result<Option<CacheEntry>, StorageError> {
        let row = sqlx::query(
            "SELECT hash, kind, payload, job_id, failure, message, updated_at
             FROM cache_entries WHERE hash = ?",
        )
        .bind(hash.as_str())
        .fetch_optional(&self.pool)
        .await?;

        row.as_ref().map(entry_from_row).transpose()
    }

    async fn put(&self, hash: &SampleId, value: CachedValue) -> Result<(), StorageError> {
        let (kind, payload, job_id, failure, message) = match &value {
            CachedValue::Analyzed { result } => (KIND_ANALYZED, Some(serde_json::to_string(result)?), None, None, None),
            CachedValue::Skipped { job_id, reason, message } => (
                KIND_SKIPPED,
                None,
                Some(job_id.to_string()),
                Some(reason.as_str()),
                Some(message.clone()),
            ),
        };

        sqlx::query(
            r#"
            INSERT INTO cache_entries (hash, kind, payload, job_id, failure, message, updated_at)
            VALUES (?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT(hash) DO UPDATE SET
                kind = excluded.kind,
                payload = excluded.payload,
                job_id = excluded.job_id,
                failure = excluded.failure,
                message = excluded.message,
                updated_at = excluded.updated_at
            "#,
        )
        .bind(hash.as_str())
        .bind(kind)
        .bind(payload)
        .bind(job_id)
        .bind(failure)
        .bind(message)
        .bind(Utc::now().to_rfc3339())
        .execute(&self.pool)
        .await?;

        debug!(hash = %hash, kind, "Cache entry written");
        Ok(())
    }

    async fn len(&self) -> Result<usize, StorageError> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM cache_entries")
            .fetch_one(&self.pool)
            .await?;
        Ok(count.max(0) as usize)
    }

    async fn entries(&self) -> Result<Vec<CacheEntry>, StorageError> {
        let rows = sqlx::query(
            "SELECT hash, kind, payload, job_id, failure, message, updated_at
             FROM cache_entries ORDER BY hash",
        )
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(entry_from_row).collect()
    }
}
