//! Persisted half of the audio cache.
//!
//! The cache manager only sees the [`CacheStore`] trait. [`SqliteCacheStore`]
//! is the production store; [`MemoryCacheStore`] backs tests and
//! `--no-persist` runs.

use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use chrono::{DateTime, TimeZone, Utc};
use dashmap::DashMap;
use rusqlite::{params, OptionalExtension, Row};
use thiserror::Error;

use crate::core::types::Fingerprint;
use crate::download::validate::AudioFormat;
use crate::storage::db::{get_connection, DbPool};

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("cache database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("cache database pool error: {0}")]
    Pool(#[from] r2d2::Error),

    #[error("cache store task failed: {0}")]
    Task(String),

    #[error("cache store unavailable: {0}")]
    Unavailable(String),
}

/// One persisted cache entry.
#[derive(Debug, Clone, PartialEq)]
pub struct CacheRecord {
    pub fingerprint: Fingerprint,
    pub file_id: Option<String>,
    pub blob: Option<Bytes>,
    pub format: Option<AudioFormat>,
    pub duration_secs: Option<f64>,
    pub validated_at: DateTime<Utc>,
}

impl CacheRecord {
    pub fn is_fresh(&self, ttl: Duration, now: DateTime<Utc>) -> bool {
        is_fresh(self.validated_at, ttl, now)
    }
}

/// `now - validated_at < ttl`; timestamps from the future count as fresh.
pub fn is_fresh(validated_at: DateTime<Utc>, ttl: Duration, now: DateTime<Utc>) -> bool {
    let age = now.signed_duration_since(validated_at).num_seconds();
    age < i64::try_from(ttl.as_secs()).unwrap_or(i64::MAX)
}

#[async_trait]
pub trait CacheStore: Send + Sync {
    async fn load(&self, fingerprint: &Fingerprint) -> Result<Option<CacheRecord>, StoreError>;

    /// Inserts or replaces the whole record.
    async fn save(&self, record: &CacheRecord) -> Result<(), StoreError>;

    /// Sets the file id, creating a blob-less record stamped `now` if none exists.
    async fn set_file_id(&self, fingerprint: &Fingerprint, file_id: &str, now: DateTime<Utc>)
        -> Result<(), StoreError>;

    async fn remove(&self, fingerprint: &Fingerprint) -> Result<(), StoreError>;

    /// Deletes records validated before `cutoff`; returns how many.
    async fn prune(&self, cutoff: DateTime<Utc>) -> Result<usize, StoreError>;

    async fn count(&self) -> Result<usize, StoreError>;
}

/// SQLite store; every query runs on the blocking pool.
#[derive(Clone)]
pub struct SqliteCacheStore {
    pool: DbPool,
}

impl SqliteCacheStore {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }

    async fn with_conn<T, F>(&self, op: F) -> Result<T, StoreError>
    where
        T: Send + 'static,
        F: FnOnce(&rusqlite::Connection) -> rusqlite::Result<T> + Send + 'static,
    {
        let pool = self.pool.clone();
        tokio::task::spawn_blocking(move || {
            let conn = get_connection(&pool)?;
            Ok(op(&conn)?)
        })
        .await
        .map_err(|e| StoreError::Task(e.to_string()))?
    }
}

fn record_from_row(row: &Row<'_>) -> rusqlite::Result<CacheRecord> {
    let fingerprint: String = row.get("fingerprint")?;
    let format: Option<String> = row.get("format")?;
    let blob: Option<Vec<u8>> = row.get("blob")?;
    let validated_at: i64 = row.get("validated_at")?;

    Ok(CacheRecord {
        fingerprint: fingerprint.parse().map_err(|e: String| {
            rusqlite::Error::FromSqlConversionFailure(0, rusqlite::types::Type::Text, e.into())
        })?,
        file_id: row.get("file_id")?,
        blob: blob.map(Bytes::from),
        format: format.and_then(|f| f.parse().ok()),
        duration_secs: row.get("duration_secs")?,
        validated_at: Utc.timestamp_opt(validated_at, 0).single().unwrap_or_default(),
    })
}

#[async_trait]
impl CacheStore for SqliteCacheStore {
    async fn load(&self, fingerprint: &Fingerprint) -> Result<Option<CacheRecord>, StoreError> {
        let key = fingerprint.to_string();
        self.with_conn(move |conn| {
            conn.query_row(
                "SELECT fingerprint, file_id, blob, format, duration_secs, validated_at
                 FROM audio_cache WHERE fingerprint = ?1",
                params![key],
                record_from_row,
            )
            .optional()
        })
        .await
    }

    async fn save(&self, record: &CacheRecord) -> Result<(), StoreError> {
        let record = record.clone();
        self.with_conn(move |conn| {
            conn.execute(
                "INSERT OR REPLACE INTO audio_cache
                    (fingerprint, file_id, blob, format, duration_secs, validated_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                params![
                    record.fingerprint.as_str(),
                    record.file_id,
                    record.blob.as_deref(),
                    record.format.map(|f| f.to_string()),
                    record.duration_secs,
                    record.validated_at.timestamp(),
                ],
            )
            .map(|_| ())
        })
        .await
    }

    async fn set_file_id(
        &self,
        fingerprint: &Fingerprint,
        file_id: &str,
        now: DateTime<Utc>,
    ) -> Result<(), StoreError> {
        let key = fingerprint.to_string();
        let file_id = file_id.to_string();
        self.with_conn(move |conn| {
            conn.execute(
                "INSERT INTO audio_cache (fingerprint, file_id, validated_at) VALUES (?1, ?2, ?3)
                 ON CONFLICT(fingerprint) DO UPDATE SET file_id = excluded.file_id",
                params![key, file_id, now.timestamp()],
            )
            .map(|_| ())
        })
        .await
    }

    async fn remove(&self, fingerprint: &Fingerprint) -> Result<(), StoreError> {
        let key = fingerprint.to_string();
        self.with_conn(move |conn| {
            conn.execute("DELETE FROM audio_cache WHERE fingerprint = ?1", params![key])
                .map(|_| ())
        })
        .await
    }

    async fn prune(&self, cutoff: DateTime<Utc>) -> Result<usize, StoreError> {
        self.with_conn(move |conn| {
            conn.execute(
                "DELETE FROM audio_cache WHERE validated_at <= ?1",
                params![cutoff.timestamp()],
            )
        })
        .await
    }

    async fn count(&self) -> Result<usize, StoreError> {
        self.with_conn(|conn| {
            conn.query_row("SELECT COUNT(*) FROM audio_cache", [], |row| row.get::<_, i64>(0))
                .map(|n| usize::try_from(n).unwrap_or_default())
        })
        .await
    }
}

/// Process-local store.
#[derive(Debug, Default)]
pub struct MemoryCacheStore {
    records: DashMap<Fingerprint, CacheRecord>,
}

impl MemoryCacheStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl CacheStore for MemoryCacheStore {
    async fn load(&self, fingerprint: &Fingerprint) -> Result<Option<CacheRecord>, StoreError> {
        Ok(self.records.get(fingerprint).map(|r| r.value().clone()))
    }

    async fn save(&self, record: &CacheRecord) -> Result<(), StoreError> {
        self.records.insert(record.fingerprint.clone(), record.clone());
        Ok(())
    }

    async fn set_file_id(
        &self,
        fingerprint: &Fingerprint,
        file_id: &str,
        now: DateTime<Utc>,
    ) -> Result<(), StoreError> {
        self.records
            .entry(fingerprint.clone())
            .and_modify(|r| r.file_id = Some(file_id.to_string()))
            .or_insert_with(|| CacheRecord {
                fingerprint: fingerprint.clone(),
                file_id: Some(file_id.to_string()),
                blob: None,
                format: None,
                duration_secs: None,
                validated_at: now,
            });
        Ok(())
    }

    async fn remove(&self, fingerprint: &Fingerprint) -> Result<(), StoreError> {
        self.records.remove(fingerprint);
        Ok(())
    }

    async fn prune(&self, cutoff: DateTime<Utc>) -> Result<usize, StoreError> {
        let before = self.records.len();
        self.records.retain(|_, r| r.validated_at > cutoff);
        Ok(before - self.records.len())
    }

    async fn count(&self) -> Result<usize, StoreError> {
        Ok(self.records.len())
    }
}
