//! SQLite-backed [`CacheStore`] implementation.
//!
//! Rows hold raw provider payloads as JSON. Gating is applied by the core
//! read path, never stored here. Rows from older cache versions are kept
//! (and reported by `reel cache stats`) but never read.

use anyhow::{Context, Result};
use async_trait::async_trait;
use sqlx::{Row, SqlitePool};

use reelforge_core::cache::{CacheKey, CacheStatRow, CacheStore};
use reelforge_core::models::Candidate;

/// SQLite implementation of the [`CacheStore`] trait.
pub struct SqliteCache {
    pool: SqlitePool,
}

impl SqliteCache {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    /// Delete rows whose version differs from `keep_version`.
    pub async fn purge_stale(&self, keep_version: &str) -> Result<u64> {
        let result = sqlx::query("DELETE FROM search_cache WHERE version != ?")
            .bind(keep_version)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected())
    }
}

#[async_trait]
impl CacheStore for SqliteCache {
    async fn get(&self, key: &CacheKey) -> Result<Option<Vec<Candidate>>> {
        let row = sqlx::query("SELECT payload_json FROM search_cache WHERE key_hash = ?")
            .bind(key.digest())
            .fetch_optional(&self.pool)
            .await?;

        match row {
            Some(row) => {
                let payload: String = row.get("payload_json");
                let candidates: Vec<Candidate> = serde_json::from_str(&payload).with_context(|| {
                    format!("Corrupt cache payload for {}:{}", key.provider, key.query)
                })?;
                Ok(Some(candidates))
            }
            None => Ok(None),
        }
    }

    async fn put(&self, key: &CacheKey, candidates: &[Candidate]) -> Result<()> {
        let payload = serde_json::to_string(candidates)?;
        let now = chrono::Utc::now().timestamp();

        sqlx::query(
            r#"
            INSERT INTO search_cache (key_hash, provider, query, media_kind, version,
                                      payload_json, candidate_count, fetched_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT(key_hash) DO UPDATE SET
                payload_json = excluded.payload_json,
                candidate_count = excluded.candidate_count,
                fetched_at = excluded.fetched_at
            "#,
        )
        .bind(key.digest())
        .bind(&key.provider)
        .bind(&key.query)
        .bind(key.media_kind.as_str())
        .bind(&key.version)
        .bind(&payload)
        .bind(candidates.len() as i64)
        .bind(now)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn stats(&self) -> Result<Vec<CacheStatRow>> {
        let rows = sqlx::query(
            r#"
            SELECT provider, version, COUNT(*) AS entries,
                   COALESCE(SUM(candidate_count), 0) AS candidates
            FROM search_cache
            GROUP BY provider, version
            ORDER BY provider, version
            "#,
        )
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .iter()
            .map(|row| CacheStatRow {
                provider: row.get("provider"),
                version: row.get("version"),
                entries: row.get::<i64, _>("entries") as u64,
                candidates: row.get::<i64, _>("candidates") as u64,
            })
            .collect())
    }
}
