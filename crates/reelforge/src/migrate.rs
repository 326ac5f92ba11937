use anyhow::Result;
use sqlx::SqlitePool;

use crate::config::Config;
use crate::db;

pub async fn run_migrations(config: &Config) -> Result<()> {
    let pool = db::connect(config).await?;
    migrate_pool(&pool).await?;
    pool.close().await;
    Ok(())
}

pub async fn migrate_pool(pool: &SqlitePool) -> Result<()> {
    // Raw provider payloads, one row per (provider, query, kind, version).
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS search_cache (
            key_hash TEXT PRIMARY KEY,
            provider TEXT NOT NULL,
            query TEXT NOT NULL,
            media_kind TEXT NOT NULL,
            version TEXT NOT NULL,
            payload_json TEXT NOT NULL,
            candidate_count INTEGER NOT NULL,
            fetched_at INTEGER NOT NULL,
            UNIQUE(provider, query, media_kind, version)
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query("CREATE INDEX IF NOT EXISTS idx_search_cache_version ON search_cache(version)")
        .execute(pool)
        .await?;

    // Run history for `reel cache stats`.
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS resolve_runs (
            id TEXT PRIMARY KEY,
            episode_id TEXT NOT NULL,
            policy_version TEXT NOT NULL,
            cache_version TEXT NOT NULL,
            beats INTEGER NOT NULL,
            failed_beats INTEGER NOT NULL,
            cache_hits INTEGER NOT NULL,
            started_at INTEGER NOT NULL,
            finished_at INTEGER NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    Ok(())
}
