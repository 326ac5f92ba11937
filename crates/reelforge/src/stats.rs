//! Cache statistics and maintenance (`reel cache stats`, `reel cache purge`).

use anyhow::Result;
use serde::Serialize;
use sqlx::Row;

use reelforge_core::cache::{CacheStatRow, CacheStore};

use crate::config::Config;
use crate::db;
use crate::migrate;
use crate::sqlite_cache::SqliteCache;

#[derive(Debug, Clone, Serialize)]
pub struct RunSummary {
    pub episode_id: String,
    pub policy_version: String,
    pub cache_version: String,
    pub beats: i64,
    pub failed_beats: i64,
    pub cache_hits: i64,
    pub finished_at: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct CacheReport {
    pub current_version: String,
    pub rows: Vec<CacheStatRow>,
    pub stale_entries: u64,
    pub recent_runs: Vec<RunSummary>,
}

async fn recent_runs(cache: &SqliteCache, limit: i64) -> Result<Vec<RunSummary>> {
    let rows = sqlx::query(
        "SELECT episode_id, policy_version, cache_version, beats, failed_beats, cache_hits, finished_at
         FROM resolve_runs ORDER BY finished_at DESC LIMIT ?",
    )
    .bind(limit)
    .fetch_all(cache.pool())
    .await?;

    Ok(rows
        .iter()
        .map(|row| {
            let ts: i64 = row.get("finished_at");
            RunSummary {
                episode_id: row.get("episode_id"),
                policy_version: row.get("policy_version"),
                cache_version: row.get("cache_version"),
                beats: row.get("beats"),
                failed_beats: row.get("failed_beats"),
                cache_hits: row.get("cache_hits"),
                finished_at: chrono::DateTime::from_timestamp(ts, 0)
                    .map(|dt| dt.format("%Y-%m-%d %H:%M:%S UTC").to_string())
                    .unwrap_or_else(|| ts.to_string()),
            }
        })
        .collect())
}

pub async fn cache_report(config: &Config) -> Result<CacheReport> {
    let pool = db::connect(config).await?;
    migrate::migrate_pool(&pool).await?;
    let cache = SqliteCache::new(pool);

    let rows = cache.stats().await?;
    let stale_entries = rows
        .iter()
        .filter(|r| r.version != config.cache.version)
        .map(|r| r.entries)
        .sum();
    let recent_runs = recent_runs(&cache, 5).await?;

    Ok(CacheReport {
        current_version: config.cache.version.clone(),
        rows,
        stale_entries,
        recent_runs,
    })
}

pub async fn show_cache_stats(config: &Config, json: bool) -> Result<()> {
    let report = cache_report(config).await?;

    if json {
        println!("{}", serde_json::to_string_pretty(&report)?);
        return Ok(());
    }

    println!("Cache: {}", config.cache.path.display());
    println!("Current version: {}", report.current_version);
    println!();

    if report.rows.is_empty() {
        println!("  (empty)");
    } else {
        println!("  {:<20} {:<10} {:>8} {:>11}", "PROVIDER", "VERSION", "ENTRIES", "CANDIDATES");
        for row in &report.rows {
            let marker = if row.version == report.current_version { "" } else { "  (stale)" };
            println!(
                "  {:<20} {:<10} {:>8} {:>11}{}",
                row.provider, row.version, row.entries, row.candidates, marker
            );
        }
    }

    if report.stale_entries > 0 {
        println!();
        println!(
            "  {} entries from older versions are unused; `reel cache purge` removes them.",
            report.stale_entries
        );
    }

    if !report.recent_runs.is_empty() {
        println!();
        println!("Recent runs:");
        for run in &report.recent_runs {
            println!(
                "  {}  {:<16} beats {:>3}  failed {:>2}  cache hits {:>4}  policy {}",
                run.finished_at, run.episode_id, run.beats, run.failed_beats, run.cache_hits, run.policy_version
            );
        }
    }
    Ok(())
}

pub async fn purge_cache(config: &Config) -> Result<()> {
    let pool = db::connect(config).await?;
    migrate::migrate_pool(&pool).await?;
    let cache = SqliteCache::new(pool);
    let removed = cache.purge_stale(&config.cache.version).await?;
    tracing::info!(removed, keep_version = %config.cache.version, "purged stale cache entries");
    println!(
        "Removed {} cache entries not at version {}",
        removed, config.cache.version
    );
    Ok(())
}
