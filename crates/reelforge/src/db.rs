//! SQLite connection management for the search cache.
//!
//! The cache file and its parent directories are created on first use.
//!
//! # Write-Ahead Logging (WAL)
//!
//! WAL mode is enabled for all connections. Resolution runs beats
//! concurrently, so many cache reads overlap with upserts from other beats;
//! WAL lets those readers proceed while one writer commits. A short busy
//! timeout absorbs the remaining writer contention.
//!
//! # Connection Pool
//!
//! The pool is sized from `[resolve].concurrency` (between 1 and 16
//! connections), one per in-flight beat.

use anyhow::Result;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions};
use std::str::FromStr;

use crate::config::Config;

/// Create a connection pool to the configured cache database.
///
/// - Creates the database file and parent directories if they don't exist.
/// - Enables WAL journal mode and a 5 second busy timeout.
/// - Sizes the pool to the resolve concurrency, clamped to `1..=16`.
///
/// # Errors
///
/// Returns an error if the directory or database cannot be created, or the
/// pool cannot connect.
pub async fn connect(config: &Config) -> Result<SqlitePool> {
    let cache_path = &config.cache.path;

    // Ensure parent directory exists
    if let Some(parent) = cache_path.parent() {
        std::fs::create_dir_all(parent)?;
    }

    let options = SqliteConnectOptions::from_str(&format!("sqlite:{}", cache_path.display()))?
        .create_if_missing(true)
        .journal_mode(sqlx::sqlite::SqliteJournalMode::Wal)
        .busy_timeout(std::time::Duration::from_secs(5));

    let pool = SqlitePoolOptions::new()
        .max_connections(config.resolve.concurrency.clamp(1, 16) as u32)
        .connect_with(options)
        .await?;

    Ok(pool)
}
