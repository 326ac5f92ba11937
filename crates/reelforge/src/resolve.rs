//! Concurrent shot-plan resolution (`reel resolve`).
//!
//! # Worker pool
//!
//! ```text
//! plan.beats ──▶ JoinSet (≤ concurrency in flight, Semaphore-bounded)
//!                  │  each task: BeatResolver::resolve(beat)
//!                  ▼
//!            results by beat index ──▶ Manifest (plan order)
//! ```
//!
//! Beats are independent; the only shared state is the cache and the
//! per-provider rate limiters. Ctrl-C cancels the run token: no new
//! provider calls are issued, in-flight calls finish and are cached, and
//! the run fails with [`PipelineError::Cancelled`].

use anyhow::{bail, Result};
use std::path::Path;
use std::sync::Arc;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;

use reelforge_core::cache::CacheStore;
use reelforge_core::error::PipelineError;
use reelforge_core::manifest::{BeatResolver, Manifest, ManifestBeat};
use reelforge_core::models::ShotPlan;
use reelforge_core::policy::Policy;
use reelforge_core::provider::ProviderRegistry;

use crate::config::Config;
use crate::db;
use crate::manifest_file::{load_plan, save_manifest};
use crate::migrate;
use crate::progress::{ProgressEvent, ProgressMode, ProgressReporter};
use crate::providers::registry_from_config;
use crate::sqlite_cache::SqliteCache;

/// Load the gate policy named in config, or the built-in one.
pub fn load_policy(config: &Config) -> Result<Policy> {
    match &config.gate.policy_path {
        Some(path) => Policy::load(path),
        None => Policy::builtin(),
    }
}

/// Resolve every beat of `plan` with at most `concurrency` beats in flight.
///
/// Beat-level failures are collected into `manifest.failures`; fatal errors
/// (missing topic, cancellation) abort the run.
pub async fn resolve_plan(
    plan: &ShotPlan,
    registry: Arc<ProviderRegistry>,
    cache: Arc<dyn CacheStore>,
    policy: Arc<Policy>,
    config: &Config,
    reporter: &dyn ProgressReporter,
    cancel: CancellationToken,
) -> Result<Manifest, PipelineError> {
    let topic = plan.require_topic()?.to_string();
    let settings = config.resolve_settings();
    let mut manifest = Manifest::new(&plan.episode_id, &topic, policy.version(), &settings.cache_version);

    let resolver = Arc::new(BeatResolver::new(registry, cache, policy, settings, &topic));
    let semaphore = Arc::new(Semaphore::new(config.resolve.concurrency.max(1)));
    let total = plan.beats.len() as u64;

    let mut tasks = JoinSet::new();
    for (index, beat) in plan.beats.iter().cloned().enumerate() {
        let resolver = Arc::clone(&resolver);
        let semaphore = Arc::clone(&semaphore);
        let cancel = cancel.clone();
        tasks.spawn(async move {
            let _permit = semaphore.acquire_owned().await;
            let is_cancelled = move || cancel.is_cancelled();
            let result = resolver.resolve(&beat, &is_cancelled).await;
            (index, beat.id, result)
        });
    }

    let mut resolved: Vec<Option<ManifestBeat>> = vec![None; plan.beats.len()];
    let mut failures = Vec::new();
    let mut fatal: Option<PipelineError> = None;
    let mut done = 0u64;

    while let Some(joined) = tasks.join_next().await {
        let (index, beat_id, result) = match joined {
            Ok(r) => r,
            Err(e) => {
                tracing::error!(error = %e, "resolve task panicked");
                cancel.cancel();
                fatal.get_or_insert(PipelineError::Cancelled);
                continue;
            }
        };
        done += 1;

        match result {
            Ok(beat) => {
                reporter.report(ProgressEvent::BeatResolved {
                    beat_id,
                    n: done,
                    total,
                    primary: beat.primary.len(),
                    fallback_used: beat.fallback_used,
                    cache_hits: beat.cache_hits,
                });
                resolved[index] = Some(beat);
            }
            Err(err) => {
                reporter.report(ProgressEvent::BeatFailed {
                    beat_id,
                    n: done,
                    total,
                    reason: err.to_string(),
                });
                if let Some(diag) = err.diagnostic().cloned() {
                    failures.push((index, diag));
                } else {
                    // Missing topic or cancellation: stop everything.
                    cancel.cancel();
                    if fatal.is_none() || matches!(fatal, Some(PipelineError::Cancelled)) {
                        fatal = Some(err);
                    }
                }
            }
        }
    }

    if let Some(err) = fatal {
        return Err(err);
    }

    failures.sort_by_key(|(index, _)| *index);
    manifest.beats = resolved.into_iter().flatten().collect();
    manifest.failures = failures.into_iter().map(|(_, d)| d).collect();
    Ok(manifest)
}

async fn record_run(cache: &SqliteCache, manifest: &Manifest, started_at: i64) -> Result<()> {
    let cache_hits: usize = manifest.beats.iter().map(|b| b.cache_hits).sum();
    sqlx::query(
        r#"
        INSERT INTO resolve_runs (id, episode_id, policy_version, cache_version, beats,
                                  failed_beats, cache_hits, started_at, finished_at)
        VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
        "#,
    )
    .bind(uuid::Uuid::new_v4().to_string())
    .bind(&manifest.episode_id)
    .bind(&manifest.policy_version)
    .bind(&manifest.cache_version)
    .bind((manifest.beats.len() + manifest.failures.len()) as i64)
    .bind(manifest.failures.len() as i64)
    .bind(cache_hits as i64)
    .bind(started_at)
    .bind(chrono::Utc::now().timestamp())
    .execute(cache.pool())
    .await?;
    Ok(())
}

/// `reel resolve <plan>`: resolve, persist the manifest, fail on any
/// unresolved beat.
pub async fn run_resolve(
    config: &Config,
    plan_path: &Path,
    out_dir: Option<&Path>,
    progress: ProgressMode,
) -> Result<()> {
    let plan = load_plan(plan_path)?;
    let policy = Arc::new(load_policy(config)?);

    let pool = db::connect(config).await?;
    migrate::migrate_pool(&pool).await?;
    let cache = Arc::new(SqliteCache::new(pool));

    let registry = registry_from_config(config);
    if registry.is_empty() {
        bail!("No providers available. Enable at least one [providers.<name>] table.");
    }

    let cancel = CancellationToken::new();
    let ctrl_c_token = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::warn!("interrupt received, cancelling resolution");
            ctrl_c_token.cancel();
        }
    });

    tracing::info!(
        episode = %plan.episode_id,
        beats = plan.beats.len(),
        providers = registry.len(),
        policy_version = %policy.version(),
        cache_version = %config.cache.version,
        "resolving shot plan"
    );

    let started_at = chrono::Utc::now().timestamp();
    let reporter = progress.reporter();
    let manifest = resolve_plan(
        &plan,
        Arc::new(registry),
        cache.clone(),
        policy,
        config,
        reporter.as_ref(),
        cancel,
    )
    .await?;

    let dir = out_dir.unwrap_or(&config.resolve.manifest_dir);
    let path = save_manifest(&manifest, dir)?;
    if let Err(e) = record_run(&cache, &manifest, started_at).await {
        tracing::warn!(error = %e, "failed to record run history");
    }

    let fallback_beats = manifest.beats.iter().filter(|b| b.fallback_used).count();
    let low_coverage = manifest.beats.iter().filter(|b| b.low_coverage).count();
    println!(
        "resolved {}/{} beats ({} via fallback, {} low coverage) → {}",
        manifest.beats.len(),
        manifest.beats.len() + manifest.failures.len(),
        fallback_beats,
        low_coverage,
        path.display()
    );

    if !manifest.is_complete() {
        for failure in &manifest.failures {
            eprintln!(
                "  beat '{}': {} raw candidates, gate {:?}",
                failure.beat_id, failure.raw_candidates, failure.gate_stats
            );
        }
        let ids: Vec<&str> = manifest.failures.iter().map(|f| f.beat_id.as_str()).collect();
        bail!(
            "{} beat(s) could not be resolved: {}",
            ids.len(),
            ids.join(", ")
        );
    }

    Ok(())
}
