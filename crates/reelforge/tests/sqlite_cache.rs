//! SQLite cache store against a real database file.

use tempfile::TempDir;

use reelforge::config::{parse_config, Config};
use reelforge::sqlite_cache::SqliteCache;
use reelforge::{db, migrate};
use reelforge_core::cache::{fetch_gated, CacheKey, CacheStore};
use reelforge_core::gate::GateContext;
use reelforge_core::models::{Candidate, MediaKind};
use reelforge_core::policy::Policy;
use reelforge_core::provider::StaticProvider;

fn config(tmp: &TempDir, version: &str) -> Config {
    parse_config(&format!(
        "[cache]\npath = \"{}\"\nversion = \"{}\"\n",
        tmp.path().join("cache.sqlite").display(),
        version
    ))
    .unwrap()
}

async fn open(config: &Config) -> SqliteCache {
    let pool = db::connect(config).await.unwrap();
    migrate::migrate_pool(&pool).await.unwrap();
    SqliteCache::new(pool)
}

fn cand(id: &str, title: &str) -> Candidate {
    Candidate::new("internet_archive", id, title, MediaKind::Video)
}

#[tokio::test]
async fn put_get_and_upsert() {
    let tmp = TempDir::new().unwrap();
    let cache = open(&config(&tmp, "1")).await;
    let key = CacheKey::new("internet_archive", "Bletchley Park  Huts footage", MediaKind::Video, "1");

    assert!(cache.get(&key).await.unwrap().is_none());

    cache.put(&key, &[cand("a", "Hut 6")]).await.unwrap();
    cache
        .put(&key, &[cand("a", "Hut 6"), cand("b", "Hut 8")])
        .await
        .unwrap();

    // Query normalization makes spacing and case irrelevant.
    let same = CacheKey::new("internet_archive", "bletchley park huts FOOTAGE", MediaKind::Video, "1");
    let got = cache.get(&same).await.unwrap().unwrap();
    assert_eq!(got.len(), 2);
    assert_eq!(got[1].title, "Hut 8");

    let stats = cache.stats().await.unwrap();
    assert_eq!(stats.len(), 1);
    assert_eq!(stats[0].entries, 1);
    assert_eq!(stats[0].candidates, 2);
}

#[tokio::test]
async fn version_bump_misses_and_purge_removes_old_rows() {
    let tmp = TempDir::new().unwrap();
    let cache = open(&config(&tmp, "2")).await;

    let v1 = CacheKey::new("internet_archive", "q", MediaKind::Video, "1");
    let v2 = CacheKey::new("internet_archive", "q", MediaKind::Video, "2");
    cache.put(&v1, &[cand("a", "old")]).await.unwrap();

    assert!(cache.get(&v2).await.unwrap().is_none());
    cache.put(&v2, &[cand("a", "new")]).await.unwrap();

    let stats = cache.stats().await.unwrap();
    let versions: Vec<&str> = stats.iter().map(|r| r.version.as_str()).collect();
    assert_eq!(versions, vec!["1", "2"]);

    assert_eq!(cache.purge_stale("2").await.unwrap(), 1);
    assert!(cache.get(&v1).await.unwrap().is_none());
    assert!(cache.get(&v2).await.unwrap().is_some());
}

#[tokio::test]
async fn gate_is_reapplied_to_cached_rows() {
    let tmp = TempDir::new().unwrap();
    let cache = open(&config(&tmp, "1")).await;
    let provider = StaticProvider::new("internet_archive", 10).with_default(vec![
        cand("a", "Bletchley Park huts newsreel"),
        cand("b", "Bletchley Park lego model"),
    ]);
    let ctx = GateContext::new("Bletchley Park", &[]);

    let lenient = Policy::from_toml_str(
        r#"
[policy]
version = "lenient"
[gate]
[queries]
[[fallback]]
name = "general"
templates = ["{anchor} footage"]
"#,
    )
    .unwrap();
    let first = fetch_gated(
        &cache,
        &provider,
        "Bletchley Park footage",
        MediaKind::Video,
        "1",
        &lenient,
        &ctx,
    )
    .await;
    assert!(!first.cache_hit);
    assert_eq!(first.outcome.retained.len(), 2);

    let strict = Policy::builtin().unwrap();
    let second = fetch_gated(
        &cache,
        &provider,
        "Bletchley Park footage",
        MediaKind::Video,
        "1",
        &strict,
        &ctx,
    )
    .await;
    assert!(second.cache_hit);
    assert_eq!(provider.calls(), 1);
    assert_eq!(second.raw_count, 2);
    assert_eq!(second.outcome.retained.len(), 1);
    assert_eq!(second.outcome.retained[0].0.id, "a");
    assert_eq!(second.outcome.stats.hard_reject, 1);
}
