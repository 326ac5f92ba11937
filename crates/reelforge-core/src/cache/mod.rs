//! Version-keyed result cache with gating on every read.
//!
//! The cache stores **raw, ungated** provider payloads keyed by
//! `(provider, normalized query, media kind, cache version)`. Gating is
//! never persisted: [`fetch_gated`] runs the gate on every call, so a
//! changed gate policy takes effect immediately on warm entries.
//!
//! ```text
//! fetch_gated(key)
//!     │
//!     ├─ store.get(key) ── hit ──────────┐
//!     │        │                          │
//!     │      miss / error                 │
//!     │        ▼                          │
//!     │  provider.search() ── non-empty ─▶ store.put(key)
//!     │        │                          │
//!     ▼        ▼                          ▼
//!   raw candidates ───────────────▶ gate::apply_gate()
//! ```
//!
//! Empty responses are not cached; a transient provider outage must not
//! pin a query to zero results.

pub mod memory;

use anyhow::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::gate::{apply_gate, GateContext, GateOutcome};
use crate::models::{Candidate, MediaKind};
use crate::policy::Policy;
use crate::provider::Provider;
use crate::text;

pub use memory::InMemoryCache;

/// Identity of one cached provider response.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CacheKey {
    pub provider: String,
    /// Query text, normalized (lowercase, single-spaced).
    pub query: String,
    pub media_kind: MediaKind,
    /// Cache-policy version. Bumping it strands old rows.
    pub version: String,
}

impl CacheKey {
    pub fn new(provider: &str, query: &str, media_kind: MediaKind, version: &str) -> Self {
        Self {
            provider: provider.to_string(),
            query: text::normalize(query),
            media_kind,
            version: version.to_string(),
        }
    }

    /// Stable hex digest of the key, used as the storage primary key.
    pub fn digest(&self) -> String {
        let mut hasher = Sha256::new();
        hasher.update(self.provider.as_bytes());
        hasher.update([0u8]);
        hasher.update(self.query.as_bytes());
        hasher.update([0u8]);
        hasher.update(self.media_kind.as_str().as_bytes());
        hasher.update([0u8]);
        hasher.update(self.version.as_bytes());
        hex::encode(hasher.finalize())
    }
}

/// Entry counts grouped by provider and cache version.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheStatRow {
    pub provider: String,
    pub version: String,
    pub entries: u64,
    pub candidates: u64,
}

/// Abstract cache backend.
///
/// | Method | Purpose |
/// |--------|---------|
/// | [`get`](CacheStore::get) | Raw payload for a key, if present |
/// | [`put`](CacheStore::put) | Store a raw payload (overwrites) |
/// | [`stats`](CacheStore::stats) | Entry counts per provider/version |
#[async_trait]
pub trait CacheStore: Send + Sync {
    async fn get(&self, key: &CacheKey) -> Result<Option<Vec<Candidate>>>;

    async fn put(&self, key: &CacheKey, candidates: &[Candidate]) -> Result<()>;

    async fn stats(&self) -> Result<Vec<CacheStatRow>>;
}

/// Raw provider results and whether they came from cache.
#[derive(Debug, Clone)]
pub struct FetchResult {
    pub raw: Vec<Candidate>,
    pub cache_hit: bool,
}

/// Read-through fetch of raw candidates.
///
/// Cache read/write failures are logged and treated as a miss; they never
/// fail the search.
pub async fn get_or_fetch(
    store: &dyn CacheStore,
    provider: &dyn Provider,
    query: &str,
    kind: MediaKind,
    version: &str,
) -> FetchResult {
    let key = CacheKey::new(provider.name(), query, kind, version);

    match store.get(&key).await {
        Ok(Some(raw)) => {
            return FetchResult {
                raw,
                cache_hit: true,
            }
        }
        Ok(None) => {}
        Err(e) => {
            tracing::warn!(provider = provider.name(), query, error = %e, "cache read failed");
        }
    }

    let raw = provider.search(query, kind).await;
    if !raw.is_empty() {
        if let Err(e) = store.put(&key, &raw).await {
            tracing::warn!(provider = provider.name(), query, error = %e, "cache write failed");
        }
    }

    FetchResult {
        raw,
        cache_hit: false,
    }
}

/// Gated results for one provider/query/kind.
#[derive(Debug, Clone)]
pub struct GatedFetch {
    pub raw_count: usize,
    pub cache_hit: bool,
    pub outcome: GateOutcome,
}

/// Read-through fetch followed by the gate. The gate runs on hits and
/// misses alike.
pub async fn fetch_gated(
    store: &dyn CacheStore,
    provider: &dyn Provider,
    query: &str,
    kind: MediaKind,
    version: &str,
    policy: &Policy,
    ctx: &GateContext,
) -> GatedFetch {
    let fetched = get_or_fetch(store, provider, query, kind, version).await;
    let raw_count = fetched.raw.len();
    GatedFetch {
        raw_count,
        cache_hit: fetched.cache_hit,
        outcome: apply_gate(fetched.raw, policy, ctx),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::GateTier;
    use crate::provider::StaticProvider;

    fn cand(id: &str, title: &str) -> Candidate {
        Candidate::new("ia", id, title, MediaKind::Video)
    }

    #[test]
    fn key_normalizes_query() {
        let a = CacheKey::new("ia", "Bletchley  Park FOOTAGE", MediaKind::Video, "1");
        let b = CacheKey::new("ia", "bletchley park footage", MediaKind::Video, "1");
        assert_eq!(a, b);
        assert_eq!(a.digest(), b.digest());
        let c = CacheKey::new("ia", "bletchley park footage", MediaKind::Video, "2");
        assert_ne!(a.digest(), c.digest());
    }

    #[tokio::test]
    async fn second_fetch_is_a_hit() {
        let store = InMemoryCache::new();
        let provider = StaticProvider::new("ia", 1).with_default(vec![cand("1", "Bletchley Park")]);
        let first = get_or_fetch(&store, &provider, "Bletchley Park footage", MediaKind::Video, "1").await;
        let second = get_or_fetch(&store, &provider, "bletchley park footage", MediaKind::Video, "1").await;
        assert!(!first.cache_hit);
        assert!(second.cache_hit);
        assert_eq!(first.raw, second.raw);
        assert_eq!(provider.calls(), 1);
    }

    #[tokio::test]
    async fn empty_results_are_not_cached() {
        let store = InMemoryCache::new();
        let provider = StaticProvider::new("ia", 1);
        get_or_fetch(&store, &provider, "q", MediaKind::Video, "1").await;
        get_or_fetch(&store, &provider, "q", MediaKind::Video, "1").await;
        assert_eq!(provider.calls(), 2);
    }

    #[tokio::test]
    async fn version_bump_misses() {
        let store = InMemoryCache::new();
        let provider = StaticProvider::new("ia", 1).with_default(vec![cand("1", "x")]);
        get_or_fetch(&store, &provider, "q", MediaKind::Video, "1").await;
        let after = get_or_fetch(&store, &provider, "q", MediaKind::Video, "2").await;
        assert!(!after.cache_hit);
        assert_eq!(provider.calls(), 2);
    }

    #[tokio::test]
    async fn cache_stores_ungated_and_regates_on_read() {
        let store = InMemoryCache::new();
        let provider = StaticProvider::new("ia", 1).with_default(vec![
            cand("1", "Bletchley Park huts"),
            cand("2", "Bletchley Park cartoon"),
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
        let strict = Policy::builtin().unwrap();

        let warm = fetch_gated(&store, &provider, "q", MediaKind::Video, "1", &lenient, &ctx).await;
        assert_eq!(warm.outcome.retained.len(), 2);

        let raw = store
            .get(&CacheKey::new("ia", "q", MediaKind::Video, "1"))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(raw.len(), 2);

        // Same cache entry, stricter policy: the cartoon is rejected on read.
        let hit = fetch_gated(&store, &provider, "q", MediaKind::Video, "1", &strict, &ctx).await;
        assert!(hit.cache_hit);
        assert_eq!(hit.raw_count, 2);
        assert_eq!(hit.outcome.retained.len(), 1);
        assert_eq!(hit.outcome.stats.hard_reject, 1);
        assert_eq!(hit.outcome.retained[0].1.tier, GateTier::Approved);
        assert_eq!(provider.calls(), 1);
    }
}
