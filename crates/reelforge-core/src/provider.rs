//! Provider abstraction for archival media sources.
//!
//! Every source (Internet Archive, Europeana, Wikimedia Commons, Pexels,
//! test doubles) implements [`Provider`] and returns [`Candidate`]s in one
//! uniform shape. Adapters never raise on transport failure: a timeout or a
//! bad payload degrades to an empty list, and the pipeline keeps going with
//! the other providers.
//!
//! ```text
//! ┌──────────────────────────────────────────┐
//! │             ProviderRegistry             │
//! │  ┌─────────┐ ┌──────────┐ ┌───────────┐ │
//! │  │ archive │ │europeana │ │ commons … │ │
//! │  └─────────┘ └──────────┘ └───────────┘ │
//! └──────────────┬───────────────────────────┘
//!                ▼
//!    cache::fetch_gated() → gate → scoring
//! ```

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

use crate::models::{Candidate, MediaKind};
use crate::text;

/// An archival media search backend.
#[async_trait]
pub trait Provider: Send + Sync {
    /// Stable provider name; also the asset-id prefix.
    fn name(&self) -> &str;

    fn description(&self) -> &str {
        ""
    }

    /// Lower ranks first when scores tie.
    fn priority(&self) -> u32 {
        100
    }

    /// Whether this provider can return the given media kind at all.
    fn supports(&self, kind: MediaKind) -> bool;

    /// Search for `query`, restricted to `kind`.
    ///
    /// Never fails: transport and parse errors are logged by the adapter
    /// and surface as an empty list.
    async fn search(&self, query: &str, kind: MediaKind) -> Vec<Candidate>;
}

/// Ordered set of enabled providers.
pub struct ProviderRegistry {
    providers: Vec<Box<dyn Provider>>,
}

impl ProviderRegistry {
    pub fn new() -> Self {
        Self {
            providers: Vec::new(),
        }
    }

    /// Register a provider. Providers are kept sorted by priority, then name.
    pub fn register(&mut self, provider: Box<dyn Provider>) {
        self.providers.push(provider);
        self.providers
            .sort_by(|a, b| a.priority().cmp(&b.priority()).then(a.name().cmp(b.name())));
    }

    pub fn providers(&self) -> &[Box<dyn Provider>] {
        &self.providers
    }

    /// Providers able to serve `kind`, in priority order.
    pub fn for_kind(&self, kind: MediaKind) -> Vec<&dyn Provider> {
        self.providers
            .iter()
            .filter(|p| p.supports(kind))
            .map(|p| p.as_ref())
            .collect()
    }

    pub fn is_empty(&self) -> bool {
        self.providers.is_empty()
    }

    pub fn len(&self) -> usize {
        self.providers.len()
    }
}

impl Default for ProviderRegistry {
    fn default() -> Self {
        Self::new()
    }
}

/// Keep only candidates whose declared media type is on the allow-list.
///
/// Fail-closed: a candidate with no declared type is dropped.
pub fn filter_content_types(candidates: Vec<Candidate>, allowed: &[&str]) -> Vec<Candidate> {
    candidates
        .into_iter()
        .filter(|c| {
            c.media_type
                .as_deref()
                .map(|t| allowed.iter().any(|a| a.eq_ignore_ascii_case(t)))
                .unwrap_or(false)
        })
        .collect()
}

/// Drop cross-provider duplicates.
///
/// Two candidates are duplicates when they share an asset id, or when they
/// have the same media kind and the same normalized title of at least 12
/// characters. The copy from the higher-priority provider wins; input order
/// is otherwise preserved.
pub fn dedup_candidates<T, F>(items: Vec<T>, candidate_of: F, priority_of: impl Fn(&T) -> u32) -> Vec<T>
where
    F: Fn(&T) -> &Candidate,
{
    let mut by_key: HashMap<String, usize> = HashMap::new();
    let mut kept: Vec<Option<T>> = Vec::new();

    for item in items {
        let c = candidate_of(&item);
        let mut keys = vec![format!("id:{}", c.asset_id())];
        let title = text::normalize(&c.title);
        if title.len() >= 12 {
            keys.push(format!("title:{}:{}", c.media_kind, title));
        }

        let existing = keys.iter().find_map(|k| by_key.get(k).copied());
        match existing {
            Some(slot) => {
                let replace = kept[slot]
                    .as_ref()
                    .map(|old| priority_of(&item) < priority_of(old))
                    .unwrap_or(true);
                if replace {
                    for k in keys {
                        by_key.insert(k, slot);
                    }
                    kept[slot] = Some(item);
                }
            }
            None => {
                let slot = kept.len();
                for k in keys {
                    by_key.insert(k, slot);
                }
                kept.push(Some(item));
            }
        }
    }

    kept.into_iter().flatten().collect()
}

/// In-memory provider with canned results, keyed by `(query, kind)`.
///
/// Counts live calls so callers can observe cache hits.
pub struct StaticProvider {
    name: String,
    priority: u32,
    kinds: Vec<MediaKind>,
    results: Mutex<HashMap<(String, MediaKind), Vec<Candidate>>>,
    default_results: Mutex<Vec<Candidate>>,
    calls: AtomicUsize,
}

impl StaticProvider {
    pub fn new(name: &str, priority: u32) -> Self {
        Self {
            name: name.to_string(),
            priority,
            kinds: vec![MediaKind::Video, MediaKind::Image],
            results: Mutex::new(HashMap::new()),
            default_results: Mutex::new(Vec::new()),
            calls: AtomicUsize::new(0),
        }
    }

    pub fn with_kinds(mut self, kinds: &[MediaKind]) -> Self {
        self.kinds = kinds.to_vec();
        self
    }

    /// Results returned for one exact (normalized) query.
    pub fn with_results(self, query: &str, kind: MediaKind, results: Vec<Candidate>) -> Self {
        if let Ok(mut map) = self.results.lock() {
            map.insert((text::normalize(query), kind), results);
        }
        self
    }

    /// Results returned for any query without an exact entry.
    pub fn with_default(self, results: Vec<Candidate>) -> Self {
        self.set_default(results);
        self
    }

    /// Replace the default results (simulates upstream data changing).
    pub fn set_default(&self, results: Vec<Candidate>) {
        if let Ok(mut d) = self.default_results.lock() {
            *d = results;
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Provider for StaticProvider {
    fn name(&self) -> &str {
        &self.name
    }

    fn description(&self) -> &str {
        "in-memory canned results"
    }

    fn priority(&self) -> u32 {
        self.priority
    }

    fn supports(&self, kind: MediaKind) -> bool {
        self.kinds.contains(&kind)
    }

    async fn search(&self, query: &str, kind: MediaKind) -> Vec<Candidate> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let exact = self
            .results
            .lock()
            .ok()
            .and_then(|m| m.get(&(text::normalize(query), kind)).cloned());
        let results = match exact {
            Some(r) => r,
            None => self
                .default_results
                .lock()
                .map(|d| d.clone())
                .unwrap_or_default(),
        };
        results.into_iter().filter(|c| c.media_kind == kind).collect()
    }
}
