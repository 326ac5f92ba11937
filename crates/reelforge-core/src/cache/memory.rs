//! In-memory [`CacheStore`] for tests and single-process runs.

use std::collections::{BTreeMap, HashMap};
use std::sync::RwLock;

use anyhow::{anyhow, Result};
use async_trait::async_trait;

use crate::models::Candidate;

use super::{CacheKey, CacheStatRow, CacheStore};

pub struct InMemoryCache {
    entries: RwLock<HashMap<CacheKey, Vec<Candidate>>>,
}

impl InMemoryCache {
    pub fn new() -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
        }
    }

    pub fn len(&self) -> usize {
        self.entries.read().map(|e| e.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for InMemoryCache {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl CacheStore for InMemoryCache {
    async fn get(&self, key: &CacheKey) -> Result<Option<Vec<Candidate>>> {
        let entries = self.entries.read().map_err(|_| anyhow!("cache lock poisoned"))?;
        Ok(entries.get(key).cloned())
    }

    async fn put(&self, key: &CacheKey, candidates: &[Candidate]) -> Result<()> {
        let mut entries = self.entries.write().map_err(|_| anyhow!("cache lock poisoned"))?;
        entries.insert(key.clone(), candidates.to_vec());
        Ok(())
    }

    async fn stats(&self) -> Result<Vec<CacheStatRow>> {
        let entries = self.entries.read().map_err(|_| anyhow!("cache lock poisoned"))?;
        let mut grouped: BTreeMap<(String, String), (u64, u64)> = BTreeMap::new();
        for (key, candidates) in entries.iter() {
            let slot = grouped
                .entry((key.provider.clone(), key.version.clone()))
                .or_default();
            slot.0 += 1;
            slot.1 += candidates.len() as u64;
        }
        Ok(grouped
            .into_iter()
            .map(|((provider, version), (entries, candidates))| CacheStatRow {
                provider,
                version,
                entries,
                candidates,
            })
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::MediaKind;

    #[tokio::test]
    async fn stats_group_by_provider_and_version() {
        let cache = InMemoryCache::new();
        let c = Candidate::new("ia", "1", "t", MediaKind::Video);
        cache
            .put(&CacheKey::new("ia", "a", MediaKind::Video, "1"), &[c.clone(), c.clone()])
            .await
            .unwrap();
        cache
            .put(&CacheKey::new("ia", "b", MediaKind::Video, "1"), &[c.clone()])
            .await
            .unwrap();
        cache
            .put(&CacheKey::new("ia", "a", MediaKind::Video, "2"), &[c])
            .await
            .unwrap();
        let stats = cache.stats().await.unwrap();
        assert_eq!(
            stats,
            vec![
                CacheStatRow {
                    provider: "ia".into(),
                    version: "1".into(),
                    entries: 2,
                    candidates: 3
                },
                CacheStatRow {
                    provider: "ia".into(),
                    version: "2".into(),
                    entries: 1,
                    candidates: 1
                },
            ]
        );
        assert_eq!(cache.len(), 3);
    }
}
