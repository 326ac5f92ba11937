//! Per-beat manifest resolution.
//!
//! # Pipeline (one beat)
//!
//! 1. Guardrail: validate/repair/synthesize queries.
//! 2. For each query × media kind × provider: read-through cached fetch,
//!    then gate (always, hit or miss).
//! 3. Merge, de-duplicate across providers, score and rank.
//! 4. Partition: approved candidates above `primary_min_score` fill the
//!    primary tier; everything else retained goes to secondary.
//! 5. No primary candidates: run controlled fallback once. Its results go
//!    only to the fallback tier, capped at `fallback_cap`.
//! 6. All tiers empty: fail the beat with [`PipelineError::NoCandidates`]
//!    (nothing retrieved) or [`PipelineError::GateNoPass`] (all rejected).
//!
//! The manifest is the only contract between resolution and compilation.

use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::sync::Arc;

use crate::cache::{fetch_gated, CacheStore};
use crate::error::{BeatDiagnostic, PipelineError, RejectedCandidate};
use crate::fallback::{classify_archetype, fallback_queries};
use crate::gate::{GateContext, GateStats};
use crate::guardrail::{topic_anchors, validate_and_fix_queries, GuardrailConfig, GuardrailRequest};
use crate::models::{Beat, Candidate, GateTier, GateVerdict, MediaKind, ScoredCandidate, SearchQuery, ShotType};
use crate::policy::Policy;
use crate::provider::{dedup_candidates, ProviderRegistry};
use crate::scoring::{rank, ScoringContext, ScoringWeights};

/// Diagnostics keep at most this many rejected candidates.
const TOP_REJECTED: usize = 5;

/// Tunables for resolution.
#[derive(Debug, Clone)]
pub struct ResolveSettings {
    pub guardrail: GuardrailConfig,
    pub weights: ScoringWeights,
    pub primary_limit: usize,
    pub secondary_limit: usize,
    pub primary_min_score: f64,
    pub fallback_cap: usize,
    pub max_fallback_queries: usize,
    pub cache_version: String,
}

impl Default for ResolveSettings {
    fn default() -> Self {
        Self {
            guardrail: GuardrailConfig::default(),
            weights: ScoringWeights::default(),
            primary_limit: 5,
            secondary_limit: 10,
            primary_min_score: 0.35,
            fallback_cap: 3,
            max_fallback_queries: 2,
            cache_version: "1".to_string(),
        }
    }
}

/// Which manifest list a candidate came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Tier {
    Primary,
    Secondary,
    Fallback,
}

impl Tier {
    pub fn as_str(&self) -> &'static str {
        match self {
            Tier::Primary => "primary",
            Tier::Secondary => "secondary",
            Tier::Fallback => "fallback",
        }
    }
}

/// Resolved candidates and audit data for one beat.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ManifestBeat {
    pub beat_id: String,
    pub narration: String,
    #[serde(default)]
    pub keywords: Vec<String>,
    #[serde(default)]
    pub shot_types: Vec<ShotType>,
    #[serde(default)]
    pub duration_secs: Option<f64>,
    pub queries: Vec<SearchQuery>,
    pub low_coverage: bool,
    pub primary: Vec<ScoredCandidate>,
    pub secondary: Vec<ScoredCandidate>,
    pub fallback: Vec<ScoredCandidate>,
    pub fallback_used: bool,
    #[serde(default)]
    pub fallback_queries: Vec<String>,
    pub gate_stats: GateStats,
    pub raw_candidates: usize,
    pub cache_hits: usize,
    /// Present when the beat needed fallback; explains why primary was empty.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub diagnostic: Option<BeatDiagnostic>,
}

impl ManifestBeat {
    /// Every candidate with its tier, in preference order.
    pub fn tiered(&self) -> impl Iterator<Item = (Tier, &ScoredCandidate)> {
        self.primary
            .iter()
            .map(|c| (Tier::Primary, c))
            .chain(self.secondary.iter().map(|c| (Tier::Secondary, c)))
            .chain(self.fallback.iter().map(|c| (Tier::Fallback, c)))
    }

    pub fn candidate_count(&self) -> usize {
        self.primary.len() + self.secondary.len() + self.fallback.len()
    }
}

/// Persisted result of resolving a whole shot plan.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Manifest {
    pub episode_id: String,
    pub topic: String,
    pub policy_version: String,
    pub cache_version: String,
    pub created_at: String,
    pub beats: Vec<ManifestBeat>,
    /// Beats that failed resolution, with their diagnostics.
    #[serde(default)]
    pub failures: Vec<BeatDiagnostic>,
}

impl Manifest {
    pub fn new(episode_id: &str, topic: &str, policy_version: &str, cache_version: &str) -> Self {
        Self {
            episode_id: episode_id.to_string(),
            topic: topic.to_string(),
            policy_version: policy_version.to_string(),
            cache_version: cache_version.to_string(),
            created_at: chrono::Utc::now().to_rfc3339_opts(chrono::SecondsFormat::Secs, true),
            beats: Vec::new(),
            failures: Vec::new(),
        }
    }

    pub fn is_complete(&self) -> bool {
        self.failures.is_empty()
    }
}

/// Retained candidates, rejections, and counters accumulated over a set of
/// queries.
#[derive(Default)]
struct Retrieval {
    retained: Vec<(Candidate, GateVerdict, u32)>,
    rejected: Vec<RejectedCandidate>,
    stats: GateStats,
    raw: usize,
    cache_hits: usize,
}

/// Resolves beats of one episode against a provider registry and cache.
pub struct BeatResolver {
    pub registry: Arc<ProviderRegistry>,
    pub cache: Arc<dyn CacheStore>,
    pub policy: Arc<Policy>,
    pub settings: ResolveSettings,
    pub topic: String,
}

impl BeatResolver {
    pub fn new(
        registry: Arc<ProviderRegistry>,
        cache: Arc<dyn CacheStore>,
        policy: Arc<Policy>,
        settings: ResolveSettings,
        topic: &str,
    ) -> Self {
        Self {
            registry,
            cache,
            policy,
            settings,
            topic: topic.to_string(),
        }
    }

    async fn retrieve(
        &self,
        beat_id: &str,
        queries: &[SearchQuery],
        kinds: &[MediaKind],
        ctx: &GateContext,
        cancelled: &(dyn Fn() -> bool + Send + Sync),
        into: &mut Retrieval,
    ) -> Result<(), PipelineError> {
        for query in queries {
            for &kind in kinds {
                for provider in self.registry.for_kind(kind) {
                    if cancelled() {
                        return Err(PipelineError::Cancelled);
                    }
                    let fetched = fetch_gated(
                        self.cache.as_ref(),
                        provider,
                        &query.text,
                        kind,
                        &self.settings.cache_version,
                        &self.policy,
                        ctx,
                    )
                    .await;

                    let stats = &fetched.outcome.stats;
                    tracing::info!(
                        beat = beat_id,
                        query = %query.text,
                        provider = provider.name(),
                        kind = %kind,
                        raw = fetched.raw_count,
                        hard_reject = stats.hard_reject,
                        conditional_reject = stats.conditional_reject,
                        must_hit_fail = stats.must_hit_fail,
                        soft_penalize = stats.soft_penalize,
                        approved = stats.approved,
                        cache_hit = fetched.cache_hit,
                        "gate"
                    );

                    into.raw += fetched.raw_count;
                    into.stats.merge(stats);
                    if fetched.cache_hit {
                        into.cache_hits += 1;
                    }
                    let priority = provider.priority();
                    into.retained.extend(
                        fetched
                            .outcome
                            .retained
                            .into_iter()
                            .map(|(c, v)| (c, v, priority)),
                    );
                    into.rejected.extend(fetched.outcome.rejected);
                }
            }
        }
        Ok(())
    }

    fn scoring_context(&self, beat: &Beat, queries: &[SearchQuery]) -> ScoringContext {
        let mut anchors = topic_anchors(&self.topic, &self.policy.queries);
        for q in queries {
            for a in &q.anchors {
                if !anchors.iter().any(|x| x.eq_ignore_ascii_case(a)) {
                    anchors.push(a.clone());
                }
            }
        }
        ScoringContext {
            anchors,
            keywords: beat.keywords.clone(),
            media_kinds: beat.media_kinds(),
        }
    }

    /// Resolve one beat into ranked tiers.
    ///
    /// `cancelled` is polled before every provider call.
    pub async fn resolve(
        &self,
        beat: &Beat,
        cancelled: &(dyn Fn() -> bool + Send + Sync),
    ) -> Result<ManifestBeat, PipelineError> {
        let guarded = validate_and_fix_queries(
            &GuardrailRequest {
                beat_id: &beat.id,
                raw_queries: &beat.queries,
                narration: &beat.narration,
                keywords: &beat.keywords,
                shot_types: &beat.shot_types,
                topic: &self.topic,
            },
            &self.policy.queries,
            &self.settings.guardrail,
        )?;
        if guarded.low_coverage {
            let warning = PipelineError::QueryLowCoverage {
                beat_id: beat.id.clone(),
                valid: guarded.queries.len(),
                required: self.settings.guardrail.min_valid,
            };
            tracing::warn!(beat = %beat.id, "{}", warning);
        }

        let kinds = beat.media_kinds();
        let gate_ctx = GateContext::new(&self.topic, &beat.keywords);

        let mut retrieval = Retrieval::default();
        self.retrieve(&beat.id, &guarded.queries, &kinds, &gate_ctx, cancelled, &mut retrieval)
            .await?;

        let unique = dedup_candidates(retrieval.retained, |(c, _, _)| c, |(_, _, p)| *p);
        let score_ctx = self.scoring_context(beat, &guarded.queries);
        let ranked = rank(unique, &score_ctx, &self.settings.weights);

        let mut primary = Vec::new();
        let mut secondary = Vec::new();
        for scored in ranked {
            let eligible = scored.verdict.tier == GateTier::Approved
                && scored.score >= self.settings.primary_min_score;
            if eligible && primary.len() < self.settings.primary_limit {
                primary.push(scored);
            } else if secondary.len() < self.settings.secondary_limit {
                secondary.push(scored);
            }
        }

        let mut fallback = Vec::new();
        let mut fallback_texts = Vec::new();
        let mut diagnostic = None;

        if primary.is_empty() {
            let archetype =
                classify_archetype(&self.policy, &beat.narration, &beat.keywords, &self.topic);
            let anchor = topic_anchors(&self.topic, &self.policy.queries)
                .into_iter()
                .chain(guarded.queries.iter().flat_map(|q| q.anchors.iter().cloned()))
                .next();
            if archetype.is_some() && anchor.is_none() {
                tracing::warn!(beat = %beat.id, "no specific anchor for fallback queries, skipping fallback");
            }

            if let (Some(archetype), Some(anchor)) = (archetype, anchor) {
                let queries = fallback_queries(
                    archetype,
                    &anchor,
                    kinds[0],
                    self.settings.max_fallback_queries,
                );
                fallback_texts = queries.iter().map(|q| q.text.clone()).collect();
                tracing::info!(
                    beat = %beat.id,
                    archetype = %archetype.name,
                    queries = ?fallback_texts,
                    "no primary candidates, running fallback"
                );

                let mut extra = Retrieval::default();
                self.retrieve(&beat.id, &queries, &kinds, &gate_ctx, cancelled, &mut extra)
                    .await?;

                let seen: HashSet<String> = secondary.iter().map(|s| s.asset_id()).collect();
                let fresh: Vec<_> = extra
                    .retained
                    .into_iter()
                    .filter(|(c, _, _)| !seen.contains(&c.asset_id()))
                    .collect();
                let unique = dedup_candidates(fresh, |(c, _, _)| c, |(_, _, p)| *p);
                fallback = rank(unique, &score_ctx, &self.settings.weights);
                fallback.truncate(self.settings.fallback_cap);

                retrieval.raw += extra.raw;
                retrieval.cache_hits += extra.cache_hits;
                retrieval.stats.merge(&extra.stats);
                retrieval.rejected.extend(extra.rejected);
            }

            diagnostic = Some(BeatDiagnostic {
                beat_id: beat.id.clone(),
                queries: guarded.queries.iter().map(|q| q.text.clone()).collect(),
                raw_candidates: retrieval.raw,
                gate_stats: retrieval.stats,
                top_rejected: retrieval.rejected.iter().take(TOP_REJECTED).cloned().collect(),
                fallback_queries: fallback_texts.clone(),
            });
        }

        if primary.is_empty() && secondary.is_empty() && fallback.is_empty() {
            let diag = Box::new(diagnostic.unwrap_or_else(|| BeatDiagnostic {
                beat_id: beat.id.clone(),
                queries: guarded.queries.iter().map(|q| q.text.clone()).collect(),
                raw_candidates: retrieval.raw,
                gate_stats: retrieval.stats,
                top_rejected: retrieval.rejected.iter().take(TOP_REJECTED).cloned().collect(),
                fallback_queries: fallback_texts.clone(),
            }));
            let err = if retrieval.raw == 0 {
                PipelineError::NoCandidates(diag)
            } else {
                PipelineError::GateNoPass(diag)
            };
            tracing::error!(beat = %beat.id, diagnostic = ?err.diagnostic(), "{}", err);
            return Err(err);
        }

        Ok(ManifestBeat {
            beat_id: beat.id.clone(),
            narration: beat.narration.clone(),
            keywords: beat.keywords.clone(),
            shot_types: beat.shot_types.clone(),
            duration_secs: beat.duration_secs,
            queries: guarded.queries,
            low_coverage: guarded.low_coverage,
            primary,
            secondary,
            fallback_used: !fallback_texts.is_empty(),
            fallback,
            fallback_queries: fallback_texts,
            gate_stats: retrieval.stats,
            raw_candidates: retrieval.raw,
            cache_hits: retrieval.cache_hits,
            diagnostic,
        })
    }
}
