//! Deterministic relevance scoring for gate-retained candidates.
//!
//! Scoring ranks; it never discards. Every candidate that passed the gate
//! gets a score in `[0.0, 1.0]` and a list of human-readable reasons, then
//! the batch is sorted with [`rank_order`](crate::models::rank_order).
//!
//! | Signal | Effect |
//! |--------|--------|
//! | anchor in title | `+title_anchor` |
//! | anchor in description/subject only | `+body_anchor` |
//! | beat keyword hits | `+keyword` each, capped |
//! | archival indicator | `+archival` |
//! | duration in ideal range | `+ideal_duration` |
//! | media kind matches the beat | `+media_match` |
//! | compilation / montage | `-compilation` |
//! | extreme duration | `-extreme_duration` |
//! | generic title, no anchor | `-generic_title` |
//! | soft-penalized by the gate | `-soft_penalty` |

use serde::Deserialize;

use crate::models::{rank_order, Candidate, GateTier, GateVerdict, MediaKind, ScoredCandidate};
use crate::text::{contains_phrase, meaningful_tokens, tokenize};

const ARCHIVAL_INDICATORS: &[&str] = &[
    "archival",
    "archive",
    "newsreel",
    "pathe",
    "national archives",
    "imperial war museum",
    "library of congress",
    "signal corps",
    "public domain",
    "official",
];

const COMPILATION_MARKERS: &[&str] = &["compilation", "montage", "supercut", "best of", "tribute"];

/// Additive weights. All values are tunable through `[scoring]` in config.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ScoringWeights {
    pub base: f64,
    pub title_anchor: f64,
    pub body_anchor: f64,
    pub keyword: f64,
    pub keyword_cap: f64,
    pub archival: f64,
    pub ideal_duration: f64,
    pub media_match: f64,
    pub compilation: f64,
    pub extreme_duration: f64,
    pub generic_title: f64,
    pub soft_penalty: f64,
    pub popularity_cap: f64,
    pub ideal_min_secs: f64,
    pub ideal_max_secs: f64,
    pub extreme_min_secs: f64,
    pub extreme_max_secs: f64,
}

impl Default for ScoringWeights {
    fn default() -> Self {
        Self {
            base: 0.30,
            title_anchor: 0.35,
            body_anchor: 0.15,
            keyword: 0.04,
            keyword_cap: 0.12,
            archival: 0.12,
            ideal_duration: 0.06,
            media_match: 0.06,
            compilation: 0.35,
            extreme_duration: 0.12,
            generic_title: 0.12,
            soft_penalty: 0.20,
            popularity_cap: 0.03,
            ideal_min_secs: 20.0,
            ideal_max_secs: 900.0,
            extreme_min_secs: 5.0,
            extreme_max_secs: 7200.0,
        }
    }
}

/// What the scorer knows about the beat a candidate is for.
#[derive(Debug, Clone, Default)]
pub struct ScoringContext {
    /// Topic and query anchors, any case.
    pub anchors: Vec<String>,
    pub keywords: Vec<String>,
    pub media_kinds: Vec<MediaKind>,
}

/// Score a single candidate. Returns the clamped score and its reasons.
pub fn score_candidate(
    candidate: &Candidate,
    verdict: &GateVerdict,
    ctx: &ScoringContext,
    weights: &ScoringWeights,
) -> (f64, Vec<String>) {
    let mut score = weights.base;
    let mut reasons = vec![format!("base {:+.2}", weights.base)];

    let title_tokens = tokenize(&candidate.title);
    let body = format!(
        "{} {}",
        candidate.description,
        candidate.subject.join(" ")
    );
    let body_tokens = tokenize(&body);
    let all_tokens = tokenize(&candidate.searchable_text());

    let title_anchor = ctx.anchors.iter().find(|a| contains_phrase(&title_tokens, a));
    if let Some(anchor) = title_anchor {
        score += weights.title_anchor;
        reasons.push(format!("anchor '{}' in title {:+.2}", anchor, weights.title_anchor));
    } else if let Some(anchor) = ctx.anchors.iter().find(|a| contains_phrase(&body_tokens, a)) {
        score += weights.body_anchor;
        reasons.push(format!(
            "anchor '{}' in description {:+.2}",
            anchor, weights.body_anchor
        ));
    }

    let keyword_hits = ctx
        .keywords
        .iter()
        .filter(|k| contains_phrase(&all_tokens, k))
        .count();
    if keyword_hits > 0 {
        let bonus = (keyword_hits as f64 * weights.keyword).min(weights.keyword_cap);
        score += bonus;
        reasons.push(format!("{} keyword hits {:+.2}", keyword_hits, bonus));
    }

    if let Some(marker) = ARCHIVAL_INDICATORS
        .iter()
        .find(|m| contains_phrase(&all_tokens, m))
    {
        score += weights.archival;
        reasons.push(format!("archival indicator '{}' {:+.2}", marker, weights.archival));
    }

    if let Some(d) = candidate.duration_secs {
        if (weights.ideal_min_secs..=weights.ideal_max_secs).contains(&d) {
            score += weights.ideal_duration;
            reasons.push(format!("duration {:.0}s ideal {:+.2}", d, weights.ideal_duration));
        } else if d < weights.extreme_min_secs || d > weights.extreme_max_secs {
            score -= weights.extreme_duration;
            reasons.push(format!(
                "duration {:.0}s extreme {:+.2}",
                d, -weights.extreme_duration
            ));
        }
    }

    if ctx.media_kinds.contains(&candidate.media_kind) {
        score += weights.media_match;
        reasons.push(format!(
            "{} matches shot type {:+.2}",
            candidate.media_kind, weights.media_match
        ));
    }

    if let Some(marker) = COMPILATION_MARKERS
        .iter()
        .find(|m| contains_phrase(&title_tokens, m))
    {
        score -= weights.compilation;
        reasons.push(format!("compilation '{}' {:+.2}", marker, -weights.compilation));
    }

    if title_anchor.is_none() && meaningful_tokens(&candidate.title).len() <= 2 {
        score -= weights.generic_title;
        reasons.push(format!("generic title {:+.2}", -weights.generic_title));
    }

    if verdict.tier == GateTier::SoftPenalize {
        score -= weights.soft_penalty;
        reasons.push(format!("soft: {} {:+.2}", verdict.reason, -weights.soft_penalty));
    }

    if let Some(downloads) = candidate.downloads.filter(|d| *d > 0) {
        let bonus = (0.005 * (1.0 + downloads as f64).ln()).min(weights.popularity_cap);
        score += bonus;
        reasons.push(format!("popularity {:+.3}", bonus));
    }

    (score.clamp(0.0, 1.0), reasons)
}

/// Score and rank a batch of retained candidates.
///
/// Input tuples carry the originating provider's priority.
pub fn rank(
    retained: Vec<(Candidate, GateVerdict, u32)>,
    ctx: &ScoringContext,
    weights: &ScoringWeights,
) -> Vec<ScoredCandidate> {
    let mut scored: Vec<ScoredCandidate> = retained
        .into_iter()
        .map(|(candidate, verdict, provider_priority)| {
            let (score, reasons) = score_candidate(&candidate, &verdict, ctx, weights);
            ScoredCandidate {
                candidate,
                verdict,
                score,
                reasons,
                provider_priority,
            }
        })
        .collect();
    scored.sort_by(rank_order);
    scored
}
