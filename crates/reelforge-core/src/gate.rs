//! Relevance gate: classify candidates into hard-reject, conditional-reject,
//! soft-penalize, or approved.
//!
//! # Evaluation order
//!
//! ```text
//! candidate text ──▶ hard rules ──match──▶ HardReject (never recoverable)
//!                        │
//!                        ▼
//!                 conditional rules ──match──▶ enough whitelist/topic hits?
//!                        │                         ├─ no  ─▶ ConditionalReject
//!                        │                         └─ yes ─▶ continue
//!                        ▼
//!                 topic must-hit ──miss──▶ ConditionalReject ("must_hit_fail")
//!                        │
//!                        ▼
//!                   soft rules ──match──▶ SoftPenalize (retained, scored down)
//!                        │
//!                        ▼
//!                     Approved
//! ```
//!
//! The gate is a pure function of candidate text, policy, and topic. It runs
//! after every provider fetch, whether the payload came from cache or not.

use serde::{Deserialize, Serialize};

use crate::error::RejectedCandidate;
use crate::models::{Candidate, GateTier, GateVerdict};
use crate::policy::Policy;
use crate::text::{self, contains_phrase, is_year, tokenize};

pub const MUST_HIT_FAIL: &str = "must_hit_fail";

/// Per-tier counters for one gate pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct GateStats {
    pub hard_reject: usize,
    pub conditional_reject: usize,
    pub must_hit_fail: usize,
    pub soft_penalize: usize,
    pub approved: usize,
}

impl GateStats {
    pub fn record(&mut self, verdict: &GateVerdict) {
        match verdict.tier {
            GateTier::HardReject => self.hard_reject += 1,
            GateTier::ConditionalReject if verdict.reason == MUST_HIT_FAIL => {
                self.must_hit_fail += 1
            }
            GateTier::ConditionalReject => self.conditional_reject += 1,
            GateTier::SoftPenalize => self.soft_penalize += 1,
            GateTier::Approved => self.approved += 1,
        }
    }

    pub fn merge(&mut self, other: &GateStats) {
        self.hard_reject += other.hard_reject;
        self.conditional_reject += other.conditional_reject;
        self.must_hit_fail += other.must_hit_fail;
        self.soft_penalize += other.soft_penalize;
        self.approved += other.approved;
    }

    pub fn total(&self) -> usize {
        self.hard_reject
            + self.conditional_reject
            + self.must_hit_fail
            + self.soft_penalize
            + self.approved
    }

    pub fn retained(&self) -> usize {
        self.soft_penalize + self.approved
    }
}

/// Topic terms a candidate must mention to pass the gate.
#[derive(Debug, Clone, Default)]
pub struct GateContext {
    pub topic_terms: Vec<String>,
}

impl GateContext {
    /// Build from the episode topic plus a beat's keywords.
    ///
    /// Topic words shorter than four characters and bare years are dropped;
    /// keywords are kept whole as phrases.
    pub fn new(topic: &str, keywords: &[String]) -> Self {
        let mut terms: Vec<String> = Vec::new();
        for token in tokenize(topic) {
            if token.len() < 4 || is_year(&token) || text::is_stopword(&token) {
                continue;
            }
            if !terms.contains(&token) {
                terms.push(token);
            }
        }
        for kw in keywords {
            let normalized = text::normalize(kw);
            if !normalized.is_empty() && !terms.contains(&normalized) {
                terms.push(normalized);
            }
        }
        Self { topic_terms: terms }
    }
}

/// Classify one candidate.
pub fn classify(candidate: &Candidate, policy: &Policy, ctx: &GateContext) -> GateVerdict {
    let haystack = candidate.searchable_text();
    let rules = &policy.gate;

    if let Some(rule) = rules.hard.iter().find(|r| r.is_match(&haystack)) {
        return GateVerdict::new(GateTier::HardReject, &rule.code, rule.find(&haystack));
    }

    let tokens = tokenize(&haystack);
    let topic_hits = ctx
        .topic_terms
        .iter()
        .filter(|t| contains_phrase(&tokens, t))
        .count();

    if let Some(rule) = rules.conditional.iter().find(|r| r.is_match(&haystack)) {
        let whitelist_hits = rules
            .whitelist
            .iter()
            .filter(|w| contains_phrase(&tokens, w))
            .count();
        if whitelist_hits + topic_hits < rules.conditional_min_hits {
            return GateVerdict::new(
                GateTier::ConditionalReject,
                &rule.code,
                rule.find(&haystack),
            );
        }
    }

    if topic_hits < rules.topic_min_hits {
        return GateVerdict::new(GateTier::ConditionalReject, MUST_HIT_FAIL, None);
    }

    if let Some(rule) = rules.soft.iter().find(|r| r.is_match(&haystack)) {
        return GateVerdict::new(GateTier::SoftPenalize, &rule.code, rule.find(&haystack));
    }

    GateVerdict::approved()
}

/// Result of gating one batch of candidates.
#[derive(Debug, Clone, Default)]
pub struct GateOutcome {
    /// Approved and soft-penalized candidates, in input order.
    pub retained: Vec<(Candidate, GateVerdict)>,
    pub rejected: Vec<RejectedCandidate>,
    pub stats: GateStats,
}

pub fn apply_gate(candidates: Vec<Candidate>, policy: &Policy, ctx: &GateContext) -> GateOutcome {
    let mut outcome = GateOutcome::default();
    for candidate in candidates {
        let verdict = classify(&candidate, policy, ctx);
        outcome.stats.record(&verdict);
        if verdict.is_retained() {
            outcome.retained.push((candidate, verdict));
        } else {
            outcome.rejected.push(RejectedCandidate {
                asset_id: candidate.asset_id(),
                title: candidate.title.clone(),
                reason: verdict.reason,
                pattern: verdict.pattern,
            });
        }
    }
    outcome
}
