//! Core data models shared by resolution and compilation.
//!
//! A [`ShotPlan`] arrives from the upstream writing pipeline. Each [`Beat`]
//! is resolved into ranked [`ScoredCandidate`]s drawn from provider
//! [`Candidate`]s, which end up in the persisted manifest.

use serde::{Deserialize, Serialize};
use std::cmp::Ordering;

use crate::error::PipelineError;

/// Kind of media a beat needs and a provider returns.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MediaKind {
    Video,
    Image,
}

impl MediaKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            MediaKind::Video => "video",
            MediaKind::Image => "image",
        }
    }
}

impl std::fmt::Display for MediaKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Target shot type for a beat. This is a closed allow-list; unknown values
/// in a shot plan fail to parse.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ShotType {
    ArchivalVideo,
    ArchivalPhoto,
    Map,
    Document,
    Portrait,
    Aerial,
}

impl ShotType {
    pub fn media_kind(&self) -> MediaKind {
        match self {
            ShotType::ArchivalVideo | ShotType::Aerial => MediaKind::Video,
            ShotType::ArchivalPhoto | ShotType::Map | ShotType::Document | ShotType::Portrait => {
                MediaKind::Image
            }
        }
    }

    /// Media-intent token appended to queries that lack one.
    pub fn intent_token(&self) -> &'static str {
        match self {
            ShotType::ArchivalVideo => "footage",
            ShotType::ArchivalPhoto => "photograph",
            ShotType::Map => "map",
            ShotType::Document => "document",
            ShotType::Portrait => "portrait",
            ShotType::Aerial => "aerial footage",
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ShotType::ArchivalVideo => "archival_video",
            ShotType::ArchivalPhoto => "archival_photo",
            ShotType::Map => "map",
            ShotType::Document => "document",
            ShotType::Portrait => "portrait",
            ShotType::Aerial => "aerial",
        }
    }
}

/// One narration/visual unit of the shot plan.
///
/// Read-only to the resolver: narration is never rewritten.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Beat {
    pub id: String,
    pub narration: String,
    #[serde(default)]
    pub keywords: Vec<String>,
    #[serde(default)]
    pub shot_types: Vec<ShotType>,
    #[serde(default)]
    pub queries: Vec<String>,
    /// Explicit on-screen duration. Estimated from narration when absent.
    #[serde(default)]
    pub duration_secs: Option<f64>,
}

impl Beat {
    /// Distinct media kinds requested by the beat's shot types, in
    /// first-seen order. Defaults to video when no shot type is given.
    pub fn media_kinds(&self) -> Vec<MediaKind> {
        let mut kinds = Vec::new();
        for shot in &self.shot_types {
            let kind = shot.media_kind();
            if !kinds.contains(&kind) {
                kinds.push(kind);
            }
        }
        if kinds.is_empty() {
            kinds.push(MediaKind::Video);
        }
        kinds
    }
}

/// The upstream shot plan for one episode.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ShotPlan {
    pub episode_id: String,
    /// Episode topic. Required; there is no derivation from narration.
    #[serde(default)]
    pub topic: Option<String>,
    pub beats: Vec<Beat>,
}

impl ShotPlan {
    /// Return the trimmed topic or fail with [`PipelineError::MissingTopic`].
    pub fn require_topic(&self) -> Result<&str, PipelineError> {
        match self.topic.as_deref().map(str::trim) {
            Some(t) if !t.is_empty() => Ok(t),
            _ => Err(PipelineError::MissingTopic {
                scope: format!("episode '{}'", self.episode_id),
            }),
        }
    }
}

/// How a validated query came to exist.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QueryOrigin {
    Original,
    Repaired,
    Synthesized,
    Fallback,
}

impl QueryOrigin {
    pub fn as_str(&self) -> &'static str {
        match self {
            QueryOrigin::Original => "original",
            QueryOrigin::Repaired => "repaired",
            QueryOrigin::Synthesized => "synthesized",
            QueryOrigin::Fallback => "fallback",
        }
    }
}

/// A validated search query with its derived facets.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchQuery {
    pub text: String,
    pub anchors: Vec<String>,
    pub media_intent: Option<String>,
    pub origin: QueryOrigin,
}

/// One result from a provider, in the uniform shape shared by all adapters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Candidate {
    pub provider: String,
    pub id: String,
    pub title: String,
    #[serde(default)]
    pub description: String,
    /// Media type exactly as declared by the provider (e.g. `"movies"`).
    pub media_type: Option<String>,
    pub media_kind: MediaKind,
    #[serde(default)]
    pub duration_secs: Option<f64>,
    #[serde(default)]
    pub width: Option<u32>,
    #[serde(default)]
    pub height: Option<u32>,
    #[serde(default)]
    pub license: Option<String>,
    #[serde(default)]
    pub download_url: Option<String>,
    #[serde(default)]
    pub page_url: Option<String>,
    #[serde(default)]
    pub collection: Vec<String>,
    #[serde(default)]
    pub subject: Vec<String>,
    #[serde(default)]
    pub creator: Option<String>,
    #[serde(default)]
    pub downloads: Option<u64>,
}

impl Candidate {
    /// Minimal constructor; remaining fields default to empty.
    pub fn new(provider: &str, id: &str, title: &str, media_kind: MediaKind) -> Self {
        Self {
            provider: provider.to_string(),
            id: id.to_string(),
            title: title.to_string(),
            description: String::new(),
            media_type: None,
            media_kind,
            duration_secs: None,
            width: None,
            height: None,
            license: None,
            download_url: None,
            page_url: None,
            collection: Vec::new(),
            subject: Vec::new(),
            creator: None,
            downloads: None,
        }
    }

    /// Globally unique asset identifier: `"{provider}:{id}"`.
    pub fn asset_id(&self) -> String {
        format!("{}:{}", self.provider, self.id)
    }

    /// Lowercased concatenation of every descriptive field, used by the
    /// gate engine and the scorer.
    pub fn searchable_text(&self) -> String {
        let mut parts: Vec<&str> = vec![&self.title, &self.description];
        parts.extend(self.collection.iter().map(String::as_str));
        parts.extend(self.subject.iter().map(String::as_str));
        if let Some(creator) = &self.creator {
            parts.push(creator);
        }
        parts.join(" ").to_lowercase()
    }
}

/// Terminal gate state for a candidate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GateTier {
    HardReject,
    ConditionalReject,
    SoftPenalize,
    Approved,
}

/// Gate decision with a machine-readable reason code and the pattern that
/// triggered it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GateVerdict {
    pub tier: GateTier,
    pub reason: String,
    #[serde(default)]
    pub pattern: Option<String>,
}

impl GateVerdict {
    pub fn approved() -> Self {
        Self {
            tier: GateTier::Approved,
            reason: "approved".to_string(),
            pattern: None,
        }
    }

    pub fn new(tier: GateTier, reason: &str, pattern: Option<&str>) -> Self {
        Self {
            tier,
            reason: reason.to_string(),
            pattern: pattern.map(str::to_string),
        }
    }

    /// Soft-penalized and approved candidates survive the gate.
    pub fn is_retained(&self) -> bool {
        matches!(self.tier, GateTier::SoftPenalize | GateTier::Approved)
    }
}

/// A gate-retained candidate with its score and audit trail.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScoredCandidate {
    pub candidate: Candidate,
    pub verdict: GateVerdict,
    /// Relevance score in `[0.0, 1.0]`.
    pub score: f64,
    /// Human-readable score contributions, in evaluation order.
    pub reasons: Vec<String>,
    /// Priority of the originating provider (lower ranks first on ties).
    pub provider_priority: u32,
}

impl ScoredCandidate {
    pub fn asset_id(&self) -> String {
        self.candidate.asset_id()
    }
}

/// Total order: score descending, then provider priority, then asset id.
pub fn rank_order(a: &ScoredCandidate, b: &ScoredCandidate) -> Ordering {
    b.score
        .total_cmp(&a.score)
        .then(a.provider_priority.cmp(&b.provider_priority))
        .then_with(|| a.asset_id().cmp(&b.asset_id()))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn scored(provider: &str, id: &str, score: f64, priority: u32) -> ScoredCandidate {
        ScoredCandidate {
            candidate: Candidate::new(provider, id, "t", MediaKind::Video),
            verdict: GateVerdict::approved(),
            score,
            reasons: Vec::new(),
            provider_priority: priority,
        }
    }

    #[test]
    fn rank_order_breaks_ties_by_priority_then_id() {
        let mut items = vec![
            scored("b", "2", 0.5, 2),
            scored("a", "9", 0.5, 1),
            scored("a", "1", 0.5, 1),
            scored("c", "0", 0.9, 5),
        ];
        items.sort_by(rank_order);
        let ids: Vec<String> = items.iter().map(|s| s.asset_id()).collect();
        assert_eq!(ids, vec!["c:0", "a:1", "a:9", "b:2"]);
    }

    #[test]
    fn missing_topic_is_an_error() {
        let plan = ShotPlan {
            episode_id: "ep1".into(),
            topic: Some("   ".into()),
            beats: vec![],
        };
        assert!(matches!(
            plan.require_topic(),
            Err(PipelineError::MissingTopic { .. })
        ));
    }

    #[test]
    fn unknown_shot_type_fails_to_parse() {
        let json = r#"{"id":"b1","narration":"x","shot_types":["selfie"]}"#;
        assert!(serde_json::from_str::<Beat>(json).is_err());
    }

    #[test]
    fn media_kinds_dedup_in_order() {
        let beat = Beat {
            id: "b".into(),
            narration: String::new(),
            keywords: vec![],
            shot_types: vec![ShotType::Map, ShotType::ArchivalVideo, ShotType::Portrait],
            queries: vec![],
            duration_secs: None,
        };
        assert_eq!(beat.media_kinds(), vec![MediaKind::Image, MediaKind::Video]);
    }
}
