//! Manifest-bound clip assembly helpers.
//!
//! Compilation may only use assets that appear in the manifest for the
//! beat being rendered. [`ManifestIndex`] is the single check point for that
//! invariant; everything else here is timing arithmetic.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::error::PipelineError;
use crate::manifest::{Manifest, ManifestBeat, Tier};
use crate::models::{MediaKind, ScoredCandidate};

/// Lookup of `(beat_id, asset_id)` to the manifest entry.
pub struct ManifestIndex<'m> {
    beats: HashMap<&'m str, HashMap<String, (Tier, &'m ScoredCandidate)>>,
}

impl<'m> ManifestIndex<'m> {
    pub fn new(manifest: &'m Manifest) -> Self {
        let mut beats = HashMap::new();
        for beat in &manifest.beats {
            let mut assets = HashMap::new();
            for (tier, candidate) in beat.tiered() {
                assets.entry(candidate.asset_id()).or_insert((tier, candidate));
            }
            beats.insert(beat.beat_id.as_str(), assets);
        }
        Self { beats }
    }

    /// Resolve an asset for a beat or fail with
    /// [`PipelineError::ManifestInvariantViolation`].
    pub fn resolve(
        &self,
        beat_id: &str,
        asset_id: &str,
    ) -> Result<(Tier, &'m ScoredCandidate), PipelineError> {
        self.beats
            .get(beat_id)
            .and_then(|assets| assets.get(asset_id))
            .copied()
            .ok_or_else(|| PipelineError::ManifestInvariantViolation {
                beat_id: beat_id.to_string(),
                asset_id: asset_id.to_string(),
            })
    }
}

/// One clip of the final timeline.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CompilationClip {
    pub beat_id: String,
    pub asset_id: String,
    pub tier: Tier,
    pub in_secs: f64,
    pub out_secs: f64,
    /// Set when the clip deviates from the ideal (pinned, shortened, reused).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub override_reason: Option<String>,
}

impl CompilationClip {
    pub fn duration(&self) -> f64 {
        self.out_secs - self.in_secs
    }
}

/// On-screen time for a beat: explicit duration, else narration length at
/// `words_per_second`, never below `min_secs`.
pub fn beat_duration(beat: &ManifestBeat, words_per_second: f64, min_secs: f64) -> f64 {
    if let Some(d) = beat.duration_secs.filter(|d| *d > 0.0) {
        return d.max(min_secs);
    }
    let words = beat.narration.split_whitespace().count() as f64;
    if words_per_second <= 0.0 {
        return min_secs;
    }
    (words / words_per_second).max(min_secs)
}

/// Source window `(in, out, note)` for a clip of `needed` seconds.
///
/// Video starts 10% in to skip leaders and slates. A video shorter than
/// `needed` is used whole and the shortfall noted. Images are held for the
/// full duration.
pub fn clip_window(
    kind: MediaKind,
    asset_duration: Option<f64>,
    needed: f64,
) -> (f64, f64, Option<String>) {
    match (kind, asset_duration) {
        (MediaKind::Image, _) | (MediaKind::Video, None) => (0.0, needed, None),
        (MediaKind::Video, Some(total)) if total <= needed => (
            0.0,
            total,
            Some(format!(
                "asset is {:.1}s, shorter than the {:.1}s beat",
                total, needed
            )),
        ),
        (MediaKind::Video, Some(total)) => {
            let offset = (total * 0.1).min(total - needed);
            (offset, offset + needed, None)
        }
    }
}

/// Candidates for a beat in try order: primary, secondary, fallback.
///
/// With `avoid` set, that asset (typically the previous beat's clip) moves
/// to the end instead of being dropped.
pub fn ordered_choices<'b>(
    beat: &'b ManifestBeat,
    avoid: Option<&str>,
) -> Vec<(Tier, &'b ScoredCandidate)> {
    let mut choices: Vec<_> = beat.tiered().collect();
    if let Some(avoid) = avoid {
        let (repeat, fresh): (Vec<_>, Vec<_>) =
            choices.into_iter().partition(|(_, c)| c.asset_id() == avoid);
        choices = fresh;
        choices.extend(repeat);
    }
    choices
}

/// Check a finished timeline against the manifest.
pub fn validate_clips(clips: &[CompilationClip], index: &ManifestIndex<'_>) -> Result<(), PipelineError> {
    for clip in clips {
        index.resolve(&clip.beat_id, &clip.asset_id)?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gate::GateStats;
    use crate::models::{Candidate, GateVerdict};

    fn sc(id: &str) -> ScoredCandidate {
        ScoredCandidate {
            candidate: Candidate::new("ia", id, id, MediaKind::Video),
            verdict: GateVerdict::approved(),
            score: 0.5,
            reasons: vec![],
            provider_priority: 1,
        }
    }

    fn mbeat(id: &str, primary: &[&str], secondary: &[&str], fallback: &[&str]) -> ManifestBeat {
        ManifestBeat {
            beat_id: id.into(),
            narration: "one two three four five six seven eight nine ten".into(),
            keywords: vec![],
            shot_types: vec![],
            duration_secs: None,
            queries: vec![],
            low_coverage: false,
            primary: primary.iter().map(|i| sc(i)).collect(),
            secondary: secondary.iter().map(|i| sc(i)).collect(),
            fallback: fallback.iter().map(|i| sc(i)).collect(),
            fallback_used: !fallback.is_empty(),
            fallback_queries: vec![],
            gate_stats: GateStats::default(),
            raw_candidates: 0,
            cache_hits: 0,
            diagnostic: None,
        }
    }

    fn manifest() -> Manifest {
        let mut m = Manifest::new("ep", "Bletchley Park", "p1", "1");
        m.beats.push(mbeat("b1", &["a"], &["b"], &[]));
        m.beats.push(mbeat("b2", &[], &[], &["c"]));
        m
    }

    #[test]
    fn index_enforces_beat_membership() {
        let m = manifest();
        let idx = ManifestIndex::new(&m);
        assert_eq!(idx.resolve("b1", "ia:b").unwrap().0, Tier::Secondary);
        assert_eq!(idx.resolve("b2", "ia:c").unwrap().0, Tier::Fallback);
        // Present in the manifest, but for another beat.
        let err = idx.resolve("b2", "ia:a").unwrap_err();
        assert!(matches!(err, PipelineError::ManifestInvariantViolation { .. }));
        assert!(idx.resolve("b9", "ia:a").is_err());
    }

    #[test]
    fn validate_rejects_out_of_manifest_clip() {
        let m = manifest();
        let idx = ManifestIndex::new(&m);
        let clip = CompilationClip {
            beat_id: "b1".into(),
            asset_id: "pexels:zzz".into(),
            tier: Tier::Primary,
            in_secs: 0.0,
            out_secs: 4.0,
            override_reason: None,
        };
        assert!(validate_clips(&[clip], &idx).is_err());
    }

    #[test]
    fn duration_from_narration() {
        let b = mbeat("b1", &["a"], &[], &[]);
        assert!((beat_duration(&b, 2.5, 3.0) - 4.0).abs() < 1e-9);
        assert_eq!(beat_duration(&b, 10.0, 3.0), 3.0);
        let mut explicit = b.clone();
        explicit.duration_secs = Some(12.0);
        assert_eq!(beat_duration(&explicit, 2.5, 3.0), 12.0);
    }

    #[test]
    fn window_offsets_and_shortfalls() {
        assert_eq!(clip_window(MediaKind::Video, Some(100.0), 5.0), (10.0, 15.0, None));
        let (i, o, _) = clip_window(MediaKind::Video, Some(6.0), 5.0);
        assert!((i - 0.6).abs() < 1e-9 && (o - 5.6).abs() < 1e-9);
        let (i, o, note) = clip_window(MediaKind::Video, Some(2.0), 5.0);
        assert_eq!((i, o), (0.0, 2.0));
        assert!(note.is_some());
        assert_eq!(clip_window(MediaKind::Image, None, 5.0), (0.0, 5.0, None));
    }

    #[test]
    fn choices_follow_tier_order_and_avoidance() {
        let b = mbeat("b1", &["a", "b"], &["c"], &["d"]);
        let ids: Vec<String> = ordered_choices(&b, None).iter().map(|(_, c)| c.asset_id()).collect();
        assert_eq!(ids, vec!["ia:a", "ia:b", "ia:c", "ia:d"]);
        let ids: Vec<String> = ordered_choices(&b, Some("ia:a"))
            .iter()
            .map(|(_, c)| c.asset_id())
            .collect();
        assert_eq!(ids, vec!["ia:b", "ia:c", "ia:d", "ia:a"]);
    }
}
