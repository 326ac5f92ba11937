//! Controlled fallback: coarse archetype templates used when a beat has no
//! primary candidates.
//!
//! Fallback queries stay anchored to the topic (every template carries an
//! `{anchor}` slot), and whatever they retrieve still goes through the same
//! gate. Results land only in the fallback tier, capped by configuration.

use crate::models::{MediaKind, QueryOrigin, SearchQuery};
use crate::policy::{FallbackArchetype, Policy};
use crate::text::{contains_phrase, tokenize};

const VIDEO_INTENTS: &[&str] = &["footage", "newsreel", "film"];
const IMAGE_INTENTS: &[&str] = &["photograph", "photo", "portrait", "map", "poster"];

/// Pick the archetype whose terms best match the beat.
///
/// Ties go to the archetype declared first; zero hits selects the last
/// archetype, which is the catch-all.
pub fn classify_archetype<'p>(
    policy: &'p Policy,
    narration: &str,
    keywords: &[String],
    topic: &str,
) -> Option<&'p FallbackArchetype> {
    let haystack = format!("{} {} {}", narration, keywords.join(" "), topic);
    let tokens = tokenize(&haystack);

    let mut best: Option<(&FallbackArchetype, usize)> = None;
    for archetype in &policy.fallback {
        let hits = archetype
            .terms
            .iter()
            .filter(|t| contains_phrase(&tokens, t))
            .count();
        if hits > 0 && best.map(|(_, h)| hits > h).unwrap_or(true) {
            best = Some((archetype, hits));
        }
    }

    best.map(|(a, _)| a).or_else(|| policy.fallback.last())
}

fn template_intent(template: &str) -> Option<MediaKind> {
    let tokens = tokenize(template);
    if tokens.iter().any(|t| VIDEO_INTENTS.contains(&t.as_str())) {
        Some(MediaKind::Video)
    } else if tokens.iter().any(|t| IMAGE_INTENTS.contains(&t.as_str())) {
        Some(MediaKind::Image)
    } else {
        None
    }
}

/// Expand an archetype's templates for `anchor`, preferring templates whose
/// media intent matches `kind`. Returns at most `max` queries.
pub fn fallback_queries(
    archetype: &FallbackArchetype,
    anchor: &str,
    kind: MediaKind,
    max: usize,
) -> Vec<SearchQuery> {
    let mut templates: Vec<&String> = archetype.templates.iter().collect();
    // Stable: matching templates first, declaration order otherwise.
    templates.sort_by_key(|t| template_intent(t) != Some(kind));

    templates
        .into_iter()
        .take(max)
        .map(|t| {
            let text = t.replace("{anchor}", anchor);
            let media_intent = tokenize(&text)
                .into_iter()
                .find(|tok| VIDEO_INTENTS.contains(&tok.as_str()) || IMAGE_INTENTS.contains(&tok.as_str()));
            SearchQuery {
                text,
                anchors: vec![anchor.to_string()],
                media_intent,
                origin: QueryOrigin::Fallback,
            }
        })
        .collect()
}
