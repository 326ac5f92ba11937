//! Query guardrail: validate, repair, and top up a beat's search queries
//! before any provider sees them.
//!
//! # Algorithm
//!
//! 1. Validate each raw query: anchor present (broad era/organization names
//!    alone do not count), media-intent token present, no unexcused noise
//!    term, enough meaningful words.
//! 2. Invalid queries get exactly one repair pass: inject the topic anchor
//!    and/or an intent token, strip noise terms.
//! 3. While fewer than `min_valid` queries pass, synthesize from the fixed
//!    template `"{anchor} {keyword} {media-intent}"`, at most
//!    `max_regeneration_attempts` times.
//! 4. Still short: return what exists with `low_coverage = true`.
//!
//! Everything here is a pure function of the input strings.

use serde::{Deserialize, Serialize};
use std::collections::HashSet;

use crate::error::PipelineError;
use crate::models::{MediaKind, QueryOrigin, SearchQuery, ShotType};
use crate::policy::QueryRules;
use crate::text::{self, contains_phrase, find_phrase, is_year, meaningful_tokens, raw_words, tokenize};

/// Lowercase connectors allowed inside a capitalized run ("Battle of Britain").
const RUN_CONNECTORS: &[&str] = &["of", "the", "de", "von", "van", "du", "la", "le", "del", "der"];

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct GuardrailConfig {
    pub min_valid: usize,
    pub max_regeneration_attempts: usize,
    pub min_meaningful_words: usize,
    pub max_queries: usize,
}

impl Default for GuardrailConfig {
    fn default() -> Self {
        Self {
            min_valid: 3,
            max_regeneration_attempts: 2,
            min_meaningful_words: 3,
            max_queries: 6,
        }
    }
}

/// Why a query failed validation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "issue", rename_all = "snake_case")]
pub enum QueryIssue {
    MissingAnchor,
    BroadAnchorOnly { terms: Vec<String> },
    MissingIntent,
    Noise { term: String },
    TooFewWords { found: usize, required: usize },
}

impl std::fmt::Display for QueryIssue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            QueryIssue::MissingAnchor => write!(f, "no anchor"),
            QueryIssue::BroadAnchorOnly { terms } => {
                write!(f, "only broad terms ({})", terms.join(", "))
            }
            QueryIssue::MissingIntent => write!(f, "no media-intent token"),
            QueryIssue::Noise { term } => write!(f, "noise term '{}'", term),
            QueryIssue::TooFewWords { found, required } => {
                write!(f, "{} meaningful words, need {}", found, required)
            }
        }
    }
}

/// Result of validating one query string.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueryCheck {
    pub text: String,
    pub anchors: Vec<String>,
    pub broad_terms: Vec<String>,
    pub media_intent: Option<String>,
    pub noise: Vec<String>,
    pub meaningful_words: usize,
    pub issues: Vec<QueryIssue>,
}

impl QueryCheck {
    pub fn is_valid(&self) -> bool {
        self.issues.is_empty()
    }

    fn into_query(self, origin: QueryOrigin) -> SearchQuery {
        SearchQuery {
            text: self.text,
            anchors: self.anchors,
            media_intent: self.media_intent,
            origin,
        }
    }
}

/// Everything the guardrail needs to know about one beat.
#[derive(Debug, Clone)]
pub struct GuardrailRequest<'a> {
    pub beat_id: &'a str,
    pub raw_queries: &'a [String],
    pub narration: &'a str,
    pub keywords: &'a [String],
    pub shot_types: &'a [ShotType],
    /// Episode topic. Required.
    pub topic: &'a str,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GuardrailOutcome {
    pub queries: Vec<SearchQuery>,
    pub low_coverage: bool,
    /// Queries that failed validation even after repair.
    pub rejected: Vec<QueryCheck>,
    pub regeneration_attempts: usize,
}

/// Anchors and broad terms found in a piece of text.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct AnchorScan {
    pub anchors: Vec<String>,
    pub broad: Vec<String>,
}

/// Detect anchors: quoted phrases, capitalized runs, and alphanumeric
/// designators (`U-505`). Bare years never count; broad terms are masked
/// first so they cannot form an anchor on their own. A single capitalized
/// word at the start of the text is sentence case, not a proper noun, unless
/// it is a designator.
pub fn scan_anchors(text_in: &str, rules: &QueryRules) -> AnchorScan {
    let mut scan = AnchorScan::default();
    let mut unquoted = String::new();
    let starts_quoted = text_in.trim_start().starts_with('"');

    for (i, segment) in text_in.split('"').enumerate() {
        if i % 2 == 0 {
            unquoted.push_str(segment);
            unquoted.push(' ');
            continue;
        }
        let phrase = segment.trim();
        if phrase.is_empty() || tokenize(phrase).iter().all(|t| is_year(t)) {
            continue;
        }
        if is_broad(phrase, rules) {
            push_unique(&mut scan.broad, text::normalize(phrase));
        } else {
            push_unique(&mut scan.anchors, phrase.to_string());
        }
    }

    let words = raw_words(&unquoted);
    let lower: Vec<String> = words.iter().map(|w| w.to_lowercase()).collect();
    let mut masked = vec![false; words.len()];

    for term in &rules.broad_terms {
        let needle = tokenize(term);
        let mut start = 0;
        while start < lower.len() {
            match find_phrase(&lower[start..], &needle) {
                Some(offset) => {
                    let at = start + offset;
                    for m in masked.iter_mut().skip(at).take(needle.len()) {
                        *m = true;
                    }
                    push_unique(&mut scan.broad, needle.join(" "));
                    start = at + needle.len();
                }
                None => break,
            }
        }
    }

    let is_designator = |w: &str| -> bool {
        w.chars().any(|c| c.is_alphabetic()) && w.chars().any(|c| c.is_ascii_digit())
    };
    let is_anchor_token = |i: usize| -> bool {
        let w = words[i];
        if masked[i] || is_year(w) {
            return false;
        }
        if rules.anchor_stopwords.iter().any(|s| s == &lower[i]) {
            return false;
        }
        let capitalized = w.chars().next().is_some_and(|c| c.is_uppercase());
        capitalized || is_designator(w)
    };

    let mut i = 0;
    while i < words.len() {
        if !is_anchor_token(i) {
            i += 1;
            continue;
        }
        let mut run = vec![words[i]];
        let mut j = i + 1;
        while j < words.len() {
            if is_anchor_token(j) {
                run.push(words[j]);
                j += 1;
            } else if !masked[j]
                && RUN_CONNECTORS.contains(&lower[j].as_str())
                && j + 1 < words.len()
                && is_anchor_token(j + 1)
            {
                run.push(words[j]);
                run.push(words[j + 1]);
                j += 2;
            } else {
                break;
            }
        }
        let sentence_case = i == 0 && !starts_quoted && run.len() == 1 && !is_designator(run[0]);
        if !sentence_case {
            push_unique(&mut scan.anchors, run.join(" "));
        }
        i = j;
    }

    scan
}

fn is_broad(phrase: &str, rules: &QueryRules) -> bool {
    let normalized = text::normalize(phrase);
    rules.broad_terms.iter().any(|b| text::normalize(b) == normalized)
}

fn push_unique(list: &mut Vec<String>, value: String) {
    if !list.iter().any(|v| v.eq_ignore_ascii_case(&value)) {
        list.push(value);
    }
}

/// Anchors for the episode topic. Without a capitalized phrase, the topic's
/// remaining words (broad terms and stopwords removed, case kept) form the
/// anchor. A topic made only of broad terms has no anchor.
pub fn topic_anchors(topic: &str, rules: &QueryRules) -> Vec<String> {
    let scan = scan_anchors(topic, rules);
    if !scan.anchors.is_empty() {
        return scan.anchors;
    }
    let words = raw_words(topic);
    let lower: Vec<String> = words.iter().map(|w| w.to_lowercase()).collect();
    let mut keep = vec![true; words.len()];
    for term in &rules.broad_terms {
        let needle = tokenize(term);
        let mut start = 0;
        while let Some(offset) = find_phrase(&lower[start..], &needle) {
            let at = start + offset;
            for k in keep.iter_mut().skip(at).take(needle.len()) {
                *k = false;
            }
            start = at + needle.len();
        }
    }
    let stripped: Vec<&str> = words
        .iter()
        .zip(&lower)
        .zip(&keep)
        .filter(|((_, l), k)| **k && !text::is_stopword(l) && !is_year(l))
        .map(|((w, _), _)| *w)
        .collect();
    if stripped.is_empty() {
        Vec::new()
    } else {
        vec![stripped.join(" ")]
    }
}

/// Validate a single query against the rules and beat context.
pub fn check_query(
    query: &str,
    topic_anchors: &[String],
    rules: &QueryRules,
    config: &GuardrailConfig,
) -> QueryCheck {
    let text = query.split_whitespace().collect::<Vec<_>>().join(" ");
    let tokens = tokenize(&text);
    let mut scan = scan_anchors(&text, rules);

    // Lowercase queries still carry the topic anchor.
    for anchor in topic_anchors {
        if is_broad(anchor, rules) {
            continue;
        }
        if contains_phrase(&tokens, anchor) {
            push_unique(&mut scan.anchors, anchor.clone());
            continue;
        }
        for part in tokenize(anchor) {
            let distinctive = part.len() >= 5
                && !text::is_stopword(&part)
                && !rules.anchor_stopwords.contains(&part)
                && !scan.broad.iter().any(|b| tokenize(b).contains(&part));
            if distinctive && tokens.contains(&part) {
                push_unique(&mut scan.anchors, part);
            }
        }
    }

    let media_intent = rules
        .intent_terms
        .iter()
        .find(|term| contains_phrase(&tokens, term))
        .cloned();

    let noise: Vec<String> = rules
        .noise
        .iter()
        .filter(|n| contains_phrase(&tokens, &n.term))
        .filter(|n| !n.excused_by.iter().any(|e| contains_phrase(&tokens, e)))
        .map(|n| n.term.clone())
        .collect();

    let meaningful_words = meaningful_tokens(&text).len();

    let mut issues = Vec::new();
    if scan.anchors.is_empty() {
        if scan.broad.is_empty() {
            issues.push(QueryIssue::MissingAnchor);
        } else {
            issues.push(QueryIssue::BroadAnchorOnly {
                terms: scan.broad.clone(),
            });
        }
    }
    if media_intent.is_none() {
        issues.push(QueryIssue::MissingIntent);
    }
    for term in &noise {
        issues.push(QueryIssue::Noise { term: term.clone() });
    }
    if meaningful_words < config.min_meaningful_words {
        issues.push(QueryIssue::TooFewWords {
            found: meaningful_words,
            required: config.min_meaningful_words,
        });
    }

    QueryCheck {
        text,
        anchors: scan.anchors,
        broad_terms: scan.broad,
        media_intent,
        noise,
        meaningful_words,
        issues,
    }
}

/// Keywords for synthesis: the beat's own, or content words from narration.
fn synthesis_keywords(keywords: &[String], narration: &str, rules: &QueryRules) -> Vec<String> {
    let explicit: Vec<String> = keywords
        .iter()
        .map(|k| k.trim().to_string())
        .filter(|k| !k.is_empty())
        .collect();
    if !explicit.is_empty() {
        return explicit;
    }
    let mut derived: Vec<String> = Vec::new();
    for token in meaningful_tokens(narration) {
        if token.len() < 5 || is_year(&token) || rules.anchor_stopwords.contains(&token) {
            continue;
        }
        if !derived.contains(&token) {
            derived.push(token);
        }
        if derived.len() == 5 {
            break;
        }
    }
    derived
}

fn default_intent(shot_types: &[ShotType]) -> &'static str {
    shot_types
        .first()
        .map(|s| s.intent_token())
        .unwrap_or("footage")
}

/// Intent tokens for a synthesis attempt. The first attempt uses the primary
/// shot type; later attempts widen to the remaining shot types and
/// media-kind alternates.
fn attempt_intents(shot_types: &[ShotType], attempt: usize) -> Vec<&'static str> {
    if attempt == 0 {
        return vec![default_intent(shot_types)];
    }
    let mut intents: Vec<&'static str> = shot_types.iter().skip(1).map(|s| s.intent_token()).collect();
    let kind = shot_types
        .first()
        .map(|s| s.media_kind())
        .unwrap_or(MediaKind::Video);
    let alternates: &[&'static str] = match kind {
        MediaKind::Video => &["newsreel footage", "archival film"],
        MediaKind::Image => &["archival photograph", "historical photo"],
    };
    for alt in alternates {
        if !intents.contains(alt) {
            intents.push(*alt);
        }
    }
    intents
}

/// One repair pass. Returns the rewritten text; the caller re-validates.
fn repair_query(
    check: &QueryCheck,
    topic_anchors: &[String],
    keywords: &[String],
    shot_types: &[ShotType],
    config: &GuardrailConfig,
) -> String {
    let mut words: Vec<String> = raw_words(&check.text).into_iter().map(str::to_string).collect();

    for term in &check.noise {
        let needle = tokenize(term);
        loop {
            let lower: Vec<String> = words.iter().map(|w| w.to_lowercase()).collect();
            match find_phrase(&lower, &needle) {
                Some(at) => {
                    words.drain(at..at + needle.len());
                }
                None => break,
            }
        }
    }

    let needs_anchor = check.issues.iter().any(|i| {
        matches!(
            i,
            QueryIssue::MissingAnchor | QueryIssue::BroadAnchorOnly { .. }
        )
    });
    if needs_anchor {
        if let Some(anchor) = topic_anchors.first() {
            let lower: Vec<String> = words.iter().map(|w| w.to_lowercase()).collect();
            if !contains_phrase(&lower, anchor) {
                words.insert(0, anchor.clone());
            }
        }
    }

    if check.media_intent.is_none() {
        words.push(default_intent(shot_types).to_string());
    }

    let mut extra = keywords.iter();
    while meaningful_tokens(&words.join(" ")).len() < config.min_meaningful_words {
        match extra.next() {
            Some(kw) => {
                let lower: Vec<String> = words.iter().map(|w| w.to_lowercase()).collect();
                if !contains_phrase(&lower, kw) {
                    words.push(kw.clone());
                }
            }
            None => break,
        }
    }

    words.join(" ")
}

/// Validate, repair, and top up the queries for one beat.
///
/// Returns at least `min_valid` queries, or fewer with `low_coverage` set.
/// Only a missing topic is an error.
pub fn validate_and_fix_queries(
    request: &GuardrailRequest<'_>,
    rules: &QueryRules,
    config: &GuardrailConfig,
) -> Result<GuardrailOutcome, PipelineError> {
    let topic = request.topic.trim();
    if topic.is_empty() {
        return Err(PipelineError::MissingTopic {
            scope: format!("beat '{}'", request.beat_id),
        });
    }

    let anchors = topic_anchors(topic, rules);
    let keywords = synthesis_keywords(request.keywords, request.narration, rules);
    let cap = config.max_queries.max(config.min_valid);

    let mut seen: HashSet<String> = HashSet::new();
    let mut accepted: Vec<SearchQuery> = Vec::new();
    let mut rejected: Vec<QueryCheck> = Vec::new();

    let mut accept = |check: QueryCheck, origin: QueryOrigin, accepted: &mut Vec<SearchQuery>| -> bool {
        let key = text::normalize(&check.text);
        if key.is_empty() || !seen.insert(key) {
            return false;
        }
        accepted.push(check.into_query(origin));
        true
    };

    let mut needs_repair = Vec::new();
    for raw in request.raw_queries {
        if raw.trim().is_empty() {
            continue;
        }
        let check = check_query(raw, &anchors, rules, config);
        if check.is_valid() {
            accept(check, QueryOrigin::Original, &mut accepted);
        } else {
            needs_repair.push(check);
        }
    }

    for check in needs_repair {
        let repaired = repair_query(&check, &anchors, &keywords, request.shot_types, config);
        let second = check_query(&repaired, &anchors, rules, config);
        if second.is_valid() {
            accept(second, QueryOrigin::Repaired, &mut accepted);
        } else {
            rejected.push(second);
        }
    }

    // Anchors seen in valid queries widen the synthesis pool.
    let mut synthesis_anchors = anchors.clone();
    for q in &accepted {
        for a in &q.anchors {
            push_unique(&mut synthesis_anchors, a.clone());
        }
    }

    let mut attempts = 0;
    while accepted.len() < config.min_valid && attempts < config.max_regeneration_attempts {
        for intent in attempt_intents(request.shot_types, attempts) {
            for anchor in &synthesis_anchors {
                for kw in &keywords {
                    if accepted.len() >= config.min_valid {
                        break;
                    }
                    if contains_phrase(&tokenize(anchor), kw) {
                        continue;
                    }
                    let candidate = format!("{} {} {}", anchor, kw, intent);
                    let check = check_query(&candidate, &anchors, rules, config);
                    if check.is_valid() {
                        accept(check, QueryOrigin::Synthesized, &mut accepted);
                    }
                }
            }
        }
        attempts += 1;
    }

    accepted.truncate(cap);
    let low_coverage = accepted.len() < config.min_valid;

    Ok(GuardrailOutcome {
        queries: accepted,
        low_coverage,
        rejected,
        regeneration_attempts: attempts,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::policy::Policy;

    fn rules() -> QueryRules {
        Policy::builtin().unwrap().queries
    }

    fn check(q: &str) -> QueryCheck {
        check_query(q, &[], &rules(), &GuardrailConfig::default())
    }

    #[test]
    fn bare_year_is_not_an_anchor() {
        let c = check("1944 troops photograph");
        assert!(c.issues.contains(&QueryIssue::MissingAnchor), "{:?}", c.issues);
    }

    #[test]
    fn sentence_case_word_with_year_is_not_an_anchor() {
        let c = check("Troops marching 1944 photograph");
        assert!(c.anchors.is_empty(), "{:?}", c.anchors);
        assert!(c.issues.contains(&QueryIssue::MissingAnchor), "{:?}", c.issues);

        // A designator or a capitalized run at the start still counts.
        assert!(check("U-505 capture 1944 photograph").is_valid());
        assert!(check("Normandy Beaches 1944 photograph").is_valid());
        // So does a proper noun later in the query.
        let later = check("troops marching through Caen 1944 photograph");
        assert_eq!(later.anchors, vec!["Caen".to_string()]);
    }

    #[test]
    fn named_entity_with_year_passes() {
        let c = check("Operation Overlord 1944 photograph");
        assert!(c.is_valid(), "{:?}", c.issues);
        assert_eq!(c.anchors, vec!["Operation Overlord".to_string()]);
    }

    #[test]
    fn broad_term_alone_is_not_sufficient() {
        let c = check("World War II newsreel footage");
        assert!(matches!(
            c.issues.first(),
            Some(QueryIssue::BroadAnchorOnly { .. })
        ));
        let navy = check("Royal Navy fleet footage 1941");
        assert!(matches!(
            navy.issues.first(),
            Some(QueryIssue::BroadAnchorOnly { .. })
        ));
    }

    #[test]
    fn broad_topic_is_not_an_anchor() {
        let anchors = topic_anchors("World War II", &rules());
        assert!(anchors.is_empty(), "{:?}", anchors);

        let c = check_query(
            "World War II newsreel footage",
            &["World War II".to_string()],
            &rules(),
            &GuardrailConfig::default(),
        );
        assert!(c.anchors.is_empty());
        assert!(matches!(
            c.issues.first(),
            Some(QueryIssue::BroadAnchorOnly { .. })
        ));

        // Broad words are stripped from a topic; the specific part remains.
        assert_eq!(
            topic_anchors("stalingrad in world war ii", &rules()),
            vec!["stalingrad".to_string()]
        );
    }

    #[test]
    fn broad_topic_is_never_injected_by_repair() {
        let raw = vec!["soldiers marching newsreel".to_string()];
        let out = validate_and_fix_queries(
            &request(&raw, &[], &[ShotType::ArchivalVideo], "World War II"),
            &rules(),
            &GuardrailConfig::default(),
        )
        .unwrap();
        assert!(out.queries.is_empty(), "{:?}", out.queries);
        assert!(out.low_coverage);
        assert_eq!(out.rejected.len(), 1);
        assert!(!out.rejected[0].text.contains("World War II"));
    }

    #[test]
    fn broad_term_with_specific_entity_passes() {
        let c = check("Royal Navy HMS Hood footage");
        assert!(c.is_valid(), "{:?}", c.issues);
        assert!(c.anchors.iter().any(|a| a == "HMS Hood"));

        let unit = check("World War II U-505 capture footage");
        assert!(unit.is_valid(), "{:?}", unit.issues);
    }

    #[test]
    fn noise_term_excused_in_historical_phrase() {
        let c = check("Berlin Olympic Games 1936 footage");
        assert!(c.is_valid(), "{:?}", c.issues);
    }

    #[test]
    fn noise_term_rejected_in_modern_context() {
        let c = check("Stalingrad video games footage");
        assert!(c
            .issues
            .iter()
            .any(|i| matches!(i, QueryIssue::Noise { term } if term == "games")));
    }

    #[test]
    fn quoted_phrase_is_an_anchor() {
        let c = check("\"enigma machine\" rotor photograph");
        assert!(c.anchors.contains(&"enigma machine".to_string()));
    }

    #[test]
    fn capitalized_run_spans_connectors() {
        let scan = scan_anchors("Battle of Britain airfield photograph", &rules());
        assert_eq!(scan.anchors, vec!["Battle of Britain".to_string()]);
    }

    #[test]
    fn topic_anchor_matches_lowercase_query() {
        let anchors = topic_anchors("Codebreaking at Bletchley Park", &rules());
        assert!(anchors.contains(&"Bletchley Park".to_string()));
        let c = check_query(
            "bletchley park huts photograph",
            &anchors,
            &rules(),
            &GuardrailConfig::default(),
        );
        assert!(c.is_valid(), "{:?}", c.issues);
    }

    fn request<'a>(
        raw: &'a [String],
        keywords: &'a [String],
        shots: &'a [ShotType],
        topic: &'a str,
    ) -> GuardrailRequest<'a> {
        GuardrailRequest {
            beat_id: "b1",
            raw_queries: raw,
            narration: "Codebreakers worked through the night in wooden huts.",
            keywords,
            shot_types: shots,
            topic,
        }
    }

    #[test]
    fn missing_topic_is_hard_failure() {
        let raw = vec!["Bletchley Park huts photograph".to_string()];
        let err = validate_and_fix_queries(
            &request(&raw, &[], &[ShotType::ArchivalPhoto], "  "),
            &rules(),
            &GuardrailConfig::default(),
        )
        .unwrap_err();
        assert!(matches!(err, PipelineError::MissingTopic { .. }));
    }

    #[test]
    fn repair_injects_anchor_and_intent() {
        let raw = vec!["codebreakers working night shift".to_string()];
        let out = validate_and_fix_queries(
            &request(&raw, &[], &[ShotType::ArchivalPhoto], "Bletchley Park"),
            &rules(),
            &GuardrailConfig {
                min_valid: 1,
                ..Default::default()
            },
        )
        .unwrap();
        let q = &out.queries[0];
        assert_eq!(q.origin, QueryOrigin::Repaired);
        assert!(q.text.starts_with("Bletchley Park"));
        assert!(q.text.ends_with("photograph"));
    }

    #[test]
    fn repair_strips_noise() {
        let raw = vec!["Bletchley Park meme photograph huts".to_string()];
        let out = validate_and_fix_queries(
            &request(&raw, &[], &[ShotType::ArchivalPhoto], "Bletchley Park"),
            &rules(),
            &GuardrailConfig {
                min_valid: 1,
                ..Default::default()
            },
        )
        .unwrap();
        assert_eq!(out.queries[0].text, "Bletchley Park photograph huts");
    }

    #[test]
    fn synthesis_tops_up_to_min_valid() {
        let raw: Vec<String> = vec![];
        let keywords = vec!["enigma".to_string(), "huts".to_string(), "bombe".to_string()];
        let out = validate_and_fix_queries(
            &request(&raw, &keywords, &[ShotType::ArchivalPhoto], "Bletchley Park"),
            &rules(),
            &GuardrailConfig::default(),
        )
        .unwrap();
        assert!(!out.low_coverage);
        assert_eq!(out.queries.len(), 3);
        assert!(out
            .queries
            .iter()
            .all(|q| q.origin == QueryOrigin::Synthesized));
        assert_eq!(out.queries[0].text, "Bletchley Park enigma photograph");
    }

    #[test]
    fn low_coverage_is_bounded_and_flagged() {
        let raw = vec!["1944".to_string()];
        let out = validate_and_fix_queries(
            &GuardrailRequest {
                beat_id: "b1",
                raw_queries: &raw,
                narration: "",
                keywords: &[],
                shot_types: &[ShotType::Map],
                topic: "Bletchley Park",
            },
            &rules(),
            &GuardrailConfig {
                min_valid: 5,
                ..Default::default()
            },
        )
        .unwrap();
        assert!(out.low_coverage);
        assert!(out.regeneration_attempts <= 2);
    }

    #[test]
    fn never_exceeds_regeneration_bound() {
        let config = GuardrailConfig {
            min_valid: 50,
            max_regeneration_attempts: 2,
            max_queries: 50,
            ..Default::default()
        };
        let keywords: Vec<String> = (0..4).map(|i| format!("keyword{}", i)).collect();
        let out = validate_and_fix_queries(
            &request(&[], &keywords, &[ShotType::ArchivalVideo], "Bletchley Park"),
            &rules(),
            &config,
        )
        .unwrap();
        assert_eq!(out.regeneration_attempts, 2);
        assert!(out.low_coverage);
    }

    #[test]
    fn deterministic_across_runs() {
        let raw = vec![
            "WWII codebreakers".to_string(),
            "Bletchley Park Hut 8 photograph".to_string(),
        ];
        let keywords = vec!["Turing".to_string()];
        let a = validate_and_fix_queries(
            &request(&raw, &keywords, &[ShotType::ArchivalPhoto], "Bletchley Park"),
            &rules(),
            &GuardrailConfig::default(),
        )
        .unwrap();
        let b = validate_and_fix_queries(
            &request(&raw, &keywords, &[ShotType::ArchivalPhoto], "Bletchley Park"),
            &rules(),
            &GuardrailConfig::default(),
        )
        .unwrap();
        let ta: Vec<_> = a.queries.iter().map(|q| &q.text).collect();
        let tb: Vec<_> = b.queries.iter().map(|q| &q.text).collect();
        assert_eq!(ta, tb);
    }
}
