//! Small text utilities shared by the guardrail, gate, and scorer.
//!
//! Matching is word-bounded and case-insensitive: a term matches when its
//! token sequence appears contiguously in the haystack's token sequence.

const STOPWORDS: &[&str] = &[
    "a", "an", "and", "as", "at", "by", "de", "during", "for", "from", "her", "his", "in",
    "into", "is", "its", "of", "on", "or", "over", "the", "their", "to", "under", "was",
    "were", "with",
];

/// Split on anything that is not alphanumeric (hyphen and apostrophe kept
/// inside words), lowercase each token.
pub fn tokenize(text: &str) -> Vec<String> {
    raw_words(text)
        .into_iter()
        .map(|w| w.to_lowercase())
        .collect()
}

/// Split into words preserving case. Leading/trailing punctuation is
/// stripped; inner hyphens and apostrophes survive (`U-505`, `D'Arcy`).
pub fn raw_words(text: &str) -> Vec<&str> {
    text.split(|c: char| c.is_whitespace() || matches!(c, ',' | ';' | ':' | '(' | ')' | '"' | '/' | '|' | '!' | '?'))
        .map(|w| w.trim_matches(|c: char| !c.is_alphanumeric()))
        .filter(|w| !w.is_empty())
        .collect()
}

pub fn is_stopword(token: &str) -> bool {
    STOPWORDS.contains(&token)
}

/// `1944`, `1940s`, `1940's` all count as bare years.
pub fn is_year(token: &str) -> bool {
    let t = token.trim_end_matches("'s").trim_end_matches('s');
    (3..=4).contains(&t.len()) && t.chars().all(|c| c.is_ascii_digit())
}

/// Normalize for keys and comparisons: lowercase tokens joined by one space.
pub fn normalize(text: &str) -> String {
    tokenize(text).join(" ")
}

/// Word-bounded phrase containment over pre-tokenized input.
pub fn contains_phrase(tokens: &[String], phrase: &str) -> bool {
    let needle = tokenize(phrase);
    find_phrase(tokens, &needle).is_some()
}

/// Index of the first occurrence of `needle` in `tokens`.
pub fn find_phrase(tokens: &[String], needle: &[String]) -> Option<usize> {
    if needle.is_empty() || needle.len() > tokens.len() {
        return None;
    }
    (0..=tokens.len() - needle.len()).find(|&i| tokens[i..i + needle.len()] == *needle)
}

/// Tokens that carry meaning: not stopwords, at least two characters.
pub fn meaningful_tokens(text: &str) -> Vec<String> {
    tokenize(text)
        .into_iter()
        .filter(|t| t.len() >= 2 && !is_stopword(t))
        .collect()
}
