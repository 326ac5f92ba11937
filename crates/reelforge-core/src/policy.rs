//! Versioned, data-driven relevance policy.
//!
//! A policy bundles everything that is tuned rather than designed: gate
//! rule sets (hard / conditional / soft), the topic whitelist, query
//! guardrail term lists, and controlled-fallback archetypes. Rule data lives
//! in TOML (see `policy/default.toml`); this module only parses and compiles
//! it. Evaluation happens in [`crate::gate`] and [`crate::guardrail`].

use anyhow::{bail, Context, Result};
use regex::{Regex, RegexBuilder};
use serde::Deserialize;
use std::path::Path;

/// The built-in policy, compiled into the binary.
pub const DEFAULT_POLICY_TOML: &str = include_str!("../policy/default.toml");

#[derive(Debug, Deserialize)]
struct PolicyFile {
    policy: PolicyMeta,
    gate: GateRulesFile,
    queries: QueryRules,
    #[serde(default)]
    fallback: Vec<FallbackArchetype>,
}

#[derive(Debug, Deserialize, Clone)]
pub struct PolicyMeta {
    pub version: String,
    #[serde(default)]
    pub description: String,
}

#[derive(Debug, Deserialize)]
struct GateRulesFile {
    #[serde(default = "default_conditional_min_hits")]
    conditional_min_hits: usize,
    #[serde(default = "default_topic_min_hits")]
    topic_min_hits: usize,
    #[serde(default)]
    whitelist: Vec<String>,
    #[serde(default)]
    hard: Vec<RuleFile>,
    #[serde(default)]
    conditional: Vec<RuleFile>,
    #[serde(default)]
    soft: Vec<RuleFile>,
}

fn default_conditional_min_hits() -> usize {
    2
}
fn default_topic_min_hits() -> usize {
    1
}

#[derive(Debug, Deserialize)]
struct RuleFile {
    code: String,
    pattern: String,
}

/// A compiled gate rule. Patterns are case-insensitive.
#[derive(Debug, Clone)]
pub struct Rule {
    pub code: String,
    pub pattern: String,
    regex: Regex,
}

impl Rule {
    pub fn new(code: &str, pattern: &str) -> Result<Self> {
        let regex = RegexBuilder::new(pattern)
            .case_insensitive(true)
            .build()
            .with_context(|| format!("Invalid pattern for rule '{}': {}", code, pattern))?;
        Ok(Self {
            code: code.to_string(),
            pattern: pattern.to_string(),
            regex,
        })
    }

    pub fn is_match(&self, text: &str) -> bool {
        self.regex.is_match(text)
    }

    /// The substring that triggered the rule, if any.
    pub fn find<'t>(&self, text: &'t str) -> Option<&'t str> {
        self.regex.find(text).map(|m| m.as_str())
    }
}

/// Ordered gate rule sets. Within a tier the first matching rule wins.
#[derive(Debug, Clone)]
pub struct GateRules {
    pub hard: Vec<Rule>,
    pub conditional: Vec<Rule>,
    pub soft: Vec<Rule>,
    pub whitelist: Vec<String>,
    pub conditional_min_hits: usize,
    pub topic_min_hits: usize,
}

/// A noise term and the co-occurring terms that excuse it.
#[derive(Debug, Deserialize, Clone)]
pub struct NoiseTerm {
    pub term: String,
    #[serde(default)]
    pub excused_by: Vec<String>,
}

/// Term lists consumed by the query guardrail.
#[derive(Debug, Deserialize, Clone, Default)]
pub struct QueryRules {
    #[serde(default)]
    pub broad_terms: Vec<String>,
    #[serde(default)]
    pub intent_terms: Vec<String>,
    #[serde(default)]
    pub anchor_stopwords: Vec<String>,
    #[serde(default)]
    pub noise: Vec<NoiseTerm>,
}

/// A coarse topic category with generic-but-anchored query templates.
///
/// Templates contain a `{anchor}` placeholder.
#[derive(Debug, Deserialize, Clone)]
pub struct FallbackArchetype {
    pub name: String,
    #[serde(default)]
    pub terms: Vec<String>,
    pub templates: Vec<String>,
}

/// A fully compiled policy.
#[derive(Debug, Clone)]
pub struct Policy {
    pub meta: PolicyMeta,
    pub gate: GateRules,
    pub queries: QueryRules,
    pub fallback: Vec<FallbackArchetype>,
}

impl Policy {
    /// Parse and compile the built-in policy.
    pub fn builtin() -> Result<Self> {
        Self::from_toml_str(DEFAULT_POLICY_TOML).context("Built-in policy is invalid")
    }

    /// Load a policy from an external TOML file.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read policy file: {}", path.display()))?;
        Self::from_toml_str(&content)
            .with_context(|| format!("Failed to load policy file: {}", path.display()))
    }

    pub fn from_toml_str(content: &str) -> Result<Self> {
        let file: PolicyFile = toml::from_str(content).context("Failed to parse policy TOML")?;

        if file.policy.version.trim().is_empty() {
            bail!("policy.version must not be empty");
        }
        if file.fallback.is_empty() {
            bail!("policy must define at least one [[fallback]] archetype");
        }
        for archetype in &file.fallback {
            if archetype.templates.is_empty() {
                bail!("fallback archetype '{}' has no templates", archetype.name);
            }
            if let Some(t) = archetype.templates.iter().find(|t| !t.contains("{anchor}")) {
                bail!(
                    "fallback template '{}' in archetype '{}' has no {{anchor}} placeholder",
                    t,
                    archetype.name
                );
            }
        }

        let compile = |rules: &[RuleFile]| -> Result<Vec<Rule>> {
            rules.iter().map(|r| Rule::new(&r.code, &r.pattern)).collect()
        };

        let gate = GateRules {
            hard: compile(&file.gate.hard)?,
            conditional: compile(&file.gate.conditional)?,
            soft: compile(&file.gate.soft)?,
            whitelist: file
                .gate
                .whitelist
                .iter()
                .map(|w| crate::text::normalize(w))
                .collect(),
            conditional_min_hits: file.gate.conditional_min_hits,
            topic_min_hits: file.gate.topic_min_hits,
        };

        Ok(Self {
            meta: file.policy,
            gate,
            queries: file.queries,
            fallback: file.fallback,
        })
    }

    pub fn version(&self) -> &str {
        &self.meta.version
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builtin_policy_parses() {
        let policy = Policy::builtin().unwrap();
        assert!(!policy.version().is_empty());
        assert!(!policy.gate.hard.is_empty());
        assert!(!policy.gate.conditional.is_empty());
        assert!(!policy.gate.soft.is_empty());
        assert!(policy.fallback.iter().any(|a| a.terms.is_empty()));
    }

    #[test]
    fn rules_are_case_insensitive() {
        let rule = Rule::new("animated_content", r"\banimated\b").unwrap();
        assert!(rule.is_match("An ANIMATED short"));
        assert_eq!(rule.find("An ANIMATED short"), Some("ANIMATED"));
    }

    #[test]
    fn invalid_pattern_is_reported() {
        let err = Rule::new("broken", r"(unclosed").unwrap_err();
        assert!(err.to_string().contains("broken"));
    }

    #[test]
    fn template_without_anchor_is_rejected() {
        let toml = r#"
[policy]
version = "t1"
[gate]
[queries]
[[fallback]]
name = "general"
templates = ["archival footage"]
"#;
        let err = Policy::from_toml_str(toml).unwrap_err();
        assert!(err.to_string().contains("placeholder"));
    }
}
