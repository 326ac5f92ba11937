//! Active gate policy summary (`reel gate`).

use anyhow::Result;
use serde::Serialize;

use reelforge_core::policy::Policy;

use crate::config::Config;
use crate::resolve::load_policy;

#[derive(Debug, Clone, Serialize)]
pub struct PolicySummary {
    pub version: String,
    pub source: String,
    pub description: String,
    pub hard_rules: usize,
    pub conditional_rules: usize,
    pub soft_rules: usize,
    pub whitelist_terms: usize,
    pub conditional_min_hits: usize,
    pub topic_min_hits: usize,
    pub broad_terms: usize,
    pub intent_terms: usize,
    pub noise_terms: usize,
    pub fallback_archetypes: Vec<String>,
}

pub fn summarize(policy: &Policy, source: &str) -> PolicySummary {
    PolicySummary {
        version: policy.version().to_string(),
        source: source.to_string(),
        description: policy.meta.description.clone(),
        hard_rules: policy.gate.hard.len(),
        conditional_rules: policy.gate.conditional.len(),
        soft_rules: policy.gate.soft.len(),
        whitelist_terms: policy.gate.whitelist.len(),
        conditional_min_hits: policy.gate.conditional_min_hits,
        topic_min_hits: policy.gate.topic_min_hits,
        broad_terms: policy.queries.broad_terms.len(),
        intent_terms: policy.queries.intent_terms.len(),
        noise_terms: policy.queries.noise.len(),
        fallback_archetypes: policy.fallback.iter().map(|a| a.name.clone()).collect(),
    }
}

pub fn show_policy(config: &Config, json: bool, verbose: bool) -> Result<()> {
    let policy = load_policy(config)?;
    let source = config
        .gate
        .policy_path
        .as_ref()
        .map(|p| p.display().to_string())
        .unwrap_or_else(|| "built-in".to_string());
    let summary = summarize(&policy, &source);

    if json {
        println!("{}", serde_json::to_string_pretty(&summary)?);
        return Ok(());
    }

    println!("Gate policy {} ({})", summary.version, summary.source);
    if !summary.description.is_empty() {
        println!("  {}", summary.description);
    }
    println!("  hard rules:        {}", summary.hard_rules);
    println!(
        "  conditional rules: {} (survive with ≥{} whitelist/topic hits)",
        summary.conditional_rules, summary.conditional_min_hits
    );
    println!("  soft rules:        {}", summary.soft_rules);
    println!("  whitelist terms:   {}", summary.whitelist_terms);
    println!("  topic must-hit:    ≥{}", summary.topic_min_hits);
    println!(
        "  query rules:       {} broad, {} intent, {} noise",
        summary.broad_terms, summary.intent_terms, summary.noise_terms
    );
    println!("  fallback:          {}", summary.fallback_archetypes.join(", "));

    if verbose {
        for (tier, rules) in [
            ("hard", &policy.gate.hard),
            ("conditional", &policy.gate.conditional),
            ("soft", &policy.gate.soft),
        ] {
            println!();
            println!("{} rules:", tier);
            for rule in rules {
                println!("  {:<28} {}", rule.code, rule.pattern);
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builtin_summary_counts_rules() {
        let policy = Policy::builtin().unwrap();
        let summary = summarize(&policy, "built-in");
        assert_eq!(summary.version, policy.version());
        assert!(summary.hard_rules > 0);
        assert!(summary.conditional_rules > 0);
        assert_eq!(summary.fallback_archetypes.last().map(String::as_str), Some("general"));
    }
}
