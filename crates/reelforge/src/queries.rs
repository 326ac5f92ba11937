//! Offline guardrail report (`reel queries <plan>`).
//!
//! Runs every beat's queries through validation, repair and synthesis
//! without touching any provider, so a plan can be checked before a
//! resolution run spends rate-limited requests on it.

use anyhow::Result;
use serde::Serialize;
use std::path::Path;

use reelforge_core::guardrail::{validate_and_fix_queries, GuardrailOutcome, GuardrailRequest};
use reelforge_core::models::ShotPlan;
use reelforge_core::policy::Policy;

use crate::config::Config;
use crate::manifest_file::load_plan;
use crate::resolve::load_policy;

#[derive(Debug, Clone, Serialize)]
pub struct BeatQueries {
    pub beat_id: String,
    #[serde(flatten)]
    pub outcome: GuardrailOutcome,
}

pub fn check_plan(plan: &ShotPlan, policy: &Policy, config: &Config) -> Result<Vec<BeatQueries>> {
    let topic = plan.require_topic()?;
    let guardrail = config.guardrail.to_core();

    plan.beats
        .iter()
        .map(|beat| -> Result<BeatQueries> {
            let outcome = validate_and_fix_queries(
                &GuardrailRequest {
                    beat_id: &beat.id,
                    raw_queries: &beat.queries,
                    narration: &beat.narration,
                    keywords: &beat.keywords,
                    shot_types: &beat.shot_types,
                    topic,
                },
                &policy.queries,
                &guardrail,
            )?;
            Ok(BeatQueries {
                beat_id: beat.id.clone(),
                outcome,
            })
        })
        .collect()
}

pub fn run_queries(config: &Config, plan_path: &Path, json: bool) -> Result<()> {
    let plan = load_plan(plan_path)?;
    let policy = load_policy(config)?;
    let report = check_plan(&plan, &policy, config)?;

    if json {
        println!("{}", serde_json::to_string_pretty(&report)?);
        return Ok(());
    }

    for beat in &report {
        let flag = if beat.outcome.low_coverage { "  LOW COVERAGE" } else { "" };
        println!("{}{}", beat.beat_id, flag);
        for q in &beat.outcome.queries {
            println!("  [{:<11}] {}", q.origin.as_str(), q.text);
        }
        for rejected in &beat.outcome.rejected {
            let issues: Vec<String> = rejected.issues.iter().map(|i| i.to_string()).collect();
            println!("  [{:<11}] {}  ({})", "rejected", rejected.text, issues.join("; "));
        }
    }

    let low = report.iter().filter(|b| b.outcome.low_coverage).count();
    println!();
    println!("{} beats checked, {} with low query coverage", report.len(), low);
    Ok(())
}
