//! Shot plan loading and manifest persistence.

use anyhow::{bail, Context, Result};
use std::collections::HashSet;
use std::path::{Path, PathBuf};

use reelforge_core::manifest::Manifest;
use reelforge_core::models::ShotPlan;

/// Load and sanity-check a shot plan JSON file.
///
/// The topic itself is checked by the resolver so that a missing topic
/// surfaces as a typed pipeline error.
pub fn load_plan(path: &Path) -> Result<ShotPlan> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read shot plan: {}", path.display()))?;
    let plan: ShotPlan = serde_json::from_str(&content)
        .with_context(|| format!("Failed to parse shot plan: {}", path.display()))?;
    validate_plan(&plan)?;
    Ok(plan)
}

pub fn validate_plan(plan: &ShotPlan) -> Result<()> {
    if plan.episode_id.trim().is_empty() {
        bail!("shot plan episode_id must not be empty");
    }
    if plan.beats.is_empty() {
        bail!("shot plan '{}' has no beats", plan.episode_id);
    }
    let mut seen = HashSet::new();
    for beat in &plan.beats {
        if beat.id.trim().is_empty() {
            bail!("shot plan '{}' has a beat with an empty id", plan.episode_id);
        }
        if !seen.insert(beat.id.as_str()) {
            bail!("duplicate beat id '{}' in shot plan '{}'", beat.id, plan.episode_id);
        }
    }
    Ok(())
}

/// `<dir>/<episode_id>.manifest.json`
pub fn manifest_path(dir: &Path, episode_id: &str) -> PathBuf {
    let safe: String = episode_id
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '-' || c == '_' { c } else { '_' })
        .collect();
    dir.join(format!("{}.manifest.json", safe))
}

pub fn save_manifest(manifest: &Manifest, dir: &Path) -> Result<PathBuf> {
    std::fs::create_dir_all(dir)
        .with_context(|| format!("Failed to create manifest dir: {}", dir.display()))?;
    let path = manifest_path(dir, &manifest.episode_id);
    let json = serde_json::to_string_pretty(manifest)?;
    // Write-then-rename so a crash never leaves a truncated manifest.
    let tmp = path.with_extension("json.tmp");
    std::fs::write(&tmp, json)
        .with_context(|| format!("Failed to write manifest: {}", tmp.display()))?;
    std::fs::rename(&tmp, &path)
        .with_context(|| format!("Failed to move manifest into place: {}", path.display()))?;
    Ok(path)
}

pub fn load_manifest(path: &Path) -> Result<Manifest> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read manifest: {}", path.display()))?;
    serde_json::from_str(&content)
        .with_context(|| format!("Failed to parse manifest: {}", path.display()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use reelforge_core::models::Beat;

    fn beat(id: &str) -> Beat {
        Beat {
            id: id.into(),
            narration: "n".into(),
            keywords: vec![],
            shot_types: vec![],
            queries: vec![],
            duration_secs: None,
        }
    }

    #[test]
    fn duplicate_beats_rejected() {
        let plan = ShotPlan {
            episode_id: "ep1".into(),
            topic: Some("t".into()),
            beats: vec![beat("a"), beat("a")],
        };
        assert!(validate_plan(&plan).unwrap_err().to_string().contains("duplicate"));
    }

    #[test]
    fn path_is_sanitized() {
        let p = manifest_path(Path::new("/m"), "ep 1/x");
        assert_eq!(p, PathBuf::from("/m/ep_1_x.manifest.json"));
    }

    #[test]
    fn save_and_load() {
        let dir = tempfile::TempDir::new().unwrap();
        let m = Manifest::new("ep1", "Bletchley Park", "p", "1");
        let path = save_manifest(&m, dir.path()).unwrap();
        assert!(path.ends_with("ep1.manifest.json"));
        let back = load_manifest(&path).unwrap();
        assert_eq!(back.episode_id, "ep1");
        assert_eq!(back.policy_version, "p");
    }
}
