use anyhow::{Context, Result};
use serde::Deserialize;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use reelforge_core::guardrail::GuardrailConfig;
use reelforge_core::manifest::ResolveSettings;
use reelforge_core::quality::QualityThresholds;
use reelforge_core::scoring::ScoringWeights;

/// Provider adapters this build knows how to construct.
pub const KNOWN_PROVIDERS: &[&str] = &["internet_archive", "europeana", "wikimedia_commons", "pexels"];

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    pub cache: CacheConfig,
    #[serde(default)]
    pub guardrail: GuardrailSection,
    #[serde(default)]
    pub gate: GateConfig,
    #[serde(default)]
    pub scoring: ScoringWeights,
    #[serde(default)]
    pub resolve: ResolveConfig,
    #[serde(default)]
    pub providers: BTreeMap<String, ProviderConfig>,
    #[serde(default)]
    pub compile: CompileConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct CacheConfig {
    pub path: PathBuf,
    #[serde(default = "default_cache_version")]
    pub version: String,
}

fn default_cache_version() -> String {
    "1".to_string()
}

#[derive(Debug, Deserialize, Clone)]
pub struct GuardrailSection {
    #[serde(default = "default_min_valid")]
    pub min_valid: usize,
    #[serde(default = "default_max_regeneration_attempts")]
    pub max_regeneration_attempts: usize,
    #[serde(default = "default_min_meaningful_words")]
    pub min_meaningful_words: usize,
    #[serde(default = "default_max_queries_per_beat")]
    pub max_queries_per_beat: usize,
}

impl Default for GuardrailSection {
    fn default() -> Self {
        Self {
            min_valid: default_min_valid(),
            max_regeneration_attempts: default_max_regeneration_attempts(),
            min_meaningful_words: default_min_meaningful_words(),
            max_queries_per_beat: default_max_queries_per_beat(),
        }
    }
}

fn default_min_valid() -> usize {
    3
}
fn default_max_regeneration_attempts() -> usize {
    2
}
fn default_min_meaningful_words() -> usize {
    3
}
fn default_max_queries_per_beat() -> usize {
    6
}

impl GuardrailSection {
    pub fn to_core(&self) -> GuardrailConfig {
        GuardrailConfig {
            min_valid: self.min_valid,
            max_regeneration_attempts: self.max_regeneration_attempts,
            min_meaningful_words: self.min_meaningful_words,
            max_queries: self.max_queries_per_beat,
        }
    }
}

#[derive(Debug, Deserialize, Clone, Default)]
pub struct GateConfig {
    /// External policy TOML. The built-in policy is used when unset.
    #[serde(default)]
    pub policy_path: Option<PathBuf>,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ResolveConfig {
    #[serde(default = "default_concurrency")]
    pub concurrency: usize,
    #[serde(default = "default_primary_limit")]
    pub primary_limit: usize,
    #[serde(default = "default_secondary_limit")]
    pub secondary_limit: usize,
    #[serde(default = "default_primary_min_score")]
    pub primary_min_score: f64,
    #[serde(default = "default_fallback_cap")]
    pub fallback_cap: usize,
    #[serde(default = "default_max_fallback_queries")]
    pub max_fallback_queries: usize,
    #[serde(default = "default_manifest_dir")]
    pub manifest_dir: PathBuf,
}

impl Default for ResolveConfig {
    fn default() -> Self {
        Self {
            concurrency: default_concurrency(),
            primary_limit: default_primary_limit(),
            secondary_limit: default_secondary_limit(),
            primary_min_score: default_primary_min_score(),
            fallback_cap: default_fallback_cap(),
            max_fallback_queries: default_max_fallback_queries(),
            manifest_dir: default_manifest_dir(),
        }
    }
}

fn default_concurrency() -> usize {
    4
}
fn default_primary_limit() -> usize {
    5
}
fn default_secondary_limit() -> usize {
    10
}
fn default_primary_min_score() -> f64 {
    0.35
}
fn default_fallback_cap() -> usize {
    3
}
fn default_max_fallback_queries() -> usize {
    2
}
fn default_manifest_dir() -> PathBuf {
    PathBuf::from("./data/manifests")
}

#[derive(Debug, Deserialize, Clone)]
pub struct ProviderConfig {
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    #[serde(default = "default_priority")]
    pub priority: u32,
    #[serde(default = "default_min_delay_ms")]
    pub min_delay_ms: u64,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_max_results")]
    pub max_results: usize,
    /// Name of the environment variable holding the API key, if any.
    #[serde(default)]
    pub api_key_env: Option<String>,
    /// Override of the adapter's API base URL.
    #[serde(default)]
    pub base_url: Option<String>,
}

impl Default for ProviderConfig {
    fn default() -> Self {
        Self {
            enabled: default_enabled(),
            priority: default_priority(),
            min_delay_ms: default_min_delay_ms(),
            timeout_secs: default_timeout_secs(),
            max_retries: default_max_retries(),
            max_results: default_max_results(),
            api_key_env: None,
            base_url: None,
        }
    }
}

fn default_enabled() -> bool {
    true
}
fn default_priority() -> u32 {
    100
}
fn default_min_delay_ms() -> u64 {
    1000
}
fn default_timeout_secs() -> u64 {
    20
}
fn default_max_retries() -> u32 {
    2
}
fn default_max_results() -> usize {
    25
}

impl ProviderConfig {
    /// API key from the configured environment variable.
    pub fn api_key(&self) -> Option<String> {
        self.api_key_env
            .as_deref()
            .and_then(|name| std::env::var(name).ok())
            .filter(|k| !k.trim().is_empty())
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct CompileConfig {
    #[serde(default = "default_work_dir")]
    pub work_dir: PathBuf,
    #[serde(default = "default_output_dir")]
    pub output_dir: PathBuf,
    #[serde(default = "default_ffmpeg")]
    pub ffmpeg: String,
    #[serde(default = "default_ffprobe")]
    pub ffprobe: String,
    #[serde(default = "default_min_width")]
    pub min_width: u32,
    #[serde(default = "default_min_height")]
    pub min_height: u32,
    #[serde(default = "default_black_luma_threshold")]
    pub black_luma_threshold: f64,
    #[serde(default = "default_black_sample_count")]
    pub black_sample_count: usize,
    #[serde(default = "default_black_ratio")]
    pub black_ratio: f64,
    #[serde(default = "default_caption_band_ratio")]
    pub caption_band_ratio: f64,
    #[serde(default = "default_transcode_retries")]
    pub transcode_retries: u32,
    #[serde(default = "default_download_retries")]
    pub download_retries: u32,
    /// Downloads larger than this are abandoned.
    #[serde(default = "default_max_download_bytes")]
    pub max_download_bytes: u64,
    #[serde(default = "default_words_per_second")]
    pub words_per_second: f64,
    #[serde(default = "default_min_clip_secs")]
    pub min_clip_secs: f64,
    #[serde(default)]
    pub avoid_consecutive_reuse: bool,
}

impl Default for CompileConfig {
    fn default() -> Self {
        Self {
            work_dir: default_work_dir(),
            output_dir: default_output_dir(),
            ffmpeg: default_ffmpeg(),
            ffprobe: default_ffprobe(),
            min_width: default_min_width(),
            min_height: default_min_height(),
            black_luma_threshold: default_black_luma_threshold(),
            black_sample_count: default_black_sample_count(),
            black_ratio: default_black_ratio(),
            caption_band_ratio: default_caption_band_ratio(),
            transcode_retries: default_transcode_retries(),
            download_retries: default_download_retries(),
            max_download_bytes: default_max_download_bytes(),
            words_per_second: default_words_per_second(),
            min_clip_secs: default_min_clip_secs(),
            avoid_consecutive_reuse: false,
        }
    }
}

fn default_work_dir() -> PathBuf {
    PathBuf::from("./data/work")
}
fn default_output_dir() -> PathBuf {
    PathBuf::from("./data/output")
}
fn default_ffmpeg() -> String {
    "ffmpeg".to_string()
}
fn default_ffprobe() -> String {
    "ffprobe".to_string()
}
fn default_min_width() -> u32 {
    640
}
fn default_min_height() -> u32 {
    360
}
fn default_black_luma_threshold() -> f64 {
    16.0
}
fn default_black_sample_count() -> usize {
    5
}
fn default_black_ratio() -> f64 {
    0.5
}
fn default_caption_band_ratio() -> f64 {
    3.0
}
fn default_transcode_retries() -> u32 {
    1
}
fn default_download_retries() -> u32 {
    2
}
fn default_max_download_bytes() -> u64 {
    8 * 1024 * 1024 * 1024
}
fn default_words_per_second() -> f64 {
    2.5
}
fn default_min_clip_secs() -> f64 {
    3.0
}

impl CompileConfig {
    pub fn thresholds(&self) -> QualityThresholds {
        QualityThresholds {
            min_width: self.min_width,
            min_height: self.min_height,
            black_luma_threshold: self.black_luma_threshold,
            black_ratio: self.black_ratio,
            caption_band_ratio: self.caption_band_ratio,
        }
    }
}

impl Config {
    /// Resolution tunables for the core resolver.
    pub fn resolve_settings(&self) -> ResolveSettings {
        ResolveSettings {
            guardrail: self.guardrail.to_core(),
            weights: self.scoring.clone(),
            primary_limit: self.resolve.primary_limit,
            secondary_limit: self.resolve.secondary_limit,
            primary_min_score: self.resolve.primary_min_score,
            fallback_cap: self.resolve.fallback_cap,
            max_fallback_queries: self.resolve.max_fallback_queries,
            cache_version: self.cache.version.clone(),
        }
    }

    /// Enabled provider tables, in name order.
    pub fn enabled_providers(&self) -> impl Iterator<Item = (&String, &ProviderConfig)> {
        self.providers.iter().filter(|(_, p)| p.enabled)
    }
}

pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    let config = parse_config(&content).with_context(|| "Failed to parse config file")?;
    validate(&config)?;
    Ok(config)
}

pub fn parse_config(content: &str) -> Result<Config> {
    Ok(toml::from_str(content)?)
}

pub fn validate(config: &Config) -> Result<()> {
    if config.cache.version.trim().is_empty() {
        anyhow::bail!("cache.version must not be empty");
    }

    if config.guardrail.min_valid == 0 {
        anyhow::bail!("guardrail.min_valid must be >= 1");
    }

    if config.resolve.concurrency == 0 {
        anyhow::bail!("resolve.concurrency must be >= 1");
    }

    if !(0.0..=1.0).contains(&config.resolve.primary_min_score) {
        anyhow::bail!("resolve.primary_min_score must be in [0.0, 1.0]");
    }

    if config.resolve.fallback_cap == 0 {
        anyhow::bail!("resolve.fallback_cap must be >= 1");
    }

    if config.compile.min_width == 0 || config.compile.min_height == 0 {
        anyhow::bail!("compile.min_width and compile.min_height must be > 0");
    }

    if config.compile.max_download_bytes == 0 {
        anyhow::bail!("compile.max_download_bytes must be > 0");
    }
    if config.compile.words_per_second <= 0.0 {
        anyhow::bail!("compile.words_per_second must be > 0");
    }

    for name in config.providers.keys() {
        if !KNOWN_PROVIDERS.contains(&name.as_str()) {
            anyhow::bail!(
                "Unknown provider: '{}'. Must be one of: {}.",
                name,
                KNOWN_PROVIDERS.join(", ")
            );
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    const MINIMAL: &str = r#"
[cache]
path = "./data/cache.sqlite"
"#;

    #[test]
    fn minimal_config_uses_defaults() {
        let c = parse_config(MINIMAL).unwrap();
        validate(&c).unwrap();
        assert_eq!(c.cache.version, "1");
        assert_eq!(c.guardrail.min_valid, 3);
        assert_eq!(c.resolve.concurrency, 4);
        assert_eq!(c.compile.transcode_retries, 1);
        assert_eq!(c.compile.max_download_bytes, 8 * 1024 * 1024 * 1024);
        assert!(!c.compile.avoid_consecutive_reuse);
        assert!(c.providers.is_empty());
    }

    #[test]
    fn provider_tables_parse() {
        let c = parse_config(
            r#"
[cache]
path = "c.sqlite"

[providers.internet_archive]
priority = 10

[providers.pexels]
enabled = false
api_key_env = "PEXELS_API_KEY"
"#,
        )
        .unwrap();
        validate(&c).unwrap();
        let enabled: Vec<&String> = c.enabled_providers().map(|(n, _)| n).collect();
        assert_eq!(enabled, vec!["internet_archive"]);
        assert_eq!(c.providers["internet_archive"].priority, 10);
        assert_eq!(c.providers["internet_archive"].min_delay_ms, 1000);
    }

    #[test]
    fn rejects_unknown_provider() {
        let c = parse_config(
            r#"
[cache]
path = "c.sqlite"
[providers.youtube]
"#,
        )
        .unwrap();
        let err = validate(&c).unwrap_err();
        assert!(err.to_string().contains("youtube"));
    }

    #[test]
    fn rejects_bad_ranges() {
        let mut c = parse_config(MINIMAL).unwrap();
        c.resolve.primary_min_score = 1.5;
        assert!(validate(&c).is_err());

        let mut c = parse_config(MINIMAL).unwrap();
        c.guardrail.min_valid = 0;
        assert!(validate(&c).is_err());

        let mut c = parse_config(MINIMAL).unwrap();
        c.resolve.concurrency = 0;
        assert!(validate(&c).is_err());

        let mut c = parse_config(MINIMAL).unwrap();
        c.compile.max_download_bytes = 0;
        assert!(validate(&c).is_err());
    }

    #[test]
    fn scoring_weights_partially_overridable() {
        let c = parse_config(
            r#"
[cache]
path = "c.sqlite"
[scoring]
title_anchor = 0.5
"#,
        )
        .unwrap();
        assert_eq!(c.scoring.title_anchor, 0.5);
        assert_eq!(c.scoring.base, 0.30);
    }
}
