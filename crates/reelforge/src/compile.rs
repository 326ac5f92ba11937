//! Compilation engine (`reel compile`).
//!
//! Turns a persisted manifest into a timed clip list and a single video.
//!
//! # Flow
//!
//! ```text
//! Manifest ──▶ pins checked against ManifestIndex
//!    │
//!    ▼  per beat, in order
//! ordered_choices (primary → secondary → fallback)
//!    │  fetch → probe → sample frames → quality::evaluate
//!    │  first candidate that passes becomes the beat's clip
//!    ▼
//! clips ──▶ validate_clips ──▶ Transcoder (sequential, bounded retry)
//!    │
//!    ▼
//! <output>.mp4 + <output>.report.json
//! ```
//!
//! There is no filler path. A beat whose candidates all fail the quality
//! gates aborts the run with [`PipelineError::CompilationQualityExhausted`].
//!
//! Network and process work sits behind three traits ([`MediaFetcher`],
//! [`MediaInspector`], [`Transcoder`]) so the engine can be driven by fakes
//! in tests; the ffmpeg-backed implementations live in [`crate::media`].

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use reelforge_core::assembly::{
    beat_duration, clip_window, ordered_choices, validate_clips, CompilationClip, ManifestIndex,
};
use reelforge_core::error::{PipelineError, RejectedCandidate};
use reelforge_core::manifest::{Manifest, Tier};
use reelforge_core::models::{Candidate, MediaKind, ScoredCandidate};
use reelforge_core::quality::{evaluate, GrayFrame, MediaProbe, QualityRejection, QualityThresholds};

use crate::config::{CompileConfig, Config};
use crate::manifest_file::load_manifest;
use crate::progress::{ProgressEvent, ProgressMode, ProgressReporter};

/// Downloads a candidate's media into a local directory.
#[async_trait]
pub trait MediaFetcher: Send + Sync {
    async fn fetch(&self, candidate: &Candidate, dir: &Path) -> Result<PathBuf>;
}

/// Reads dimensions and duration, and decodes grayscale sample frames.
#[async_trait]
pub trait MediaInspector: Send + Sync {
    async fn probe(&self, path: &Path, kind: MediaKind) -> Result<MediaProbe>;

    async fn frames(&self, path: &Path, kind: MediaKind, timestamps: &[f64]) -> Result<Vec<GrayFrame>>;
}

/// One source segment handed to the transcoder.
#[derive(Debug, Clone, PartialEq)]
pub struct ClipSource {
    pub path: PathBuf,
    pub kind: MediaKind,
    pub in_secs: f64,
    pub out_secs: f64,
}

/// Renders an ordered list of segments into one output file.
#[async_trait]
pub trait Transcoder: Send + Sync {
    async fn transcode(&self, clips: &[ClipSource], output: &Path) -> Result<()>;
}

#[derive(Debug, Clone)]
pub struct CompileOptions {
    pub thresholds: QualityThresholds,
    pub black_sample_count: usize,
    pub download_retries: u32,
    pub transcode_retries: u32,
    pub words_per_second: f64,
    pub min_clip_secs: f64,
    pub avoid_consecutive_reuse: bool,
    /// beat id → asset id
    pub pins: BTreeMap<String, String>,
}

impl CompileOptions {
    pub fn from_config(config: &CompileConfig) -> Self {
        Self {
            thresholds: config.thresholds(),
            black_sample_count: config.black_sample_count.max(1),
            download_retries: config.download_retries,
            transcode_retries: config.transcode_retries,
            words_per_second: config.words_per_second,
            min_clip_secs: config.min_clip_secs,
            avoid_consecutive_reuse: config.avoid_consecutive_reuse,
            pins: BTreeMap::new(),
        }
    }
}

/// Written next to the output video.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CompileReport {
    pub episode_id: String,
    pub output: PathBuf,
    pub policy_version: String,
    pub cache_version: String,
    pub created_at: String,
    pub total_secs: f64,
    pub clips: Vec<CompilationClip>,
    /// Per beat, assets turned away by the quality gates before a clip was
    /// accepted.
    pub rejected: BTreeMap<String, Vec<RejectedCandidate>>,
}

/// Result of clip selection, before transcoding.
#[derive(Debug, Clone)]
pub struct Selection {
    pub clips: Vec<CompilationClip>,
    pub sources: Vec<ClipSource>,
    pub rejected: BTreeMap<String, Vec<RejectedCandidate>>,
}

/// A fetched asset that passed (or failed) inspection; reused when the same
/// asset appears in several beats.
enum Inspected {
    Passed { path: PathBuf, probe: MediaProbe },
    Failed(QualityRejection),
}

pub struct CompilationEngine {
    fetcher: Arc<dyn MediaFetcher>,
    inspector: Arc<dyn MediaInspector>,
    transcoder: Arc<dyn Transcoder>,
    options: CompileOptions,
}

/// Evenly spaced sample points strictly inside the asset.
pub fn sample_timestamps(kind: MediaKind, duration: Option<f64>, count: usize) -> Vec<f64> {
    match (kind, duration) {
        (MediaKind::Video, Some(d)) if d > 0.0 && count > 0 => (1..=count)
            .map(|i| d * i as f64 / (count + 1) as f64)
            .collect(),
        _ => vec![0.0],
    }
}

fn rejection(candidate: &ScoredCandidate, why: &QualityRejection) -> RejectedCandidate {
    RejectedCandidate {
        asset_id: candidate.asset_id(),
        title: candidate.candidate.title.clone(),
        reason: why.code().to_string(),
        pattern: Some(why.to_string()),
    }
}

impl CompilationEngine {
    pub fn new(
        fetcher: Arc<dyn MediaFetcher>,
        inspector: Arc<dyn MediaInspector>,
        transcoder: Arc<dyn Transcoder>,
        options: CompileOptions,
    ) -> Self {
        Self {
            fetcher,
            inspector,
            transcoder,
            options,
        }
    }

    async fn fetch_with_retry(&self, candidate: &Candidate, dir: &Path) -> Result<PathBuf> {
        let mut last_err = None;
        for attempt in 0..=self.options.download_retries {
            match self.fetcher.fetch(candidate, dir).await {
                Ok(path) => return Ok(path),
                Err(e) => {
                    tracing::warn!(
                        asset = %candidate.asset_id(),
                        attempt = attempt + 1,
                        error = %e,
                        "download failed"
                    );
                    last_err = Some(e);
                }
            }
        }
        Err(last_err.unwrap_or_else(|| anyhow::anyhow!("download failed")))
    }

    async fn inspect(&self, scored: &ScoredCandidate, dir: &Path) -> Inspected {
        let candidate = &scored.candidate;
        let kind = candidate.media_kind;

        let path = match self.fetch_with_retry(candidate, dir).await {
            Ok(p) => p,
            Err(e) => {
                return Inspected::Failed(QualityRejection::Unreadable {
                    message: format!("download: {}", e),
                })
            }
        };
        let probe = match self.inspector.probe(&path, kind).await {
            Ok(p) => p,
            Err(e) => {
                return Inspected::Failed(QualityRejection::Unreadable {
                    message: format!("probe: {}", e),
                })
            }
        };
        let duration = probe.duration_secs.or(candidate.duration_secs);
        let stamps = sample_timestamps(kind, duration, self.options.black_sample_count);
        let frames = match self.inspector.frames(&path, kind, &stamps).await {
            Ok(f) => f,
            Err(e) => {
                return Inspected::Failed(QualityRejection::Unreadable {
                    message: format!("frames: {}", e),
                })
            }
        };

        match evaluate(candidate, &probe, &frames, &self.options.thresholds) {
            Ok(()) => Inspected::Passed { path, probe },
            Err(why) => Inspected::Failed(why),
        }
    }

    /// Pick one quality-checked clip per beat, in manifest order.
    pub async fn select(
        &self,
        manifest: &Manifest,
        work_dir: &Path,
        reporter: &dyn ProgressReporter,
    ) -> Result<Selection, PipelineError> {
        let index = ManifestIndex::new(manifest);

        for (beat_id, asset_id) in &self.options.pins {
            if let Err(e) = index.resolve(beat_id, asset_id) {
                tracing::error!(beat = %beat_id, asset = %asset_id, "pinned asset is not in the manifest");
                return Err(e);
            }
        }

        let total = manifest.beats.len() as u64;
        let mut inspected: HashMap<String, Inspected> = HashMap::new();
        let mut clips = Vec::with_capacity(manifest.beats.len());
        let mut sources = Vec::with_capacity(manifest.beats.len());
        let mut rejected: BTreeMap<String, Vec<RejectedCandidate>> = BTreeMap::new();
        let mut previous: Option<String> = None;

        for (n, beat) in manifest.beats.iter().enumerate() {
            let pinned = self.options.pins.get(&beat.beat_id);
            let choices: Vec<(Tier, &ScoredCandidate)> = match pinned {
                Some(asset_id) => vec![index.resolve(&beat.beat_id, asset_id)?],
                None => {
                    let avoid = previous.as_deref().filter(|_| self.options.avoid_consecutive_reuse);
                    ordered_choices(beat, avoid)
                }
            };
            let needed = beat_duration(beat, self.options.words_per_second, self.options.min_clip_secs);

            let mut beat_rejected = Vec::new();
            let mut accepted = None;

            for (tier, scored) in choices {
                let asset_id = scored.asset_id();
                if !inspected.contains_key(&asset_id) {
                    let result = self.inspect(scored, work_dir).await;
                    inspected.insert(asset_id.clone(), result);
                }
                match inspected.get(&asset_id) {
                    Some(Inspected::Passed { path, probe }) => {
                        accepted = Some((tier, scored, path.clone(), *probe));
                        break;
                    }
                    Some(Inspected::Failed(why)) => {
                        tracing::warn!(
                            beat = %beat.beat_id,
                            asset = %asset_id,
                            tier = tier.as_str(),
                            gate = why.code(),
                            reason = %why,
                            "asset rejected by quality gate"
                        );
                        beat_rejected.push(rejection(scored, why));
                    }
                    None => {}
                }
            }

            let Some((tier, scored, path, probe)) = accepted else {
                tracing::error!(
                    beat = %beat.beat_id,
                    rejected = beat_rejected.len(),
                    "no manifest candidate passed the quality gates"
                );
                return Err(PipelineError::CompilationQualityExhausted {
                    beat_id: beat.beat_id.clone(),
                    rejected: beat_rejected,
                });
            };

            let kind = scored.candidate.media_kind;
            let duration = probe.duration_secs.or(scored.candidate.duration_secs);
            let (in_secs, out_secs, window_note) = clip_window(kind, duration, needed);

            let asset_id = scored.asset_id();
            let mut notes = Vec::new();
            if pinned.is_some() {
                notes.push("pinned".to_string());
            }
            if tier != Tier::Primary {
                notes.push(format!("{} tier", tier.as_str()));
            }
            if previous.as_deref() == Some(asset_id.as_str()) {
                notes.push("same asset as previous beat".to_string());
            }
            notes.extend(window_note);

            reporter.report(ProgressEvent::ClipAccepted {
                beat_id: beat.beat_id.clone(),
                asset_id: asset_id.clone(),
                n: n as u64 + 1,
                total,
            });

            clips.push(CompilationClip {
                beat_id: beat.beat_id.clone(),
                asset_id: asset_id.clone(),
                tier,
                in_secs,
                out_secs,
                override_reason: if notes.is_empty() {
                    None
                } else {
                    Some(notes.join("; "))
                },
            });
            sources.push(ClipSource {
                path,
                kind,
                in_secs,
                out_secs,
            });
            if !beat_rejected.is_empty() {
                rejected.insert(beat.beat_id.clone(), beat_rejected);
            }
            previous = Some(asset_id);
        }

        validate_clips(&clips, &index)?;
        Ok(Selection {
            clips,
            sources,
            rejected,
        })
    }

    async fn transcode_with_retry(&self, sources: &[ClipSource], output: &Path) -> Result<(), PipelineError> {
        let attempts = self.options.transcode_retries + 1;
        let mut last_err = String::new();
        for attempt in 1..=attempts {
            match self.transcoder.transcode(sources, output).await {
                Ok(()) => return Ok(()),
                Err(e) => {
                    tracing::warn!(attempt, error = %e, "transcode failed");
                    last_err = format!("{:#}", e);
                }
            }
        }
        Err(PipelineError::Transcode {
            attempts,
            message: last_err,
        })
    }

    /// Select clips, transcode, and return the report (not yet written).
    pub async fn compile(
        &self,
        manifest: &Manifest,
        work_dir: &Path,
        output: &Path,
        reporter: &dyn ProgressReporter,
    ) -> Result<CompileReport, PipelineError> {
        let selection = self.select(manifest, work_dir, reporter).await?;
        self.transcode_with_retry(&selection.sources, output).await?;

        Ok(CompileReport {
            episode_id: manifest.episode_id.clone(),
            output: output.to_path_buf(),
            policy_version: manifest.policy_version.clone(),
            cache_version: manifest.cache_version.clone(),
            created_at: chrono::Utc::now().to_rfc3339(),
            total_secs: selection.clips.iter().map(|c| c.duration()).sum(),
            clips: selection.clips,
            rejected: selection.rejected,
        })
    }
}

/// Parse `beat=asset_id` (asset ids contain a colon, so split on the first `=`).
pub fn parse_pin(s: &str) -> Result<(String, String)> {
    let Some((beat, asset)) = s.split_once('=') else {
        bail!("invalid pin '{}': expected beat=provider:id", s);
    };
    let (beat, asset) = (beat.trim(), asset.trim());
    if beat.is_empty() || asset.is_empty() {
        bail!("invalid pin '{}': expected beat=provider:id", s);
    }
    Ok((beat.to_string(), asset.to_string()))
}

pub fn report_path(output: &Path) -> PathBuf {
    output.with_extension("report.json")
}

/// `reel compile <manifest>`.
pub async fn run_compile(
    config: &Config,
    manifest_path: &Path,
    output: Option<PathBuf>,
    pins: &[String],
    avoid_reuse: bool,
    progress: ProgressMode,
) -> Result<()> {
    let manifest = load_manifest(manifest_path)?;
    if !manifest.is_complete() {
        let ids: Vec<&str> = manifest.failures.iter().map(|f| f.beat_id.as_str()).collect();
        bail!(
            "Manifest {} has unresolved beats ({}); re-run `reel resolve` before compiling",
            manifest_path.display(),
            ids.join(", ")
        );
    }

    let mut options = CompileOptions::from_config(&config.compile);
    options.avoid_consecutive_reuse |= avoid_reuse;
    for pin in pins {
        let (beat, asset) = parse_pin(pin)?;
        options.pins.insert(beat, asset);
    }

    let output = output.unwrap_or_else(|| {
        config
            .compile
            .output_dir
            .join(format!("{}.mp4", manifest.episode_id))
    });
    if let Some(parent) = output.parent() {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("Failed to create output dir: {}", parent.display()))?;
    }
    let work_dir = config.compile.work_dir.join(&manifest.episode_id);
    std::fs::create_dir_all(&work_dir)
        .with_context(|| format!("Failed to create work dir: {}", work_dir.display()))?;

    let engine = CompilationEngine::new(
        Arc::new(crate::media::HttpFetcher::new(config)?),
        Arc::new(crate::media::FfmpegInspector::new(&config.compile)),
        Arc::new(crate::media::FfmpegTranscoder::new(&config.compile)),
        options,
    );

    tracing::info!(
        episode = %manifest.episode_id,
        beats = manifest.beats.len(),
        output = %output.display(),
        "compiling manifest"
    );

    let reporter = progress.reporter();
    let report = engine
        .compile(&manifest, &work_dir, &output, reporter.as_ref())
        .await?;

    let report_file = report_path(&output);
    std::fs::write(&report_file, serde_json::to_string_pretty(&report)?)
        .with_context(|| format!("Failed to write report: {}", report_file.display()))?;

    let overrides = report.clips.iter().filter(|c| c.override_reason.is_some()).count();
    println!(
        "compiled {} clips ({:.1}s, {} with overrides) → {}",
        report.clips.len(),
        report.total_secs,
        overrides,
        output.display()
    );
    println!("report: {}", report_file.display());
    Ok(())
}
