//! Compilation engine behaviour with fake fetch/inspect/transcode backends.

use anyhow::{bail, Result};
use async_trait::async_trait;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use reelforge::compile::{
    ClipSource, CompilationEngine, CompileOptions, MediaFetcher, MediaInspector, Transcoder,
};
use reelforge::progress::NoProgress;
use reelforge_core::error::PipelineError;
use reelforge_core::gate::GateStats;
use reelforge_core::manifest::{Manifest, ManifestBeat, Tier};
use reelforge_core::models::{Candidate, GateVerdict, MediaKind, ScoredCandidate};
use reelforge_core::quality::{GrayFrame, MediaProbe, QualityThresholds};

#[derive(Clone, Copy)]
enum Look {
    Good,
    Black,
    Tiny,
}

#[derive(Default)]
struct FakeFetcher {
    fetched: Mutex<Vec<String>>,
    broken: HashSet<String>,
}

#[async_trait]
impl MediaFetcher for FakeFetcher {
    async fn fetch(&self, candidate: &Candidate, dir: &Path) -> Result<PathBuf> {
        self.fetched.lock().unwrap().push(candidate.asset_id());
        if self.broken.contains(&candidate.id) {
            bail!("HTTP 404");
        }
        Ok(dir.join(format!("{}.bin", candidate.id)))
    }
}

struct FakeInspector {
    looks: HashMap<String, Look>,
}

impl FakeInspector {
    fn look(&self, path: &Path) -> Look {
        let stem = path.file_stem().and_then(|s| s.to_str()).unwrap_or_default();
        self.looks.get(stem).copied().unwrap_or(Look::Good)
    }
}

#[async_trait]
impl MediaInspector for FakeInspector {
    async fn probe(&self, path: &Path, _kind: MediaKind) -> Result<MediaProbe> {
        let (width, height) = match self.look(path) {
            Look::Tiny => (320, 240),
            _ => (1280, 720),
        };
        Ok(MediaProbe {
            width,
            height,
            duration_secs: Some(60.0),
        })
    }

    async fn frames(&self, path: &Path, _kind: MediaKind, timestamps: &[f64]) -> Result<Vec<GrayFrame>> {
        let value = match self.look(path) {
            Look::Black => 3,
            _ => 128,
        };
        Ok(timestamps.iter().map(|_| GrayFrame::filled(16, 9, value)).collect())
    }
}

#[derive(Default)]
struct FakeTranscoder {
    failures_left: AtomicUsize,
    calls: AtomicUsize,
    rendered: Mutex<Vec<ClipSource>>,
}

#[async_trait]
impl Transcoder for FakeTranscoder {
    async fn transcode(&self, clips: &[ClipSource], _output: &Path) -> Result<()> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let left = self.failures_left.load(Ordering::SeqCst);
        if left > 0 {
            self.failures_left.store(left - 1, Ordering::SeqCst);
            bail!("ffmpeg exited with 1");
        }
        *self.rendered.lock().unwrap() = clips.to_vec();
        Ok(())
    }
}

fn scored(id: &str, score: f64) -> ScoredCandidate {
    ScoredCandidate {
        candidate: Candidate::new("ia", id, &format!("Bletchley Park {}", id), MediaKind::Video),
        verdict: GateVerdict::approved(),
        score,
        reasons: vec![],
        provider_priority: 10,
    }
}

fn beat(id: &str, primary: &[&str], secondary: &[&str]) -> ManifestBeat {
    ManifestBeat {
        beat_id: id.into(),
        narration: "one two three four five six seven eight nine ten".into(),
        keywords: vec![],
        shot_types: vec![],
        duration_secs: None,
        queries: vec![],
        low_coverage: false,
        primary: primary.iter().map(|p| scored(p, 0.8)).collect(),
        secondary: secondary.iter().map(|s| scored(s, 0.5)).collect(),
        fallback: vec![],
        fallback_used: false,
        fallback_queries: vec![],
        gate_stats: GateStats::default(),
        raw_candidates: primary.len() + secondary.len(),
        cache_hits: 0,
        diagnostic: None,
    }
}

fn manifest(beats: Vec<ManifestBeat>) -> Manifest {
    let mut m = Manifest::new("ep01", "Bletchley Park", "test", "1");
    m.beats = beats;
    m
}

fn options() -> CompileOptions {
    CompileOptions {
        thresholds: QualityThresholds::default(),
        black_sample_count: 3,
        download_retries: 1,
        transcode_retries: 1,
        words_per_second: 2.5,
        min_clip_secs: 3.0,
        avoid_consecutive_reuse: false,
        pins: BTreeMap::new(),
    }
}

struct Harness {
    fetcher: Arc<FakeFetcher>,
    transcoder: Arc<FakeTranscoder>,
    engine: CompilationEngine,
}

fn harness(looks: &[(&str, Look)], broken: &[&str], options: CompileOptions) -> Harness {
    let fetcher = Arc::new(FakeFetcher {
        fetched: Mutex::new(Vec::new()),
        broken: broken.iter().map(|s| s.to_string()).collect(),
    });
    let inspector = Arc::new(FakeInspector {
        looks: looks.iter().map(|(k, v)| (k.to_string(), *v)).collect(),
    });
    let transcoder = Arc::new(FakeTranscoder::default());
    let engine = CompilationEngine::new(fetcher.clone(), inspector, transcoder.clone(), options);
    Harness {
        fetcher,
        transcoder,
        engine,
    }
}

#[tokio::test]
async fn compiles_primary_clips_in_order() {
    let h = harness(&[], &[], options());
    let m = manifest(vec![beat("b1", &["a"], &[]), beat("b2", &["b"], &[])]);

    let report = h
        .engine
        .compile(&m, Path::new("/work"), Path::new("/out/ep01.mp4"), &NoProgress)
        .await
        .unwrap();

    let assets: Vec<&str> = report.clips.iter().map(|c| c.asset_id.as_str()).collect();
    assert_eq!(assets, vec!["ia:a", "ia:b"]);
    assert!(report.clips.iter().all(|c| c.tier == Tier::Primary));
    assert!(report.clips.iter().all(|c| c.override_reason.is_none()));
    // Ten words at 2.5 words/s.
    assert!((report.clips[0].duration() - 4.0).abs() < 1e-9);
    assert_eq!(h.transcoder.rendered.lock().unwrap().len(), 2);
}

#[tokio::test]
async fn quality_failure_falls_through_to_secondary() {
    let h = harness(&[("a", Look::Black), ("b", Look::Tiny)], &["c"], options());
    let m = manifest(vec![beat("b1", &["a", "b", "c"], &["d"])]);

    let report = h
        .engine
        .compile(&m, Path::new("/work"), Path::new("/out/ep01.mp4"), &NoProgress)
        .await
        .unwrap();

    assert_eq!(report.clips[0].asset_id, "ia:d");
    assert_eq!(report.clips[0].tier, Tier::Secondary);
    assert_eq!(report.clips[0].override_reason.as_deref(), Some("secondary tier"));

    let rejected = &report.rejected["b1"];
    let reasons: Vec<&str> = rejected.iter().map(|r| r.reason.as_str()).collect();
    assert_eq!(reasons, vec!["near_black", "low_resolution", "unreadable"]);

    // The broken download was attempted 1 + download_retries times.
    let fetched = h.fetcher.fetched.lock().unwrap();
    assert_eq!(fetched.iter().filter(|a| a.as_str() == "ia:c").count(), 2);
}

#[tokio::test]
async fn exhausted_beat_fails_the_run_without_filler() {
    let h = harness(&[("a", Look::Black), ("b", Look::Black)], &[], options());
    let m = manifest(vec![beat("b1", &["x"], &[]), beat("b2", &["a"], &["b"])]);

    let err = h
        .engine
        .compile(&m, Path::new("/work"), Path::new("/out/ep01.mp4"), &NoProgress)
        .await
        .unwrap_err();

    match err {
        PipelineError::CompilationQualityExhausted { beat_id, rejected } => {
            assert_eq!(beat_id, "b2");
            assert_eq!(rejected.len(), 2);
        }
        other => panic!("unexpected {:?}", other),
    }
    assert_eq!(h.transcoder.calls.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn pin_outside_manifest_is_an_invariant_violation() {
    let mut opts = options();
    opts.pins.insert("b1".into(), "ia:not-in-manifest".into());
    let h = harness(&[], &[], opts);
    let m = manifest(vec![beat("b1", &["a"], &[])]);

    let err = h
        .engine
        .compile(&m, Path::new("/work"), Path::new("/out/ep01.mp4"), &NoProgress)
        .await
        .unwrap_err();

    assert!(matches!(
        err,
        PipelineError::ManifestInvariantViolation { ref beat_id, ref asset_id }
            if beat_id == "b1" && asset_id == "ia:not-in-manifest"
    ));
    assert!(h.fetcher.fetched.lock().unwrap().is_empty());
}

#[tokio::test]
async fn pin_from_another_beat_is_rejected() {
    let mut opts = options();
    opts.pins.insert("b1".into(), "ia:b".into());
    let h = harness(&[], &[], opts);
    let m = manifest(vec![beat("b1", &["a"], &[]), beat("b2", &["b"], &[])]);

    let err = h
        .engine
        .compile(&m, Path::new("/work"), Path::new("/out/ep01.mp4"), &NoProgress)
        .await
        .unwrap_err();
    assert!(matches!(err, PipelineError::ManifestInvariantViolation { .. }));
}

#[tokio::test]
async fn pin_selects_lower_ranked_asset() {
    let mut opts = options();
    opts.pins.insert("b1".into(), "ia:b".into());
    let h = harness(&[], &[], opts);
    let m = manifest(vec![beat("b1", &["a", "b"], &[])]);

    let report = h
        .engine
        .compile(&m, Path::new("/work"), Path::new("/out/ep01.mp4"), &NoProgress)
        .await
        .unwrap();
    assert_eq!(report.clips[0].asset_id, "ia:b");
    assert_eq!(report.clips[0].override_reason.as_deref(), Some("pinned"));
}

#[tokio::test]
async fn consecutive_reuse_is_avoided_only_when_enabled() {
    let m = manifest(vec![beat("b1", &["a"], &[]), beat("b2", &["a", "b"], &[])]);

    let h = harness(&[], &[], options());
    let report = h
        .engine
        .compile(&m, Path::new("/work"), Path::new("/out/ep01.mp4"), &NoProgress)
        .await
        .unwrap();
    assert_eq!(report.clips[1].asset_id, "ia:a");
    assert_eq!(
        report.clips[1].override_reason.as_deref(),
        Some("same asset as previous beat")
    );

    let mut opts = options();
    opts.avoid_consecutive_reuse = true;
    let h = harness(&[], &[], opts);
    let report = h
        .engine
        .compile(&m, Path::new("/work"), Path::new("/out/ep01.mp4"), &NoProgress)
        .await
        .unwrap();
    assert_eq!(report.clips[1].asset_id, "ia:b");
}

#[tokio::test]
async fn transcode_retries_are_bounded() {
    let m = manifest(vec![beat("b1", &["a"], &[])]);

    let h = harness(&[], &[], options());
    h.transcoder.failures_left.store(1, Ordering::SeqCst);
    h.engine
        .compile(&m, Path::new("/work"), Path::new("/out/ep01.mp4"), &NoProgress)
        .await
        .unwrap();
    assert_eq!(h.transcoder.calls.load(Ordering::SeqCst), 2);

    let h = harness(&[], &[], options());
    h.transcoder.failures_left.store(10, Ordering::SeqCst);
    let err = h
        .engine
        .compile(&m, Path::new("/work"), Path::new("/out/ep01.mp4"), &NoProgress)
        .await
        .unwrap_err();
    assert!(matches!(err, PipelineError::Transcode { attempts: 2, .. }));
    assert_eq!(h.transcoder.calls.load(Ordering::SeqCst), 2);
}
