//! Frame-level quality gates for compilation.
//!
//! Operates on decoded grayscale frames so it stays independent of any
//! media toolchain. The app crate extracts frames and probes metadata; this
//! module decides.
//!
//! | Check | Rejects when |
//! |-------|--------------|
//! | resolution | width or height below the minimum |
//! | near-black | more than `black_ratio` of sampled frames are dark |
//! | burned-in captions | bottom-band edge density dominates the middle band |
//! | caption metadata | title/description advertise subtitles or watermarks |

use serde::{Deserialize, Serialize};

use crate::models::Candidate;
use crate::text::{contains_phrase, tokenize};

/// Luma gradient above which a pixel counts as an edge.
const EDGE_THRESHOLD: i16 = 60;

const CAPTION_HINTS: &[&str] = &[
    "subtitled",
    "subtitles",
    "captioned",
    "closed captions",
    "hardsub",
    "hardcoded subtitles",
    "burned in subtitles",
    "watermark",
    "watermarked",
];

/// An 8-bit grayscale frame, row-major.
#[derive(Debug, Clone)]
pub struct GrayFrame {
    pub width: usize,
    pub height: usize,
    pub pixels: Vec<u8>,
}

impl GrayFrame {
    pub fn new(width: usize, height: usize, pixels: Vec<u8>) -> Option<Self> {
        if width == 0 || height == 0 || pixels.len() != width * height {
            return None;
        }
        Some(Self {
            width,
            height,
            pixels,
        })
    }

    pub fn filled(width: usize, height: usize, value: u8) -> Self {
        Self {
            width,
            height,
            pixels: vec![value; width * height],
        }
    }

    fn at(&self, x: usize, y: usize) -> u8 {
        self.pixels[y * self.width + x]
    }
}

/// Stream metadata from probing a downloaded asset.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct MediaProbe {
    pub width: u32,
    pub height: u32,
    pub duration_secs: Option<f64>,
}

pub fn mean_luma(frame: &GrayFrame) -> f64 {
    if frame.pixels.is_empty() {
        return 0.0;
    }
    frame.pixels.iter().map(|&p| p as f64).sum::<f64>() / frame.pixels.len() as f64
}

/// True when more than `ratio` of `frames` have mean luma below
/// `threshold`. An empty sample counts as black.
pub fn is_near_black(frames: &[GrayFrame], threshold: f64, ratio: f64) -> bool {
    if frames.is_empty() {
        return true;
    }
    let dark = frames.iter().filter(|f| mean_luma(f) < threshold).count();
    dark as f64 / frames.len() as f64 > ratio
}

/// Fraction of horizontal-gradient edges within rows `[top, bottom)`.
fn edge_density(frame: &GrayFrame, top: usize, bottom: usize) -> f64 {
    if frame.width < 2 || bottom <= top {
        return 0.0;
    }
    let mut edges = 0usize;
    let mut total = 0usize;
    for y in top..bottom.min(frame.height) {
        for x in 1..frame.width {
            let d = frame.at(x, y) as i16 - frame.at(x - 1, y) as i16;
            if d.abs() > EDGE_THRESHOLD {
                edges += 1;
            }
            total += 1;
        }
    }
    if total == 0 {
        0.0
    } else {
        edges as f64 / total as f64
    }
}

/// Ratio of edge density in the caption band (72–95% of height) to the
/// middle band (30–70%). Text overlays produce dense, high-contrast edges
/// near the bottom of the frame.
pub fn caption_band_score(frame: &GrayFrame) -> f64 {
    let h = frame.height;
    let band = edge_density(frame, h * 72 / 100, h * 95 / 100);
    let middle = edge_density(frame, h * 30 / 100, h * 70 / 100);
    if band == 0.0 {
        return 0.0;
    }
    band / middle.max(0.01)
}

/// Burned-in captions when the majority of sampled frames exceed `ratio`.
pub fn has_burned_in_captions(frames: &[GrayFrame], ratio: f64) -> bool {
    if frames.is_empty() {
        return false;
    }
    let flagged = frames
        .iter()
        .filter(|f| caption_band_score(f) > ratio)
        .count();
    flagged * 2 > frames.len()
}

/// Metadata-level hint of subtitles or watermarks, if any.
pub fn caption_metadata_hint(candidate: &Candidate) -> Option<&'static str> {
    let tokens = tokenize(&format!("{} {}", candidate.title, candidate.description));
    CAPTION_HINTS
        .iter()
        .copied()
        .find(|hint| contains_phrase(&tokens, hint))
}

/// Quality-gate thresholds, from `[compile]` in config.
#[derive(Debug, Clone)]
pub struct QualityThresholds {
    pub min_width: u32,
    pub min_height: u32,
    pub black_luma_threshold: f64,
    pub black_ratio: f64,
    pub caption_band_ratio: f64,
}

impl Default for QualityThresholds {
    fn default() -> Self {
        Self {
            min_width: 640,
            min_height: 360,
            black_luma_threshold: 16.0,
            black_ratio: 0.5,
            caption_band_ratio: 3.0,
        }
    }
}

/// Why a downloaded asset failed a quality gate.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "gate", rename_all = "snake_case")]
pub enum QualityRejection {
    LowResolution { width: u32, height: u32 },
    NearBlack,
    BurnedInCaptions { source: String },
    Unreadable { message: String },
}

impl QualityRejection {
    pub fn code(&self) -> &'static str {
        match self {
            QualityRejection::LowResolution { .. } => "low_resolution",
            QualityRejection::NearBlack => "near_black",
            QualityRejection::BurnedInCaptions { .. } => "burned_in_captions",
            QualityRejection::Unreadable { .. } => "unreadable",
        }
    }
}

impl std::fmt::Display for QualityRejection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            QualityRejection::LowResolution { width, height } => {
                write!(f, "resolution {}x{} below minimum", width, height)
            }
            QualityRejection::NearBlack => write!(f, "near-black frames"),
            QualityRejection::BurnedInCaptions { source } => {
                write!(f, "burned-in captions ({})", source)
            }
            QualityRejection::Unreadable { message } => write!(f, "unreadable: {}", message),
        }
    }
}

/// Run every gate in order; the first failure wins.
pub fn evaluate(
    candidate: &Candidate,
    probe: &MediaProbe,
    frames: &[GrayFrame],
    thresholds: &QualityThresholds,
) -> Result<(), QualityRejection> {
    if probe.width < thresholds.min_width || probe.height < thresholds.min_height {
        return Err(QualityRejection::LowResolution {
            width: probe.width,
            height: probe.height,
        });
    }
    if let Some(hint) = caption_metadata_hint(candidate) {
        return Err(QualityRejection::BurnedInCaptions {
            source: format!("metadata: {}", hint),
        });
    }
    if is_near_black(frames, thresholds.black_luma_threshold, thresholds.black_ratio) {
        return Err(QualityRejection::NearBlack);
    }
    if has_burned_in_captions(frames, thresholds.caption_band_ratio) {
        return Err(QualityRejection::BurnedInCaptions {
            source: "frame analysis".to_string(),
        });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::MediaKind;

    /// Mid-gray frame with a striped "text" band near the bottom.
    fn captioned(width: usize, height: usize) -> GrayFrame {
        let mut f = GrayFrame::filled(width, height, 120);
        for y in height * 80 / 100..height * 88 / 100 {
            for x in 0..width {
                f.pixels[y * width + x] = if x % 2 == 0 { 250 } else { 10 };
            }
        }
        f
    }

    fn probe() -> MediaProbe {
        MediaProbe {
            width: 1280,
            height: 720,
            duration_secs: Some(30.0),
        }
    }

    fn cand() -> Candidate {
        Candidate::new("ia", "1", "Bletchley Park huts", MediaKind::Video)
    }

    #[test]
    fn frame_constructor_checks_size() {
        assert!(GrayFrame::new(2, 2, vec![0; 3]).is_none());
        assert!(GrayFrame::new(2, 2, vec![0; 4]).is_some());
    }

    #[test]
    fn black_detection_uses_ratio() {
        let dark = GrayFrame::filled(8, 8, 4);
        let bright = GrayFrame::filled(8, 8, 128);
        assert!(is_near_black(&[dark.clone(), dark.clone(), bright.clone()], 16.0, 0.5));
        assert!(!is_near_black(&[dark, bright.clone(), bright], 16.0, 0.5));
        assert!(is_near_black(&[], 16.0, 0.5));
    }

    #[test]
    fn caption_band_detected() {
        let plain = GrayFrame::filled(64, 100, 120);
        assert_eq!(caption_band_score(&plain), 0.0);
        let text = captioned(64, 100);
        assert!(caption_band_score(&text) > 3.0);
        assert!(has_burned_in_captions(&[text.clone(), text, plain], 3.0));
    }

    #[test]
    fn evaluate_order() {
        let ok = [GrayFrame::filled(8, 8, 128)];
        assert_eq!(evaluate(&cand(), &probe(), &ok, &Default::default()), Ok(()));

        let small = MediaProbe {
            width: 320,
            height: 240,
            duration_secs: None,
        };
        assert!(matches!(
            evaluate(&cand(), &small, &ok, &Default::default()),
            Err(QualityRejection::LowResolution { .. })
        ));

        let mut subtitled = cand();
        subtitled.title = "Bletchley Park huts (subtitled)".into();
        assert_eq!(
            evaluate(&subtitled, &probe(), &ok, &Default::default())
                .unwrap_err()
                .code(),
            "burned_in_captions"
        );

        let black = [GrayFrame::filled(8, 8, 0)];
        assert_eq!(
            evaluate(&cand(), &probe(), &black, &Default::default()),
            Err(QualityRejection::NearBlack)
        );
    }
}
