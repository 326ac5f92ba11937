//! Error taxonomy for resolution and compilation.
//!
//! | Variant | Stage | Fatal |
//! |---------|-------|-------|
//! | [`PipelineError::NoCandidates`] | resolve | beat-level |
//! | [`PipelineError::GateNoPass`] | resolve | beat-level |
//! | [`PipelineError::QueryLowCoverage`] | resolve | no (logged) |
//! | [`PipelineError::ManifestInvariantViolation`] | compile | run |
//! | [`PipelineError::CompilationQualityExhausted`] | compile | run |

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::gate::GateStats;

/// A candidate that was turned away, kept for diagnostics.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RejectedCandidate {
    pub asset_id: String,
    pub title: String,
    pub reason: String,
    #[serde(default)]
    pub pattern: Option<String>,
}

/// Structured bundle attached to beat-level failures so a zero-result beat
/// can be diagnosed without re-running search.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BeatDiagnostic {
    pub beat_id: String,
    pub queries: Vec<String>,
    pub raw_candidates: usize,
    pub gate_stats: GateStats,
    pub top_rejected: Vec<RejectedCandidate>,
    pub fallback_queries: Vec<String>,
}

#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("{scope}: an episode topic is required")]
    MissingTopic { scope: String },

    #[error("beat '{}': providers returned no candidates for {} queries", .0.beat_id, .0.queries.len())]
    NoCandidates(Box<BeatDiagnostic>),

    #[error(
        "beat '{}': {} candidates found but none passed the relevance gate",
        .0.beat_id,
        .0.raw_candidates
    )]
    GateNoPass(Box<BeatDiagnostic>),

    #[error("beat '{beat_id}': only {valid} of {required} queries valid after repair")]
    QueryLowCoverage {
        beat_id: String,
        valid: usize,
        required: usize,
    },

    #[error("beat '{beat_id}' references asset '{asset_id}' which is not in the manifest")]
    ManifestInvariantViolation { beat_id: String, asset_id: String },

    #[error("beat '{beat_id}': all {} manifest candidates failed quality gates", .rejected.len())]
    CompilationQualityExhausted {
        beat_id: String,
        rejected: Vec<RejectedCandidate>,
    },

    #[error("transcoder failed after {attempts} attempts: {message}")]
    Transcode { attempts: u32, message: String },

    #[error("resolution cancelled")]
    Cancelled,
}

impl PipelineError {
    /// Diagnostic bundle for retrieval/gate failures.
    pub fn diagnostic(&self) -> Option<&BeatDiagnostic> {
        match self {
            PipelineError::NoCandidates(d) | PipelineError::GateNoPass(d) => Some(d),
            _ => None,
        }
    }
}
