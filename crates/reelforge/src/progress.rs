//! Resolution and compilation progress reporting.
//!
//! Reports per-beat progress during `reel resolve` and `reel compile` so
//! users see how far the run is and which beats fell back or failed.
//! Progress is emitted on **stderr** so stdout remains parseable for scripts.

use std::io::Write;

/// A single progress event.
#[derive(Clone, Debug)]
pub enum ProgressEvent {
    /// A beat finished resolving.
    BeatResolved {
        beat_id: String,
        n: u64,
        total: u64,
        primary: usize,
        fallback_used: bool,
        cache_hits: usize,
    },
    /// A beat failed (no candidates / gate no-pass).
    BeatFailed {
        beat_id: String,
        n: u64,
        total: u64,
        reason: String,
    },
    /// A clip was accepted for the timeline.
    ClipAccepted {
        beat_id: String,
        asset_id: String,
        n: u64,
        total: u64,
    },
}

/// Reports progress. Implementations write to stderr (human or JSON).
pub trait ProgressReporter: Send + Sync {
    fn report(&self, event: ProgressEvent);
}

/// Human-friendly progress on stderr: "resolve b3  3 / 12 beats  primary 4".
pub struct StderrProgress;

impl ProgressReporter for StderrProgress {
    fn report(&self, event: ProgressEvent) {
        let line = match &event {
            ProgressEvent::BeatResolved {
                beat_id,
                n,
                total,
                primary,
                fallback_used,
                cache_hits,
            } => format!(
                "resolve {}  {} / {} beats  primary {}{}  cache hits {}\n",
                beat_id,
                format_number(*n),
                format_number(*total),
                primary,
                if *fallback_used { " (fallback)" } else { "" },
                cache_hits
            ),
            ProgressEvent::BeatFailed {
                beat_id,
                n,
                total,
                reason,
            } => format!(
                "resolve {}  {} / {} beats  FAILED: {}\n",
                beat_id,
                format_number(*n),
                format_number(*total),
                reason
            ),
            ProgressEvent::ClipAccepted {
                beat_id,
                asset_id,
                n,
                total,
            } => format!(
                "compile {}  {} / {} clips  {}\n",
                beat_id,
                format_number(*n),
                format_number(*total),
                asset_id
            ),
        };
        let _ = std::io::stderr().lock().write_all(line.as_bytes());
        let _ = std::io::stderr().lock().flush();
    }
}

/// Machine-readable progress: one JSON object per line on stderr.
pub struct JsonProgress;

impl ProgressReporter for JsonProgress {
    fn report(&self, event: ProgressEvent) {
        let obj = match &event {
            ProgressEvent::BeatResolved {
                beat_id,
                n,
                total,
                primary,
                fallback_used,
                cache_hits,
            } => serde_json::json!({
                "event": "progress",
                "phase": "resolve",
                "beat": beat_id,
                "n": n,
                "total": total,
                "primary": primary,
                "fallback_used": fallback_used,
                "cache_hits": cache_hits
            }),
            ProgressEvent::BeatFailed {
                beat_id,
                n,
                total,
                reason,
            } => serde_json::json!({
                "event": "progress",
                "phase": "resolve",
                "beat": beat_id,
                "n": n,
                "total": total,
                "error": reason
            }),
            ProgressEvent::ClipAccepted {
                beat_id,
                asset_id,
                n,
                total,
            } => serde_json::json!({
                "event": "progress",
                "phase": "compile",
                "beat": beat_id,
                "asset": asset_id,
                "n": n,
                "total": total
            }),
        };
        if let Ok(line) = serde_json::to_string(&obj) {
            let _ = writeln!(std::io::stderr().lock(), "{}", line);
            let _ = std::io::stderr().lock().flush();
        }
    }
}

/// No-op reporter when progress is disabled.
pub struct NoProgress;

impl ProgressReporter for NoProgress {
    fn report(&self, _event: ProgressEvent) {}
}

fn format_number(n: u64) -> String {
    let s = n.to_string();
    let mut result = String::with_capacity(s.len() + (s.len() - 1) / 3);
    let chars: Vec<char> = s.chars().rev().collect();
    for (i, c) in chars.iter().enumerate() {
        if i > 0 && i % 3 == 0 {
            result.push(',');
        }
        result.push(*c);
    }
    result.chars().rev().collect()
}

/// Progress mode for the CLI: off, human (stderr), or JSON (stderr).
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum ProgressMode {
    Off,
    Human,
    Json,
}

impl ProgressMode {
    /// Default: human progress when stderr is a TTY, otherwise off.
    pub fn default_for_tty() -> Self {
        if atty::is(atty::Stream::Stderr) {
            ProgressMode::Human
        } else {
            ProgressMode::Off
        }
    }

    pub fn reporter(&self) -> Box<dyn ProgressReporter> {
        match self {
            ProgressMode::Off => Box::new(NoProgress),
            ProgressMode::Human => Box::new(StderrProgress),
            ProgressMode::Json => Box::new(JsonProgress),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn format_number_comma() {
        assert_eq!(format_number(0), "0");
        assert_eq!(format_number(999), "999");
        assert_eq!(format_number(1000), "1,000");
        assert_eq!(format_number(1_234_567), "1,234,567");
    }
}
