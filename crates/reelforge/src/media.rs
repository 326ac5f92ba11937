//! HTTP download and ffmpeg/ffprobe backends for the compilation engine.
//!
//! | Type | Trait | Tool |
//! |------|-------|------|
//! | [`HttpFetcher`] | [`MediaFetcher`] | reqwest (+ archive metadata lookup) |
//! | [`FfmpegInspector`] | [`MediaInspector`] | `ffprobe` JSON, `ffmpeg` raw gray frames |
//! | [`FfmpegTranscoder`] | [`Transcoder`] | `ffmpeg` concat filter |
//!
//! Sample frames are decoded at a fixed 160x90 so quality analysis cost does
//! not depend on source resolution.

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use serde_json::Value;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;

use reelforge_core::models::{Candidate, MediaKind};
use reelforge_core::quality::{GrayFrame, MediaProbe};

use crate::compile::{ClipSource, MediaFetcher, MediaInspector, Transcoder};
use crate::config::{CompileConfig, Config, ProviderConfig};
use crate::provider_archive::{self, ArchiveProvider};

pub const FRAME_WIDTH: usize = 160;
pub const FRAME_HEIGHT: usize = 90;

const OUTPUT_WIDTH: u32 = 1280;
const OUTPUT_HEIGHT: u32 = 720;
const OUTPUT_FPS: u32 = 25;

/// Downloads candidate media over HTTP.
///
/// Bodies are streamed to `<name>.part` and renamed into place when
/// complete, so an interrupted or oversized download never leaves a file
/// that looks finished.
pub struct HttpFetcher {
    client: reqwest::Client,
    archive: Option<ArchiveProvider>,
    max_bytes: u64,
}

impl HttpFetcher {
    pub fn new(config: &Config) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(600))
            .connect_timeout(Duration::from_secs(20))
            .user_agent(concat!("reelforge/", env!("CARGO_PKG_VERSION")))
            .build()?;
        // Archive search results carry no file URL; it is looked up through
        // the metadata API at download time.
        let archive_cfg = config
            .providers
            .get(provider_archive::NAME)
            .cloned()
            .unwrap_or_else(ProviderConfig::default);
        let archive = ArchiveProvider::new(&archive_cfg).ok();
        Ok(Self {
            client,
            archive,
            max_bytes: config.compile.max_download_bytes,
        })
    }

    async fn download_url(&self, candidate: &Candidate) -> Result<String> {
        if let Some(url) = &candidate.download_url {
            return Ok(url.clone());
        }
        if candidate.provider == provider_archive::NAME {
            if let Some(archive) = &self.archive {
                let url = provider_archive::resolve_download_url(
                    archive.client(),
                    archive.base_url(),
                    &candidate.id,
                    candidate.media_kind,
                )
                .await?;
                if let Some(url) = url {
                    return Ok(url);
                }
            }
        }
        bail!("no download URL for {}", candidate.asset_id())
    }

    async fn download_to(&self, url: &str, partial: &Path) -> Result<u64> {
        let mut response = self.client.get(url).send().await?.error_for_status()?;
        if let Some(len) = response.content_length() {
            if len > self.max_bytes {
                bail!("{} is {} bytes, over the {} byte limit", url, len, self.max_bytes);
            }
        }

        let mut file = tokio::fs::File::create(partial)
            .await
            .with_context(|| format!("Failed to create {}", partial.display()))?;
        let mut written: u64 = 0;
        while let Some(chunk) = response.chunk().await? {
            written += chunk.len() as u64;
            if written > self.max_bytes {
                bail!("{} exceeded the {} byte limit", url, self.max_bytes);
            }
            file.write_all(&chunk)
                .await
                .with_context(|| format!("Failed to write {}", partial.display()))?;
        }
        file.flush().await?;

        if written == 0 {
            bail!("empty response body from {}", url);
        }
        Ok(written)
    }
}

/// Local file name for an asset: sanitized asset id plus the URL's extension.
pub fn local_file_name(candidate: &Candidate, url: &str) -> String {
    let stem: String = candidate
        .asset_id()
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '-' || c == '_' { c } else { '_' })
        .collect();
    let path = url.split(['?', '#']).next().unwrap_or(url);
    let last = path.rsplit('/').next().unwrap_or_default();
    let ext = match last.rsplit_once('.') {
        Some((_, ext)) if (1..=5).contains(&ext.len()) && ext.chars().all(|c| c.is_ascii_alphanumeric()) => {
            ext.to_ascii_lowercase()
        }
        _ => match candidate.media_kind {
            MediaKind::Video => "mp4".to_string(),
            MediaKind::Image => "jpg".to_string(),
        },
    };
    format!("{}.{}", stem, ext)
}

#[async_trait]
impl MediaFetcher for HttpFetcher {
    async fn fetch(&self, candidate: &Candidate, dir: &Path) -> Result<PathBuf> {
        let url = self.download_url(candidate).await?;
        let path = dir.join(local_file_name(candidate, &url));

        if let Ok(meta) = tokio::fs::metadata(&path).await {
            if meta.len() > 0 {
                tracing::debug!(asset = %candidate.asset_id(), path = %path.display(), "using downloaded copy");
                return Ok(path);
            }
        }

        tracing::info!(asset = %candidate.asset_id(), url = %url, "downloading");
        let partial = path.with_extension("part");
        match self.download_to(&url, &partial).await {
            Ok(bytes) => {
                tokio::fs::rename(&partial, &path).await?;
                tracing::debug!(asset = %candidate.asset_id(), bytes, "download complete");
                Ok(path)
            }
            Err(e) => {
                if let Err(rm) = tokio::fs::remove_file(&partial).await {
                    if rm.kind() != std::io::ErrorKind::NotFound {
                        tracing::warn!(path = %partial.display(), error = %rm, "failed to remove partial download");
                    }
                }
                Err(e)
            }
        }
    }
}

/// `ffprobe` for metadata, `ffmpeg` for sample frames.
pub struct FfmpegInspector {
    ffmpeg: String,
    ffprobe: String,
}

impl FfmpegInspector {
    pub fn new(config: &CompileConfig) -> Self {
        Self {
            ffmpeg: config.ffmpeg.clone(),
            ffprobe: config.ffprobe.clone(),
        }
    }
}

/// Parse `ffprobe -show_entries stream=width,height:format=duration -of json`.
pub fn parse_probe_json(json: &Value, kind: MediaKind) -> Result<MediaProbe> {
    let Some(stream) = json
        .get("streams")
        .and_then(|s| s.as_array())
        .and_then(|s| s.first())
    else {
        bail!("no video stream");
    };
    let width = stream.get("width").and_then(|w| w.as_u64()).unwrap_or(0) as u32;
    let height = stream.get("height").and_then(|h| h.as_u64()).unwrap_or(0) as u32;
    let duration_secs = match kind {
        MediaKind::Image => None,
        MediaKind::Video => json
            .get("format")
            .and_then(|f| f.get("duration"))
            .and_then(|d| match d {
                Value::String(s) => s.parse::<f64>().ok(),
                other => other.as_f64(),
            })
            .filter(|d| d.is_finite() && *d > 0.0),
    };
    Ok(MediaProbe {
        width,
        height,
        duration_secs,
    })
}

fn stderr_tail(stderr: &[u8]) -> String {
    let text = String::from_utf8_lossy(stderr);
    let lines: Vec<&str> = text.lines().rev().take(5).collect();
    lines.into_iter().rev().collect::<Vec<_>>().join(" | ")
}

#[async_trait]
impl MediaInspector for FfmpegInspector {
    async fn probe(&self, path: &Path, kind: MediaKind) -> Result<MediaProbe> {
        let output = Command::new(&self.ffprobe)
            .args([
                "-v",
                "error",
                "-select_streams",
                "v:0",
                "-show_entries",
                "stream=width,height:format=duration",
                "-of",
                "json",
            ])
            .arg(path)
            .stdin(Stdio::null())
            .output()
            .await
            .with_context(|| format!("Failed to run {}", self.ffprobe))?;
        if !output.status.success() {
            bail!("ffprobe exited with {}: {}", output.status, stderr_tail(&output.stderr));
        }
        let json: Value = serde_json::from_slice(&output.stdout).context("ffprobe output is not JSON")?;
        parse_probe_json(&json, kind)
    }

    async fn frames(&self, path: &Path, kind: MediaKind, timestamps: &[f64]) -> Result<Vec<GrayFrame>> {
        let filter = format!("scale={}:{},format=gray", FRAME_WIDTH, FRAME_HEIGHT);
        let mut frames = Vec::with_capacity(timestamps.len());

        for &ts in timestamps {
            let mut cmd = Command::new(&self.ffmpeg);
            cmd.args(["-v", "error"]);
            if kind == MediaKind::Video && ts > 0.0 {
                cmd.arg("-ss").arg(format!("{:.3}", ts));
            }
            let output = cmd
                .arg("-i")
                .arg(path)
                .args(["-frames:v", "1", "-vf", &filter, "-f", "rawvideo", "pipe:1"])
                .stdin(Stdio::null())
                .output()
                .await
                .with_context(|| format!("Failed to run {}", self.ffmpeg))?;
            if !output.status.success() {
                tracing::debug!(ts, error = %stderr_tail(&output.stderr), "frame extraction failed");
                continue;
            }
            match GrayFrame::new(FRAME_WIDTH, FRAME_HEIGHT, output.stdout) {
                Some(frame) => frames.push(frame),
                None => tracing::debug!(ts, "short frame read"),
            }
        }

        if frames.is_empty() {
            bail!("no frames could be decoded from {}", path.display());
        }
        Ok(frames)
    }
}

/// Concatenates clip segments with a single ffmpeg invocation.
pub struct FfmpegTranscoder {
    ffmpeg: String,
}

impl FfmpegTranscoder {
    pub fn new(config: &CompileConfig) -> Self {
        Self {
            ffmpeg: config.ffmpeg.clone(),
        }
    }
}

/// ffmpeg arguments: one trimmed input per clip, normalized to a common
/// size and frame rate, then joined with the concat filter.
pub fn build_transcode_args(clips: &[ClipSource], output: &Path) -> Vec<String> {
    let mut args: Vec<String> = vec!["-v".into(), "error".into(), "-y".into()];

    for clip in clips {
        let length = (clip.out_secs - clip.in_secs).max(0.1);
        match clip.kind {
            MediaKind::Image => {
                args.extend(["-loop".into(), "1".into()]);
                args.extend(["-t".into(), format!("{:.3}", length)]);
            }
            MediaKind::Video => {
                args.extend(["-ss".into(), format!("{:.3}", clip.in_secs)]);
                args.extend(["-t".into(), format!("{:.3}", length)]);
            }
        }
        args.push("-i".into());
        args.push(clip.path.to_string_lossy().into_owned());
    }

    let mut filter = String::new();
    for i in 0..clips.len() {
        filter.push_str(&format!(
            "[{i}:v]scale={w}:{h}:force_original_aspect_ratio=decrease,\
             pad={w}:{h}:(ow-iw)/2:(oh-ih)/2,setsar=1,fps={fps},format=yuv420p[v{i}];",
            i = i,
            w = OUTPUT_WIDTH,
            h = OUTPUT_HEIGHT,
            fps = OUTPUT_FPS
        ));
    }
    for i in 0..clips.len() {
        filter.push_str(&format!("[v{}]", i));
    }
    filter.push_str(&format!("concat=n={}:v=1:a=0[out]", clips.len()));

    args.extend([
        "-filter_complex".into(),
        filter,
        "-map".into(),
        "[out]".into(),
        "-c:v".into(),
        "libx264".into(),
        "-pix_fmt".into(),
        "yuv420p".into(),
        "-movflags".into(),
        "+faststart".into(),
        "-an".into(),
    ]);
    args.push(output.to_string_lossy().into_owned());
    args
}

#[async_trait]
impl Transcoder for FfmpegTranscoder {
    async fn transcode(&self, clips: &[ClipSource], output: &Path) -> Result<()> {
        if clips.is_empty() {
            bail!("nothing to transcode");
        }
        let args = build_transcode_args(clips, output);
        tracing::info!(clips = clips.len(), output = %output.display(), "running ffmpeg");

        let result = Command::new(&self.ffmpeg)
            .args(&args)
            .stdin(Stdio::null())
            .output()
            .await
            .with_context(|| format!("Failed to run {}", self.ffmpeg))?;
        if !result.status.success() {
            bail!("ffmpeg exited with {}: {}", result.status, stderr_tail(&result.stderr));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn file_names_keep_extension() {
        let c = Candidate::new("internet_archive", "abc 1", "t", MediaKind::Video);
        assert_eq!(
            local_file_name(&c, "https://x/download/abc/clip.MP4?x=1"),
            "internet_archive_abc_1.mp4"
        );
        assert_eq!(local_file_name(&c, "https://x/stream"), "internet_archive_abc_1.mp4");
        let img = Candidate::new("pexels", "7", "t", MediaKind::Image);
        assert_eq!(local_file_name(&img, "https://p/photos/7/"), "pexels_7.jpg");
    }

    #[test]
    fn probe_json_parsing() {
        let json = json!({
            "streams": [{"width": 1280, "height": 720}],
            "format": {"duration": "93.250000"}
        });
        let probe = parse_probe_json(&json, MediaKind::Video).unwrap();
        assert_eq!((probe.width, probe.height), (1280, 720));
        assert_eq!(probe.duration_secs, Some(93.25));

        let still = parse_probe_json(&json, MediaKind::Image).unwrap();
        assert_eq!(still.duration_secs, None);

        assert!(parse_probe_json(&json!({"streams": []}), MediaKind::Video).is_err());
    }

    #[test]
    fn transcode_args_trim_and_concat() {
        let clips = vec![
            ClipSource {
                path: PathBuf::from("/w/a.mp4"),
                kind: MediaKind::Video,
                in_secs: 2.0,
                out_secs: 7.0,
            },
            ClipSource {
                path: PathBuf::from("/w/b.jpg"),
                kind: MediaKind::Image,
                in_secs: 0.0,
                out_secs: 4.0,
            },
        ];
        let args = build_transcode_args(&clips, Path::new("/o/ep.mp4"));
        let joined = args.join(" ");
        assert!(joined.contains("-ss 2.000 -t 5.000 -i /w/a.mp4"));
        assert!(joined.contains("-loop 1 -t 4.000 -i /w/b.jpg"));
        assert!(joined.contains("[v0][v1]concat=n=2:v=1:a=0[out]"));
        assert_eq!(args.last().map(String::as_str), Some("/o/ep.mp4"));
    }

    /// Serve one HTTP response on a local port and return a URL for it.
    /// Without `content_length` the body runs until the connection closes.
    async fn serve_once(body: Vec<u8>, content_length: bool) -> String {
        use tokio::io::AsyncReadExt;

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            if let Ok((mut socket, _)) = listener.accept().await {
                let mut request = [0u8; 2048];
                let _ = socket.read(&mut request).await;
                let mut head = String::from("HTTP/1.1 200 OK\r\nContent-Type: video/mp4\r\n");
                if content_length {
                    head.push_str(&format!("Content-Length: {}\r\n", body.len()));
                }
                head.push_str("Connection: close\r\n\r\n");
                let _ = socket.write_all(head.as_bytes()).await;
                let _ = socket.write_all(&body).await;
                let _ = socket.shutdown().await;
            }
        });
        format!("http://{}/clip.mp4", addr)
    }

    fn fetcher(max_bytes: u64) -> HttpFetcher {
        let mut config = crate::config::parse_config("[cache]\npath = \"c.sqlite\"\n").unwrap();
        config.compile.max_download_bytes = max_bytes;
        HttpFetcher::new(&config).unwrap()
    }

    fn remote(url: String) -> Candidate {
        let mut c = Candidate::new("pexels", "42", "Bletchley Park huts", MediaKind::Video);
        c.download_url = Some(url);
        c
    }

    #[tokio::test]
    async fn download_streams_to_final_path() {
        let tmp = tempfile::TempDir::new().unwrap();
        let url = serve_once(vec![7u8; 4096], true).await;

        let path = fetcher(1_000_000).fetch(&remote(url), tmp.path()).await.unwrap();

        assert_eq!(path, tmp.path().join("pexels_42.mp4"));
        assert_eq!(std::fs::read(&path).unwrap().len(), 4096);
        assert!(!tmp.path().join("pexels_42.part").exists());
    }

    #[tokio::test]
    async fn oversized_download_is_abandoned_and_cleaned_up() {
        let tmp = tempfile::TempDir::new().unwrap();

        // Declared length over the limit: refused before any body is read.
        let url = serve_once(vec![1u8; 5000], true).await;
        let err = fetcher(1000).fetch(&remote(url), tmp.path()).await.unwrap_err();
        assert!(err.to_string().contains("byte limit"), "{}", err);

        // No declared length: the limit trips while streaming.
        let url = serve_once(vec![1u8; 5000], false).await;
        let err = fetcher(1000).fetch(&remote(url), tmp.path()).await.unwrap_err();
        assert!(err.to_string().contains("byte limit"), "{}", err);

        assert!(!tmp.path().join("pexels_42.part").exists());
        assert!(!tmp.path().join("pexels_42.mp4").exists());
    }
}
