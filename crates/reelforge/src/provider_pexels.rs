//! Pexels provider.
//!
//! Stock media, mostly modern. Useful for generic establishing shots; give
//! it a high `priority` number so archival sources win ties. Requires an API
//! key in the environment variable named by `api_key_env`.

use anyhow::{bail, Result};
use async_trait::async_trait;
use serde_json::Value;

use reelforge_core::models::{Candidate, MediaKind};
use reelforge_core::provider::{filter_content_types, Provider};

use crate::config::ProviderConfig;
use crate::http::ThrottledClient;

pub const NAME: &str = "pexels";
const DEFAULT_BASE_URL: &str = "https://api.pexels.com";

pub struct PexelsProvider {
    client: ThrottledClient,
    base_url: String,
    api_key: String,
    priority: u32,
    max_results: usize,
}

impl PexelsProvider {
    pub fn new(config: &ProviderConfig) -> Result<Self> {
        let Some(api_key) = config.api_key() else {
            bail!(
                "pexels requires an API key in ${}",
                config.api_key_env.as_deref().unwrap_or("<api_key_env unset>")
            );
        };
        Ok(Self {
            client: ThrottledClient::new(NAME, config)?,
            base_url: config
                .base_url
                .clone()
                .unwrap_or_else(|| DEFAULT_BASE_URL.to_string()),
            api_key,
            priority: config.priority,
            max_results: config.max_results,
        })
    }
}

/// Pexels items have no title; the page URL slug is the closest thing.
/// `https://www.pexels.com/video/old-film-projector-856973/` → `old film projector`.
pub fn title_from_url(url: &str) -> Option<String> {
    let slug = url.trim_end_matches('/').rsplit('/').next()?;
    let words: Vec<&str> = slug.split('-').collect();
    let words = match words.last() {
        Some(last) if last.chars().all(|c| c.is_ascii_digit()) => &words[..words.len() - 1],
        _ => &words[..],
    };
    if words.is_empty() {
        None
    } else {
        Some(words.join(" "))
    }
}

fn best_video_file(video: &Value) -> Option<(String, u32, u32)> {
    video
        .get("video_files")?
        .as_array()?
        .iter()
        .filter_map(|f| {
            let link = f.get("link")?.as_str()?;
            let width = f.get("width").and_then(|w| w.as_u64()).unwrap_or(0) as u32;
            let height = f.get("height").and_then(|h| h.as_u64()).unwrap_or(0) as u32;
            Some((link.to_string(), width, height))
        })
        // Largest file no wider than 1920.
        .filter(|(_, w, _)| *w <= 1920)
        .max_by_key(|(_, w, _)| *w)
}

pub fn parse_videos(json: &Value) -> Vec<Candidate> {
    let Some(videos) = json.get("videos").and_then(|v| v.as_array()) else {
        return Vec::new();
    };
    videos
        .iter()
        .filter_map(|v| {
            let id = v.get("id")?.as_u64()?.to_string();
            let page = v.get("url").and_then(|u| u.as_str()).map(str::to_string);
            let title = page
                .as_deref()
                .and_then(title_from_url)
                .unwrap_or_else(|| format!("pexels video {}", id));
            let mut c = Candidate::new(NAME, &id, &title, MediaKind::Video);
            c.media_type = Some("video".to_string());
            c.duration_secs = v.get("duration").and_then(|d| d.as_f64());
            c.page_url = page;
            c.creator = v
                .get("user")
                .and_then(|u| u.get("name"))
                .and_then(|n| n.as_str())
                .map(str::to_string);
            c.license = Some("Pexels License".to_string());
            if let Some((link, w, h)) = best_video_file(v) {
                c.download_url = Some(link);
                c.width = Some(w);
                c.height = Some(h);
            }
            Some(c)
        })
        .collect()
}

pub fn parse_photos(json: &Value) -> Vec<Candidate> {
    let Some(photos) = json.get("photos").and_then(|v| v.as_array()) else {
        return Vec::new();
    };
    photos
        .iter()
        .filter_map(|p| {
            let id = p.get("id")?.as_u64()?.to_string();
            let alt = p.get("alt").and_then(|a| a.as_str()).unwrap_or_default();
            let page = p.get("url").and_then(|u| u.as_str()).map(str::to_string);
            let title = if alt.is_empty() {
                page.as_deref()
                    .and_then(title_from_url)
                    .unwrap_or_else(|| format!("pexels photo {}", id))
            } else {
                alt.to_string()
            };
            let mut c = Candidate::new(NAME, &id, &title, MediaKind::Image);
            c.media_type = Some("photo".to_string());
            c.width = p.get("width").and_then(|w| w.as_u64()).map(|w| w as u32);
            c.height = p.get("height").and_then(|h| h.as_u64()).map(|h| h as u32);
            c.page_url = page;
            c.creator = p
                .get("photographer")
                .and_then(|n| n.as_str())
                .map(str::to_string);
            c.download_url = p
                .get("src")
                .and_then(|s| s.get("large2x").or_else(|| s.get("original")))
                .and_then(|u| u.as_str())
                .map(str::to_string);
            c.license = Some("Pexels License".to_string());
            Some(c)
        })
        .collect()
}

#[async_trait]
impl Provider for PexelsProvider {
    fn name(&self) -> &str {
        NAME
    }

    fn description(&self) -> &str {
        "Pexels stock video and photos"
    }

    fn priority(&self) -> u32 {
        self.priority
    }

    fn supports(&self, _kind: MediaKind) -> bool {
        true
    }

    async fn search(&self, query: &str, kind: MediaKind) -> Vec<Candidate> {
        let (path, allowed) = match kind {
            MediaKind::Video => ("videos/search", "video"),
            MediaKind::Image => ("v1/search", "photo"),
        };
        let url = format!("{}/{}", self.base_url, path);
        let params: Vec<(&str, String)> = vec![
            ("query", query.to_string()),
            ("per_page", self.max_results.min(80).to_string()),
        ];
        let headers = [("Authorization", self.api_key.clone())];

        let Some(json) = self.client.get_json_or_log(&url, &params, &headers).await else {
            return Vec::new();
        };

        let parsed = match kind {
            MediaKind::Video => parse_videos(&json),
            MediaKind::Image => parse_photos(&json),
        };
        let mut results = filter_content_types(parsed, &[allowed]);
        results.truncate(self.max_results);
        results
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn slug_titles() {
        assert_eq!(
            title_from_url("https://www.pexels.com/video/old-film-projector-856973/").as_deref(),
            Some("old film projector")
        );
        assert!(title_from_url("https://www.pexels.com/video/856973/").is_none());
        assert!(title_from_url("").is_none());
    }

    #[test]
    fn parses_videos_with_best_file() {
        let json = json!({"videos": [{
            "id": 856973,
            "url": "https://www.pexels.com/video/old-film-projector-856973/",
            "duration": 14,
            "user": {"name": "Someone"},
            "video_files": [
                {"link": "https://v/sd.mp4", "width": 640, "height": 360},
                {"link": "https://v/hd.mp4", "width": 1920, "height": 1080},
                {"link": "https://v/uhd.mp4", "width": 3840, "height": 2160}
            ]
        }]});
        let parsed = parse_videos(&json);
        assert_eq!(parsed.len(), 1);
        assert_eq!(parsed[0].title, "old film projector");
        assert_eq!(parsed[0].download_url.as_deref(), Some("https://v/hd.mp4"));
        assert_eq!(parsed[0].duration_secs, Some(14.0));
    }

    #[test]
    fn parses_photos_prefers_alt_text() {
        let json = json!({"photos": [{
            "id": 7, "alt": "Typewriter on a desk", "width": 4000, "height": 3000,
            "url": "https://www.pexels.com/photo/typewriter-7/",
            "src": {"original": "https://p/o.jpg", "large2x": "https://p/l.jpg"}
        }]});
        let parsed = parse_photos(&json);
        assert_eq!(parsed[0].title, "Typewriter on a desk");
        assert_eq!(parsed[0].download_url.as_deref(), Some("https://p/l.jpg"));
    }
}
