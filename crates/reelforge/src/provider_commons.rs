//! Wikimedia Commons provider.
//!
//! Runs a MediaWiki `generator=search` query over the File namespace and
//! pulls `imageinfo` (URL, size, MIME, media type, extended metadata) in the
//! same request. Video searches add a `filetype:video` filter.

use anyhow::Result;
use async_trait::async_trait;
use serde_json::Value;

use reelforge_core::models::{Candidate, MediaKind};
use reelforge_core::provider::{filter_content_types, Provider};

use crate::config::ProviderConfig;
use crate::http::{num_field, ThrottledClient};

pub const NAME: &str = "wikimedia_commons";
const DEFAULT_BASE_URL: &str = "https://commons.wikimedia.org";

pub struct CommonsProvider {
    client: ThrottledClient,
    base_url: String,
    priority: u32,
    max_results: usize,
}

impl CommonsProvider {
    pub fn new(config: &ProviderConfig) -> Result<Self> {
        Ok(Self {
            client: ThrottledClient::new(NAME, config)?,
            base_url: config
                .base_url
                .clone()
                .unwrap_or_else(|| DEFAULT_BASE_URL.to_string()),
            priority: config.priority,
            max_results: config.max_results,
        })
    }
}

fn allowed_types(kind: MediaKind) -> &'static [&'static str] {
    match kind {
        MediaKind::Video => &["VIDEO"],
        MediaKind::Image => &["BITMAP", "DRAWING"],
    }
}

pub fn build_search(query: &str, kind: MediaKind) -> String {
    match kind {
        MediaKind::Video => format!("{} filetype:video", query),
        MediaKind::Image => format!("{} filetype:bitmap|drawing", query),
    }
}

/// Drop HTML tags from extmetadata values.
fn strip_tags(html: &str) -> String {
    let mut out = String::with_capacity(html.len());
    let mut in_tag = false;
    for ch in html.chars() {
        match ch {
            '<' => in_tag = true,
            '>' => in_tag = false,
            c if !in_tag => out.push(c),
            _ => {}
        }
    }
    out.split_whitespace().collect::<Vec<_>>().join(" ")
}

fn ext(info: &Value, key: &str) -> Option<String> {
    info.get("extmetadata")?
        .get(key)?
        .get("value")?
        .as_str()
        .map(strip_tags)
        .filter(|s| !s.is_empty())
}

pub fn parse_response(json: &Value, kind: MediaKind) -> Vec<Candidate> {
    let Some(pages) = json
        .get("query")
        .and_then(|q| q.get("pages"))
        .and_then(|p| p.as_object())
    else {
        return Vec::new();
    };

    let mut ordered: Vec<&Value> = pages.values().collect();
    // Search rank is carried in `index`; object order is not meaningful.
    ordered.sort_by_key(|p| p.get("index").and_then(|i| i.as_i64()).unwrap_or(i64::MAX));

    ordered
        .into_iter()
        .filter_map(|page| {
            let page_id = page.get("pageid")?.as_i64()?;
            let title = page.get("title")?.as_str()?;
            let info = page.get("imageinfo")?.as_array()?.first()?;

            let display = title.trim_start_matches("File:");
            let display = display
                .rsplit_once('.')
                .map(|(stem, _)| stem)
                .unwrap_or(display)
                .replace('_', " ");

            let mut c = Candidate::new(NAME, &page_id.to_string(), &display, kind);
            c.description = ext(info, "ImageDescription").unwrap_or_default();
            c.media_type = info.get("mediatype").and_then(|m| m.as_str()).map(str::to_string);
            c.width = info.get("width").and_then(|w| w.as_u64()).map(|w| w as u32);
            c.height = info.get("height").and_then(|h| h.as_u64()).map(|h| h as u32);
            c.duration_secs = num_field(info, "duration");
            c.download_url = info.get("url").and_then(|u| u.as_str()).map(str::to_string);
            c.page_url = info
                .get("descriptionurl")
                .and_then(|u| u.as_str())
                .map(str::to_string);
            c.license = ext(info, "LicenseShortName");
            c.creator = ext(info, "Artist");
            c.subject = ext(info, "Categories")
                .map(|cats| cats.split('|').map(|s| s.trim().to_string()).collect())
                .unwrap_or_default();
            Some(c)
        })
        .collect()
}

#[async_trait]
impl Provider for CommonsProvider {
    fn name(&self) -> &str {
        NAME
    }

    fn description(&self) -> &str {
        "Wikimedia Commons freely licensed media"
    }

    fn priority(&self) -> u32 {
        self.priority
    }

    fn supports(&self, _kind: MediaKind) -> bool {
        true
    }

    async fn search(&self, query: &str, kind: MediaKind) -> Vec<Candidate> {
        let url = format!("{}/w/api.php", self.base_url);
        let params: Vec<(&str, String)> = vec![
            ("action", "query".to_string()),
            ("format", "json".to_string()),
            ("generator", "search".to_string()),
            ("gsrsearch", build_search(query, kind)),
            ("gsrnamespace", "6".to_string()),
            ("gsrlimit", self.max_results.to_string()),
            ("prop", "imageinfo".to_string()),
            ("iiprop", "url|size|mime|mediatype|extmetadata".to_string()),
            ("iiextmetadatafilter", "ImageDescription|LicenseShortName|Artist|Categories".to_string()),
        ];

        let Some(json) = self.client.get_json_or_log(&url, &params, &[]).await else {
            return Vec::new();
        };

        let mut results = filter_content_types(parse_response(&json, kind), allowed_types(kind));
        results.truncate(self.max_results);
        results
    }
}
