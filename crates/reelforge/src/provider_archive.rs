//! Internet Archive provider.
//!
//! Searches the `advancedsearch.php` endpoint restricted to the `movies`
//! (video) or `image` media types. Download URLs are not part of the search
//! response; [`resolve_download_url`] looks them up through the metadata
//! API when compilation needs the file.
//!
//! # Configuration
//!
//! ```toml
//! [providers.internet_archive]
//! priority = 10
//! min_delay_ms = 1000
//! max_results = 25
//! ```

use anyhow::Result;
use async_trait::async_trait;
use serde_json::Value;

use reelforge_core::models::{Candidate, MediaKind};
use reelforge_core::provider::{filter_content_types, Provider};

use crate::config::ProviderConfig;
use crate::http::{num_field, str_field, str_list, ThrottledClient};

pub const NAME: &str = "internet_archive";
const DEFAULT_BASE_URL: &str = "https://archive.org";

const FIELDS: &[&str] = &[
    "identifier",
    "title",
    "description",
    "mediatype",
    "collection",
    "subject",
    "creator",
    "downloads",
    "runtime",
    "licenseurl",
];

pub struct ArchiveProvider {
    client: ThrottledClient,
    base_url: String,
    priority: u32,
    max_results: usize,
}

impl ArchiveProvider {
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

fn mediatype_for(kind: MediaKind) -> &'static str {
    match kind {
        MediaKind::Video => "movies",
        MediaKind::Image => "image",
    }
}

/// Build the advanced-search `q` parameter.
pub fn build_query(query: &str, kind: MediaKind) -> String {
    format!("({}) AND mediatype:({})", query, mediatype_for(kind))
}

/// Parse an advanced-search response into candidates.
pub fn parse_response(json: &Value, kind: MediaKind, base_url: &str) -> Vec<Candidate> {
    let docs = match json
        .get("response")
        .and_then(|r| r.get("docs"))
        .and_then(|d| d.as_array())
    {
        Some(docs) => docs,
        None => return Vec::new(),
    };

    docs.iter()
        .filter_map(|doc| {
            let id = str_field(doc, "identifier")?;
            let title = str_field(doc, "title").unwrap_or_else(|| id.clone());
            let mut c = Candidate::new(NAME, &id, &title, kind);
            c.description = str_field(doc, "description").unwrap_or_default();
            c.media_type = str_field(doc, "mediatype");
            c.collection = str_list(doc, "collection");
            c.subject = str_list(doc, "subject");
            c.creator = str_field(doc, "creator");
            c.downloads = doc.get("downloads").and_then(|d| d.as_u64());
            c.duration_secs = num_field(doc, "runtime");
            c.license = str_field(doc, "licenseurl");
            c.page_url = Some(format!("{}/details/{}", base_url, id));
            Some(c)
        })
        .collect()
}

/// Pick a downloadable file from a metadata API response.
///
/// Prefers H.264/MPEG4 derivatives for video and JPEG for images.
pub fn pick_file(metadata: &Value, kind: MediaKind, base_url: &str) -> Option<String> {
    let id = metadata
        .get("metadata")
        .and_then(|m| m.get("identifier"))
        .and_then(|i| i.as_str())?;
    let files = metadata.get("files")?.as_array()?;

    let preferred: &[&str] = match kind {
        MediaKind::Video => &["h.264", "mpeg4", "512kb mpeg4"],
        MediaKind::Image => &["jpeg", "jpg"],
    };

    files
        .iter()
        .filter_map(|f| {
            let name = f.get("name")?.as_str()?;
            let format = f.get("format")?.as_str()?.to_lowercase();
            let rank = preferred.iter().position(|p| format.contains(p))?;
            Some((rank, name))
        })
        .min_by_key(|(rank, _)| *rank)
        .map(|(_, name)| format!("{}/download/{}/{}", base_url, id, name))
}

/// Look up a concrete file URL for an archive item.
pub async fn resolve_download_url(
    client: &ThrottledClient,
    base_url: &str,
    identifier: &str,
    kind: MediaKind,
) -> Result<Option<String>> {
    let url = format!("{}/metadata/{}", base_url, identifier);
    let json = client.get_json(&url, &[], &[]).await?;
    Ok(pick_file(&json, kind, base_url))
}

impl ArchiveProvider {
    pub fn client(&self) -> &ThrottledClient {
        &self.client
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }
}

#[async_trait]
impl Provider for ArchiveProvider {
    fn name(&self) -> &str {
        NAME
    }

    fn description(&self) -> &str {
        "Internet Archive moving image and image collections"
    }

    fn priority(&self) -> u32 {
        self.priority
    }

    fn supports(&self, _kind: MediaKind) -> bool {
        true
    }

    async fn search(&self, query: &str, kind: MediaKind) -> Vec<Candidate> {
        let url = format!("{}/advancedsearch.php", self.base_url);
        let mut params: Vec<(&str, String)> = vec![
            ("q", build_query(query, kind)),
            ("rows", self.max_results.to_string()),
            ("page", "1".to_string()),
            ("output", "json".to_string()),
            ("sort[]", "downloads desc".to_string()),
        ];
        for field in FIELDS {
            params.push(("fl[]", field.to_string()));
        }

        let Some(json) = self.client.get_json_or_log(&url, &params, &[]).await else {
            return Vec::new();
        };

        let mut results = filter_content_types(
            parse_response(&json, kind, &self.base_url),
            &[mediatype_for(kind)],
        );
        results.truncate(self.max_results);
        results
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn query_restricts_mediatype() {
        assert_eq!(
            build_query("Bletchley Park footage", MediaKind::Video),
            "(Bletchley Park footage) AND mediatype:(movies)"
        );
    }

    #[test]
    fn parses_docs_and_filters_types() {
        let json = json!({
            "response": {"docs": [
                {"identifier": "bp1943", "title": "Bletchley Park 1943", "mediatype": "movies",
                 "collection": ["prelinger", "newsandpublicaffairs"], "subject": "codebreaking",
                 "downloads": 1200, "runtime": "00:04:10"},
                {"identifier": "bp-book", "title": "Bletchley book", "mediatype": "texts"},
                {"title": "no identifier"}
            ]}
        });
        let parsed = parse_response(&json, MediaKind::Video, DEFAULT_BASE_URL);
        assert_eq!(parsed.len(), 2);
        assert_eq!(parsed[0].asset_id(), "internet_archive:bp1943");
        assert_eq!(parsed[0].duration_secs, Some(250.0));
        assert_eq!(parsed[0].collection.len(), 2);
        assert_eq!(parsed[0].subject, vec!["codebreaking"]);

        let kept = filter_content_types(parsed, &["movies"]);
        assert_eq!(kept.len(), 1);
    }

    #[test]
    fn malformed_response_is_empty() {
        assert!(parse_response(&json!({"error": "x"}), MediaKind::Video, DEFAULT_BASE_URL).is_empty());
    }

    #[test]
    fn picks_preferred_file() {
        let meta = json!({
            "metadata": {"identifier": "bp1943"},
            "files": [
                {"name": "bp1943.ogv", "format": "Ogg Video"},
                {"name": "bp1943_512kb.mp4", "format": "512Kb MPEG4"},
                {"name": "bp1943.mp4", "format": "h.264"}
            ]
        });
        assert_eq!(
            pick_file(&meta, MediaKind::Video, DEFAULT_BASE_URL).as_deref(),
            Some("https://archive.org/download/bp1943/bp1943.mp4")
        );
        assert!(pick_file(&meta, MediaKind::Image, DEFAULT_BASE_URL).is_none());
    }
}
