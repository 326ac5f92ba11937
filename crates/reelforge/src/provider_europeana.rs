//! Europeana provider.
//!
//! Uses the Search API (`record/v2/search.json`) with `media=true` and an
//! open-reusability filter. Requires an API key read from the environment
//! variable named by `api_key_env`; without one the provider is skipped at
//! registry build time.

use anyhow::{bail, Result};
use async_trait::async_trait;
use serde_json::Value;

use reelforge_core::models::{Candidate, MediaKind};
use reelforge_core::provider::{filter_content_types, Provider};

use crate::config::ProviderConfig;
use crate::http::{str_field, str_list, ThrottledClient};

pub const NAME: &str = "europeana";
const DEFAULT_BASE_URL: &str = "https://api.europeana.eu";

pub struct EuropeanaProvider {
    client: ThrottledClient,
    base_url: String,
    api_key: String,
    priority: u32,
    max_results: usize,
}

impl EuropeanaProvider {
    pub fn new(config: &ProviderConfig) -> Result<Self> {
        let Some(api_key) = config.api_key() else {
            bail!(
                "europeana requires an API key in ${}",
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

fn type_for(kind: MediaKind) -> &'static str {
    match kind {
        MediaKind::Video => "VIDEO",
        MediaKind::Image => "IMAGE",
    }
}

pub fn parse_response(json: &Value, kind: MediaKind) -> Vec<Candidate> {
    let Some(items) = json.get("items").and_then(|i| i.as_array()) else {
        return Vec::new();
    };

    items
        .iter()
        .filter_map(|item| {
            let id = str_field(item, "id")?;
            let id = id.trim_start_matches('/').to_string();
            let title = str_field(item, "title").unwrap_or_else(|| id.clone());
            let mut c = Candidate::new(NAME, &id, &title, kind);
            c.description = str_list(item, "dcDescription").join(" ");
            c.media_type = str_field(item, "type");
            c.download_url = str_field(item, "edmIsShownBy");
            c.page_url = str_field(item, "guid");
            c.license = str_field(item, "rights");
            c.collection = str_list(item, "dataProvider");
            c.subject = str_list(item, "edmConceptPrefLabelLangAware");
            c.creator = str_field(item, "dcCreator");
            Some(c)
        })
        .collect()
}

#[async_trait]
impl Provider for EuropeanaProvider {
    fn name(&self) -> &str {
        NAME
    }

    fn description(&self) -> &str {
        "Europeana cultural heritage aggregator (open reuse only)"
    }

    fn priority(&self) -> u32 {
        self.priority
    }

    fn supports(&self, _kind: MediaKind) -> bool {
        true
    }

    async fn search(&self, query: &str, kind: MediaKind) -> Vec<Candidate> {
        let url = format!("{}/record/v2/search.json", self.base_url);
        let params: Vec<(&str, String)> = vec![
            ("wskey", self.api_key.clone()),
            ("query", query.to_string()),
            ("qf", format!("TYPE:{}", type_for(kind))),
            ("media", "true".to_string()),
            ("reusability", "open".to_string()),
            ("profile", "rich".to_string()),
            ("rows", self.max_results.to_string()),
        ];

        let Some(json) = self.client.get_json_or_log(&url, &params, &[]).await else {
            return Vec::new();
        };

        let mut results = filter_content_types(parse_response(&json, kind), &[type_for(kind)]);
        results.truncate(self.max_results);
        results
    }
}
