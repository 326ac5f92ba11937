//! Shared HTTP plumbing for provider adapters.
//!
//! Every adapter owns one [`ThrottledClient`]: a `reqwest` client with a
//! per-request timeout, a `governor` rate limiter enforcing the provider's
//! minimum inter-request delay, and bounded retry with exponential backoff.
//!
//! Retry strategy:
//! - HTTP 429 or 5xx → retry with exponential backoff
//! - HTTP 4xx (not 429) → fail immediately
//! - Network error / timeout → retry

use anyhow::{bail, Result};
use governor::{Quota, RateLimiter};
use std::num::NonZeroU32;
use std::time::Duration;

use crate::config::ProviderConfig;

type DirectLimiter = RateLimiter<
    governor::state::direct::NotKeyed,
    governor::state::InMemoryState,
    governor::clock::DefaultClock,
>;

const USER_AGENT: &str = concat!("reelforge/", env!("CARGO_PKG_VERSION"));

pub struct ThrottledClient {
    provider: String,
    client: reqwest::Client,
    limiter: DirectLimiter,
    max_retries: u32,
}

impl ThrottledClient {
    pub fn new(provider: &str, config: &ProviderConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs.max(1)))
            .connect_timeout(Duration::from_secs(config.timeout_secs.clamp(1, 10)))
            .user_agent(USER_AGENT)
            .build()?;

        let quota = Quota::with_period(Duration::from_millis(config.min_delay_ms.max(1)))
            .unwrap_or_else(|| Quota::per_second(NonZeroU32::MIN))
            .allow_burst(NonZeroU32::MIN);

        Ok(Self {
            provider: provider.to_string(),
            client,
            limiter: RateLimiter::direct(quota),
            max_retries: config.max_retries,
        })
    }

    /// GET a JSON document with throttling and bounded retry.
    pub async fn get_json(
        &self,
        url: &str,
        query: &[(&str, String)],
        headers: &[(&str, String)],
    ) -> Result<serde_json::Value> {
        let mut last_err = None;

        for attempt in 0..=self.max_retries {
            if attempt > 0 {
                // Exponential backoff: 1s, 2s, 4s, 8s, ...
                let delay = Duration::from_secs(1 << (attempt - 1).min(5));
                tokio::time::sleep(delay).await;
            }

            self.limiter.until_ready().await;

            let mut request = self.client.get(url).query(query);
            for (name, value) in headers {
                request = request.header(*name, value);
            }

            match request.send().await {
                Ok(response) => {
                    let status = response.status();

                    if status.is_success() {
                        return Ok(response.json().await?);
                    }

                    if status.as_u16() == 429 || status.is_server_error() {
                        tracing::warn!(
                            provider = %self.provider,
                            attempt = attempt + 1,
                            %status,
                            "provider request failed, will retry"
                        );
                        last_err = Some(anyhow::anyhow!("{} returned {}", self.provider, status));
                        continue;
                    }

                    let body = response.text().await.unwrap_or_default();
                    bail!("{} returned {}: {}", self.provider, status, truncate(&body, 200));
                }
                Err(e) => {
                    tracing::warn!(
                        provider = %self.provider,
                        attempt = attempt + 1,
                        error = %e,
                        "provider request failed, will retry"
                    );
                    last_err = Some(e.into());
                }
            }
        }

        Err(last_err.unwrap_or_else(|| anyhow::anyhow!("{} request failed after retries", self.provider)))
    }

    /// Like [`get_json`](Self::get_json) but degrades every failure to
    /// `None` after logging at `error`.
    pub async fn get_json_or_log(
        &self,
        url: &str,
        query: &[(&str, String)],
        headers: &[(&str, String)],
    ) -> Option<serde_json::Value> {
        match self.get_json(url, query, headers).await {
            Ok(v) => Some(v),
            Err(e) => {
                tracing::error!(provider = %self.provider, error = %e, "provider search failed");
                None
            }
        }
    }
}

fn truncate(s: &str, max: usize) -> &str {
    match s.char_indices().nth(max) {
        Some((i, _)) => &s[..i],
        None => s,
    }
}

/// Read a string field, treating JSON arrays as "first element".
pub fn str_field(value: &serde_json::Value, key: &str) -> Option<String> {
    match value.get(key)? {
        serde_json::Value::String(s) => Some(s.clone()),
        serde_json::Value::Array(items) => items.iter().find_map(|i| i.as_str()).map(str::to_string),
        serde_json::Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

/// Read a field that may be a string or an array of strings.
pub fn str_list(value: &serde_json::Value, key: &str) -> Vec<String> {
    match value.get(key) {
        Some(serde_json::Value::String(s)) => vec![s.clone()],
        Some(serde_json::Value::Array(items)) => items
            .iter()
            .filter_map(|i| i.as_str().map(str::to_string))
            .collect(),
        _ => Vec::new(),
    }
}

/// Read a number that may be encoded as a string (`"123.4"`).
pub fn num_field(value: &serde_json::Value, key: &str) -> Option<f64> {
    match value.get(key)? {
        serde_json::Value::Number(n) => n.as_f64(),
        serde_json::Value::String(s) => parse_duration(s),
        _ => None,
    }
}

/// Parse `"123.4"` or `"HH:MM:SS"` / `"MM:SS"` into seconds.
pub fn parse_duration(s: &str) -> Option<f64> {
    let s = s.trim();
    if let Ok(v) = s.parse::<f64>() {
        return Some(v);
    }
    let parts: Vec<&str> = s.split(':').collect();
    if parts.len() < 2 || parts.len() > 3 {
        return None;
    }
    let mut total = 0.0;
    for part in parts {
        total = total * 60.0 + part.parse::<f64>().ok()?;
    }
    Some(total)
}
