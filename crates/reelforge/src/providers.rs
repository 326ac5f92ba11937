//! Provider registry construction and the `reel providers` listing.

use anyhow::Result;
use serde::Serialize;

use reelforge_core::provider::{Provider, ProviderRegistry};

use crate::config::{Config, ProviderConfig};
use crate::provider_archive::{self, ArchiveProvider};
use crate::provider_commons::{self, CommonsProvider};
use crate::provider_europeana::{self, EuropeanaProvider};
use crate::provider_pexels::{self, PexelsProvider};

/// Status of one configured provider.
#[derive(Debug, Clone, Serialize)]
pub struct ProviderStatus {
    pub name: String,
    pub enabled: bool,
    pub priority: u32,
    pub status: String,
}

fn build(name: &str, cfg: &ProviderConfig) -> Result<Box<dyn Provider>> {
    Ok(match name {
        provider_archive::NAME => Box::new(ArchiveProvider::new(cfg)?),
        provider_europeana::NAME => Box::new(EuropeanaProvider::new(cfg)?),
        provider_commons::NAME => Box::new(CommonsProvider::new(cfg)?),
        provider_pexels::NAME => Box::new(PexelsProvider::new(cfg)?),
        other => anyhow::bail!("Unknown provider: '{}'", other),
    })
}

/// Build the registry from every enabled `[providers.<name>]` table.
///
/// A provider that cannot be constructed (typically a missing API key) is
/// skipped with a warning rather than failing the run.
pub fn registry_from_config(config: &Config) -> ProviderRegistry {
    let mut registry = ProviderRegistry::new();
    for (name, cfg) in config.enabled_providers() {
        match build(name, cfg) {
            Ok(provider) => registry.register(provider),
            Err(e) => tracing::warn!(provider = %name, error = %e, "provider disabled"),
        }
    }
    registry
}

pub fn provider_statuses(config: &Config) -> Vec<ProviderStatus> {
    config
        .providers
        .iter()
        .map(|(name, cfg)| {
            let status = if !cfg.enabled {
                "DISABLED".to_string()
            } else {
                match build(name, cfg) {
                    Ok(_) => "OK".to_string(),
                    Err(e) => format!("UNAVAILABLE ({})", e),
                }
            };
            ProviderStatus {
                name: name.clone(),
                enabled: cfg.enabled,
                priority: cfg.priority,
                status,
            }
        })
        .collect()
}

pub fn list_providers(config: &Config, json: bool) -> Result<()> {
    let statuses = provider_statuses(config);

    if json {
        println!("{}", serde_json::to_string_pretty(&statuses)?);
        return Ok(());
    }

    if statuses.is_empty() {
        println!("No providers configured. Add [providers.<name>] tables to the config.");
        return Ok(());
    }

    println!("{:<20} {:<9} STATUS", "PROVIDER", "PRIORITY");
    for s in &statuses {
        println!("{:<20} {:<9} {}", s.name, s.priority, s.status);
    }
    Ok(())
}
