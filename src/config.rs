//! YAML configuration.
//!
//! Every field has a default, so an empty file (or no file at all) runs all
//! five providers against the production endpoints. A typical override:
//!
//! ```yaml
//! store_endpoint: http://articles.internal:5000/articles
//! article_delay_ms: 500
//! llm:
//!   models: [llama-3.1-8b-instant, llama-3.3-70b-versatile]
//! materiality:
//!   drop_immaterial: true
//! providers:
//!   - kind: newsfile
//!     mode: scrape
//!   - kind: pr_newswire
//!     poll_interval_secs: 30
//! ```

use crate::error::ConfigError;
use crate::fetcher::HttpSettings;
use crate::llm::PoolSettings;
use crate::materiality::MaterialitySettings;
use crate::models::{FeedMode, ProviderConfig};
use crate::providers::ProviderKind;
use crate::store::DEFAULT_STORE_ENDPOINT;
use crate::transformer::TransformerSettings;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;
use tracing::info;

#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
#[serde(default)]
pub struct PipelineConfig {
    pub store_endpoint: String,
    pub article_delay_ms: u64,
    /// API key for the completion service; CLI and env take precedence.
    pub api_key: Option<String>,
    pub http: HttpSettings,
    pub llm: PoolSettings,
    pub materiality: MaterialitySettings,
    pub transformer: TransformerSettings,
    pub providers: Vec<ProviderSettings>,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            store_endpoint: DEFAULT_STORE_ENDPOINT.to_string(),
            article_delay_ms: 1000,
            api_key: None,
            http: HttpSettings::default(),
            llm: PoolSettings::default(),
            materiality: MaterialitySettings::default(),
            transformer: TransformerSettings::default(),
            providers: ProviderKind::ALL.iter().map(|k| ProviderSettings::new(*k)).collect(),
        }
    }
}

impl PipelineConfig {
    /// Read `path` if given, otherwise use the defaults.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let Some(path) = path else {
            info!("No config file given; using defaults");
            return Ok(Self::default());
        };
        let path_display = path.display().to_string();
        let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path_display.clone(),
            source,
        })?;
        let config = Self::from_yaml(&raw).map_err(|source| ConfigError::Yaml {
            path: path_display.clone(),
            source,
        })?;
        info!(path = %path_display, providers = config.providers.len(), "Loaded config");
        Ok(config)
    }

    pub fn from_yaml(raw: &str) -> Result<Self, serde_yaml::Error> {
        if raw.trim().is_empty() {
            return Ok(Self::default());
        }
        serde_yaml::from_str(raw)
    }

    pub fn article_delay(&self) -> Duration {
        Duration::from_millis(self.article_delay_ms)
    }

    /// Enabled providers, optionally restricted to `only`.
    pub fn enabled_providers(&self, only: &[ProviderKind]) -> Vec<(ProviderKind, ProviderConfig)> {
        self.providers
            .iter()
            .filter(|p| p.enabled)
            .filter(|p| only.is_empty() || only.contains(&p.kind))
            .map(|p| (p.kind, p.resolve()))
            .collect()
    }
}

/// Per-provider overrides on top of the built-in defaults.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
pub struct ProviderSettings {
    pub kind: ProviderKind,
    #[serde(default = "enabled_by_default")]
    pub enabled: bool,
    #[serde(default)]
    pub mode: Option<FeedMode>,
    #[serde(default)]
    pub feed_url: Option<String>,
    #[serde(default)]
    pub listing_url: Option<String>,
    #[serde(default)]
    pub poll_interval_secs: Option<u64>,
}

fn enabled_by_default() -> bool {
    true
}

impl ProviderSettings {
    pub fn new(kind: ProviderKind) -> Self {
        Self {
            kind,
            enabled: true,
            mode: None,
            feed_url: None,
            listing_url: None,
            poll_interval_secs: None,
        }
    }

    pub fn resolve(&self) -> ProviderConfig {
        let base = self.kind.default_config();
        ProviderConfig {
            name: base.name,
            mode: self.mode.unwrap_or(base.mode),
            feed_url: self.feed_url.clone().or(base.feed_url),
            listing_url: self.listing_url.clone().or(base.listing_url),
            poll_interval: self
                .poll_interval_secs
                .map(Duration::from_secs)
                .unwrap_or(base.poll_interval),
        }
    }
}

/// First non-empty key: CLI/env value, then the config file.
pub fn resolve_api_key(cli: Option<&str>, config: Option<&str>) -> Result<String, ConfigError> {
    [cli, config]
        .into_iter()
        .flatten()
        .map(str::trim)
        .find(|k| !k.is_empty())
        .map(str::to_string)
        .ok_or(ConfigError::MissingApiKey)
}
