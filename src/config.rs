//! TOML configuration for a pipeline run.

use anyhow::{Context, Result};
use serde::Deserialize;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::enrich::FailurePolicy;
use crate::error::ConfigurationError;
use crate::ingestion::RegionBounds;
use crate::mapbox::tilequery::MAX_LIMIT;
use crate::retry::RetryPolicy;

/// Environment variable that overrides `mapbox.token`
pub const TOKEN_ENV: &str = "MAPBOX_ACCESS_TOKEN";

#[derive(Debug, Deserialize, Clone, Default)]
pub struct Config {
    #[serde(default)]
    pub mapbox: MapboxConfig,
    #[serde(default)]
    pub region: RegionBounds,
    #[serde(default)]
    pub paths: PathsConfig,
    #[serde(default)]
    pub isochrone: IsochroneConfig,
    #[serde(default)]
    pub overlap: OverlapConfig,
    #[serde(default)]
    pub upload: UploadConfig,
    #[serde(default)]
    pub retry: RetryConfig,
    /// What to do when a single point fails enrichment or counting
    #[serde(default)]
    pub on_failure: FailurePolicy,
    pub notify: Option<NotifyConfig>,
}

#[derive(Debug, Deserialize, Clone)]
pub struct MapboxConfig {
    pub username: Option<String>,
    pub token: Option<String>,
    #[serde(default = "default_api_base")]
    pub api_base: String,
}

impl Default for MapboxConfig {
    fn default() -> Self {
        Self {
            username: None,
            token: None,
            api_base: default_api_base(),
        }
    }
}

fn default_api_base() -> String {
    "https://api.mapbox.com".to_string()
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct PathsConfig {
    pub input: PathBuf,
    pub quarantine: PathBuf,
    pub output: PathBuf,
}

impl Default for PathsConfig {
    fn default() -> Self {
        Self {
            input: PathBuf::from("data/FridgeGeo150.csv"),
            quarantine: PathBuf::from("data/bad_data.csv"),
            output: PathBuf::from("data/enriched.json"),
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct IsochroneConfig {
    pub profile: String,
    pub short_minutes: u32,
    pub long_minutes: u32,
    pub short_color: String,
    pub long_color: String,
    /// Provider ceiling; the Mapbox Isochrone API allows 300/min
    pub requests_per_minute: u32,
    pub concurrency: usize,
    pub timeout_secs: u64,
}

impl Default for IsochroneConfig {
    fn default() -> Self {
        Self {
            profile: "walking".to_string(),
            short_minutes: 5,
            long_minutes: 10,
            short_color: "6706ce".to_string(),
            long_color: "04e813".to_string(),
            requests_per_minute: 300,
            concurrency: 4,
            timeout_secs: 30,
        }
    }
}

impl IsochroneConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct OverlapConfig {
    /// Tileset to query; defaults to `{username}.{prefix}_polygons`
    pub tileset: Option<String>,
    /// Must exceed the largest plausible overlap + 2, else counts are silently capped
    pub limit: usize,
    pub requests_per_minute: u32,
    pub concurrency: usize,
    pub timeout_secs: u64,
    /// Cross-check remote counts against this run's own polygons
    pub verify_layer: bool,
}

impl Default for OverlapConfig {
    fn default() -> Self {
        Self {
            tileset: None,
            limit: 50,
            requests_per_minute: 600,
            concurrency: 4,
            timeout_secs: 30,
            verify_layer: true,
        }
    }
}

impl OverlapConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct UploadConfig {
    pub poll_interval_secs: u64,
    pub max_polls: u32,
    /// Bound on each upload or status call
    pub timeout_secs: u64,
}

impl Default for UploadConfig {
    fn default() -> Self {
        Self {
            poll_interval_secs: 5,
            max_polls: 120,
            timeout_secs: 60,
        }
    }
}

impl UploadConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_secs)
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct RetryConfig {
    pub max_retries: u32,
    pub base_delay_ms: u64,
    pub max_delay_ms: u64,
    pub backoff_multiplier: f64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            base_delay_ms: 1000,
            max_delay_ms: 60_000,
            backoff_multiplier: 2.0,
        }
    }
}

impl RetryConfig {
    pub fn to_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_retries: self.max_retries,
            base_delay: Duration::from_millis(self.base_delay_ms),
            max_delay: Duration::from_millis(self.max_delay_ms),
            backoff_multiplier: self.backoff_multiplier,
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct NotifyConfig {
    pub webhook_url: String,
}

impl Config {
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;
        Self::from_toml(&content)
    }

    pub fn from_toml(content: &str) -> Result<Self> {
        let mut config: Config = toml::from_str(content).context("Failed to parse config file")?;
        if let Ok(token) = std::env::var(TOKEN_ENV) {
            if !token.is_empty() {
                config.mapbox.token = Some(token);
            }
        }
        Ok(config)
    }

    /// Checks that must pass before any stage runs.
    pub fn validate(&self) -> Result<(), ConfigurationError> {
        if self.mapbox.token.as_deref().map_or(true, str::is_empty) {
            return Err(ConfigurationError(format!(
                "mapbox.token is not set (or export {})",
                TOKEN_ENV
            )));
        }
        if self.mapbox.username.as_deref().map_or(true, str::is_empty) {
            return Err(ConfigurationError("mapbox.username is not set".to_string()));
        }
        self.region.validate()?;
        if self.overlap.limit <= crate::models::dataset::SELF_POLYGONS {
            return Err(ConfigurationError(format!(
                "overlap.limit must be greater than {}",
                crate::models::dataset::SELF_POLYGONS
            )));
        }
        if self.overlap.limit > MAX_LIMIT {
            return Err(ConfigurationError(format!(
                "overlap.limit {} exceeds the tilequery maximum of {}",
                self.overlap.limit, MAX_LIMIT
            )));
        }
        if self.isochrone.short_minutes >= self.isochrone.long_minutes {
            return Err(ConfigurationError(
                "isochrone.short_minutes must be below isochrone.long_minutes".to_string(),
            ));
        }
        if self.isochrone.concurrency == 0 || self.overlap.concurrency == 0 {
            return Err(ConfigurationError("concurrency must be at least 1".to_string()));
        }
        if self.isochrone.requests_per_minute == 0 || self.overlap.requests_per_minute == 0 {
            return Err(ConfigurationError(
                "requests_per_minute must be at least 1".to_string(),
            ));
        }
        Ok(())
    }

    /// Username is checked by [`validate`](Self::validate); empty here otherwise.
    pub fn username(&self) -> &str {
        self.mapbox.username.as_deref().unwrap_or_default()
    }

    pub fn polygon_tileset(&self, prefix: &str) -> String {
        self.overlap
            .tileset
            .clone()
            .unwrap_or_else(|| format!("{}.{}_polygons", self.username(), prefix))
    }
}
