//! Configuration for the aggregation core
//!
//! Loaded from a TOML file merged with `TELLY_`-prefixed environment
//! variables via figment. Durations are humantime strings ("6h", "30s") so
//! the files stay human-editable. The library takes an explicit
//! [`AppConfig`] at construction; there are no global singletons.

use figment::providers::{Env, Format, Serialized, Toml};
use figment::Figment;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::warn;

use crate::epg::GuideSource;
use crate::errors::{SourceError, SourceResult};

pub mod defaults;

use defaults::*;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub cache: CacheConfig,
    #[serde(default)]
    pub epg: EpgConfig,
    #[serde(default)]
    pub http: HttpConfig,
}

/// Cache budgets and freshness windows
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheConfig {
    /// Root directory for the listing and image cache subdirectories
    pub dir: PathBuf,
    /// Image cache size budget in megabytes
    #[serde(default = "default_image_budget_mb")]
    pub image_budget_mb: u64,
    /// Freshness window for cached listings
    #[serde(default = "default_listing_ttl")]
    pub listing_ttl: String,
    /// Cool-down before a failed artifact fetch is retried
    #[serde(default = "default_negative_cooldown")]
    pub negative_cooldown: String,
}

/// Guide-data refresh policy
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EpgConfig {
    /// How long fetched guide data is considered fresh
    #[serde(default = "default_epg_expiration")]
    pub expiration: String,
    /// Explicit guide documents (URLs or local file paths) taking precedence
    /// over the provider's own guide endpoint
    #[serde(default)]
    pub sources: Vec<String>,
}

/// Network timeouts and retry bound
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HttpConfig {
    #[serde(default = "default_connect_timeout")]
    pub connect_timeout: String,
    #[serde(default = "default_request_timeout")]
    pub request_timeout: String,
    /// Retries for transient network failures, per page/artifact
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            dir: PathBuf::from("cache"),
            image_budget_mb: default_image_budget_mb(),
            listing_ttl: default_listing_ttl(),
            negative_cooldown: default_negative_cooldown(),
        }
    }
}

impl Default for EpgConfig {
    fn default() -> Self {
        Self {
            expiration: default_epg_expiration(),
            sources: Vec::new(),
        }
    }
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            connect_timeout: default_connect_timeout(),
            request_timeout: default_request_timeout(),
            max_retries: default_max_retries(),
        }
    }
}

impl AppConfig {
    /// Load configuration from a TOML file merged with environment overrides
    pub fn load(path: &Path) -> SourceResult<Self> {
        Figment::from(Serialized::defaults(AppConfig::default()))
            .merge(Toml::file(path))
            .merge(Env::prefixed("TELLY_").split("__"))
            .extract()
            .map_err(|e| SourceError::malformed(format!("invalid configuration: {e}")))
    }
}

impl CacheConfig {
    pub fn image_budget_bytes(&self) -> u64 {
        self.image_budget_mb * 1024 * 1024
    }

    pub fn listing_ttl(&self) -> Duration {
        parse_duration_or(&self.listing_ttl, Duration::from_secs(6 * 3600))
    }

    pub fn negative_cooldown(&self) -> Duration {
        parse_duration_or(&self.negative_cooldown, Duration::from_secs(30 * 60))
    }

    pub fn listing_dir(&self) -> PathBuf {
        self.dir.join("listing")
    }

    pub fn image_dir(&self) -> PathBuf {
        self.dir.join("image")
    }
}

impl EpgConfig {
    pub fn expiration(&self) -> Duration {
        parse_duration_or(&self.expiration, Duration::from_secs(3600))
    }

    /// Configured guide documents, http(s) entries as URLs and anything else
    /// as a local file path
    pub fn guide_sources(&self) -> Vec<GuideSource> {
        self.sources
            .iter()
            .map(|entry| {
                if entry.starts_with("http://") || entry.starts_with("https://") {
                    GuideSource::Url(entry.clone())
                } else {
                    GuideSource::File(PathBuf::from(entry))
                }
            })
            .collect()
    }
}

impl HttpConfig {
    pub fn connect_timeout(&self) -> Duration {
        parse_duration_or(&self.connect_timeout, Duration::from_secs(10))
    }

    pub fn request_timeout(&self) -> Duration {
        parse_duration_or(&self.request_timeout, Duration::from_secs(30))
    }
}

fn parse_duration_or(value: &str, fallback: Duration) -> Duration {
    humantime::parse_duration(value).unwrap_or_else(|e| {
        warn!("invalid duration '{value}': {e}, using {fallback:?}");
        fallback
    })
}
