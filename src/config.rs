//! Controller configuration, loaded from TOML.
//!
//! Every field has a default, so an empty document is a valid configuration.
//! Durations are written as milliseconds.

use crate::error::{ConfigError, Result};
use crate::types::Position;
use anyhow::Context;
use reqwest::Url;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// Default map centre used before any results or position are known.
const DEFAULT_CENTER: Position = Position {
    latitude: 51.7531,
    longitude: -1.2600,
};

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Config {
    pub search: SearchConfig,
    pub geolocation: GeolocationOptions,
    pub map: MapConfig,
}

impl Config {
    /// Parse and validate a TOML document.
    pub fn from_toml_str(source: &str) -> std::result::Result<Self, ConfigError> {
        let config: Self = toml::from_str(source)?;
        config.search.endpoint()?;
        Ok(config)
    }

    /// Read a TOML configuration file.
    pub fn load(path: &Path) -> Result<Self> {
        let source = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file {}", path.display()))?;
        Self::from_toml_str(&source)
            .with_context(|| format!("Failed to load config from {}", path.display()))
    }
}

/// Where and how search requests are sent.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct SearchConfig {
    /// Absolute URL of the search endpoint. Its path doubles as the page path
    /// used for history entries.
    pub base_url: String,
    /// Request header carrying `"<lat>;<lon>"` for position bias.
    pub position_header: String,
    /// Page size sent as `count`; the server default applies when unset.
    pub page_size: Option<u32>,
    #[serde(with = "millis", rename = "request_timeout_ms")]
    pub request_timeout: Duration,
}

impl SearchConfig {
    /// The parsed endpoint URL.
    pub fn endpoint(&self) -> std::result::Result<Url, ConfigError> {
        Url::parse(&self.base_url).map_err(|e| ConfigError::BaseUrl {
            url: self.base_url.clone(),
            reason: e.to_string(),
        })
    }
}

impl Default for SearchConfig {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:8000/places/search".to_string(),
            position_header: "Geo-Position".to_string(),
            page_size: None,
            request_timeout: Duration::from_secs(10),
        }
    }
}

/// Options handed to the platform's continuous geolocation watch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct GeolocationOptions {
    pub high_accuracy: bool,
    /// Oldest cached fix that is still acceptable.
    #[serde(with = "millis", rename = "maximum_age_ms")]
    pub maximum_age: Duration,
    /// An attempt that produces neither a fix nor an error within this window
    /// is reported as a timeout.
    #[serde(with = "millis", rename = "timeout_ms")]
    pub timeout: Duration,
}

impl Default for GeolocationOptions {
    fn default() -> Self {
        Self {
            high_accuracy: false,
            maximum_age: Duration::from_secs(60),
            timeout: Duration::from_secs(20),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct MapConfig {
    pub center: Position,
    pub zoom: u8,
    /// Fraction of the bounds' span added on every side when fitting results.
    pub fit_padding: f64,
    pub user_marker_title: String,
}

impl Default for MapConfig {
    fn default() -> Self {
        Self {
            center: DEFAULT_CENTER,
            zoom: 15,
            fit_padding: 0.1,
            user_marker_title: "You are here.".to_string(),
        }
    }
}

mod millis {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub(super) fn serialize<S>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_u64(u64::try_from(value.as_millis()).unwrap_or(u64::MAX))
    }

    pub(super) fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        u64::deserialize(deserializer).map(Duration::from_millis)
    }
}
