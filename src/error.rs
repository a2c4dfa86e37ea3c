//! Error handling types and utilities.
//!
//! None of these conditions is fatal to the controller: each one is recovered
//! locally and the page stays interactive.

/// A specialized Result type for host-facing setup code.
///
/// This is an alias for `anyhow::Result`; configuration loading adds context
/// via `.context()` and `.with_context()`.
pub type Result<T> = anyhow::Result<T>;

/// Why the latest geolocation attempt produced no usable position.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum PositionError {
    /// The user or platform refused access to location.
    #[error("location permission denied")]
    PermissionDenied,
    /// The platform could not determine a position.
    #[error("position unavailable: {0}")]
    Unavailable(String),
    /// No success or failure arrived within the configured timeout.
    #[error("timed out waiting for a position")]
    Timeout,
    /// The platform reported coordinates outside the valid range.
    #[error("invalid coordinates ({latitude}, {longitude})")]
    InvalidCoordinates { latitude: f64, longitude: f64 },
}

/// Failure of a single search request. Never retried automatically.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum FetchError {
    /// Connection, DNS or timeout failure before a response arrived.
    #[error("search request failed: {0}")]
    Transport(String),
    /// The endpoint answered with a non-success status.
    #[error("search endpoint returned HTTP {0}")]
    Status(u16),
    /// The response body was not a search document.
    #[error("malformed search response: {0}")]
    Decode(String),
}

impl From<reqwest::Error> for FetchError {
    fn from(err: reqwest::Error) -> Self {
        if let Some(status) = err.status() {
            Self::Status(status.as_u16())
        } else if err.is_decode() {
            Self::Decode(err.to_string())
        } else {
            Self::Transport(err.to_string())
        }
    }
}

/// A navigation entry's state payload could not be turned into a result set.
#[derive(Debug, thiserror::Error)]
pub enum SnapshotError {
    #[error("malformed history snapshot: {0}")]
    Malformed(#[from] serde_json::Error),
    #[error("history snapshot has no `results` field")]
    MissingResults,
}

/// Configuration could not be parsed.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("invalid configuration: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("invalid search base URL '{url}': {reason}")]
    BaseUrl { url: String, reason: String },
    #[error("invalid position header name '{0}'")]
    PositionHeader(String),
    #[error("cannot build HTTP client: {0}")]
    HttpClient(String),
}
