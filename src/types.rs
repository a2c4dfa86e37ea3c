//! Core data model shared by every component: positions, queries and result sets.

use crate::error::PositionError;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;

/// A geographic coordinate pair in decimal degrees.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "Coordinates")]
pub struct Position {
    pub latitude: f64,
    pub longitude: f64,
}

/// Unchecked wire form of a [`Position`].
#[derive(Deserialize)]
struct Coordinates {
    latitude: f64,
    longitude: f64,
}

impl TryFrom<Coordinates> for Position {
    type Error = PositionError;

    fn try_from(raw: Coordinates) -> Result<Self, Self::Error> {
        Self::new(raw.latitude, raw.longitude)
    }
}

impl Position {
    /// Create a validated position.
    ///
    /// Latitude must lie in [-90, 90] and longitude in [-180, 180].
    pub fn new(latitude: f64, longitude: f64) -> Result<Self, PositionError> {
        let valid = latitude.is_finite()
            && longitude.is_finite()
            && (-90.0..=90.0).contains(&latitude)
            && (-180.0..=180.0).contains(&longitude);
        if !valid {
            return Err(PositionError::InvalidCoordinates {
                latitude,
                longitude,
            });
        }
        Ok(Self {
            latitude,
            longitude,
        })
    }

    /// Value of the `Geo-Position` request header: `"<lat>;<lon>"`.
    pub fn header_value(&self) -> String {
        format!("{};{}", self.latitude, self.longitude)
    }
}

impl fmt::Display for Position {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({}, {})", self.latitude, self.longitude)
    }
}

/// A single geolocation observation.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Fix {
    pub position: Position,
    /// How long ago the platform captured this position.
    pub age: Duration,
}

impl Fix {
    /// A freshly captured fix.
    pub const fn fresh(position: Position) -> Self {
        Self {
            position,
            age: Duration::ZERO,
        }
    }
}

/// Free-text search input. May be empty, meaning "no filter".
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Query(String);

impl Query {
    pub fn new(text: impl Into<String>) -> Self {
        Self(text.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl fmt::Display for Query {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for Query {
    fn from(text: &str) -> Self {
        Self::new(text)
    }
}

impl From<String> for Query {
    fn from(text: String) -> Self {
        Self(text)
    }
}

/// One search hit with its map coordinates.
///
/// Anything the server sends beyond title and coordinates (identifier, type,
/// links) is carried untouched in `extra` for the result template.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResultRecord {
    pub title: String,
    pub latitude: f64,
    pub longitude: f64,
    #[serde(default, skip_serializing_if = "serde_json::Map::is_empty")]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

impl ResultRecord {
    pub fn new(title: impl Into<String>, latitude: f64, longitude: f64) -> Self {
        Self {
            title: title.into(),
            latitude,
            longitude,
            extra: serde_json::Map::new(),
        }
    }

    pub const fn position(&self) -> Position {
        Position {
            latitude: self.latitude,
            longitude: self.longitude,
        }
    }
}

/// A query together with the ordered records it produced.
///
/// This is the unit of rendering and of history snapshots; `query` always
/// matches the query that produced `records`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ResultSet {
    pub query: Query,
    pub records: Vec<ResultRecord>,
}

impl ResultSet {
    pub const fn new(query: Query, records: Vec<ResultRecord>) -> Self {
        Self { query, records }
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}
