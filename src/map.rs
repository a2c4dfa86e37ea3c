//! Map marker reconciliation.
//!
//! [`MapMarkerSync`] is the only code that touches the map: it owns the ids of
//! the markers it added, replaces result markers wholesale on every render, and
//! keeps the single "you are here" marker separate from them.

use crate::config::MapConfig;
use crate::types::{Position, ResultSet};
use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, PoisonError};

/// Handle to a marker on a [`MapSurface`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct MarkerId(pub u64);

#[derive(Debug, Clone, PartialEq)]
pub struct Marker {
    pub position: Position,
    /// Hover label.
    pub title: String,
}

/// A latitude/longitude rectangle.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Bounds {
    pub south: f64,
    pub west: f64,
    pub north: f64,
    pub east: f64,
}

impl Bounds {
    /// Smallest rectangle containing every position, or `None` for no positions.
    pub fn covering<I>(positions: I) -> Option<Self>
    where
        I: IntoIterator<Item = Position>,
    {
        positions.into_iter().fold(None, |acc, p| {
            Some(match acc {
                None => Self {
                    south: p.latitude,
                    west: p.longitude,
                    north: p.latitude,
                    east: p.longitude,
                },
                Some(b) => Self {
                    south: b.south.min(p.latitude),
                    west: b.west.min(p.longitude),
                    north: b.north.max(p.latitude),
                    east: b.east.max(p.longitude),
                },
            })
        })
    }

    /// Extend each side by `ratio` of the corresponding span, clamped to valid
    /// coordinates.
    #[must_use]
    pub fn pad(&self, ratio: f64) -> Self {
        let lat_buffer = (self.north - self.south).abs() * ratio;
        let lon_buffer = (self.east - self.west).abs() * ratio;
        Self {
            south: (self.south - lat_buffer).max(-90.0),
            west: (self.west - lon_buffer).max(-180.0),
            north: (self.north + lat_buffer).min(90.0),
            east: (self.east + lon_buffer).min(180.0),
        }
    }

    pub fn contains(&self, position: Position) -> bool {
        (self.south..=self.north).contains(&position.latitude)
            && (self.west..=self.east).contains(&position.longitude)
    }
}

/// The map widget's primitives.
pub trait MapSurface: Send {
    fn add_marker(&mut self, marker: Marker) -> MarkerId;
    fn remove_marker(&mut self, id: MarkerId);
    fn fit_bounds(&mut self, bounds: Bounds);
    fn pan_to(&mut self, center: Position);
    fn set_view(&mut self, center: Position, zoom: u8);
}

/// Keeps the map's markers in step with the displayed results and the user's
/// position.
pub struct MapMarkerSync {
    surface: Box<dyn MapSurface>,
    result_markers: Vec<MarkerId>,
    user_marker: Option<MarkerId>,
    padding: f64,
    user_marker_title: String,
}

impl std::fmt::Debug for MapMarkerSync {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MapMarkerSync")
            .field("result_markers", &self.result_markers.len())
            .field("user_marker", &self.user_marker)
            .finish_non_exhaustive()
    }
}

impl MapMarkerSync {
    /// Take ownership of `surface` and move it to the configured initial view.
    pub fn new(mut surface: Box<dyn MapSurface>, config: &MapConfig) -> Self {
        surface.set_view(config.center, config.zoom);
        Self {
            surface,
            result_markers: Vec::new(),
            user_marker: None,
            padding: config.fit_padding,
            user_marker_title: config.user_marker_title.clone(),
        }
    }

    /// Replace all result markers with one per record and fit the viewport to
    /// them. An empty result set clears the markers and leaves the viewport alone.
    pub fn render_results(&mut self, results: &ResultSet) {
        for id in self.result_markers.drain(..) {
            self.surface.remove_marker(id);
        }

        self.result_markers = results
            .records
            .iter()
            .map(|record| {
                self.surface.add_marker(Marker {
                    position: record.position(),
                    title: record.title.clone(),
                })
            })
            .collect();

        match Bounds::covering(results.records.iter().map(|r| r.position())) {
            Some(bounds) => self.surface.fit_bounds(bounds.pad(self.padding)),
            None => tracing::debug!("No results for '{}', keeping viewport", results.query),
        }
    }

    /// Add or move the "you are here" marker and centre the map on it.
    pub fn render_user_position(&mut self, position: Position) {
        if let Some(id) = self.user_marker.take() {
            self.surface.remove_marker(id);
        }
        self.user_marker = Some(self.surface.add_marker(Marker {
            position,
            title: self.user_marker_title.clone(),
        }));
        self.surface.pan_to(position);
    }

    pub fn result_marker_count(&self) -> usize {
        self.result_markers.len()
    }

    pub const fn has_user_marker(&self) -> bool {
        self.user_marker.is_some()
    }
}

/// Where a [`MemoryMap`]'s viewport was last set.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Viewport {
    Unset,
    View { center: Position, zoom: u8 },
    Centered(Position),
    Fitted(Bounds),
}

#[derive(Debug)]
struct MemoryMapState {
    markers: BTreeMap<MarkerId, Marker>,
    next_id: u64,
    viewport: Viewport,
}

/// A map surface that only records what it was asked to show.
///
/// Useful for headless hosts; clones share state so the caller can inspect
/// the map after handing one clone to [`MapMarkerSync`].
#[derive(Debug, Clone)]
pub struct MemoryMap {
    state: Arc<Mutex<MemoryMapState>>,
}

impl Default for MemoryMap {
    fn default() -> Self {
        Self {
            state: Arc::new(Mutex::new(MemoryMapState {
                markers: BTreeMap::new(),
                next_id: 1,
                viewport: Viewport::Unset,
            })),
        }
    }
}

impl MemoryMap {
    pub fn new() -> Self {
        Self::default()
    }

    /// Markers currently on the map, in insertion order.
    pub fn markers(&self) -> Vec<Marker> {
        self.lock().markers.values().cloned().collect()
    }

    /// Markers whose title is not `title`.
    pub fn markers_except(&self, title: &str) -> Vec<Marker> {
        self.markers()
            .into_iter()
            .filter(|m| m.title != title)
            .collect()
    }

    pub fn viewport(&self) -> Viewport {
        self.lock().viewport
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, MemoryMapState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl MapSurface for MemoryMap {
    fn add_marker(&mut self, marker: Marker) -> MarkerId {
        let mut state = self.lock();
        let id = MarkerId(state.next_id);
        state.next_id += 1;
        state.markers.insert(id, marker);
        id
    }

    fn remove_marker(&mut self, id: MarkerId) {
        if self.lock().markers.remove(&id).is_none() {
            tracing::warn!("Removing unknown marker {:?}", id);
        }
    }

    fn fit_bounds(&mut self, bounds: Bounds) {
        self.lock().viewport = Viewport::Fitted(bounds);
    }

    fn pan_to(&mut self, center: Position) {
        self.lock().viewport = Viewport::Centered(center);
    }

    fn set_view(&mut self, center: Position, zoom: u8) {
        self.lock().viewport = Viewport::View { center, zoom };
    }
}
