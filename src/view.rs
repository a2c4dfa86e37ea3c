//! The page outside the map: query input, result list and status indicator.

use crate::error::PositionError;
use crate::types::{Query, ResultSet};

/// Page surface the controller writes to. Implementations own all markup;
/// the controller only hands over data.
pub trait PageView: Send {
    /// Put `query` into the search input.
    fn show_query(&mut self, query: &Query);

    /// Render the result list for `results`.
    fn render_results(&mut self, results: &ResultSet);

    /// Show a passive "location unavailable" indicator.
    fn show_position_unavailable(&mut self, reason: &PositionError);

    /// Hide the indicator once a position is known again.
    fn clear_position_unavailable(&mut self);
}

/// A [`PageView`] that discards everything, for hosts without a page.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullView;

impl PageView for NullView {
    fn show_query(&mut self, _query: &Query) {}

    fn render_results(&mut self, _results: &ResultSet) {}

    fn show_position_unavailable(&mut self, _reason: &PositionError) {}

    fn clear_position_unavailable(&mut self) {}
}
