//! The query and result set currently shown to the user.

use crate::types::{Query, ResultSet};

/// Displayed query plus the result set that produced it.
///
/// Both are replaced together from a single [`ResultSet`], so the query shown
/// in the input can never belong to a different search than the results.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct QueryState {
    current: Option<ResultSet>,
}

impl QueryState {
    pub fn new() -> Self {
        Self::default()
    }

    /// The displayed query; empty before anything has been shown.
    pub fn query(&self) -> Query {
        self.current
            .as_ref()
            .map(|rs| rs.query.clone())
            .unwrap_or_default()
    }

    /// The displayed result set, if any search has completed or been restored.
    pub const fn results(&self) -> Option<&ResultSet> {
        self.current.as_ref()
    }

    pub const fn is_displaying(&self) -> bool {
        self.current.is_some()
    }

    /// Replace query and results atomically.
    pub fn replace(&mut self, results: ResultSet) {
        self.current = Some(results);
    }
}
