//! Navigation history snapshots.
//!
//! Every completed search the user may want to return to becomes a history
//! entry whose URL carries the query and whose state carries the full result
//! set, so back/forward can restore the view without touching the network.

use crate::error::SnapshotError;
use crate::types::{Query, ResultSet};
use reqwest::Url;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::{Arc, Mutex, PoisonError};

/// Called with the target entry's state whenever the user moves back or forward.
pub type RestoreHandler = Box<dyn Fn(Option<Value>) + Send + Sync>;

/// The platform's navigation history: an append-only log of entries with an
/// external back/forward cursor.
pub trait NavigationHistory: Send {
    /// URL of the entry the cursor is on, as path plus query string.
    fn current_url(&self) -> String;

    /// State attached to the entry the cursor is on.
    fn current_state(&self) -> Option<Value>;

    /// Append an entry after the cursor, discarding any forward entries.
    fn push(&mut self, url: &str, state: Value);

    /// Overwrite the entry the cursor is on.
    fn replace(&mut self, url: &str, state: Value);

    /// Register the back/forward handler. `push` and `replace` never invoke it.
    fn on_restore(&mut self, handler: RestoreHandler);
}

/// State payload stored with each entry: `{"results": {"query", "records"}}`.
#[derive(Debug, Serialize)]
struct Snapshot {
    results: ResultSet,
}

/// Decode an entry's state into the result set it carries.
pub fn parse_snapshot(state: &Value) -> Result<ResultSet, SnapshotError> {
    let results = state.get("results").ok_or(SnapshotError::MissingResults)?;
    Ok(ResultSet::deserialize(results)?)
}

/// Reads and writes result-set snapshots in navigation history.
pub struct HistoryBridge {
    history: Box<dyn NavigationHistory>,
    page: Url,
}

impl std::fmt::Debug for HistoryBridge {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HistoryBridge")
            .field("page", &self.page.path())
            .field("current_url", &self.history.current_url())
            .finish_non_exhaustive()
    }
}

impl HistoryBridge {
    /// `page` is the page's own URL; its path is used for every entry.
    pub fn new(history: Box<dyn NavigationHistory>, page: &Url) -> Self {
        let mut page = page.clone();
        page.set_query(None);
        page.set_fragment(None);
        Self { history, page }
    }

    /// `<path>` for an empty query, `<path>?q=<query>` otherwise.
    pub fn canonical_url(&self, query: &Query) -> String {
        if query.is_empty() {
            return self.page.path().to_string();
        }
        let mut url = self.page.clone();
        url.query_pairs_mut().append_pair("q", query.as_str());
        format!("{}?{}", url.path(), url.query().unwrap_or_default())
    }

    /// Push a new entry for a completed search.
    pub fn record_navigation(&mut self, results: &ResultSet) -> Result<(), SnapshotError> {
        let (url, state) = self.entry_for(results)?;
        tracing::debug!("Recording navigation to {}", url);
        self.history.push(&url, state);
        Ok(())
    }

    /// Attach a snapshot to the entry the page was loaded on, which has none.
    pub fn record_landing(&mut self, results: &ResultSet) -> Result<(), SnapshotError> {
        let (url, state) = self.entry_for(results)?;
        tracing::debug!("Attaching snapshot to landing entry {}", url);
        self.history.replace(&url, state);
        Ok(())
    }

    /// The snapshot stored on the current entry, if it carries a usable one.
    pub fn current_snapshot(&self) -> Option<ResultSet> {
        decode(self.history.current_state())
    }

    /// The `q` parameter of the current entry's URL (empty when absent).
    pub fn current_query(&self) -> Query {
        let current = self.history.current_url();
        match self.page.join(&current) {
            Ok(url) => url
                .query_pairs()
                .find(|(key, _)| key == "q")
                .map(|(_, value)| Query::new(value.into_owned()))
                .unwrap_or_default(),
            Err(e) => {
                tracing::warn!("Unparseable history URL '{}': {}", current, e);
                Query::default()
            }
        }
    }

    /// Register `handler` for back/forward navigation. It receives the stored
    /// result set, or `None` when the entry has no usable snapshot.
    pub fn on_navigate<F>(&mut self, handler: F)
    where
        F: Fn(Option<ResultSet>) + Send + Sync + 'static,
    {
        self.history
            .on_restore(Box::new(move |state| handler(decode(state))));
    }

    fn entry_for(&self, results: &ResultSet) -> Result<(String, Value), SnapshotError> {
        let state = serde_json::to_value(Snapshot {
            results: results.clone(),
        })?;
        Ok((self.canonical_url(&results.query), state))
    }
}

fn decode(state: Option<Value>) -> Option<ResultSet> {
    let state = state?;
    match parse_snapshot(&state) {
        Ok(results) => Some(results),
        Err(e) => {
            tracing::warn!("Ignoring history entry: {}", e);
            None
        }
    }
}

/// One entry in an [`InMemoryHistory`].
#[derive(Debug, Clone, PartialEq)]
pub struct NavigationEntry {
    pub url: String,
    pub state: Option<Value>,
}

#[derive(Default)]
struct Log {
    entries: Vec<NavigationEntry>,
    cursor: usize,
    handler: Option<Arc<RestoreHandler>>,
}

/// Navigation history kept in memory, for hosts without a browser.
///
/// Clones share the same log, so one handle can be given to the controller
/// while the host keeps another to drive back/forward.
#[derive(Clone)]
pub struct InMemoryHistory {
    log: Arc<Mutex<Log>>,
}

impl std::fmt::Debug for InMemoryHistory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let log = self.lock();
        f.debug_struct("InMemoryHistory")
            .field("entries", &log.entries)
            .field("cursor", &log.cursor)
            .finish_non_exhaustive()
    }
}

impl InMemoryHistory {
    /// A history whose only entry is the landing URL, without state.
    pub fn new(landing_url: impl Into<String>) -> Self {
        Self::with_entry(NavigationEntry {
            url: landing_url.into(),
            state: None,
        })
    }

    /// A history whose only entry is `entry`, as after a page reload.
    pub fn with_entry(entry: NavigationEntry) -> Self {
        Self {
            log: Arc::new(Mutex::new(Log {
                entries: vec![entry],
                cursor: 0,
                handler: None,
            })),
        }
    }

    /// Move the cursor back one entry. Returns `false` at the oldest entry.
    pub fn back(&self) -> bool {
        self.go(-1)
    }

    /// Move the cursor forward one entry. Returns `false` at the newest entry.
    pub fn forward(&self) -> bool {
        self.go(1)
    }

    pub fn entries(&self) -> Vec<NavigationEntry> {
        self.lock().entries.clone()
    }

    pub fn cursor(&self) -> usize {
        self.lock().cursor
    }

    fn go(&self, delta: isize) -> bool {
        let (state, handler) = {
            let mut log = self.lock();
            let Some(target) = log.cursor.checked_add_signed(delta) else {
                return false;
            };
            if target >= log.entries.len() {
                return false;
            }
            log.cursor = target;
            (log.entries[target].state.clone(), log.handler.clone())
        };

        // Handler runs outside the lock so it may read the history.
        if let Some(handler) = handler {
            handler(state);
        }
        true
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Log> {
        self.log.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl NavigationHistory for InMemoryHistory {
    fn current_url(&self) -> String {
        let log = self.lock();
        log.entries[log.cursor].url.clone()
    }

    fn current_state(&self) -> Option<Value> {
        let log = self.lock();
        log.entries[log.cursor].state.clone()
    }

    fn push(&mut self, url: &str, state: Value) {
        let mut log = self.lock();
        let keep = log.cursor + 1;
        log.entries.truncate(keep);
        log.entries.push(NavigationEntry {
            url: url.to_string(),
            state: Some(state),
        });
        log.cursor = keep;
    }

    fn replace(&mut self, url: &str, state: Value) {
        let mut log = self.lock();
        let cursor = log.cursor;
        log.entries[cursor] = NavigationEntry {
            url: url.to_string(),
            state: Some(state),
        };
    }

    fn on_restore(&mut self, handler: RestoreHandler) {
        self.lock().handler = Some(Arc::new(handler));
    }
}
