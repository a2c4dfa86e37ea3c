//! The search controller: one event loop reconciling query submissions,
//! geolocation, fetch completions and history navigation into one view.
//!
//! All inputs arrive as [`Event`]s on a single channel and are handled one at a
//! time, to completion. Fetches run as spawned tasks and report back with the
//! generation number they were started under; a completion whose generation is
//! no longer the outstanding one is discarded, so the view only ever shows the
//! latest completed fetch or the latest restored snapshot.

use crate::config::Config;
use crate::error::{ConfigError, FetchError, PositionError};
use crate::fetcher::ResultsFetcher;
use crate::history::{HistoryBridge, NavigationHistory};
use crate::map::{MapMarkerSync, MapSurface};
use crate::position::{GeolocationSource, PositionTracker};
use crate::query_state::QueryState;
use crate::types::{Fix, Query, ResultSet};
use crate::view::PageView;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

/// Everything that can happen to the page.
#[derive(Debug, Clone, PartialEq)]
pub enum Event {
    QuerySubmitted(Query),
    PositionUpdate(Fix),
    PositionError(PositionError),
    FetchCompleted {
        generation: u64,
        result: Result<ResultSet, FetchError>,
    },
    /// Back/forward landed on an entry; `None` when it carries no snapshot.
    NavigationRestored(Option<ResultSet>),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControllerState {
    Idle,
    Fetching,
}

/// Why a fetch was started, which decides how its result enters history.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Origin {
    /// Populating the entry the page was loaded on.
    Landing,
    /// The user submitted a query.
    Submitted,
    /// A new position refines the displayed query. Only updates the view.
    Refresh,
}

#[derive(Debug)]
struct InFlight {
    generation: u64,
    query: Query,
    origin: Origin,
}

/// The platform pieces a controller drives.
pub struct Collaborators {
    pub fetcher: Arc<dyn ResultsFetcher>,
    pub history: Box<dyn NavigationHistory>,
    pub map: Box<dyn MapSurface>,
    pub view: Box<dyn PageView>,
    /// `None` when the platform offers no geolocation at all.
    pub geolocation: Option<Box<dyn GeolocationSource>>,
}

/// Cloneable sender for host input.
#[derive(Debug, Clone)]
pub struct ControllerHandle {
    tx: mpsc::UnboundedSender<Event>,
}

impl ControllerHandle {
    /// Submit a search. Returns `false` if the controller has shut down.
    pub fn submit_query(&self, query: impl Into<Query>) -> bool {
        self.tx.send(Event::QuerySubmitted(query.into())).is_ok()
    }
}

pub struct SearchController {
    fetcher: Arc<dyn ResultsFetcher>,
    history: HistoryBridge,
    map: MapMarkerSync,
    view: Box<dyn PageView>,
    tracker: PositionTracker,
    geolocation: Option<Box<dyn GeolocationSource>>,
    query_state: QueryState,
    in_flight: Option<InFlight>,
    generation: u64,
    started: bool,
    watch: Option<JoinHandle<()>>,
    tx: mpsc::UnboundedSender<Event>,
    rx: mpsc::UnboundedReceiver<Event>,
}

impl std::fmt::Debug for SearchController {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SearchController")
            .field("state", &self.state())
            .field("query", &self.query_state.query())
            .field("generation", &self.generation)
            .field("position", self.tracker.state())
            .finish_non_exhaustive()
    }
}

impl SearchController {
    pub fn new(
        config: &Config,
        collaborators: Collaborators,
    ) -> Result<(Self, ControllerHandle), ConfigError> {
        let page = config.search.endpoint()?;
        let (tx, rx) = mpsc::unbounded_channel();

        let controller = Self {
            fetcher: collaborators.fetcher,
            history: HistoryBridge::new(collaborators.history, &page),
            map: MapMarkerSync::new(collaborators.map, &config.map),
            view: collaborators.view,
            tracker: PositionTracker::new(config.geolocation.clone()),
            geolocation: collaborators.geolocation,
            query_state: QueryState::new(),
            in_flight: None,
            generation: 0,
            started: false,
            watch: None,
            tx: tx.clone(),
            rx,
        };
        Ok((controller, ControllerHandle { tx }))
    }

    pub fn handle(&self) -> ControllerHandle {
        ControllerHandle {
            tx: self.tx.clone(),
        }
    }

    pub const fn state(&self) -> ControllerState {
        if self.in_flight.is_some() {
            ControllerState::Fetching
        } else {
            ControllerState::Idle
        }
    }

    pub const fn query_state(&self) -> &QueryState {
        &self.query_state
    }

    pub const fn position(&self) -> &PositionTracker {
        &self.tracker
    }

    /// Show the landing entry's snapshot, or fetch for the landing URL's query
    /// when it has none, then start watching geolocation.
    ///
    /// Must run inside a tokio runtime. Calling it again has no effect.
    pub fn start(&mut self) {
        if std::mem::replace(&mut self.started, true) {
            return;
        }

        let tx = self.tx.clone();
        self.history.on_navigate(move |snapshot| {
            if tx.send(Event::NavigationRestored(snapshot)).is_err() {
                tracing::debug!("Navigation after controller shutdown ignored");
            }
        });

        match self.history.current_snapshot() {
            Some(snapshot) => {
                tracing::debug!("Restoring landing snapshot for '{}'", snapshot.query);
                self.apply(snapshot);
            }
            None => {
                let query = self.history.current_query();
                self.begin_fetch(query, Origin::Landing);
            }
        }

        if let Some(source) = self.geolocation.take() {
            let tx = self.tx.clone();
            self.watch = Some(self.tracker.start_watching(&*source, move |obs| {
                let event = match obs {
                    Ok(fix) => Event::PositionUpdate(fix),
                    Err(reason) => Event::PositionError(reason),
                };
                tx.send(event).is_ok()
            }));
        } else {
            tracing::info!("No geolocation available, searching without position");
        }
    }

    /// Wait for the next event.
    pub async fn next_event(&mut self) -> Option<Event> {
        self.rx.recv().await
    }

    /// Start if needed, then handle events until `cancel` fires.
    pub async fn run(mut self, cancel: CancellationToken) {
        self.start();
        // The controller holds a sender itself, so the channel never closes here.
        loop {
            tokio::select! {
                () = cancel.cancelled() => break,
                Some(event) = self.rx.recv() => self.handle_event(event),
            }
        }
        if let Some(watch) = self.watch.take() {
            watch.abort();
        }
        tracing::debug!("Search controller stopped");
    }

    pub fn handle_event(&mut self, event: Event) {
        match event {
            Event::QuerySubmitted(query) => {
                tracing::debug!("Query submitted: '{}'", query);
                self.begin_fetch(query, Origin::Submitted);
            }
            Event::PositionUpdate(fix) => self.on_position(fix),
            Event::PositionError(reason) => self.on_position_error(reason),
            Event::FetchCompleted { generation, result } => {
                self.on_fetch_completed(generation, result);
            }
            Event::NavigationRestored(snapshot) => self.on_navigation(snapshot),
        }
    }

    fn on_position(&mut self, fix: Fix) {
        tracing::debug!("Position update {}", fix.position);
        self.tracker.record_fix(fix);
        self.view.clear_position_unavailable();
        self.map.render_user_position(fix.position);

        // Re-run whatever the user last asked for, now biased by the new fix.
        let (query, origin) = match self.in_flight.take() {
            Some(pending) => (pending.query, pending.origin),
            None => self.refresh_target(),
        };
        self.begin_fetch(query, origin);
    }

    fn on_position_error(&mut self, reason: PositionError) {
        self.tracker.record_failure(reason.clone());
        if self.tracker.current().is_some() {
            tracing::debug!("Position watch timed out, last fix still usable");
        } else {
            tracing::info!("Position unavailable: {}", reason);
            self.view.show_position_unavailable(&reason);
        }

        if self.in_flight.is_none() && !self.query_state.is_displaying() {
            let (query, origin) = self.refresh_target();
            self.begin_fetch(query, origin);
        }
    }

    fn on_fetch_completed(&mut self, generation: u64, result: Result<ResultSet, FetchError>) {
        let Some(request) = self.in_flight.take_if(|f| f.generation == generation) else {
            tracing::debug!("Discarding result of superseded fetch #{}", generation);
            return;
        };

        let mut results = match result {
            Ok(results) => results,
            Err(e) => {
                tracing::warn!("Search for '{}' failed: {}", request.query, e);
                return;
            }
        };
        if results.query != request.query {
            tracing::warn!(
                "Fetcher answered '{}' for '{}', keeping the requested query",
                results.query,
                request.query
            );
            results.query = request.query;
        }

        let recorded = match request.origin {
            Origin::Submitted => self.history.record_navigation(&results),
            Origin::Refresh => Ok(()),
            Origin::Landing => self.history.record_landing(&results),
        };
        if let Err(e) = recorded {
            tracing::warn!("Could not record history for '{}': {}", results.query, e);
        }

        tracing::debug!(
            "Showing {} results for '{}' (fetch #{})",
            results.len(),
            results.query,
            generation
        );
        self.apply(results);
    }

    fn on_navigation(&mut self, snapshot: Option<ResultSet>) {
        if let Some(pending) = self.in_flight.take() {
            tracing::debug!(
                "Navigation cancels fetch #{} for '{}'",
                pending.generation,
                pending.query
            );
        }
        match snapshot {
            Some(results) => {
                tracing::debug!("Restoring '{}' from history", results.query);
                self.apply(results);
            }
            None => tracing::debug!("History entry has no snapshot, keeping current view"),
        }
    }

    /// The query a position change should refine. Before anything has been
    /// shown that is still the landing URL's query.
    fn refresh_target(&self) -> (Query, Origin) {
        if self.query_state.is_displaying() {
            (self.query_state.query(), Origin::Refresh)
        } else {
            (self.history.current_query(), Origin::Landing)
        }
    }

    fn begin_fetch(&mut self, query: Query, origin: Origin) {
        self.generation += 1;
        let generation = self.generation;
        let position = self.tracker.current();

        if let Some(previous) = self.in_flight.replace(InFlight {
            generation,
            query: query.clone(),
            origin,
        }) {
            tracing::debug!(
                "Fetch #{} supersedes #{} ('{}')",
                generation,
                previous.generation,
                previous.query
            );
        }

        let fetch = self.fetcher.fetch(&query, position);
        let tx = self.tx.clone();
        tokio::spawn(async move {
            let result = fetch.await;
            // Receiver only disappears when the page is going away.
            let _ = tx.send(Event::FetchCompleted { generation, result });
        });
    }

    /// Replace query state, result list and result markers in one step.
    fn apply(&mut self, results: ResultSet) {
        self.view.show_query(&results.query);
        self.view.render_results(&results);
        self.map.render_results(&results);
        self.query_state.replace(results);
    }
}
