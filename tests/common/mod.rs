//! Shared test fixtures for driving a [`SearchController`] against in-memory
//! collaborators.
//!
//! # Test Strategy
//!
//! Each test gets a [`TestPage`]: a controller wired to
//! - a [`ScriptedFetcher`] whose requests stay pending until the test resolves
//!   them, so completion order is fully controlled
//! - an [`InMemoryHistory`] the test can move back and forward
//! - a [`MemoryMap`] and a [`RecordingView`] to inspect what the user sees
//! - a [`ChannelGeolocation`] feed for position fixes and errors
//!
//! Tests step the event loop explicitly with [`TestPage::pump`] instead of
//! running it in the background, so every assertion sees a settled state.

use places_sync::history::NavigationEntry;
use places_sync::position::GeolocationFeed;
use places_sync::{
    ChannelGeolocation, Collaborators, Config, ControllerHandle, FetchError, InMemoryHistory,
    MemoryMap, PageView, Position, PositionError, Query, ResultRecord, ResultSet, ResultsFetcher,
    SearchController,
};
use futures::FutureExt;
use futures::future::BoxFuture;
use rstest::fixture;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::oneshot;

pub const LANDING_URL: &str = "/places/search";
pub const YOU_ARE_HERE: &str = "You are here.";

type Reply = Result<ResultSet, FetchError>;

/// One call made to a [`ScriptedFetcher`].
#[derive(Debug, Clone, PartialEq)]
pub struct FetchCall {
    pub query: Query,
    pub position: Option<Position>,
}

#[derive(Default)]
struct FetcherLog {
    calls: Vec<FetchCall>,
    replies: Vec<Option<oneshot::Sender<Reply>>>,
}

/// A fetcher whose every request waits for [`ScriptedFetcher::resolve`].
#[derive(Clone, Default)]
pub struct ScriptedFetcher {
    log: Arc<Mutex<FetcherLog>>,
}

#[allow(dead_code)] // Methods used across different integration test crates
impl ScriptedFetcher {
    pub fn calls(&self) -> Vec<FetchCall> {
        self.log.lock().unwrap().calls.clone()
    }

    pub fn call_count(&self) -> usize {
        self.log.lock().unwrap().calls.len()
    }

    /// Complete request number `index` (0-based, in call order).
    pub fn resolve(&self, index: usize, reply: Reply) {
        let sender = self.log.lock().unwrap().replies[index]
            .take()
            .unwrap_or_else(|| panic!("fetch #{} already resolved", index));
        sender.send(reply).expect("fetch future dropped");
    }
}

impl ResultsFetcher for ScriptedFetcher {
    fn fetch(&self, query: &Query, position: Option<Position>) -> BoxFuture<'static, Reply> {
        let (tx, rx) = oneshot::channel();
        {
            let mut log = self.log.lock().unwrap();
            log.calls.push(FetchCall {
                query: query.clone(),
                position,
            });
            log.replies.push(Some(tx));
        }
        async move {
            rx.await
                .unwrap_or_else(|_| Err(FetchError::Transport("reply dropped".to_string())))
        }
        .boxed()
    }
}

/// A fetcher that answers immediately from a closure.
#[derive(Clone)]
pub struct AnsweringFetcher {
    answer: Arc<dyn Fn(&Query) -> Reply + Send + Sync>,
}

#[allow(dead_code)] // Methods used across different integration test crates
impl AnsweringFetcher {
    pub fn new(answer: impl Fn(&Query) -> Reply + Send + Sync + 'static) -> Self {
        Self {
            answer: Arc::new(answer),
        }
    }
}

impl ResultsFetcher for AnsweringFetcher {
    fn fetch(&self, query: &Query, _position: Option<Position>) -> BoxFuture<'static, Reply> {
        let reply = (self.answer)(query);
        async move { reply }.boxed()
    }
}

/// What the page outside the map currently shows.
#[allow(dead_code)] // Fields used across different integration test crates
#[derive(Debug, Default, Clone)]
pub struct ViewLog {
    pub query: Option<Query>,
    pub results: Option<ResultSet>,
    pub position_unavailable: Option<PositionError>,
    pub renders: usize,
}

#[derive(Clone, Default)]
pub struct RecordingView {
    log: Arc<Mutex<ViewLog>>,
}

#[allow(dead_code)] // Methods used across different integration test crates
impl RecordingView {
    pub fn snapshot(&self) -> ViewLog {
        self.log.lock().unwrap().clone()
    }
}

impl PageView for RecordingView {
    fn show_query(&mut self, query: &Query) {
        self.log.lock().unwrap().query = Some(query.clone());
    }

    fn render_results(&mut self, results: &ResultSet) {
        let mut log = self.log.lock().unwrap();
        log.results = Some(results.clone());
        log.renders += 1;
    }

    fn show_position_unavailable(&mut self, reason: &PositionError) {
        self.log.lock().unwrap().position_unavailable = Some(reason.clone());
    }

    fn clear_position_unavailable(&mut self) {
        self.log.lock().unwrap().position_unavailable = None;
    }
}

/// A controller plus handles on all of its collaborators.
#[allow(dead_code)] // Fields used across different integration test crates
pub struct TestPage {
    pub controller: SearchController,
    pub handle: ControllerHandle,
    pub fetcher: ScriptedFetcher,
    pub history: InMemoryHistory,
    pub map: MemoryMap,
    pub view: RecordingView,
    pub geolocation: GeolocationFeed,
}

#[allow(dead_code)] // Methods used across different integration test crates
impl TestPage {
    /// A page loaded on `landing`.
    pub fn load(landing: NavigationEntry) -> Self {
        let fetcher = ScriptedFetcher::default();
        let history = InMemoryHistory::with_entry(landing);
        let map = MemoryMap::new();
        let view = RecordingView::default();
        let (source, geolocation) = ChannelGeolocation::new();

        let (controller, handle) = SearchController::new(
            &Config::default(),
            Collaborators {
                fetcher: Arc::new(fetcher.clone()),
                history: Box::new(history.clone()),
                map: Box::new(map.clone()),
                view: Box::new(view.clone()),
                geolocation: Some(Box::new(source)),
            },
        )
        .expect("default config is valid");

        Self {
            controller,
            handle,
            fetcher,
            history,
            map,
            view,
            geolocation,
        }
    }

    /// Handle exactly one event.
    ///
    /// # Panics
    /// Panics if no event arrives within five seconds.
    pub async fn pump(&mut self) {
        let event = tokio::time::timeout(Duration::from_secs(5), self.controller.next_event())
            .await
            .expect("timed out waiting for a controller event")
            .expect("controller channel closed");
        self.controller.handle_event(event);
    }

    /// Submit `query` and let the controller issue its fetch.
    pub async fn submit(&mut self, query: &str) {
        assert!(self.handle.submit_query(query));
        self.pump().await;
    }

    /// Resolve fetch `index` and let the controller handle the completion.
    pub async fn complete(&mut self, index: usize, reply: Reply) {
        self.fetcher.resolve(index, reply);
        self.pump().await;
    }

    /// Start on an empty landing page and settle its initial empty search.
    pub async fn settled(mut self) -> Self {
        self.controller.start();
        self.complete(0, Ok(ResultSet::default())).await;
        self
    }

    /// Result markers currently on the map, as (title, lat, lon).
    pub fn result_markers(&self) -> Vec<(String, f64, f64)> {
        self.map
            .markers_except(YOU_ARE_HERE)
            .into_iter()
            .map(|m| (m.title, m.position.latitude, m.position.longitude))
            .collect()
    }

    pub fn shown_query(&self) -> Option<Query> {
        self.view.snapshot().query
    }

    pub fn history_urls(&self) -> Vec<String> {
        self.history.entries().into_iter().map(|e| e.url).collect()
    }
}

/// A freshly loaded page on the bare search URL, not yet started.
pub fn fresh_page() -> TestPage {
    places_sync::tracing::init();
    TestPage::load(NavigationEntry {
        url: LANDING_URL.to_string(),
        state: None,
    })
}

#[fixture]
pub fn page() -> TestPage {
    fresh_page()
}

#[allow(dead_code)] // Used across different integration test crates
pub fn result_set(query: &str, records: &[(&str, f64, f64)]) -> ResultSet {
    ResultSet::new(
        Query::from(query),
        records
            .iter()
            .map(|(title, lat, lon)| ResultRecord::new(*title, *lat, *lon))
            .collect(),
    )
}

#[allow(dead_code)] // Used across different integration test crates
pub fn coffee() -> ResultSet {
    result_set("coffee", &[("Cafe A", 51.75, -1.26)])
}

#[allow(dead_code)] // Used across different integration test crates
pub fn pizza() -> ResultSet {
    result_set("pizza", &[("Pizza B", 51.76, -1.25), ("Pizza C", 51.74, -1.27)])
}
