//! Continuous geolocation observation.
//!
//! A [`GeolocationSource`] is the platform's watch API (the browser's
//! `watchPosition`, a GPS daemon, a test feed). [`PositionTracker`] applies the
//! configured timeout and maximum age to it, forwards observations to the
//! controller, and remembers the latest usable position.

use crate::config::GeolocationOptions;
use crate::error::PositionError;
use crate::types::{Fix, Position};
use futures::StreamExt;
use futures::stream::BoxStream;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::Instant;

/// Platform geolocation watch.
pub trait GeolocationSource: Send {
    /// Begin continuous observation. The stream may yield any number of fixes
    /// and errors, interleaved; it ends only if the platform gives up for good.
    fn watch(&self, options: &GeolocationOptions) -> BoxStream<'static, Result<Fix, PositionError>>;
}

/// What the tracker currently knows about the user's position.
#[derive(Debug, Clone, PartialEq, Default)]
pub enum PositionState {
    /// No observation has completed yet.
    #[default]
    Unknown,
    Fixed(Position),
    /// The most recent attempt failed. The last good position, if any, is kept;
    /// it is still used for bias after a timeout while within the maximum age.
    Failed {
        reason: PositionError,
        last_known: Option<Position>,
    },
}

/// Latest-position bookkeeping plus the watch task that feeds it.
#[derive(Debug, Default)]
pub struct PositionTracker {
    options: GeolocationOptions,
    state: PositionState,
    last_fix: Option<Sighting>,
}

/// A fix plus the moment the tracker received it.
#[derive(Debug, Clone, Copy)]
struct Sighting {
    position: Position,
    age_at_receipt: Duration,
    received_at: Instant,
}

impl Sighting {
    fn age(&self) -> Duration {
        self.age_at_receipt.saturating_add(self.received_at.elapsed())
    }
}

impl PositionTracker {
    pub fn new(options: GeolocationOptions) -> Self {
        Self {
            options,
            state: PositionState::Unknown,
            last_fix: None,
        }
    }

    pub const fn state(&self) -> &PositionState {
        &self.state
    }

    /// The position to attach to a search, if one is currently usable.
    ///
    /// That is the latest fix while it is no older than the maximum age,
    /// unless a failure other than a timeout came after it.
    pub fn current(&self) -> Option<Position> {
        match &self.state {
            PositionState::Fixed(_)
            | PositionState::Failed {
                reason: PositionError::Timeout,
                ..
            } => self.fresh_fix(),
            PositionState::Unknown | PositionState::Failed { .. } => None,
        }
    }

    fn fresh_fix(&self) -> Option<Position> {
        self.last_fix
            .filter(|sighting| sighting.age() <= self.options.maximum_age)
            .map(|sighting| sighting.position)
    }

    /// Record a new fix, superseding whatever was known before.
    pub fn record_fix(&mut self, fix: Fix) {
        self.state = PositionState::Fixed(fix.position);
        self.last_fix = Some(Sighting {
            position: fix.position,
            age_at_receipt: fix.age,
            received_at: Instant::now(),
        });
    }

    /// Record a failed attempt. Watching continues regardless.
    pub fn record_failure(&mut self, reason: PositionError) {
        let last_known = match &self.state {
            PositionState::Fixed(position) => Some(*position),
            PositionState::Failed { last_known, .. } => *last_known,
            PositionState::Unknown => None,
        };
        self.state = PositionState::Failed { reason, last_known };
    }

    /// Start watching `source`, delivering observations to `sink` until the
    /// source ends or the receiving side goes away.
    ///
    /// Each wait for the next observation is bounded by the configured
    /// timeout; an elapsed wait is reported as [`PositionError::Timeout`] and
    /// the watch carries on. Fixes older than the configured maximum age are
    /// dropped.
    pub fn start_watching<F>(&self, source: &dyn GeolocationSource, sink: F) -> JoinHandle<()>
    where
        F: Fn(Result<Fix, PositionError>) -> bool + Send + 'static,
    {
        let options = self.options.clone();
        let mut stream = source.watch(&options);

        tokio::spawn(async move {
            loop {
                let observation = match tokio::time::timeout(options.timeout, stream.next()).await
                {
                    Ok(Some(observation)) => observation,
                    Ok(None) => {
                        tracing::debug!("Geolocation source ended");
                        return;
                    }
                    Err(_elapsed) => Err(PositionError::Timeout),
                };

                if let Ok(fix) = &observation
                    && fix.age > options.maximum_age
                {
                    tracing::trace!(
                        "Discarding stale fix {} ({:?} old)",
                        fix.position,
                        fix.age
                    );
                    continue;
                }

                if !sink(observation) {
                    tracing::debug!("Position receiver closed, stopping watch");
                    return;
                }
            }
        })
    }
}

/// Sending half of a [`ChannelGeolocation`], held by whatever receives the
/// platform's callbacks.
#[derive(Debug, Clone)]
pub struct GeolocationFeed {
    tx: mpsc::UnboundedSender<Result<Fix, PositionError>>,
}

impl GeolocationFeed {
    /// Deliver a success callback. Returns `false` once nobody is watching.
    pub fn send_fix(&self, fix: Fix) -> bool {
        self.tx.send(Ok(fix)).is_ok()
    }

    /// Deliver an error callback. Returns `false` once nobody is watching.
    pub fn send_error(&self, reason: PositionError) -> bool {
        self.tx.send(Err(reason)).is_ok()
    }
}

/// Geolocation source fed from callbacks through a channel.
///
/// The stream can be watched once; later calls to `watch` yield an empty stream.
#[derive(Debug)]
pub struct ChannelGeolocation {
    rx: std::sync::Mutex<Option<mpsc::UnboundedReceiver<Result<Fix, PositionError>>>>,
}

impl ChannelGeolocation {
    pub fn new() -> (Self, GeolocationFeed) {
        let (tx, rx) = mpsc::unbounded_channel();
        (
            Self {
                rx: std::sync::Mutex::new(Some(rx)),
            },
            GeolocationFeed { tx },
        )
    }
}

impl GeolocationSource for ChannelGeolocation {
    fn watch(&self, options: &GeolocationOptions) -> BoxStream<'static, Result<Fix, PositionError>> {
        tracing::debug!(
            "Watching position (high_accuracy={}, maximum_age={:?}, timeout={:?})",
            options.high_accuracy,
            options.maximum_age,
            options.timeout
        );
        let rx = self.rx.lock().ok().and_then(|mut slot| slot.take());
        match rx {
            Some(mut rx) => futures::stream::poll_fn(move |cx| rx.poll_recv(cx)).boxed(),
            None => {
                tracing::warn!("Geolocation channel already watched");
                futures::stream::empty().boxed()
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert2::{check, let_assert};

    fn position(lat: f64, lon: f64) -> Position {
        Position::new(lat, lon).unwrap()
    }

    #[test]
    fn test_new_tracker_has_no_position() {
        let tracker = PositionTracker::new(GeolocationOptions::default());
        check!(tracker.current().is_none());
        check!(tracker.state() == &PositionState::Unknown);
    }

    #[test]
    fn test_fix_supersedes_previous() {
        let mut tracker = PositionTracker::default();
        tracker.record_fix(Fix::fresh(position(51.0, -1.0)));
        tracker.record_fix(Fix::fresh(position(52.0, -2.0)));
        check!(tracker.current() == Some(position(52.0, -2.0)));
    }

    #[test]
    fn test_failure_withholds_bias_but_remembers_last_fix() {
        let mut tracker = PositionTracker::default();
        tracker.record_fix(Fix::fresh(position(51.0, -1.0)));
        tracker.record_failure(PositionError::PermissionDenied);

        check!(tracker.current().is_none());
        let_assert!(PositionState::Failed { reason, last_known } = tracker.state());
        check!(reason == &PositionError::PermissionDenied);
        check!(*last_known == Some(position(51.0, -1.0)));

        tracker.record_fix(Fix::fresh(position(53.0, -3.0)));
        check!(tracker.current() == Some(position(53.0, -3.0)));
    }

    #[tokio::test(start_paused = true)]
    async fn test_timeout_keeps_fix_until_maximum_age() {
        let mut tracker = PositionTracker::default();
        tracker.record_fix(Fix {
            position: position(51.0, -1.0),
            age: Duration::from_secs(10),
        });

        tokio::time::advance(Duration::from_secs(21)).await;
        tracker.record_failure(PositionError::Timeout);
        check!(tracker.current() == Some(position(51.0, -1.0)));

        // 10s old on arrival plus 51s since: past the 60s maximum age.
        tokio::time::advance(Duration::from_secs(30)).await;
        check!(tracker.current().is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_unrefreshed_fix_expires() {
        let mut tracker = PositionTracker::default();
        tracker.record_fix(Fix::fresh(position(51.0, -1.0)));

        tokio::time::advance(Duration::from_secs(60)).await;
        check!(tracker.current() == Some(position(51.0, -1.0)));
        tokio::time::advance(Duration::from_secs(1)).await;
        check!(tracker.current().is_none());
    }

    #[tokio::test]
    async fn test_watch_forwards_fixes_and_errors() {
        let (source, feed) = ChannelGeolocation::new();
        let (tx, mut rx) = mpsc::unbounded_channel();
        let tracker = PositionTracker::default();
        let _watch = tracker.start_watching(&source, move |obs| tx.send(obs).is_ok());

        feed.send_fix(Fix::fresh(position(51.0, -1.0)));
        feed.send_error(PositionError::PermissionDenied);

        check!(rx.recv().await == Some(Ok(Fix::fresh(position(51.0, -1.0)))));
        check!(rx.recv().await == Some(Err(PositionError::PermissionDenied)));
    }

    #[tokio::test]
    async fn test_watch_drops_stale_fixes() {
        let (source, feed) = ChannelGeolocation::new();
        let (tx, mut rx) = mpsc::unbounded_channel();
        let tracker = PositionTracker::default();
        let _watch = tracker.start_watching(&source, move |obs| tx.send(obs).is_ok());

        feed.send_fix(Fix {
            position: position(10.0, 10.0),
            age: Duration::from_secs(61),
        });
        feed.send_fix(Fix {
            position: position(20.0, 20.0),
            age: Duration::from_secs(59),
        });

        let_assert!(Some(Ok(fix)) = rx.recv().await);
        check!(fix.position == position(20.0, 20.0));
    }

    #[tokio::test(start_paused = true)]
    async fn test_silent_source_reports_timeout_and_keeps_watching() {
        let (source, feed) = ChannelGeolocation::new();
        let (tx, mut rx) = mpsc::unbounded_channel();
        let tracker = PositionTracker::default();
        let _watch = tracker.start_watching(&source, move |obs| tx.send(obs).is_ok());

        check!(rx.recv().await == Some(Err(PositionError::Timeout)));

        feed.send_fix(Fix::fresh(position(51.0, -1.0)));
        check!(rx.recv().await == Some(Ok(Fix::fresh(position(51.0, -1.0)))));
    }

    #[tokio::test]
    async fn test_second_watch_is_empty() {
        let (source, _feed) = ChannelGeolocation::new();
        let _first = source.watch(&GeolocationOptions::default());
        let mut second = source.watch(&GeolocationOptions::default());
        check!(second.next().await.is_none());
    }
}
