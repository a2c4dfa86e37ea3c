pub mod config;
pub mod controller;
pub mod error;
pub mod fetcher;
pub mod history;
pub mod map;
pub mod position;
pub mod query_state;
pub mod tracing;
pub mod types;
pub mod view;

pub use config::Config;
pub use controller::{Collaborators, ControllerHandle, ControllerState, Event, SearchController};
pub use error::{ConfigError, FetchError, PositionError, SnapshotError};
pub use fetcher::{HttpResultsFetcher, ResultsFetcher};
pub use history::{HistoryBridge, InMemoryHistory, NavigationHistory};
pub use map::{MapMarkerSync, MapSurface, MemoryMap};
pub use position::{ChannelGeolocation, GeolocationSource, PositionTracker};
pub use query_state::QueryState;
pub use types::{Fix, Position, Query, ResultRecord, ResultSet};
pub use view::{NullView, PageView};
