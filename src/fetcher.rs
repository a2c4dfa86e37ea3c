//! Search requests against the places endpoint.
//!
//! The query travels as the `q` parameter (omitted when empty, so the request
//! URL matches the shareable page URL), while the user's position travels in a
//! header and never appears in the URL.

use crate::config::SearchConfig;
use crate::error::{ConfigError, FetchError};
use crate::types::{Position, Query, ResultRecord, ResultSet};
use futures::FutureExt;
use futures::future::BoxFuture;
use reqwest::header::{ACCEPT, HeaderName, HeaderValue};
use reqwest::{Client, Request, Url};
use serde::Deserialize;

/// Issues one search request and resolves to the result set it produced.
///
/// Implementations are stateless between calls and never retry.
pub trait ResultsFetcher: Send + Sync {
    fn fetch(
        &self,
        query: &Query,
        position: Option<Position>,
    ) -> BoxFuture<'static, Result<ResultSet, FetchError>>;
}

/// [`ResultsFetcher`] talking HTTP to the search endpoint.
#[derive(Debug, Clone)]
pub struct HttpResultsFetcher {
    client: Client,
    endpoint: Url,
    position_header: HeaderName,
    page_size: Option<u32>,
}

impl HttpResultsFetcher {
    pub fn new(config: &SearchConfig) -> Result<Self, ConfigError> {
        let endpoint = config.endpoint()?;
        let position_header = HeaderName::from_bytes(config.position_header.as_bytes())
            .map_err(|_| ConfigError::PositionHeader(config.position_header.clone()))?;
        let client = Client::builder()
            .timeout(config.request_timeout)
            .build()
            .map_err(|e| ConfigError::HttpClient(e.to_string()))?;

        Ok(Self {
            client,
            endpoint,
            position_header,
            page_size: config.page_size,
        })
    }

    /// Compose the request for `query`, biased by `position` when given.
    pub fn build_request(
        &self,
        query: &Query,
        position: Option<Position>,
    ) -> Result<Request, FetchError> {
        let mut url = self.endpoint.clone();
        {
            let mut pairs = url.query_pairs_mut();
            if !query.is_empty() {
                pairs.append_pair("q", query.as_str());
            }
            if let Some(count) = self.page_size {
                pairs.append_pair("count", &count.to_string());
            }
        }
        // An empty serializer still leaves a bare `?` behind.
        if url.query() == Some("") {
            url.set_query(None);
        }

        let mut builder = self
            .client
            .get(url)
            .header(ACCEPT, HeaderValue::from_static("application/json"));
        if let Some(position) = position {
            builder = builder.header(self.position_header.clone(), position.header_value());
        }
        builder.build().map_err(FetchError::from)
    }
}

impl ResultsFetcher for HttpResultsFetcher {
    fn fetch(
        &self,
        query: &Query,
        position: Option<Position>,
    ) -> BoxFuture<'static, Result<ResultSet, FetchError>> {
        let request = self.build_request(query, position);
        let client = self.client.clone();
        let query = query.clone();

        async move {
            let request = request?;
            tracing::debug!("GET {}", request.url());

            let response = client.execute(request).await?;
            let status = response.status();
            if !status.is_success() {
                return Err(FetchError::Status(status.as_u16()));
            }

            let body = response.bytes().await?;
            let document: SearchDocument =
                serde_json::from_slice(&body).map_err(|e| FetchError::Decode(e.to_string()))?;
            Ok(document.into_result_set(query))
        }
        .boxed()
    }
}

/// Search response body. Accepts the HAL shape (`_embedded.results`) and a
/// flat `results` list.
#[derive(Debug, Deserialize)]
pub struct SearchDocument {
    #[serde(default)]
    pub query: Option<String>,
    /// Total number of hits on the server, across all pages.
    #[serde(default)]
    pub size: Option<u64>,
    #[serde(default)]
    pub results: Vec<WireRecord>,
    #[serde(rename = "_embedded", default)]
    pub embedded: Option<Embedded>,
}

#[derive(Debug, Default, Deserialize)]
pub struct Embedded {
    #[serde(default)]
    pub results: Vec<WireRecord>,
}

#[derive(Debug, Deserialize)]
pub struct WireRecord {
    #[serde(alias = "title")]
    pub name: String,
    #[serde(default)]
    pub lat: Option<f64>,
    #[serde(default)]
    pub lon: Option<f64>,
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

impl SearchDocument {
    /// Convert into a result set that echoes `requested` rather than the
    /// server's copy of the query, keeping URL and state consistent.
    pub fn into_result_set(self, requested: Query) -> ResultSet {
        if let Some(echoed) = &self.query
            && echoed != requested.as_str()
        {
            tracing::debug!("Server normalized query '{}' to '{}'", requested, echoed);
        }

        let mut wire = self.results;
        if let Some(embedded) = self.embedded {
            wire.extend(embedded.results);
        }

        let total = wire.len();
        let records: Vec<ResultRecord> = wire
            .into_iter()
            .filter_map(|record| {
                let (Some(lat), Some(lon)) = (record.lat, record.lon) else {
                    tracing::warn!("Dropping result '{}' without coordinates", record.name);
                    return None;
                };
                let position = match Position::new(lat, lon) {
                    Ok(position) => position,
                    Err(e) => {
                        tracing::warn!("Dropping result '{}': {}", record.name, e);
                        return None;
                    }
                };
                Some(ResultRecord {
                    title: record.name,
                    latitude: position.latitude,
                    longitude: position.longitude,
                    extra: record.extra,
                })
            })
            .collect();

        tracing::debug!(
            "Search '{}' returned {} of {} records ({} total hits)",
            requested,
            records.len(),
            total,
            self.size.map_or_else(|| "?".to_string(), |s| s.to_string())
        );

        ResultSet::new(requested, records)
    }
}
