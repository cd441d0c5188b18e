//! Web search against a Serper-compatible search API.
//!
//! The pipeline only depends on the [`SearchClient`] trait; [`SerperClient`]
//! is the HTTP implementation and [`CachedSearch`] wraps any client with a
//! bounded, expiring response cache.

mod cache;

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use tracing::{debug, instrument, warn};

use docrelay_shared::{RelayError, Result, SearchFailure, SearchResponse, SearchResult};

pub use cache::{CacheKey, CachedSearch, SearchCache};

/// Default timeout for search API calls.
const DEFAULT_TIMEOUT_SECS: u64 = 30;

/// Longest upstream error body kept in a [`SearchFailure::Upstream`].
const MAX_ERROR_BODY: usize = 512;

/// User-Agent string for search requests.
const USER_AGENT: &str = concat!("docrelay/", env!("CARGO_PKG_VERSION"));

// ---------------------------------------------------------------------------
// Query + trait
// ---------------------------------------------------------------------------

/// Parameters of one search call.
#[derive(Debug, Clone)]
pub struct SearchQuery {
    /// Free-text query as typed by the user.
    pub query: String,
    /// Restrict results to this site (`site:<site>` filter).
    pub site: Option<String>,
    /// Number of results requested from the API.
    pub num_results: usize,
    pub timeout: Duration,
}

impl SearchQuery {
    pub fn new(query: impl Into<String>, site: Option<String>, num_results: usize) -> Self {
        Self {
            query: query.into(),
            site,
            num_results,
            timeout: Duration::from_secs(DEFAULT_TIMEOUT_SECS),
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// The query string sent upstream, including any site filter.
    pub fn upstream_query(&self) -> String {
        match &self.site {
            Some(site) => format!("site:{site} {}", self.query),
            None => self.query.clone(),
        }
    }
}

/// Something that can turn a query into ranked results.
#[async_trait]
pub trait SearchClient: Send + Sync {
    /// Run one search. Fails with [`RelayError::SearchFailed`].
    async fn search(&self, query: &SearchQuery) -> Result<SearchResponse>;
}

// ---------------------------------------------------------------------------
// Serper client
// ---------------------------------------------------------------------------

/// HTTP client for the Serper search API (`POST {"q", "num"}` with `X-API-KEY`).
pub struct SerperClient {
    client: Client,
    endpoint: String,
    api_key: Option<String>,
}

impl SerperClient {
    /// Build a client for `endpoint`. A missing key is reported per call.
    pub fn new(endpoint: impl Into<String>, api_key: Option<String>) -> Result<Self> {
        let client = Client::builder()
            .user_agent(USER_AGENT)
            .build()
            .map_err(|e| RelayError::Network(format!("failed to build HTTP client: {e}")))?;

        Ok(Self {
            client,
            endpoint: endpoint.into(),
            api_key,
        })
    }
}

#[async_trait]
impl SearchClient for SerperClient {
    #[instrument(skip_all, fields(q = %query.query, site = ?query.site, num = query.num_results))]
    async fn search(&self, query: &SearchQuery) -> Result<SearchResponse> {
        let api_key = self
            .api_key
            .as_deref()
            .ok_or(SearchFailure::Unauthorized)?;

        let payload = serde_json::json!({
            "q": query.upstream_query(),
            "num": query.num_results,
        });

        let response = self
            .client
            .post(&self.endpoint)
            .header("X-API-KEY", api_key)
            .timeout(query.timeout)
            .json(&payload)
            .send()
            .await
            .map_err(|e| transport_failure(&e, query.timeout))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            warn!(status = status.as_u16(), "search API returned an error");
            return Err(SearchFailure::Upstream {
                status: status.as_u16(),
                body: truncate(&body, MAX_ERROR_BODY),
            }
            .into());
        }

        let raw: serde_json::Value = response
            .json()
            .await
            .map_err(|e| match transport_failure(&e, query.timeout) {
                SearchFailure::Network(msg) => SearchFailure::Decode(msg),
                other => other,
            })?;

        let results = parse_organic(&raw)?;
        debug!(results = results.len(), "search complete");

        Ok(SearchResponse { results, raw })
    }
}

/// Map a reqwest error to a search failure.
fn transport_failure(err: &reqwest::Error, timeout: Duration) -> SearchFailure {
    if err.is_timeout() {
        SearchFailure::Timeout {
            secs: timeout.as_secs(),
        }
    } else {
        SearchFailure::Network(err.to_string())
    }
}

/// Organic hit as returned by the API; every field may be absent.
#[derive(Debug, Deserialize)]
struct OrganicHit {
    title: Option<String>,
    link: Option<String>,
    snippet: Option<String>,
}

/// Extract the ranked `organic` results from a raw response.
fn parse_organic(raw: &serde_json::Value) -> Result<Vec<SearchResult>> {
    let Some(organic) = raw.get("organic") else {
        return Ok(Vec::new());
    };

    let hits: Vec<OrganicHit> = serde_json::from_value(organic.clone())
        .map_err(|e| SearchFailure::Decode(format!("organic results: {e}")))?;

    Ok(hits
        .into_iter()
        .map(|hit| SearchResult {
            title: hit.title.unwrap_or_else(|| "Untitled".into()),
            url: hit.link.unwrap_or_default(),
            snippet: hit.snippet.unwrap_or_else(|| "No description".into()),
        })
        .collect())
}

fn truncate(s: &str, max: usize) -> String {
    if s.len() <= max {
        return s.to_string();
    }
    let mut end = max;
    while !s.is_char_boundary(end) {
        end -= 1;
    }
    format!("{}…", &s[..end])
}
