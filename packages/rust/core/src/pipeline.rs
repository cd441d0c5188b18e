//! Documentation-search pipeline: resolve site → search → fetch → publish.
//!
//! A run is independent of the connection that will receive its events.
//! Everything it has to say goes through [`SessionRegistry::publish`], and
//! cancellation is checked once per result before any work on it starts.

use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tracing::{debug, error, info, instrument, warn};

use docrelay_fetcher::{ContentFetcher, FetchLimits};
use docrelay_search::{SearchClient, SearchQuery};
use docrelay_shared::{AppConfig, Event, RelayError, Result, SessionId};

use crate::catalog;
use crate::session::SessionRegistry;

/// Upper bound on results processed per request.
pub const MAX_RESULTS: usize = 20;

/// What to restrict the search to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SearchTarget {
    /// A key from the library catalog, e.g. `"python"`.
    Library(String),
    /// A raw domain or URL, e.g. `"docs.rs"`.
    Domain(String),
}

impl SearchTarget {
    /// Resolve to the `site:` filter used for the search.
    pub fn resolve(&self) -> Result<String> {
        match self {
            Self::Library(library) => catalog::lookup(library)
                .map(str::to_string)
                .ok_or_else(|| RelayError::UnsupportedLibrary {
                    library: library.clone(),
                }),
            Self::Domain(domain) => catalog::normalize_domain(domain),
        }
    }
}

/// One documentation request bound to a session.
#[derive(Debug, Clone)]
pub struct DocsRequest {
    pub session: SessionId,
    pub query: String,
    pub target: SearchTarget,
    pub num_results: usize,
    /// Fetch and publish page text for each result.
    pub with_content: bool,
}

/// How a run finished when it did not fail.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PipelineOutcome {
    Completed { delivered: usize },
    /// Stopped at a checkpoint after `processed` results.
    Cancelled { processed: usize },
}

/// Search defaults taken from `[search]` / `[fetch]`.
#[derive(Debug, Clone)]
pub struct SearchSettings {
    pub num_results: usize,
    pub timeout: Duration,
    pub with_content: bool,
}

impl Default for SearchSettings {
    fn default() -> Self {
        Self {
            num_results: 5,
            timeout: Duration::from_secs(30),
            with_content: true,
        }
    }
}

impl From<&AppConfig> for SearchSettings {
    fn from(config: &AppConfig) -> Self {
        Self {
            num_results: config.search.num_results.clamp(1, MAX_RESULTS),
            timeout: Duration::from_secs(config.search.timeout_secs),
            with_content: config.fetch.with_content,
        }
    }
}

/// Runs documentation requests against a search client and a fetcher.
pub struct PipelineRunner {
    registry: Arc<SessionRegistry>,
    search: Arc<dyn SearchClient>,
    fetcher: Arc<dyn ContentFetcher>,
    settings: SearchSettings,
    fetch_limits: FetchLimits,
}

impl PipelineRunner {
    pub fn new(
        registry: Arc<SessionRegistry>,
        search: Arc<dyn SearchClient>,
        fetcher: Arc<dyn ContentFetcher>,
        settings: SearchSettings,
        fetch_limits: FetchLimits,
    ) -> Self {
        Self {
            registry,
            search,
            fetcher,
            settings,
            fetch_limits,
        }
    }

    pub fn registry(&self) -> &Arc<SessionRegistry> {
        &self.registry
    }

    pub fn settings(&self) -> &SearchSettings {
        &self.settings
    }

    /// Start a run in the background.
    ///
    /// The run executes inside its own task under a supervisor; if it panics
    /// the supervisor publishes an `Error` event instead of letting the
    /// fault reach the runtime.
    pub fn spawn(self: &Arc<Self>, request: DocsRequest) -> JoinHandle<()> {
        let runner = Arc::clone(self);
        tokio::spawn(async move {
            let session = request.session.clone();
            let worker = {
                let runner = Arc::clone(&runner);
                tokio::spawn(async move { runner.run(request).await })
            };

            match worker.await {
                Ok(_) => {}
                Err(join_err) if join_err.is_panic() => {
                    error!(session_id = %session, "pipeline task panicked");
                    runner
                        .registry
                        .publish(&session, Event::error("internal error while processing request"))
                        .await;
                }
                Err(join_err) => {
                    warn!(session_id = %session, error = %join_err, "pipeline task aborted");
                }
            }
        })
    }

    /// Run one request to completion, publishing any failure as an `Error`
    /// event before returning it.
    #[instrument(skip_all, fields(session_id = %request.session, query = %request.query))]
    pub async fn run(&self, request: DocsRequest) -> Result<PipelineOutcome> {
        let session = request.session.clone();
        match self.execute(request).await {
            Ok(outcome) => {
                info!(?outcome, "pipeline finished");
                Ok(outcome)
            }
            Err(err) => {
                warn!(error = %err, "pipeline failed");
                self.registry
                    .publish(&session, Event::error(err.to_string()))
                    .await;
                Err(err)
            }
        }
    }

    async fn execute(&self, request: DocsRequest) -> Result<PipelineOutcome> {
        let DocsRequest {
            session,
            query,
            target,
            num_results,
            with_content,
        } = request;

        let site = target.resolve()?;
        let wanted = num_results.clamp(1, MAX_RESULTS);

        self.publish(&session, Event::status(format!("searching {query} in {site}")))
            .await;

        let search_query =
            SearchQuery::new(query, Some(site), wanted).with_timeout(self.settings.timeout);
        let response = self.search.search(&search_query).await?;

        let results: Vec<_> = response.results.into_iter().take(wanted).collect();
        let total = results.len();
        info!(total, "search returned results");
        self.publish(
            &session,
            Event::progress(0, total, format!("found {total} results")),
        )
        .await;

        for (rank, result) in results.into_iter().enumerate() {
            if self.registry.is_cancelled(&session) {
                info!(processed = rank, "cancellation observed");
                return Ok(PipelineOutcome::Cancelled { processed: rank });
            }

            self.publish(&session, Event::progress(rank + 1, total, result.title.clone()))
                .await;

            if !with_content {
                continue;
            }
            if result.url.is_empty() {
                debug!(rank, "result has no URL, skipping fetch");
                continue;
            }

            let page = self.fetcher.fetch(&result.url, &self.fetch_limits).await;
            self.publish(&session, Event::content(result.title, result.url, page.text))
                .await;
        }

        self.publish(&session, Event::status("search completed"))
            .await;
        Ok(PipelineOutcome::Completed { delivered: total })
    }

    async fn publish(&self, session: &SessionId, event: Event) {
        self.registry.publish(session, event).await;
    }
}
