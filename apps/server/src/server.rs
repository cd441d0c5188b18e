//! HTTP surface: event stream, search submission, cancellation, catalog.

use std::convert::Infallible;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};

use axum::extract::State;
use axum::http::{HeaderName, StatusCode, header};
use axum::response::sse::{Event as SseEvent, Sse};
use axum::response::{IntoResponse, Json, Response};
use axum::routing::{get, post};
use axum::Router;
use chrono::{DateTime, Utc};
use futures::StreamExt;
use serde::{Deserialize, Serialize};
use serde_json::json;
use tower_http::cors::CorsLayer;
use tower_http::services::ServeDir;
use tower_http::trace::TraceLayer;
use tracing::{info, warn};

use docrelay_core::{
    DocsRequest, PipelineRunner, SearchSettings, SearchTarget, SessionLimits, SessionRegistry,
    catalog, event_stream,
};
use docrelay_fetcher::{FetchLimits, HttpFetcher};
use docrelay_search::{CachedSearch, SearchCache, SerperClient};
use docrelay_shared::{AppConfig, RelayError, Result, SessionId, api_key};

const X_ACCEL_BUFFERING: HeaderName = HeaderName::from_static("x-accel-buffering");

/// Shared state accessible from axum handlers.
#[derive(Clone)]
pub(crate) struct AppState {
    pub registry: Arc<SessionRegistry>,
    pub pipeline: Arc<PipelineRunner>,
    pub start_time: Instant,
    pub started_at: DateTime<Utc>,
}

impl AppState {
    pub fn new(pipeline: Arc<PipelineRunner>) -> Self {
        Self {
            registry: Arc::clone(pipeline.registry()),
            pipeline,
            start_time: Instant::now(),
            started_at: Utc::now(),
        }
    }
}

/// Wire the real search client and fetcher into a pipeline runner.
pub(crate) fn build_pipeline(config: &AppConfig) -> Result<Arc<PipelineRunner>> {
    let key = api_key(config);
    if key.is_none() {
        warn!(
            env = %config.search.api_key_env,
            "search API key not set; searches will fail until it is provided"
        );
    }

    let serper = SerperClient::new(config.search.endpoint.clone(), key)?;
    let cache = SearchCache::new(
        config.search.cache_capacity,
        Duration::from_secs(config.search.cache_ttl_secs),
    );
    let search = Arc::new(CachedSearch::new(serper, cache));
    let fetcher = Arc::new(HttpFetcher::new()?);
    let registry = Arc::new(SessionRegistry::new(SessionLimits::from(config)));

    Ok(Arc::new(PipelineRunner::new(
        registry,
        search,
        fetcher,
        SearchSettings::from(config),
        FetchLimits::from(config),
    )))
}

/// Build the router with all routes and middleware.
pub(crate) fn router(state: AppState, demo_dir: Option<PathBuf>) -> Router {
    let mut app = Router::new()
        .route("/", get(root))
        .route("/health", get(health))
        .route("/sse", get(open_stream))
        .route("/search", post(submit_search))
        .route("/messages/get_docs_stream", post(submit_search))
        .route("/messages/get_docs_from_domain_stream", post(submit_search))
        .route("/cancel", post(cancel))
        .route("/libraries", get(libraries));

    if let Some(dir) = demo_dir.filter(|d| d.is_dir()) {
        info!(dir = %dir.display(), "serving demo files at /demo");
        app = app.nest_service(
            "/demo",
            ServeDir::new(dir).append_index_html_on_directories(true),
        );
    }

    app.layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}

/// Bind and serve until Ctrl-C, then close every open stream.
pub(crate) async fn serve(config: &AppConfig) -> color_eyre::eyre::Result<()> {
    let pipeline = build_pipeline(config)?;
    let state = AppState::new(pipeline);
    let registry = Arc::clone(&state.registry);
    let app = router(state, config.server.demo_dir.as_ref().map(PathBuf::from));

    let addr = format!("{}:{}", config.server.host, config.server.port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    info!(%addr, "docrelay listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            if let Err(e) = tokio::signal::ctrl_c().await {
                warn!(error = %e, "failed to listen for shutdown signal");
                return;
            }
            info!("shutdown requested");
            registry.close_all();
        })
        .await?;

    Ok(())
}

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

/// A [`RelayError`] rendered as a JSON HTTP response.
pub(crate) struct ApiError(RelayError);

impl From<RelayError> for ApiError {
    fn from(err: RelayError) -> Self {
        Self(err)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match &self.0 {
            err if err.is_client_error() => StatusCode::BAD_REQUEST,
            RelayError::NotFound { .. } => StatusCode::NOT_FOUND,
            RelayError::ResourceExhausted { .. } => StatusCode::SERVICE_UNAVAILABLE,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        };
        if status.is_server_error() {
            warn!(error = %self.0, %status, "request failed");
        }
        (status, Json(json!({ "error": self.0.to_string() }))).into_response()
    }
}

// ---------------------------------------------------------------------------
// Handlers
// ---------------------------------------------------------------------------

/// GET /
async fn root() -> Json<serde_json::Value> {
    Json(json!({ "message": "docrelay documentation search relay" }))
}

#[derive(Debug, Serialize)]
struct HealthResponse {
    status: &'static str,
    uptime_secs: u64,
    started_at: DateTime<Utc>,
    sessions: usize,
}

/// GET /health
async fn health(State(state): State<AppState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "healthy",
        uptime_secs: state.start_time.elapsed().as_secs(),
        started_at: state.started_at,
        sessions: state.registry.len(),
    })
}

/// GET /sse
async fn open_stream(State(state): State<AppState>) -> std::result::Result<Response, ApiError> {
    let subscription = state.registry.create()?;
    let frames = event_stream(Arc::clone(&state.registry), subscription)
        .map(|frame| Ok::<_, Infallible>(SseEvent::default().data(frame)));

    Ok((
        [
            (header::CACHE_CONTROL, "no-cache"),
            (X_ACCEL_BUFFERING, "no"),
        ],
        Sse::new(frames),
    )
        .into_response())
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct SearchBody {
    client_id: Option<String>,
    query: Option<String>,
    library: Option<String>,
    domain: Option<String>,
    num_results: Option<usize>,
    with_content: Option<bool>,
}

fn non_blank(value: Option<String>) -> Option<String> {
    value.filter(|v| !v.trim().is_empty())
}

impl SearchBody {
    /// Validate into a request for an existing session.
    fn into_request(self, settings: &SearchSettings) -> Result<DocsRequest> {
        let query = non_blank(self.query)
            .ok_or_else(|| RelayError::validation("'query' is required"))?;

        let target = match (non_blank(self.library), non_blank(self.domain)) {
            (Some(library), None) => SearchTarget::Library(library),
            (None, Some(domain)) => SearchTarget::Domain(domain),
            (None, None) => {
                return Err(RelayError::validation("one of 'library' or 'domain' is required"));
            }
            (Some(_), Some(_)) => {
                return Err(RelayError::validation(
                    "'library' and 'domain' are mutually exclusive",
                ));
            }
        };
        target.resolve()?;

        let client_id = non_blank(self.client_id)
            .ok_or_else(|| RelayError::validation("'client_id' is required"))?;

        Ok(DocsRequest {
            session: SessionId::from(client_id),
            query,
            target,
            num_results: self.num_results.unwrap_or(settings.num_results),
            with_content: self.with_content.unwrap_or(settings.with_content),
        })
    }
}

/// POST /search
async fn submit_search(
    State(state): State<AppState>,
    Json(body): Json<SearchBody>,
) -> std::result::Result<Json<serde_json::Value>, ApiError> {
    let request = body.into_request(state.pipeline.settings())?;
    if !state.registry.contains(&request.session) {
        return Err(RelayError::not_found(request.session.as_str()).into());
    }

    let client_id = request.session.clone();
    info!(session_id = %client_id, query = %request.query, target = ?request.target, "search submitted");
    state.pipeline.spawn(request);

    Ok(Json(json!({ "status": "processing", "client_id": client_id })))
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct CancelBody {
    client_id: Option<String>,
}

/// POST /cancel
async fn cancel(
    State(state): State<AppState>,
    Json(body): Json<CancelBody>,
) -> std::result::Result<Json<serde_json::Value>, ApiError> {
    let client_id = non_blank(body.client_id)
        .ok_or_else(|| RelayError::validation("'client_id' is required"))?;
    state.registry.request_cancel(&SessionId::from(client_id))?;
    Ok(Json(json!({ "status": "cancellation requested" })))
}

/// GET /libraries
async fn libraries() -> Json<serde_json::Value> {
    let libraries = catalog::libraries();
    let count = libraries.len();
    Json(json!({ "libraries": libraries, "count": count }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use axum::body::Body;
    use axum::http::Request;
    use docrelay_fetcher::ContentFetcher;
    use docrelay_search::{SearchClient, SearchQuery};
    use docrelay_shared::{DocPage, SearchResponse, SearchResult};
    use tower::ServiceExt;

    struct FakeSearch;

    #[async_trait]
    impl SearchClient for FakeSearch {
        async fn search(&self, query: &SearchQuery) -> Result<SearchResponse> {
            let results = (1..=query.num_results)
                .map(|i| SearchResult {
                    title: format!("Hit {i}"),
                    url: format!("https://docs.example.com/{i}"),
                    snippet: String::new(),
                })
                .collect();
            Ok(SearchResponse {
                results,
                raw: serde_json::Value::Null,
            })
        }
    }

    struct FakeFetcher;

    #[async_trait]
    impl ContentFetcher for FakeFetcher {
        async fn fetch(&self, url: &str, _limits: &FetchLimits) -> DocPage {
            DocPage::new("page", format!("body of {url}"), url)
        }
    }

    fn make_state(max_sessions: usize) -> AppState {
        let registry = Arc::new(SessionRegistry::new(SessionLimits {
            max_sessions,
            ..SessionLimits::default()
        }));
        let pipeline = Arc::new(PipelineRunner::new(
            registry,
            Arc::new(FakeSearch),
            Arc::new(FakeFetcher),
            SearchSettings::default(),
            FetchLimits::default(),
        ));
        AppState::new(pipeline)
    }

    fn post_json(uri: &str, body: serde_json::Value) -> Request<Body> {
        Request::builder()
            .method("POST")
            .uri(uri)
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(body.to_string()))
            .unwrap()
    }

    fn get(uri: &str) -> Request<Body> {
        Request::builder().uri(uri).body(Body::empty()).unwrap()
    }

    async fn json_body(resp: Response) -> serde_json::Value {
        let body = axum::body::to_bytes(resp.into_body(), 100_000)
            .await
            .unwrap();
        serde_json::from_slice(&body).unwrap()
    }

    /// Splits an SSE body into JSON `data:` payloads.
    struct FrameReader {
        stream: axum::body::BodyDataStream,
        buffer: String,
    }

    impl FrameReader {
        fn new(body: Body) -> Self {
            Self {
                stream: body.into_data_stream(),
                buffer: String::new(),
            }
        }

        async fn next(&mut self) -> serde_json::Value {
            loop {
                if let Some(end) = self.buffer.find("\n\n") {
                    let raw: String = self.buffer.drain(..end + 2).collect();
                    if let Some(data) = raw.lines().find_map(|l| l.strip_prefix("data: ")) {
                        return serde_json::from_str(data).unwrap();
                    }
                    continue;
                }
                let chunk = self.stream.next().await.unwrap().unwrap();
                self.buffer.push_str(std::str::from_utf8(&chunk).unwrap());
            }
        }
    }

    #[tokio::test]
    async fn health_reports_sessions() {
        let state = make_state(4);
        let _sub = state.registry.create().unwrap();
        let app = router(state, None);

        let resp = app.oneshot(get("/health")).await.unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        let parsed = json_body(resp).await;
        assert_eq!(parsed["status"], "healthy");
        assert_eq!(parsed["sessions"], 1);
        assert!(parsed["uptime_secs"].is_number());
    }

    #[tokio::test]
    async fn root_and_libraries() {
        let app = router(make_state(4), None);
        let resp = app.clone().oneshot(get("/")).await.unwrap();
        assert_eq!(resp.status(), StatusCode::OK);

        let parsed = json_body(app.oneshot(get("/libraries")).await.unwrap()).await;
        let count = parsed["count"].as_u64().unwrap() as usize;
        assert_eq!(count, catalog::len());
        assert!(parsed["libraries"]
            .as_array()
            .unwrap()
            .iter()
            .any(|l| l == "python"));
    }

    #[tokio::test]
    async fn sse_greets_with_client_id() {
        let state = make_state(4);
        let app = router(state.clone(), None);

        let resp = app.oneshot(get("/sse")).await.unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        assert_eq!(resp.headers()[header::CONTENT_TYPE], "text/event-stream");
        assert_eq!(resp.headers()["x-accel-buffering"], "no");

        let mut frames = FrameReader::new(resp.into_body());
        let hello = frames.next().await;
        assert_eq!(hello["type"], "info");
        assert_eq!(hello["message"], "connection established");
        let id = hello["client_id"].as_str().unwrap();
        assert!(state.registry.contains(&SessionId::from(id)));

        drop(frames);
        assert!(state.registry.is_empty());
    }

    #[tokio::test]
    async fn sse_over_capacity_is_503() {
        let state = make_state(1);
        let _held = state.registry.create().unwrap();
        let app = router(state, None);

        let resp = app.oneshot(get("/sse")).await.unwrap();
        assert_eq!(resp.status(), StatusCode::SERVICE_UNAVAILABLE);
        assert!(json_body(resp).await["error"].is_string());
    }

    #[tokio::test]
    async fn search_streams_results_to_session() {
        let app = router(make_state(4), None);

        let resp = app.clone().oneshot(get("/sse")).await.unwrap();
        let mut frames = FrameReader::new(resp.into_body());
        let hello = frames.next().await;
        let client_id = hello["client_id"].as_str().unwrap().to_string();

        let resp = app
            .oneshot(post_json(
                "/messages/get_docs_stream",
                json!({"client_id": client_id, "query": "tasks", "library": "rust", "num_results": 2}),
            ))
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        let ack = json_body(resp).await;
        assert_eq!(ack["status"], "processing");
        assert_eq!(ack["client_id"], client_id.as_str());

        let mut kinds: Vec<String> = Vec::new();
        while kinds.last().map(String::as_str) != Some("status:search completed") {
            let frame = frames.next().await;
            let kind = frame["type"].as_str().unwrap();
            kinds.push(match kind {
                "status" => format!("status:{}", frame["message"].as_str().unwrap()),
                "content" => {
                    assert!(frame["content"].as_str().unwrap().starts_with("body of"));
                    kind.to_string()
                }
                _ => kind.to_string(),
            });
        }

        assert_eq!(
            kinds,
            vec![
                "status:searching tasks in doc.rust-lang.org",
                "progress",
                "progress",
                "content",
                "progress",
                "content",
                "status:search completed",
            ]
        );
    }

    #[tokio::test]
    async fn cancel_notice_ends_stream() {
        let state = make_state(4);
        let app = router(state.clone(), None);

        let resp = app.clone().oneshot(get("/sse")).await.unwrap();
        let mut frames = FrameReader::new(resp.into_body());
        let client_id = frames.next().await["client_id"].as_str().unwrap().to_string();

        let resp = app
            .oneshot(post_json("/cancel", json!({"client_id": client_id})))
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::OK);

        let notice = frames.next().await;
        assert_eq!(notice["message"], "operation cancelled");
        assert!(frames.stream.next().await.is_none());
        assert!(state.registry.is_empty());
    }

    #[tokio::test]
    async fn search_validation_errors() {
        let state = make_state(4);
        let sub = state.registry.create().unwrap();
        let id = sub.id.as_str().to_string();
        let app = router(state, None);

        let cases = [
            (json!({"client_id": id, "library": "rust"}), StatusCode::BAD_REQUEST),
            (json!({"client_id": id, "query": "q"}), StatusCode::BAD_REQUEST),
            (
                json!({"client_id": id, "query": "q", "library": "rust", "domain": "docs.rs"}),
                StatusCode::BAD_REQUEST,
            ),
            (json!({"client_id": id, "query": "q", "library": "cobol"}), StatusCode::BAD_REQUEST),
            (json!({"client_id": id, "query": "q", "domain": "nodots"}), StatusCode::BAD_REQUEST),
            (json!({"query": "q", "library": "rust"}), StatusCode::BAD_REQUEST),
            (
                json!({"client_id": "not-a-session", "query": "q", "library": "rust"}),
                StatusCode::NOT_FOUND,
            ),
        ];

        for (body, expected) in cases {
            let resp = app
                .clone()
                .oneshot(post_json("/search", body.clone()))
                .await
                .unwrap();
            assert_eq!(resp.status(), expected, "body: {body}");
        }
    }

    #[tokio::test]
    async fn cancel_known_and_unknown() {
        let state = make_state(4);
        let sub = state.registry.create().unwrap();
        let app = router(state.clone(), None);

        let resp = app
            .clone()
            .oneshot(post_json("/cancel", json!({"client_id": sub.id.as_str()})))
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        assert_eq!(json_body(resp).await["status"], "cancellation requested");
        assert!(state.registry.is_cancelled(&sub.id));

        let resp = app
            .clone()
            .oneshot(post_json("/cancel", json!({"client_id": "ghost"})))
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::NOT_FOUND);

        let resp = app.oneshot(post_json("/cancel", json!({}))).await.unwrap();
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn unknown_route_returns_404() {
        let app = router(make_state(4), None);
        let resp = app.oneshot(get("/nonexistent")).await.unwrap();
        assert_eq!(resp.status(), StatusCode::NOT_FOUND);
    }
}
