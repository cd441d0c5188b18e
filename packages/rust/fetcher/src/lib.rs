//! Page retrieval and readable-text extraction.
//!
//! This crate provides:
//! - [`ContentFetcher`], the contract the pipeline depends on
//! - [`HttpFetcher`], a reqwest-based implementation with size and time limits
//!
//! A fetch never fails: any problem (timeout, oversize body, non-200 status,
//! blocked address) comes back as a [`DocPage`] describing what went wrong.

mod extract;
mod guard;

use std::time::Duration;

use async_trait::async_trait;
use reqwest::header::LOCATION;
use reqwest::{Client, StatusCode};
use tracing::{debug, instrument, warn};
use url::Url;

use docrelay_shared::{AppConfig, DocPage, RelayError, Result};

/// Browser-like User-Agent; some documentation hosts reject unknown agents.
const USER_AGENT: &str = "Mozilla/5.0 (X11; Linux x86_64) AppleWebKit/537.36 \
                          (KHTML, like Gecko) Chrome/124.0 Safari/537.36";

const MAX_REDIRECTS: usize = 5;

// ---------------------------------------------------------------------------
// Limits + trait
// ---------------------------------------------------------------------------

/// Per-fetch limits.
#[derive(Debug, Clone)]
pub struct FetchLimits {
    pub timeout: Duration,
    /// Largest body accepted, in bytes.
    pub max_bytes: usize,
    /// Allow loopback/private targets (local testing only).
    pub allow_private_hosts: bool,
}

impl Default for FetchLimits {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(30),
            max_bytes: 500_000,
            allow_private_hosts: false,
        }
    }
}

impl From<&AppConfig> for FetchLimits {
    fn from(config: &AppConfig) -> Self {
        Self {
            timeout: Duration::from_secs(config.fetch.timeout_secs),
            max_bytes: config.fetch.max_bytes,
            allow_private_hosts: config.fetch.allow_private_hosts,
        }
    }
}

/// Retrieves a URL and reduces it to readable text.
#[async_trait]
pub trait ContentFetcher: Send + Sync {
    /// Fetch `url`. Always returns a renderable page.
    async fn fetch(&self, url: &str, limits: &FetchLimits) -> DocPage;
}

// ---------------------------------------------------------------------------
// Failures
// ---------------------------------------------------------------------------

/// Why a page could not be retrieved. Rendered into a [`DocPage`].
#[derive(Debug, thiserror::Error)]
enum FetchFailure {
    #[error("'{0}' is not a valid URL")]
    InvalidUrl(String),

    #[error("refusing to fetch a private or non-HTTP address")]
    Blocked,

    #[error("stopped after {max} redirects")]
    TooManyRedirects { max: usize },

    #[error("could not retrieve content: {code} {reason}")]
    Status { code: u16, reason: String },

    #[error("page exceeds the maximum allowed size of {}KB", .max_bytes / 1024)]
    TooLarge { max_bytes: usize },

    #[error("could not retrieve content within the {secs} second time limit")]
    Timeout { secs: u64 },

    #[error("an error occurred: {0}")]
    Transport(String),
}

impl FetchFailure {
    fn title(&self) -> String {
        match self {
            Self::InvalidUrl(_) => "Invalid URL".into(),
            Self::Blocked => "Blocked URL".into(),
            Self::TooManyRedirects { .. } => "Too many redirects".into(),
            Self::Status { code, .. } => format!("Error {code}"),
            Self::TooLarge { .. } => "Content too large".into(),
            Self::Timeout { .. } => "Timed out".into(),
            Self::Transport(_) => "Fetch failed".into(),
        }
    }

    fn into_page(self, url: &str) -> DocPage {
        DocPage::new(self.title(), self.to_string(), url)
    }

    fn from_reqwest(err: reqwest::Error, limits: &FetchLimits) -> Self {
        if err.is_timeout() {
            Self::Timeout {
                secs: limits.timeout.as_secs(),
            }
        } else {
            Self::Transport(err.to_string())
        }
    }
}

// ---------------------------------------------------------------------------
// HttpFetcher
// ---------------------------------------------------------------------------

/// Refuse `url` unless the limits allow it.
fn check_target(url: &Url, limits: &FetchLimits) -> std::result::Result<(), FetchFailure> {
    if guard::is_blocked_target(url, limits.allow_private_hosts) {
        warn!(%url, "blocked fetch of private address");
        return Err(FetchFailure::Blocked);
    }
    Ok(())
}

/// Resolve a `Location` header against the current URL and vet the result.
fn next_hop(
    current: &Url,
    location: &str,
    limits: &FetchLimits,
) -> std::result::Result<Url, FetchFailure> {
    let next = current
        .join(location)
        .map_err(|_| FetchFailure::InvalidUrl(location.to_string()))?;
    check_target(&next, limits)?;
    Ok(next)
}

/// [`ContentFetcher`] over HTTP(S).
///
/// Redirects are followed by hand so every hop passes the address guard.
pub struct HttpFetcher {
    client: Client,
}

impl HttpFetcher {
    pub fn new() -> Result<Self> {
        let client = Client::builder()
            .user_agent(USER_AGENT)
            .redirect(reqwest::redirect::Policy::none())
            .build()
            .map_err(|e| RelayError::Network(format!("failed to build HTTP client: {e}")))?;

        Ok(Self { client })
    }

    async fn try_fetch(
        &self,
        url: &str,
        limits: &FetchLimits,
    ) -> std::result::Result<DocPage, FetchFailure> {
        let mut target = Url::parse(url).map_err(|_| FetchFailure::InvalidUrl(url.to_string()))?;
        check_target(&target, limits)?;

        let mut hops = 0;
        let mut response = loop {
            let response = self
                .client
                .get(target.clone())
                .timeout(limits.timeout)
                .send()
                .await
                .map_err(|e| FetchFailure::from_reqwest(e, limits))?;

            let location = response
                .status()
                .is_redirection()
                .then(|| response.headers().get(LOCATION))
                .flatten()
                .and_then(|value| value.to_str().ok())
                .map(str::to_owned);
            let Some(location) = location else {
                break response;
            };

            if hops == MAX_REDIRECTS {
                return Err(FetchFailure::TooManyRedirects { max: MAX_REDIRECTS });
            }
            hops += 1;
            target = next_hop(&target, &location, limits)?;
            debug!(%target, hops, "following redirect");
        };

        let status = response.status();
        if status != StatusCode::OK {
            return Err(FetchFailure::Status {
                code: status.as_u16(),
                reason: status.canonical_reason().unwrap_or_default().to_string(),
            });
        }

        let too_large = || FetchFailure::TooLarge {
            max_bytes: limits.max_bytes,
        };
        if response
            .content_length()
            .is_some_and(|len| len > limits.max_bytes as u64)
        {
            return Err(too_large());
        }

        let final_url = response.url().to_string();

        // Content-Length may be absent or wrong, so enforce the limit while streaming.
        let mut body: Vec<u8> = Vec::new();
        while let Some(chunk) = response
            .chunk()
            .await
            .map_err(|e| FetchFailure::from_reqwest(e, limits))?
        {
            if body.len() + chunk.len() > limits.max_bytes {
                return Err(too_large());
            }
            body.extend_from_slice(&chunk);
        }

        let html = String::from_utf8_lossy(&body);
        let (title, text) = extract::extract_page(&html);
        debug!(%final_url, bytes = body.len(), chars = text.len(), "page extracted");

        Ok(DocPage::new(title, text, final_url))
    }
}

#[async_trait]
impl ContentFetcher for HttpFetcher {
    #[instrument(skip_all, fields(url = %url))]
    async fn fetch(&self, url: &str, limits: &FetchLimits) -> DocPage {
        match self.try_fetch(url, limits).await {
            Ok(page) => page,
            Err(failure) => {
                debug!(%url, error = %failure, "fetch failed");
                failure.into_page(url)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn local_limits() -> FetchLimits {
        FetchLimits {
            timeout: Duration::from_secs(5),
            max_bytes: 10_000,
            allow_private_hosts: true,
        }
    }

    async fn serve(server: &MockServer, route: &str, template: ResponseTemplate) {
        Mock::given(method("GET"))
            .and(path(route))
            .respond_with(template)
            .mount(server)
            .await;
    }

    #[tokio::test]
    async fn fetches_and_extracts_page() {
        let server = MockServer::start().await;
        let html = r#"<html><head><title>Queues</title></head><body>
            <nav>menu</nav><main><h1>asyncio.Queue</h1><p>A FIFO queue.</p></main>
        </body></html>"#;
        serve(
            &server,
            "/queue",
            ResponseTemplate::new(200).set_body_string(html),
        )
        .await;

        let fetcher = HttpFetcher::new().unwrap();
        let url = format!("{}/queue", server.uri());
        let page = fetcher.fetch(&url, &local_limits()).await;

        assert_eq!(page.title, "Queues");
        assert_eq!(page.text, "asyncio.Queue A FIFO queue.");
        assert_eq!(page.source, url);
    }

    #[tokio::test]
    async fn non_200_becomes_error_page() {
        let server = MockServer::start().await;
        serve(&server, "/missing", ResponseTemplate::new(404)).await;

        let fetcher = HttpFetcher::new().unwrap();
        let page = fetcher
            .fetch(&format!("{}/missing", server.uri()), &local_limits())
            .await;

        assert_eq!(page.title, "Error 404");
        assert!(page.text.contains("404 Not Found"));
    }

    #[tokio::test]
    async fn slow_page_becomes_timeout_page() {
        let server = MockServer::start().await;
        serve(
            &server,
            "/slow",
            ResponseTemplate::new(200)
                .set_body_string("<main>late</main>")
                .set_delay(Duration::from_secs(3)),
        )
        .await;

        let limits = FetchLimits {
            timeout: Duration::from_millis(200),
            ..local_limits()
        };
        let fetcher = HttpFetcher::new().unwrap();
        let page = fetcher
            .fetch(&format!("{}/slow", server.uri()), &limits)
            .await;

        assert_eq!(page.title, "Timed out");
        assert!(page.text.contains("time limit"));
    }

    #[tokio::test]
    async fn oversize_body_is_rejected() {
        let server = MockServer::start().await;
        let big = format!("<main>{}</main>", "x".repeat(20_000));
        serve(
            &server,
            "/big",
            ResponseTemplate::new(200).set_body_string(big),
        )
        .await;

        let fetcher = HttpFetcher::new().unwrap();
        let page = fetcher
            .fetch(&format!("{}/big", server.uri()), &local_limits())
            .await;

        assert_eq!(page.title, "Content too large");
        assert!(page.text.contains("9KB"));
    }

    #[tokio::test]
    async fn private_hosts_blocked_by_default() {
        let server = MockServer::start().await;
        serve(
            &server,
            "/",
            ResponseTemplate::new(200).set_body_string("<main>secret</main>"),
        )
        .await;

        let fetcher = HttpFetcher::new().unwrap();
        let page = fetcher
            .fetch(&server.uri(), &FetchLimits::default())
            .await;

        assert_eq!(page.title, "Blocked URL");
        assert_eq!(page.source, server.uri());
    }

    #[tokio::test]
    async fn follows_redirects() {
        let server = MockServer::start().await;
        serve(
            &server,
            "/old",
            ResponseTemplate::new(301).insert_header("Location", "/new"),
        )
        .await;
        serve(
            &server,
            "/new",
            ResponseTemplate::new(200).set_body_string("<main>moved here</main>"),
        )
        .await;

        let fetcher = HttpFetcher::new().unwrap();
        let page = fetcher
            .fetch(&format!("{}/old", server.uri()), &local_limits())
            .await;

        assert_eq!(page.text, "moved here");
        assert_eq!(page.source, format!("{}/new", server.uri()));
    }

    #[tokio::test]
    async fn redirect_to_non_http_scheme_is_blocked() {
        let server = MockServer::start().await;
        serve(
            &server,
            "/jump",
            ResponseTemplate::new(302).insert_header("Location", "file:///etc/passwd"),
        )
        .await;

        let fetcher = HttpFetcher::new().unwrap();
        let page = fetcher
            .fetch(&format!("{}/jump", server.uri()), &local_limits())
            .await;

        assert_eq!(page.title, "Blocked URL");
    }

    #[tokio::test]
    async fn redirect_loop_is_bounded() {
        let server = MockServer::start().await;
        serve(
            &server,
            "/loop",
            ResponseTemplate::new(302).insert_header("Location", "/loop"),
        )
        .await;

        let fetcher = HttpFetcher::new().unwrap();
        let page = fetcher
            .fetch(&format!("{}/loop", server.uri()), &local_limits())
            .await;

        assert_eq!(page.title, "Too many redirects");
        assert_eq!(server.received_requests().await.unwrap().len(), MAX_REDIRECTS + 1);
    }

    #[test]
    fn redirect_hops_pass_the_guard() {
        let public = Url::parse("https://docs.example.com/guide").unwrap();
        let limits = FetchLimits::default();

        assert!(matches!(
            next_hop(&public, "http://169.254.169.254/latest/meta-data", &limits),
            Err(FetchFailure::Blocked)
        ));
        assert!(matches!(
            next_hop(&public, "http://[::ffff:127.0.0.1]/", &limits),
            Err(FetchFailure::Blocked)
        ));
        let next = next_hop(&public, "../api/", &limits).unwrap();
        assert_eq!(next.as_str(), "https://docs.example.com/api/");
    }

    #[tokio::test]
    async fn ipv4_mapped_loopback_is_blocked() {
        let server = MockServer::start().await;
        serve(
            &server,
            "/",
            ResponseTemplate::new(200).set_body_string("<main>internal secret</main>"),
        )
        .await;
        let port = server.address().port();

        let fetcher = HttpFetcher::new().unwrap();
        let page = fetcher
            .fetch(&format!("http://[::ffff:127.0.0.1]:{port}/"), &FetchLimits::default())
            .await;

        assert_eq!(page.title, "Blocked URL");
        assert!(server.received_requests().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn invalid_url_is_described() {
        let fetcher = HttpFetcher::new().unwrap();
        let page = fetcher.fetch("not a url", &local_limits()).await;
        assert_eq!(page.title, "Invalid URL");
        assert_eq!(page.source, "not a url");
    }

    #[test]
    fn limits_from_config() {
        let mut config = AppConfig::default();
        config.fetch.timeout_secs = 7;
        config.fetch.max_bytes = 1024;
        let limits = FetchLimits::from(&config);
        assert_eq!(limits.timeout, Duration::from_secs(7));
        assert_eq!(limits.max_bytes, 1024);
        assert!(!limits.allow_private_hosts);
    }
}
