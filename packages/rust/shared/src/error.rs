//! Error types for docrelay.
//!
//! Library crates use [`RelayError`] via `thiserror`.
//! The server binary wraps this with `color-eyre` for rich diagnostics.

use std::path::PathBuf;

/// Top-level error type for all docrelay operations.
#[derive(Debug, thiserror::Error)]
pub enum RelayError {
    /// The requested library key is not in the catalog.
    #[error("unsupported library: {library}")]
    UnsupportedLibrary { library: String },

    /// A domain-mode target that does not look like a domain.
    #[error("invalid domain '{domain}': expected something like 'example.com'")]
    InvalidDomain { domain: String },

    /// The upstream search call failed.
    #[error("search failed: {0}")]
    SearchFailed(#[from] SearchFailure),

    /// The live-session cap has been reached.
    #[error("too many live sessions (limit {limit})")]
    ResourceExhausted { limit: usize },

    /// No live session with this identifier.
    #[error("client not found: {client_id}")]
    NotFound { client_id: String },

    /// Configuration loading or validation error.
    #[error("config error: {message}")]
    Config { message: String },

    /// Request validation error (missing or malformed fields).
    #[error("validation error: {message}")]
    Validation { message: String },

    /// Network/HTTP error outside the search call.
    #[error("network error: {0}")]
    Network(String),

    /// Filesystem I/O error.
    #[error("I/O error at {path:?}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
}

/// Why a search call failed.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SearchFailure {
    /// No API credential configured.
    #[error("search API key is not configured")]
    Unauthorized,

    #[error("search API timed out after {secs}s")]
    Timeout { secs: u64 },

    /// Non-success status from the search API.
    #[error("search API returned {status}: {body}")]
    Upstream { status: u16, body: String },

    #[error("search request failed: {0}")]
    Network(String),

    /// Response body was not the expected JSON.
    #[error("could not decode search response: {0}")]
    Decode(String),
}

/// Convenience alias used throughout the codebase.
pub type Result<T> = std::result::Result<T, RelayError>;

impl RelayError {
    /// Create a config error from any displayable message.
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config {
            message: msg.into(),
        }
    }

    /// Create a validation error from any displayable message.
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation {
            message: msg.into(),
        }
    }

    pub fn not_found(client_id: impl Into<String>) -> Self {
        Self::NotFound {
            client_id: client_id.into(),
        }
    }

    /// Wrap a `std::io::Error` with a path for context.
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }

    /// Whether this error comes from bad client input rather than a fault.
    pub fn is_client_error(&self) -> bool {
        matches!(
            self,
            Self::UnsupportedLibrary { .. } | Self::InvalidDomain { .. } | Self::Validation { .. }
        )
    }
}
