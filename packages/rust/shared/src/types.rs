//! Core domain types for docrelay sessions and search results.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

// ---------------------------------------------------------------------------
// SessionId
// ---------------------------------------------------------------------------

/// Opaque identifier of one streaming connection.
///
/// Always generated server-side; client-supplied strings are only used to
/// look up an existing session.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SessionId(String);

impl SessionId {
    /// Generate a fresh random identifier.
    pub fn generate() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<String> for SessionId {
    fn from(value: String) -> Self {
        Self(value)
    }
}

impl From<&str> for SessionId {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

impl std::fmt::Display for SessionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

// ---------------------------------------------------------------------------
// Event
// ---------------------------------------------------------------------------

/// One structured message destined for a streaming client.
///
/// Serialized with a `type` tag, e.g. `{"type":"progress","current":1,...}`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum Event {
    Info {
        message: String,
        /// Set only on the first frame of a stream, so the client learns
        /// which id to submit searches under.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        client_id: Option<String>,
    },
    Heartbeat,
    Progress {
        current: usize,
        total: usize,
        title: String,
    },
    Content {
        title: String,
        source: String,
        /// Extracted page text; sent as `content` on the wire.
        #[serde(rename = "content")]
        text: String,
    },
    Status {
        message: String,
    },
    Error {
        message: String,
    },
}

impl Event {
    pub fn info(message: impl Into<String>) -> Self {
        Self::Info {
            message: message.into(),
            client_id: None,
        }
    }

    /// The greeting sent when a stream opens.
    pub fn connected(id: &SessionId) -> Self {
        Self::Info {
            message: "connection established".into(),
            client_id: Some(id.to_string()),
        }
    }

    pub fn status(message: impl Into<String>) -> Self {
        Self::Status {
            message: message.into(),
        }
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self::Error {
            message: message.into(),
        }
    }

    /// Notice sent when a session's work stops on a cancel request.
    pub fn cancelled() -> Self {
        Self::info("operation cancelled")
    }

    pub fn progress(current: usize, total: usize, title: impl Into<String>) -> Self {
        Self::Progress {
            current,
            total,
            title: title.into(),
        }
    }

    /// Build a `Content` event. `title` and `source` come from the search
    /// result, `text` from the retrieved page.
    pub fn content(
        title: impl Into<String>,
        source: impl Into<String>,
        text: impl Into<String>,
    ) -> Self {
        Self::Content {
            title: title.into(),
            source: source.into(),
            text: text.into(),
        }
    }

    /// The wire tag of this event.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Info { .. } => "info",
            Self::Heartbeat => "heartbeat",
            Self::Progress { .. } => "progress",
            Self::Content { .. } => "content",
            Self::Status { .. } => "status",
            Self::Error { .. } => "error",
        }
    }
}

// ---------------------------------------------------------------------------
// Search results
// ---------------------------------------------------------------------------

/// One ranked organic search hit.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SearchResult {
    pub title: String,
    pub url: String,
    pub snippet: String,
}

/// A search API response: ranked results plus the untouched upstream JSON.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SearchResponse {
    pub results: Vec<SearchResult>,
    #[serde(default)]
    pub raw: serde_json::Value,
}

/// A retrieved page reduced to readable text.
///
/// Fetch failures are also expressed as a `DocPage` whose title and text
/// describe the problem.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DocPage {
    pub title: String,
    pub text: String,
    /// Final URL after redirects (or the requested URL on failure).
    pub source: String,
}

impl DocPage {
    pub fn new(title: impl Into<String>, text: impl Into<String>, source: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            text: text.into(),
            source: source.into(),
        }
    }
}
