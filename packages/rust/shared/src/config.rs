//! Application configuration for docrelay.
//!
//! User config lives at `~/.docrelay/docrelay.toml`.
//! CLI flags override config file values, which override defaults.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{RelayError, Result};

/// Default configuration file name.
const CONFIG_FILE_NAME: &str = "docrelay.toml";

/// Default config directory name under the user's home.
const CONFIG_DIR_NAME: &str = ".docrelay";

// ---------------------------------------------------------------------------
// Config structs (matching docrelay.toml schema)
// ---------------------------------------------------------------------------

/// Top-level application config, deserialized from TOML.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    /// HTTP listener and session settings.
    #[serde(default)]
    pub server: ServerSection,

    /// Upstream search API settings.
    #[serde(default)]
    pub search: SearchSection,

    /// Page retrieval settings.
    #[serde(default)]
    pub fetch: FetchSection,
}

/// `[server]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerSection {
    /// Interface to bind.
    #[serde(default = "default_host")]
    pub host: String,

    #[serde(default = "default_port")]
    pub port: u16,

    /// Maximum number of concurrently open event streams.
    #[serde(default = "default_max_sessions")]
    pub max_sessions: usize,

    /// Per-session event queue capacity.
    #[serde(default = "default_queue_capacity")]
    pub queue_capacity: usize,

    /// Seconds without events before a heartbeat is sent.
    #[serde(default = "default_idle_timeout")]
    pub idle_timeout_secs: u64,

    /// Directory served under `/demo`, if it exists.
    #[serde(default = "default_demo_dir", skip_serializing_if = "Option::is_none")]
    pub demo_dir: Option<String>,
}

impl Default for ServerSection {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            max_sessions: default_max_sessions(),
            queue_capacity: default_queue_capacity(),
            idle_timeout_secs: default_idle_timeout(),
            demo_dir: default_demo_dir(),
        }
    }
}

fn default_host() -> String {
    "0.0.0.0".into()
}
fn default_port() -> u16 {
    8000
}
fn default_max_sessions() -> usize {
    1024
}
fn default_queue_capacity() -> usize {
    256
}
fn default_idle_timeout() -> u64 {
    30
}
fn default_demo_dir() -> Option<String> {
    Some("demo".into())
}

/// `[search]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchSection {
    /// Name of the env var holding the API key (never store the key itself).
    #[serde(default = "default_api_key_env")]
    pub api_key_env: String,

    /// Search API endpoint.
    #[serde(default = "default_endpoint")]
    pub endpoint: String,

    /// Results requested per documentation search.
    #[serde(default = "default_num_results")]
    pub num_results: usize,

    #[serde(default = "default_search_timeout")]
    pub timeout_secs: u64,

    /// Maximum cached responses; 0 disables the cache.
    #[serde(default = "default_cache_capacity")]
    pub cache_capacity: usize,

    /// Seconds a cached response stays valid.
    #[serde(default = "default_cache_ttl")]
    pub cache_ttl_secs: u64,
}

impl Default for SearchSection {
    fn default() -> Self {
        Self {
            api_key_env: default_api_key_env(),
            endpoint: default_endpoint(),
            num_results: default_num_results(),
            timeout_secs: default_search_timeout(),
            cache_capacity: default_cache_capacity(),
            cache_ttl_secs: default_cache_ttl(),
        }
    }
}

fn default_api_key_env() -> String {
    "SERPER_API_KEY".into()
}
fn default_endpoint() -> String {
    "https://google.serper.dev/search".into()
}
fn default_num_results() -> usize {
    5
}
fn default_search_timeout() -> u64 {
    30
}
fn default_cache_capacity() -> usize {
    512
}
fn default_cache_ttl() -> u64 {
    3600
}

/// `[fetch]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FetchSection {
    /// Whether pipelines retrieve page content for each result by default.
    #[serde(default = "default_true")]
    pub with_content: bool,

    #[serde(default = "default_fetch_timeout")]
    pub timeout_secs: u64,

    /// Largest page body accepted, in bytes.
    #[serde(default = "default_max_bytes")]
    pub max_bytes: usize,

    /// Allow fetching loopback/private addresses.
    #[serde(default)]
    pub allow_private_hosts: bool,
}

impl Default for FetchSection {
    fn default() -> Self {
        Self {
            with_content: true,
            timeout_secs: default_fetch_timeout(),
            max_bytes: default_max_bytes(),
            allow_private_hosts: false,
        }
    }
}

fn default_true() -> bool {
    true
}
fn default_fetch_timeout() -> u64 {
    30
}
fn default_max_bytes() -> usize {
    500_000
}

// ---------------------------------------------------------------------------
// Config loading
// ---------------------------------------------------------------------------

/// Get the path to the config directory (`~/.docrelay/`).
pub fn config_dir() -> Result<PathBuf> {
    let home =
        dirs::home_dir().ok_or_else(|| RelayError::config("could not determine home directory"))?;
    Ok(home.join(CONFIG_DIR_NAME))
}

/// Get the path to the config file (`~/.docrelay/docrelay.toml`).
pub fn config_file_path() -> Result<PathBuf> {
    Ok(config_dir()?.join(CONFIG_FILE_NAME))
}

/// Load the application config from disk. Returns defaults if the file does not exist.
pub fn load_config() -> Result<AppConfig> {
    let path = config_file_path()?;

    if !path.exists() {
        tracing::debug!(?path, "config file not found, using defaults");
        return Ok(AppConfig::default());
    }

    load_config_from(&path)
}

/// Load the application config from a specific file path.
pub fn load_config_from(path: &Path) -> Result<AppConfig> {
    let content = std::fs::read_to_string(path).map_err(|e| RelayError::io(path, e))?;

    toml::from_str(&content)
        .map_err(|e| RelayError::config(format!("failed to parse {}: {e}", path.display())))
}

/// Create the config directory and write a default config file.
/// Returns the path to the created file.
pub fn init_config() -> Result<PathBuf> {
    let dir = config_dir()?;
    std::fs::create_dir_all(&dir).map_err(|e| RelayError::io(&dir, e))?;

    let path = dir.join(CONFIG_FILE_NAME);
    let config = AppConfig::default();
    let content =
        toml::to_string_pretty(&config).map_err(|e| RelayError::config(e.to_string()))?;

    std::fs::write(&path, content).map_err(|e| RelayError::io(&path, e))?;
    tracing::info!(?path, "created default config file");

    Ok(path)
}

/// Read the search API key from the configured env var.
///
/// Returns `None` when unset or empty; the search client reports that as
/// an authorization failure at call time so the server can still start.
pub fn api_key(config: &AppConfig) -> Option<String> {
    match std::env::var(&config.search.api_key_env) {
        Ok(val) if !val.trim().is_empty() => Some(val),
        _ => None,
    }
}
