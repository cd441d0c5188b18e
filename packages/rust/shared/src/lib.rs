//! Shared types, error model, and configuration for docrelay.
//!
//! This crate is the foundation depended on by all other docrelay crates.
//! It provides:
//! - [`RelayError`], the unified error type
//! - Domain types ([`Event`], [`SessionId`], [`SearchResult`], [`DocPage`])
//! - Configuration ([`AppConfig`], config loading)

pub mod config;
pub mod error;
pub mod types;

// Re-export public API at crate root for ergonomic imports.
pub use config::{
    AppConfig, FetchSection, SearchSection, ServerSection, api_key, config_dir, config_file_path,
    init_config, load_config, load_config_from,
};
pub use error::{RelayError, Result, SearchFailure};
pub use types::{DocPage, Event, SearchResponse, SearchResult, SessionId};
