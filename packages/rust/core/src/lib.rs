//! Streaming session manager for docrelay.
//!
//! This crate ties the search and fetch collaborators to live client
//! connections:
//! - [`catalog`]: library → documentation site table and domain normalization
//! - [`session`]: the registry of live sessions (queue + cancellation per id)
//! - [`stream`]: the per-connection loop that relays events and heartbeats
//! - [`pipeline`]: the cancellable search → fetch → publish run

pub mod catalog;
pub mod pipeline;
pub mod session;
pub mod stream;

pub use pipeline::{
    DocsRequest, MAX_RESULTS, PipelineOutcome, PipelineRunner, SearchSettings, SearchTarget,
};
pub use session::{SessionLimits, SessionRegistry, Subscription};
pub use stream::{StreamEnd, event_stream};
