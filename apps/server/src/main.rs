//! docrelay: documentation-search relay.
//!
//! Searches documentation sites for a query, extracts readable text from
//! each hit, and streams progress and content to clients over SSE.

mod commands;
mod server;

use clap::Parser;
use color_eyre::eyre::Result;

use commands::Cli;

#[tokio::main]
async fn main() -> Result<()> {
    color_eyre::install()?;
    let cli = Cli::parse();
    commands::init_tracing(&cli);
    commands::run(cli).await
}
