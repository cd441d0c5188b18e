//! CLI command definitions, routing, and tracing setup.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use clap::{Parser, Subcommand};
use color_eyre::eyre::{Result, eyre};
use docrelay_core::{
    DocsRequest, MAX_RESULTS, SearchSettings, SearchTarget, SessionRegistry, catalog,
};
use docrelay_fetcher::{ContentFetcher, FetchLimits, HttpFetcher};
use docrelay_search::{SearchClient, SearchQuery, SerperClient};
use docrelay_shared::{
    AppConfig, Event, SessionId, api_key, init_config, load_config, load_config_from,
};
use tokio::task::JoinHandle;
use tracing::info;

use crate::server;

// ---------------------------------------------------------------------------
// CLI structure
// ---------------------------------------------------------------------------

/// docrelay: stream documentation search results to clients.
#[derive(Parser)]
#[command(
    name = "docrelay",
    version,
    about = "Search documentation sites and stream results over server-sent events.",
    long_about = None,
)]
pub(crate) struct Cli {
    /// Log format: text (default) or json.
    #[arg(long, default_value = "text", global = true)]
    pub log_format: LogFormat,

    /// Verbosity level (-v, -vv, -vvv).
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Config file to use instead of ~/.docrelay/docrelay.toml.
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Command,
}

/// Log output format.
#[derive(Clone, Debug, clap::ValueEnum)]
pub(crate) enum LogFormat {
    Text,
    Json,
}

/// Top-level CLI subcommands.
#[derive(Subcommand)]
pub(crate) enum Command {
    /// Run the HTTP relay.
    Serve {
        /// Interface to bind (overrides config).
        #[arg(long)]
        host: Option<String>,

        /// Port to listen on (overrides config).
        #[arg(long, env = "PORT")]
        port: Option<u16>,
    },

    /// Run one documentation search and print its events as JSON lines.
    Search {
        /// What to look for.
        query: String,

        /// Library key from the catalog (see `docrelay libraries`).
        #[arg(short, long, conflicts_with = "domain", required_unless_present = "domain")]
        library: Option<String>,

        /// Documentation domain or URL to search within.
        #[arg(short, long)]
        domain: Option<String>,

        /// Number of results to process (1-20).
        #[arg(short, long)]
        num_results: Option<usize>,

        /// Skip fetching page content.
        #[arg(long)]
        no_content: bool,
    },

    /// Run a plain web search and print the response as JSON.
    SearchWeb {
        /// What to look for.
        query: String,

        /// Restrict results to this site.
        #[arg(short, long)]
        site: Option<String>,

        /// Number of results to request (1-20).
        #[arg(short, long)]
        num_results: Option<usize>,
    },

    /// Fetch one page and print its extracted text as JSON.
    Fetch {
        /// Page to retrieve.
        url: String,

        /// Give up after this many seconds (overrides config).
        #[arg(long)]
        timeout_secs: Option<u64>,
    },

    /// List known libraries and their documentation sites.
    Libraries,

    /// Configuration management.
    Config {
        /// Config subcommand.
        #[command(subcommand)]
        action: ConfigAction,
    },
}

/// Config subcommands.
#[derive(Subcommand)]
pub(crate) enum ConfigAction {
    /// Initialize config file with defaults.
    Init,
    /// Show resolved configuration.
    Show,
}

// ---------------------------------------------------------------------------
// Tracing setup
// ---------------------------------------------------------------------------

/// Initialize tracing based on CLI flags.
pub(crate) fn init_tracing(cli: &Cli) {
    use tracing_subscriber::{EnvFilter, fmt};

    let filter = match cli.verbose {
        0 => "docrelay=info,tower_http=info",
        1 => "docrelay=debug,tower_http=debug",
        _ => "docrelay=trace,tower_http=trace",
    };

    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter));

    // Logs go to stderr so `docrelay search` output stays pipeable.
    match cli.log_format {
        LogFormat::Text => {
            fmt()
                .with_env_filter(env_filter)
                .with_target(false)
                .with_writer(std::io::stderr)
                .init();
        }
        LogFormat::Json => {
            fmt()
                .json()
                .with_env_filter(env_filter)
                .with_writer(std::io::stderr)
                .init();
        }
    }
}

// ---------------------------------------------------------------------------
// Command dispatch
// ---------------------------------------------------------------------------

/// Run the CLI command.
pub(crate) async fn run(cli: Cli) -> Result<()> {
    let config_path = cli.config;
    match cli.command {
        Command::Serve { host, port } => {
            let config = resolve_config(config_path.as_ref())?;
            cmd_serve(config, host, port).await
        }
        Command::Search {
            query,
            library,
            domain,
            num_results,
            no_content,
        } => {
            let config = resolve_config(config_path.as_ref())?;
            let target = match (library, domain) {
                (Some(library), None) => SearchTarget::Library(library),
                (None, Some(domain)) => SearchTarget::Domain(domain),
                _ => return Err(eyre!("pass exactly one of --library or --domain")),
            };
            cmd_search(&config, query, target, num_results, !no_content).await
        }
        Command::SearchWeb {
            query,
            site,
            num_results,
        } => {
            let config = resolve_config(config_path.as_ref())?;
            cmd_search_web(&config, query, site, num_results).await
        }
        Command::Fetch { url, timeout_secs } => {
            let config = resolve_config(config_path.as_ref())?;
            cmd_fetch(&config, &url, timeout_secs).await
        }
        Command::Libraries => cmd_libraries(),
        Command::Config { action } => match action {
            ConfigAction::Init => cmd_config_init(),
            ConfigAction::Show => cmd_config_show(config_path.as_ref()),
        },
    }
}

fn resolve_config(path: Option<&PathBuf>) -> Result<AppConfig> {
    let config = match path {
        Some(path) => load_config_from(path)?,
        None => load_config()?,
    };
    Ok(config)
}

// ---------------------------------------------------------------------------
// Command handlers
// ---------------------------------------------------------------------------

async fn cmd_serve(mut config: AppConfig, host: Option<String>, port: Option<u16>) -> Result<()> {
    if let Some(host) = host {
        config.server.host = host;
    }
    if let Some(port) = port {
        config.server.port = port;
    }

    info!(
        host = %config.server.host,
        port = config.server.port,
        max_sessions = config.server.max_sessions,
        "starting relay"
    );
    server::serve(&config).await
}

async fn cmd_search(
    config: &AppConfig,
    query: String,
    target: SearchTarget,
    num_results: Option<usize>,
    with_content: bool,
) -> Result<()> {
    target.resolve()?;

    let pipeline = server::build_pipeline(config)?;
    let registry = Arc::clone(pipeline.registry());
    let subscription = registry.create()?;
    let session = subscription.id.clone();

    let mut events = subscription.events;
    let printer = tokio::spawn(async move {
        let mut errors = 0usize;
        while let Some(event) = events.recv().await {
            if matches!(event, Event::Error { .. }) {
                errors += 1;
            }
            println!("{}", serde_json::to_string(&event)?);
        }
        Ok::<_, serde_json::Error>(errors)
    });

    let request = DocsRequest {
        session: session.clone(),
        query,
        target,
        num_results: num_results.unwrap_or(pipeline.settings().num_results),
        with_content,
    };
    let run = pipeline.spawn(request);
    let interrupt = async {
        if tokio::signal::ctrl_c().await.is_err() {
            std::future::pending::<()>().await;
        }
    };
    wait_or_cancel(&registry, &session, run, interrupt).await?;

    // Dropping the session closes the queue so the printer can drain and stop.
    registry.destroy(&session);
    let errors = printer.await??;
    if errors > 0 {
        return Err(eyre!("search finished with {errors} error event(s)"));
    }
    Ok(())
}

/// Wait for `run` to finish. If `interrupt` fires first, cancel the session,
/// let the run reach its checkpoint, then emit the cancel notice.
async fn wait_or_cancel(
    registry: &SessionRegistry,
    session: &SessionId,
    mut run: JoinHandle<()>,
    interrupt: impl Future<Output = ()>,
) -> Result<()> {
    tokio::select! {
        joined = &mut run => joined?,
        () = interrupt => {
            registry.request_cancel(session)?;
            run.await?;
            registry.publish(session, Event::cancelled()).await;
        }
    }
    Ok(())
}

async fn cmd_search_web(
    config: &AppConfig,
    query: String,
    site: Option<String>,
    num_results: Option<usize>,
) -> Result<()> {
    let settings = SearchSettings::from(config);
    let site = site.as_deref().map(catalog::normalize_domain).transpose()?;
    let num_results = num_results
        .unwrap_or(settings.num_results)
        .clamp(1, MAX_RESULTS);

    let client = SerperClient::new(config.search.endpoint.clone(), api_key(config))?;
    let query = SearchQuery::new(query, site, num_results).with_timeout(settings.timeout);
    let response = client.search(&query).await?;

    println!("{}", serde_json::to_string_pretty(&response)?);
    Ok(())
}

async fn cmd_fetch(config: &AppConfig, url: &str, timeout_secs: Option<u64>) -> Result<()> {
    let mut limits = FetchLimits::from(config);
    if let Some(secs) = timeout_secs {
        limits.timeout = Duration::from_secs(secs.max(1));
    }

    let page = HttpFetcher::new()?.fetch(url, &limits).await;
    println!("{}", serde_json::to_string_pretty(&page)?);
    Ok(())
}

fn cmd_libraries() -> Result<()> {
    for library in catalog::libraries() {
        let site = catalog::lookup(library).unwrap_or_default();
        println!("{library:<16} {site}");
    }
    println!();
    println!("{} libraries", catalog::len());
    Ok(())
}

fn cmd_config_init() -> Result<()> {
    let path = init_config()?;
    println!("Config initialized at: {}", path.display());
    Ok(())
}

fn cmd_config_show(path: Option<&PathBuf>) -> Result<()> {
    let config = resolve_config(path)?;
    let toml_str = toml::to_string_pretty(&config)?;
    println!("{toml_str}");
    Ok(())
}
