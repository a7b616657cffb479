//! # Quote Relay CLI (`quote-relay`)
//!
//! ## Usage
//!
//! ```bash
//! quote-relay --config ./config/quote-relay.toml <command>
//! ```
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `quote-relay serve` | Start the HTTP server |
//! | `quote-relay fetch random` | Fetch one random quote from upstream |
//! | `quote-relay fetch tag <TAG>` | Fetch quotes carrying a tag |
//! | `quote-relay fetch author <AUTHOR>` | Fetch quotes by an author |
//! | `quote-relay fetch search <QUERY>` | Full-text search upstream |
//! | `quote-relay health` | Print a health report; exit 1 when unhealthy |
//!
//! Without a config file every setting takes its default; the upstream URL
//! can still be set through `QUOTE_RELAY_UPSTREAM_URL`.

use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;

use quote_relay::config::{self, Config};
use quote_relay::health::HealthCheck;
use quote_relay::logging;
use quote_relay::server;
use quote_relay::upstream::{QuoteSource, UpstreamClient};
use quote_relay_core::store::memory::InMemoryRepository;

/// Quote Relay: a resilient caching relay in front of a third-party quotes API.
#[derive(Parser)]
#[command(name = "quote-relay", version, about)]
struct Cli {
    /// Path to configuration file (TOML).
    ///
    /// Defaults to `./config/quote-relay.toml`. A missing file means defaults.
    #[arg(long, global = true, default_value = "./config/quote-relay.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the HTTP server on `[server].bind`.
    Serve,

    /// Make one upstream call through the resilient client and print the
    /// result as JSON.
    Fetch {
        #[command(subcommand)]
        target: FetchTarget,

        /// Maximum number of quotes for list queries.
        #[arg(long, default_value_t = 10, global = true)]
        limit: usize,
    },

    /// Run one health check against a fresh, empty cache.
    Health,
}

#[derive(Subcommand)]
enum FetchTarget {
    Random,
    Tag { tag: String },
    Author { author: String },
    Search { query: String },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let cfg = config::load_config_or_default(&cli.config)?;
    logging::init_logging(&cfg.logging)?;

    match cli.command {
        Commands::Serve => {
            server::run_server(&cfg).await?;
        }
        Commands::Fetch { target, limit } => {
            run_fetch(&cfg, target, limit).await?;
        }
        Commands::Health => {
            let healthy = run_health(&cfg).await?;
            if !healthy {
                std::process::exit(1);
            }
        }
    }

    Ok(())
}

async fn run_fetch(cfg: &Config, target: FetchTarget, limit: usize) -> anyhow::Result<()> {
    let client = UpstreamClient::from_config(cfg)?;

    let output = match target {
        FetchTarget::Random => serde_json::to_string_pretty(&client.fetch_random_quote().await?)?,
        FetchTarget::Tag { tag } => {
            serde_json::to_string_pretty(&client.fetch_quotes_by_tag(&tag, limit).await?)?
        }
        FetchTarget::Author { author } => {
            serde_json::to_string_pretty(&client.fetch_quotes_by_author(&author, limit).await?)?
        }
        FetchTarget::Search { query } => {
            serde_json::to_string_pretty(&client.search_quotes(&query, limit).await?)?
        }
    };
    println!("{}", output);

    Ok(())
}

/// Returns `false` when the report is unhealthy.
async fn run_health(cfg: &Config) -> anyhow::Result<bool> {
    let client = Arc::new(UpstreamClient::from_config(cfg)?);
    let checker = HealthCheck::new(
        client,
        Arc::new(InMemoryRepository::new()),
        cfg.server.environment,
    );

    let report = checker.check().await;
    println!("{}", serde_json::to_string_pretty(&report)?);

    Ok(!report.is_unhealthy())
}
