//! Command-line host for the Elghella cache agent.
//!
//! Drives the agent against a SQLite cache in the data directory and the
//! real network.
//!
//! ## Usage
//!
//! ```bash
//! # Install, activate and fetch one URL through the agent. Without --config
//! # the manifest is precached from the URL's own origin.
//! elghella-agent fetch https://elghella.example/assets/app.js
//!
//! # Which strategy would handle a request?
//! elghella-agent classify https://elghella.example/marketplace --destination document
//!
//! # Inspect or clear the durable cache
//! elghella-agent partitions
//! elghella-agent clear elghella-v0
//! ```

use std::path::PathBuf;
use std::str::FromStr;
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use bytes::Bytes;
use clap::{Parser, Subcommand};
use elghella_common::{init_logging, LogConfig, LogFormat};
use elghella_core::AgentConfig;
use elghella_net::{Destination, FetcherConfig, HttpFetcher, Request};
use elghella_sw::{
    CacheAgent, CacheStore, FetchDisposition, LogNotifier, RuleTable, SqliteCacheStore,
};
use http::Method;
use tracing::{info, warn};
use url::Url;

#[derive(Parser)]
#[command(name = "elghella-agent")]
#[command(about = "Offline cache agent for the Elghella marketplace")]
#[command(version)]
struct Cli {
    /// JSON configuration file
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Override the data directory holding the cache database
    #[arg(long, global = true)]
    data_dir: Option<PathBuf>,

    /// Log format (pretty, compact, json)
    #[arg(long, global = true, default_value = "compact")]
    log_format: LogFormat,

    /// Increase verbosity (-v, -vv, -vvv)
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Install, activate, then fetch a URL through the agent
    Fetch {
        /// Absolute URL to request
        url: Url,
        /// Request destination (document, script, style, image, font, manifest)
        #[arg(short, long)]
        destination: Option<String>,
        /// Print the response body
        #[arg(long)]
        body: bool,
    },

    /// Show the route a request would take
    Classify {
        url: Url,
        #[arg(short, long, default_value = "GET")]
        method: String,
        #[arg(short, long)]
        destination: Option<String>,
    },

    /// List partitions and their entry counts
    Partitions,

    /// Delete one partition, or every partition
    Clear {
        /// Partition name; all partitions when omitted
        name: Option<String>,
    },

    /// Show a notification for a push payload
    Push {
        /// JSON payload, e.g. '{"title":"Hi","body":"New offer"}'
        payload: Option<String>,
    },

    /// Queue POST actions and replay them as a background sync
    Sync {
        /// URLs to POST
        #[arg(required = true)]
        actions: Vec<Url>,
        /// JSON body sent with each action
        #[arg(long, default_value = "{}")]
        data: String,
        /// Sync tag to fire
        #[arg(long)]
        tag: Option<String>,
    },
}

fn load_config(cli: &Cli) -> Result<AgentConfig> {
    let mut config = match &cli.config {
        Some(path) => AgentConfig::load(path)
            .with_context(|| format!("loading config from {}", path.display()))?,
        None => AgentConfig::default(),
    };
    if let Some(dir) = &cli.data_dir {
        config.data_dir = dir.clone();
    }
    Ok(config)
}

/// Origin root of `url`, used as the scope when no config file is given.
fn origin_scope(url: &Url) -> Result<Url> {
    url.join("/")
        .with_context(|| format!("{url} has no origin to scope the agent to"))
}

fn parse_destination(raw: Option<&str>) -> Result<Destination> {
    match raw {
        None => Ok(Destination::Empty),
        Some(raw) => Destination::from_str(raw).map_err(|e| anyhow::anyhow!("{e}")),
    }
}

fn build_agent(config: AgentConfig) -> Result<CacheAgent> {
    let store = Arc::new(
        SqliteCacheStore::open(&config.cache_db_path()).context("opening cache database")?,
    );
    let fetcher_config = FetcherConfig {
        timeout: config.fetch_timeout_ms.map(std::time::Duration::from_millis),
        ..Default::default()
    };
    let fetcher = Arc::new(HttpFetcher::new(fetcher_config)?);
    let (agent, _signals) = CacheAgent::new(config, store, fetcher, Arc::new(LogNotifier))?;
    Ok(agent)
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(LogConfig::from_verbosity(cli.verbose).with_format(cli.log_format));

    let config = load_config(&cli)?;

    match cli.command {
        Commands::Fetch {
            url,
            destination,
            body,
        } => {
            let destination = parse_destination(destination.as_deref())?;
            let mut config = config;
            if cli.config.is_none() {
                config.scope = origin_scope(&url)?;
            }
            let agent = build_agent(config)?;

            agent.install().await.context("install failed")?;
            agent.activate().await?;

            let request = Request::get(url).destination(destination);
            match agent.handle_fetch(request).await {
                FetchDisposition::Respond(outcome) => {
                    let response = outcome.settle().await;
                    println!("Status:     {}", response.status);
                    println!("From cache: {}", response.from_cache);
                    println!("Bytes:      {}", response.body.len());
                    if body {
                        println!();
                        println!("{}", String::from_utf8_lossy(&response.body));
                    }
                }
                FetchDisposition::Passthrough => println!("Passed through (not intercepted)"),
                FetchDisposition::NetworkError(e) => bail!("network error: {e}"),
            }
        }

        Commands::Classify {
            url,
            method,
            destination,
        } => {
            let method = Method::from_bytes(method.to_uppercase().as_bytes())
                .with_context(|| format!("invalid method {method}"))?;
            let destination = parse_destination(destination.as_deref())?;
            let request = Request::new(method, url).destination(destination);
            println!("{}", RuleTable::for_config(&config).classify(&request));
        }

        Commands::Partitions => {
            let store = SqliteCacheStore::open(&config.cache_db_path())?;
            let names = store.partition_names().await?;
            if names.is_empty() {
                println!("No partitions");
            }
            for name in names {
                let count = store.keys(&name).await?.len();
                let current = name == config.live_partition() || name == config.static_partition();
                let marker = if current { "*" } else { " " };
                println!("{marker} {name:<32} {count:>6} entries");
            }
        }

        Commands::Clear { name } => {
            let store = SqliteCacheStore::open(&config.cache_db_path())?;
            let targets = match name {
                Some(name) => vec![name],
                None => store.partition_names().await?,
            };
            for target in targets {
                if store.delete_partition(&target).await? {
                    info!(partition = %target, "Deleted");
                    println!("Deleted {target}");
                } else {
                    warn!(partition = %target, "No such partition");
                }
            }
        }

        Commands::Push { payload } => {
            if let Some(raw) = &payload {
                if serde_json::from_str::<serde_json::Value>(raw).is_err() {
                    warn!("Payload is not JSON, defaults will be shown");
                }
            }
            let agent = build_agent(config)?;
            agent.handle_push(payload.as_deref().map(str::as_bytes));
        }

        Commands::Sync { actions, data, tag } => {
            let tag = tag.unwrap_or_else(|| config.sync_tag.clone());
            let agent = build_agent(config)?;
            for url in actions {
                agent
                    .queue_offline_action(Request::post(url, Bytes::from(data.clone())))
                    .await;
            }
            match agent.handle_sync(&tag).await {
                Some(report) => {
                    println!("Delivered: {}", report.delivered);
                    println!("Requeued:  {}", report.requeued);
                    println!("Dropped:   {}", report.dropped);
                    if report.requeued > 0 {
                        std::process::exit(1);
                    }
                }
                None => println!("Tag '{tag}' ignored"),
            }
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_origin_scope_drops_path_and_query() {
        let url = Url::parse("https://elghella.example/assets/app.js?v=3").unwrap();
        assert_eq!(origin_scope(&url).unwrap().as_str(), "https://elghella.example/");
    }

    #[test]
    fn test_default_manifest_follows_origin_scope() {
        let url = Url::parse("http://127.0.0.1:8080/marketplace").unwrap();
        let config = AgentConfig {
            scope: origin_scope(&url).unwrap(),
            ..Default::default()
        };
        let manifest = config.precache_urls().unwrap();
        assert_eq!(manifest[0].as_str(), "http://127.0.0.1:8080/");
        assert_eq!(manifest[1].as_str(), "http://127.0.0.1:8080/manifest.json");
    }
}
