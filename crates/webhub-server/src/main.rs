//! # WebHub
//!
//! Serves the things described by the configured description files.
//!
//! ## Usage
//!
//! ```bash
//! # Run with default settings
//! webhub
//!
//! # Run with a config file
//! webhub --config /path/to/webhub.toml
//!
//! # Override the listen address
//! WEBHUB_PORT=8080 WEBHUB_HOST=127.0.0.1 webhub
//! ```

use anyhow::{Context, Result};
use clap::Parser;
use std::path::{Path, PathBuf};
use tokio::net::TcpListener;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use webhub_server::{metrics, Config, Hub, HubOptions, StaticTokens};

#[derive(Debug, Parser)]
#[command(name = "webhub", version, about = "Expose things over HTTP and WebSockets")]
struct Args {
    /// Configuration file; the default locations are searched otherwise.
    #[arg(short, long)]
    config: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "webhub=debug,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let args = Args::parse();
    let config = match &args.config {
        Some(path) => Config::from_file(path)?,
        None => Config::load()?,
    };

    if config.metrics.enabled {
        metrics::init_metrics();
        metrics::start_metrics_server(config.metrics.port)
            .map_err(|e| anyhow::anyhow!("Failed to start metrics server: {e}"))?;
    }

    let addr = config.bind_addr()?;
    let descriptions = config.descriptions.clone();
    let tokens = StaticTokens::new(config.auth.tokens.iter().cloned());
    let hub = Hub::new(HubOptions::new(config).with_token_validator(tokens))
        .context("Invalid account path")?;

    for path in &descriptions {
        expose_description(&hub, path)?;
    }

    let listener = TcpListener::bind(addr)
        .await
        .with_context(|| format!("Failed to bind {addr}"))?;
    info!("Starting WebHub on {} with {} things", addr, hub.registry().len());

    tokio::select! {
        result = hub.serve(listener) => result.context("Server error")?,
        _ = tokio::signal::ctrl_c() => info!("Shutting down"),
    }

    Ok(())
}

fn expose_description(hub: &Hub, path: &Path) -> Result<()> {
    let contents = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read description: {}", path.display()))?;
    let document = serde_json::from_str(&contents)
        .with_context(|| format!("Failed to parse description: {}", path.display()))?;
    let thing = hub
        .produce(document)
        .with_context(|| format!("Invalid description: {}", path.display()))?;
    let name = thing.name().to_string();
    hub.expose(thing)
        .with_context(|| format!("Failed to expose {name}"))?;
    info!(thing = %name, path = %path.display(), "Exposed thing");
    Ok(())
}
