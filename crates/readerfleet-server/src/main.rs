//! readerfleet: cloud-side service for a fleet of RFID readers.

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Parser;
use readerfleet_server::{Pipeline, ServerConfig, logging};
use tracing::info;

/// Ingest reader telemetry and drive reader commands over MQTT.
#[derive(Parser, Debug)]
#[command(name = "readerfleet")]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Configuration file. Missing is fine unless given explicitly.
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Verbose output.
    #[arg(short, long)]
    verbose: bool,
}

const DEFAULT_CONFIG: &str = "readerfleet.toml";

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    logging::init(args.verbose);

    let (path, required) = match args.config {
        Some(path) => (path, true),
        None => (PathBuf::from(DEFAULT_CONFIG), false),
    };
    let config = ServerConfig::load(&path, required)
        .with_context(|| format!("Failed to load configuration from {}", path.display()))?;

    let backend = config
        .storage
        .open()
        .map_err(|e| anyhow::anyhow!("Failed to open storage: {}", e))?;
    let pipeline = Pipeline::start(&config, backend)
        .await
        .map_err(|e| anyhow::anyhow!("Failed to start pipeline: {}", e))?;

    tokio::signal::ctrl_c()
        .await
        .context("Failed to listen for shutdown signal")?;
    info!("shutdown signal received");

    pipeline.shutdown().await;
    Ok(())
}
