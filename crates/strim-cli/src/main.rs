use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Parser;
use tracing::info;
use tracing_subscriber::EnvFilter;

use strim_scheduler::{load_config, RuntimeScheduler};

/// Multi-tenant live-stream trigger and clip runtime.
#[derive(Debug, Parser)]
#[command(name = "strim", version, about)]
struct Cli {
    /// Path to the runtime configuration document.
    #[arg(long, env = "STRIM_CONFIG", default_value = "strim.toml")]
    config: PathBuf,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();
    let config = load_config(&cli.config)?;
    info!(
        config = %cli.config.display(),
        tenants = config.tenants.len(),
        "starting strim runtime"
    );

    let mut scheduler = RuntimeScheduler::new(config)?;
    scheduler.start()?;

    tokio::signal::ctrl_c()
        .await
        .context("failed to wait for shutdown signal")?;
    info!("shutdown signal received");
    scheduler.shutdown().await;
    Ok(())
}
