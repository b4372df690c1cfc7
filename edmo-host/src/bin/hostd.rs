//! EDMO host daemon.
//!
//! Runs the discovery and session stack headless: transports up, devices
//! fused, sessions available to whatever operator frontend connects.

use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use tokio_util::sync::CancellationToken;
use tracing::info;
use tracing_subscriber::EnvFilter;

use edmo_host::{ConnectionManager, HostConfig, SessionManager};

#[derive(Parser, Debug)]
#[command(name = "hostd", about = "EDMO host daemon", version)]
struct Args {
    /// Path to a TOML configuration file; defaults apply when absent.
    #[arg(short, long)]
    config: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let args = Args::parse();
    let config = match &args.config {
        Some(path) => HostConfig::load(path)
            .with_context(|| format!("loading configuration from {}", path.display()))?,
        None => HostConfig::default(),
    };

    let root = CancellationToken::new();
    let connections = ConnectionManager::spawn(&config, &root)
        .await
        .context("starting transports")?;
    let sessions = SessionManager::spawn(
        connections.subscribe(),
        None,
        Duration::from_millis(config.session.reconcile_interval_ms),
        &root,
    );

    let mut available = sessions.watch_available();
    tokio::spawn(async move {
        while available.changed().await.is_ok() {
            let devices = available.borrow_and_update().clone();
            info!(?devices, "available sessions changed");
        }
    });

    info!("edmo host running; press ctrl-c to stop");
    tokio::signal::ctrl_c().await.context("waiting for ctrl-c")?;

    info!("shutting down");
    sessions.shutdown();
    connections.shutdown();
    root.cancel();
    // Give teardown commands a moment to drain toward the hardware.
    tokio::time::sleep(Duration::from_millis(200)).await;
    Ok(())
}
