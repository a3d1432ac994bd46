use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use swarm_core::config::AppConfig;
use swarm_observability::{init_logging, install_metrics_recorder, LogFormat, LoggingConfig};
use tokio::signal;
use tracing::{error, info, warn};

mod app;
mod shutdown;

use app::{AppMode, Application};
use shutdown::ShutdownManager;

const JOIN_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Debug, Parser)]
#[command(name = "swarm-orchestrator", version, about = "Distributed test-execution orchestrator")]
struct Cli {
    /// Configuration file (TOML); `config/swarm.toml` is used when present
    #[arg(short, long, value_name = "FILE")]
    config: Option<String>,

    #[arg(short, long, value_enum, default_value_t = AppMode::All)]
    mode: AppMode,

    /// Overrides node.node_id
    #[arg(long, value_name = "ID")]
    node_id: Option<String>,

    #[arg(
        short,
        long,
        default_value = "info",
        value_parser = ["trace", "debug", "info", "warn", "error"]
    )]
    log_level: String,

    #[arg(long, default_value = "pretty", value_parser = ["json", "pretty", "compact"])]
    log_format: String,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    init_logging(&LoggingConfig {
        level: cli.log_level.clone(),
        format: cli.log_format.parse::<LogFormat>()?,
        ..Default::default()
    })?;

    info!(config = ?cli.config, mode = ?cli.mode, "Starting swarm orchestrator");

    let mut config = AppConfig::load(cli.config.as_deref()).context("failed to load configuration")?;
    if let Some(node_id) = cli.node_id {
        config.node.node_id = node_id;
        config.validate()?;
    }

    let recorder = match install_metrics_recorder() {
        Ok(handle) => Some(handle),
        Err(e) => {
            warn!("Metrics recorder unavailable: {}", e);
            None
        }
    };

    let app = Arc::new(Application::new(config, cli.mode, recorder).await?);
    let shutdown_manager = ShutdownManager::new();

    let mut stopping_rx = shutdown_manager.subscribe().await;
    let app_handle = {
        let shutdown = shutdown_manager.clone();
        let app = Arc::clone(&app);
        tokio::spawn(async move { app.run(shutdown).await })
    };

    tokio::select! {
        signal = wait_for_shutdown_signal() => {
            signal?;
            info!("Shutdown requested, stopping components");
        }
        _ = stopping_rx.recv() => warn!("A component failed, stopping the rest"),
    }
    shutdown_manager.shutdown().await;

    match tokio::time::timeout(JOIN_TIMEOUT, app_handle).await {
        Ok(Ok(Ok(()))) => info!("Swarm orchestrator stopped"),
        Ok(Ok(Err(e))) => {
            error!("Application failed: {e:#}");
            return Err(e);
        }
        Ok(Err(e)) => error!("Application task panicked: {e}"),
        Err(_) => warn!(
            timeout_secs = JOIN_TIMEOUT.as_secs(),
            "Components did not stop in time, exiting"
        ),
    }
    Ok(())
}

async fn wait_for_shutdown_signal() -> Result<()> {
    #[cfg(unix)]
    {
        let mut terminate = signal::unix::signal(signal::unix::SignalKind::terminate())
            .context("failed to install SIGTERM handler")?;
        tokio::select! {
            outcome = signal::ctrl_c() => {
                outcome.context("failed to listen for Ctrl+C")?;
                info!("Received Ctrl+C");
            }
            _ = terminate.recv() => info!("Received SIGTERM"),
        }
    }
    #[cfg(not(unix))]
    {
        signal::ctrl_c()
            .await
            .context("failed to listen for Ctrl+C")?;
        info!("Received Ctrl+C");
    }
    Ok(())
}
