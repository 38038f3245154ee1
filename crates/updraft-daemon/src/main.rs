//! Updraft daemon - approval-gated updates for game servers
//!
//! The daemon provides:
//! - Periodic detection of new runtime and plugin versions
//! - Approval prompts answered over the REST API
//! - Verified downloads into a staging directory
//! - Occupancy-aware restarts through the control-plane panel

use anyhow::Context;
use clap::Parser;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use updraft_daemon::{DaemonConfig, Server};

/// Updraft daemon CLI
#[derive(Parser)]
#[command(name = "updraftd")]
#[command(about = "Updraft - approval-gated server updates", long_about = None)]
#[command(version)]
struct Cli {
    /// Configuration file path
    #[arg(short, long, env = "UPDRAFT_CONFIG")]
    config: Option<String>,

    /// Listen address, overrides the configuration file
    #[arg(short, long, env = "UPDRAFT_LISTEN_ADDR")]
    listen: Option<String>,

    /// Log level, overrides the configuration file
    #[arg(long, env = "UPDRAFT_LOG_LEVEL")]
    log_level: Option<String>,

    /// Enable JSON logging
    #[arg(long, env = "UPDRAFT_LOG_JSON")]
    json: bool,

    /// Run every cycle once and exit
    #[arg(long)]
    once: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Load configuration
    let mut config =
        DaemonConfig::load(cli.config.as_deref()).context("Failed to load configuration")?;

    // Initialize tracing
    let level = cli
        .log_level
        .clone()
        .unwrap_or_else(|| config.logging.level.clone());
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| level.into());

    if cli.json || config.logging.json {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(tracing_subscriber::fmt::layer().json())
            .init();
    } else {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(tracing_subscriber::fmt::layer())
            .init();
    }

    // Override with CLI args
    if let Some(listen) = &cli.listen {
        config.api.listen_addr = listen
            .parse()
            .with_context(|| format!("Invalid listen address: {}", listen))?;
    }

    config.validate()?;

    let server = Server::new(config).await?;
    if cli.once {
        for report in server.run_once().await? {
            tracing::info!(
                cycle = %report.kind,
                succeeded = report.succeeded,
                failed = report.failed,
                skipped = report.skipped,
                "Cycle report"
            );
        }
        return Ok(());
    }

    server.run().await?;
    Ok(())
}
