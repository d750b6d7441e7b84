//! # tickerd - Ticker Collection Daemon
//!
//! Runs the ticker engine against in-memory cache backends and the
//! simulated exchange connector, logging periodic health summaries until
//! Ctrl-C. Point `--config` at a service TOML and `--topology` at an
//! exchange/symbol TOML to change what is collected:
//!
//! ```text
//! tickerd --topology demo.toml
//! RUST_LOG=ticker_service=debug tickerd --config tickerd.toml
//! ```

use anyhow::{Context, Result};
use clap::Parser;
use config::ServiceConfig;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use ticker_service::{
    Dependencies, EnvCredentialResolver, MemoryProcessStore, MemoryTickStore,
    SimConnectorFactory, StaticConfigStore, TickerDaemon,
};

#[derive(Debug, Parser)]
#[command(name = "tickerd", about = "Real-time ticker collection daemon")]
struct Args {
    /// Path to the service configuration TOML; defaults plus environment
    /// overrides when omitted.
    #[arg(long)]
    config: Option<String>,

    /// Path to a topology TOML listing exchanges and symbols; a built-in
    /// demo topology when omitted.
    #[arg(long)]
    topology: Option<String>,

    /// Milliseconds between simulated ticks per symbol.
    #[arg(long, default_value_t = 500)]
    tick_interval_ms: u64,

    /// Seconds between health log lines.
    #[arg(long, default_value_t = 10)]
    health_interval: u64,
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
        Some(path) => ServiceConfig::from_toml_with_env_overrides(path)
            .with_context(|| format!("loading {}", path))?,
        None => ServiceConfig::from_env().context("loading configuration from environment")?,
    };

    let config_store = match &args.topology {
        Some(path) => {
            let toml_str = std::fs::read_to_string(path)
                .with_context(|| format!("reading topology {}", path))?;
            StaticConfigStore::from_toml_str(&config.admin_mail, &toml_str)
                .context("parsing topology")?
        }
        None => {
            info!("no topology file given, using built-in demo topology");
            StaticConfigStore::demo(&config.admin_mail)
        }
    };

    let tick_store = Arc::new(MemoryTickStore::new());
    let daemon = Arc::new(TickerDaemon::new(
        config,
        Dependencies {
            config_store: Arc::new(config_store),
            credential_resolver: Arc::new(EnvCredentialResolver),
            connector_factory: Arc::new(SimConnectorFactory::new(Duration::from_millis(
                args.tick_interval_ms,
            ))),
            tick_store: tick_store.clone(),
            process_store: Arc::new(MemoryProcessStore::new()),
        },
    ));

    daemon.start().await.map_err(|e| {
        error!(error = %e, "daemon failed to start");
        anyhow::anyhow!(e)
    })?;

    let health_daemon = daemon.clone();
    let health_interval = Duration::from_secs(args.health_interval.max(1));
    let reporter = tokio::spawn(async move {
        loop {
            tokio::time::sleep(health_interval).await;
            if !health_daemon.is_running() {
                break;
            }
            let health = health_daemon.health().await;
            info!(
                status = %health.status,
                exchanges = health.exchanges.len(),
                ticks = health.ticker_stats.total_tickers,
                cached = tick_store.len(),
                "health"
            );
            for (exchange, handler) in &health.exchanges {
                info!(
                    exchange = %exchange,
                    state = %handler.state,
                    reconnects = handler.reconnect_count,
                    "handler"
                );
            }
        }
    });

    tokio::signal::ctrl_c().await.context("waiting for Ctrl-C")?;
    info!("shutdown requested");

    daemon.stop().await.map_err(|e| anyhow::anyhow!(e))?;
    reporter.abort();

    let stats = daemon.manager().stats();
    info!(
        total_ticks = stats.total_tickers,
        "ticker daemon exited cleanly"
    );
    Ok(())
}
