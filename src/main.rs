//! The Digital Ledger application server.
//!
//! # Architecture Overview
//!
//! ```text
//!     Client ──▶ request id / trace
//!                  └▶ error normalizer ◀──────────── any stage failure
//!                       └▶ body limits ─▶ origin gate + CORS ─▶ security headers
//!                            └▶ https redirect ─▶ rate limits ─▶ sanitizer
//!                                 └▶ application routes ─▶ UserStore
//!
//!     Background: rate-limit sweeper, signal listener, metrics exporter
//! ```

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use tokio::net::TcpListener;

use ledger_gateway::config::load_config;
use ledger_gateway::identity::MemoryUserStore;
use ledger_gateway::lifecycle::{spawn_signal_listener, Shutdown};
use ledger_gateway::observability::{init_logging, init_metrics};
use ledger_gateway::security::{spawn_sweeper, MemoryStore, SystemClock};
use ledger_gateway::HttpServer;

#[derive(Parser, Debug)]
#[command(name = "ledger-gateway")]
#[command(about = "The Digital Ledger application server", long_about = None)]
struct Cli {
    /// Path to a TOML configuration file
    #[arg(short, long, env = "LEDGER_CONFIG")]
    config: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let config = load_config(cli.config.as_deref())?;

    init_logging(config.server.environment, &config.observability.log_level)?;
    tracing::info!(
        version = env!("CARGO_PKG_VERSION"),
        environment = ?config.server.environment,
        bind_address = %config.server.bind_address,
        "ledger-gateway starting"
    );

    if config.observability.metrics_enabled {
        match config.observability.metrics_address.parse() {
            Ok(addr) => init_metrics(addr),
            Err(_) => tracing::error!(
                metrics_address = %config.observability.metrics_address,
                "Failed to parse metrics address"
            ),
        }
    }

    let shutdown = Shutdown::new();
    let rate_limits = Arc::new(MemoryStore::new(Arc::new(SystemClock)));
    let sweeper = spawn_sweeper(
        rate_limits.clone(),
        Duration::from_secs(config.rate_limit.sweep_interval_secs),
        shutdown.subscribe(),
    );

    let listener = TcpListener::bind(&config.server.bind_address).await?;
    let server_shutdown = shutdown.subscribe();
    spawn_signal_listener(shutdown);

    let server = HttpServer::new(config, rate_limits, Arc::new(MemoryUserStore::new()));
    server.run(listener, server_shutdown).await?;

    if let Err(e) = sweeper.await {
        tracing::warn!(error = %e, "Rate-limit sweeper ended abnormally");
    }
    tracing::info!("Shutdown complete");
    Ok(())
}
