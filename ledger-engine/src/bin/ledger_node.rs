//! Ledger node
//!
//! Usage: `ledger-node [config.toml]`. Without a file the configuration comes
//! from `ENTITY_*` environment variables.

use anyhow::Context;
use entity_host::{open_store, Config};
use ledger_engine::LedgerEngine;
use std::time::Duration;
use tracing::{debug, info};

const STATUS_INTERVAL: Duration = Duration::from_secs(60);

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let config = match std::env::args().nth(1) {
        Some(path) => Config::from_file(&path)
            .with_context(|| format!("Failed to load configuration from {}", path))?,
        None => Config::from_env().context("Failed to load configuration from environment")?,
    };
    config.validate().context("Invalid configuration")?;

    info!(
        service = %config.service_name,
        version = %config.service_version,
        backend = ?config.store.backend,
        data_dir = %config.data_dir.display(),
        "🚀 Ledger node starting"
    );

    let store = open_store(&config).context("Failed to open state store")?;
    let engine = LedgerEngine::new(store, config.host.clone())?;

    info!(store = engine.host().store().name(), "✅ Ledger node ready");

    let mut status = tokio::time::interval(STATUS_INTERVAL);
    status.tick().await;

    loop {
        tokio::select! {
            _ = status.tick() => {
                info!(active_ledgers = engine.host().active_count(), "Ledger node status");
                debug!(metrics = %engine.host().metrics().gather_text(), "Host metrics");
            }
            signal = tokio::signal::ctrl_c() => {
                signal.context("Failed to listen for shutdown signal")?;
                break;
            }
        }
    }

    info!("🛑 Shutting down ledger node");
    engine.shutdown();
    Ok(())
}
