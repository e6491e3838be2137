//! Sweeper entry point.
//!
//! Loads configuration, connects to Postgres, and runs the expiry sweeper
//! until SIGINT/SIGTERM. The sweeper is safe to run alongside other
//! replicas; every pass is idempotent against shared database state.

use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use tokio::sync::watch;
use tracing::info;

use sealbox_core::audit::TracingSink;
use sealbox_core::config::Config;
use sealbox_core::sweeper::Sweeper;
use sealbox_store::PostgresStore;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = Config::from_env().context("invalid configuration")?;

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&config.log_level)),
        )
        .json()
        .init();

    info!(
        retention_days = config.retention_days,
        interval_secs = config.sweep_interval.as_secs(),
        "sealbox sweeper starting"
    );

    let store = PostgresStore::connect(&config.database_url)
        .await
        .context("failed to connect to database")?;

    let sweeper = Sweeper::new(
        Arc::new(store),
        Arc::new(TracingSink),
        chrono::Duration::days(config.retention_days),
        config.sweep_interval,
    );

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let worker = tokio::spawn(async move { sweeper.run(shutdown_rx).await });

    shutdown_signal(shutdown_tx).await;

    let _ = tokio::time::timeout(Duration::from_secs(10), worker).await;
    info!("sealbox sweeper stopped");
    Ok(())
}

/// Wait for SIGINT or SIGTERM, then flip the shutdown channel.
async fn shutdown_signal(shutdown_tx: watch::Sender<bool>) {
    let ctrl_c = async {
        tokio::signal::ctrl_c().await.ok();
    };

    #[cfg(unix)]
    let terminate = async {
        if let Ok(mut sig) =
            tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
        {
            sig.recv().await;
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {},
        () = terminate => {},
    }

    info!("shutdown signal received");
    let _ = shutdown_tx.send(true);
}
