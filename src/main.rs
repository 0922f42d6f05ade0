//! Conductor service entry point.
//!
//! Usage: `conductor [config-path]`. Without an argument the path comes from
//! `CONDUCTOR_CONFIG_PATH`, falling back to `config/conductor.toml`.

use std::sync::Arc;

use tokio::sync::watch;

use conductor::config::ConductorConfig;
use conductor::logging::init_tracing;
use conductor::messaging::service::RabbitMqMessagingService;
use conductor::orchestration::ConductorCore;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_tracing("conductor");

    let config = match std::env::args().nth(1) {
        Some(path) => ConductorConfig::load(path)?,
        None => ConductorConfig::load_from_env()?,
    };

    let messaging = Arc::new(RabbitMqMessagingService::connect(&config.broker).await?);
    let core = ConductorCore::bootstrap(config, messaging).await?;

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    tokio::spawn(async move {
        shutdown_signal().await;
        tracing::info!("shutdown signal received");
        let _ = shutdown_tx.send(true);
    });

    core.run(shutdown_rx).await?;
    core.close().await;
    Ok(())
}

/// Resolves on SIGINT or SIGTERM.
async fn shutdown_signal() {
    let ctrl_c = tokio::signal::ctrl_c();

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                tracing::warn!(error = %e, "failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }
}
