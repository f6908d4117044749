//! EVM Transaction Scheduler daemon
//!
//! Repairs one signing account: takes over the transactions the node holds
//! in its mempool for it, and keeps the stuck-transaction monitor running so
//! any of them the node drops is replaced before it blocks later nonces.
//! Serves Prometheus metrics.

use anyhow::{bail, Result};
use std::sync::Arc;
use tokio::signal;
use tracing::{error, info, warn};

use evm_tx_scheduler::chain::{HttpTransport, WalletSigner};
use evm_tx_scheduler::metrics::MetricsServer;
use evm_tx_scheduler::{ErrorMapper, NonceScheduler, Settings, TxSigner};

const STATUS_INTERVAL_SECS: u64 = 60;

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging
    init_logging();

    info!("Starting EVM Transaction Scheduler v{}", env!("CARGO_PKG_VERSION"));

    // Load configuration
    let settings = Settings::load()?;
    info!(
        "Loaded configuration with {} RPC endpoints",
        settings.chain.rpc_urls.len()
    );

    let transport = Arc::new(HttpTransport::new(&settings.chain.rpc_urls)?);
    let signer = Arc::new(WalletSigner::from_env(&settings.wallet.private_key_env)?);
    info!("Signing account: {:?}", signer.address());

    let error_mapper = ErrorMapper::clob();
    info!("Loaded {} contract error selectors", error_mapper.len());

    let scheduler = Arc::new(NonceScheduler::new(
        transport,
        signer,
        settings.scheduler.clone(),
        settings.transaction.clone(),
        error_mapper,
    )?);

    let account = scheduler.start().await?;
    if let Some(expected) = settings.chain.expected_chain_id {
        if expected != account.chain_id {
            scheduler.stop().await?;
            bail!(
                "Node reports chain {} but chain {} is configured",
                account.chain_id,
                expected
            );
        }
    }

    let adopted = scheduler.adopt_pending().await?;
    if adopted > 0 {
        warn!(adopted, "Watching transactions already in the mempool");
    }

    // Start metrics server
    let metrics_handle = if settings.metrics.enabled {
        let server = MetricsServer::new(settings.metrics.port);
        Some(tokio::spawn(async move {
            if let Err(e) = server.run().await {
                error!("Metrics server error: {}", e);
            }
        }))
    } else {
        None
    };

    // Status loop
    let status_handle = tokio::spawn({
        let scheduler = scheduler.clone();
        async move {
            loop {
                tokio::time::sleep(tokio::time::Duration::from_secs(STATUS_INTERVAL_SECS)).await;

                let state = scheduler.nonce_state().await;
                if state.pending_count() > 0 {
                    warn!(
                        pending = state.pending_count(),
                        confirmed = state.last_confirmed,
                        "Unconfirmed transactions outstanding"
                    );
                } else {
                    info!(nonce = state.last_confirmed, "Account idle");
                }
            }
        }
    });

    info!("EVM Transaction Scheduler is running on chain {}", account.chain_id);
    if settings.metrics.enabled {
        info!("Metrics: http://0.0.0.0:{}/metrics", settings.metrics.port);
    }

    // Wait for shutdown signal
    shutdown_signal().await;

    info!("Shutdown signal received, stopping...");

    scheduler.stop().await?;

    status_handle.abort();
    if let Some(h) = metrics_handle {
        h.abort();
    }

    info!("EVM Transaction Scheduler stopped");
    Ok(())
}

fn init_logging() {
    use tracing_subscriber::{fmt, prelude::*, EnvFilter};

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,evm_tx_scheduler=debug,hyper=warn"));

    let json = std::env::var("LOG_FORMAT")
        .map(|format| format.eq_ignore_ascii_case("json"))
        .unwrap_or(false);

    let registry = tracing_subscriber::registry().with(filter);
    if json {
        registry
            .with(fmt::layer().json().with_target(true).with_thread_ids(true))
            .init();
    } else {
        registry
            .with(fmt::layer().with_target(true).with_thread_ids(true))
            .init();
    }
}

async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("Failed to install signal handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
