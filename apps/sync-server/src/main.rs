//! # stockline-server
//!
//! ```text
//! stockline-server [CONFIG_PATH]
//!
//!   CONFIG_PATH   gateway.toml (defaults to the platform config dir)
//!   RUST_LOG      log filter (default: info,stockline=debug,sqlx=warn)
//!   STOCKLINE_*   per-setting overrides, see GatewayConfig
//! ```

use std::path::PathBuf;

use stockline_sync::{GatewayConfig, LedgerFact, SyncGateway};
use tokio::net::TcpListener;
use tokio::sync::broadcast::{error::RecvError, Receiver};
use tracing::{debug, info, warn};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info,stockline=debug,sqlx=warn"));
    tracing_subscriber::fmt().with_env_filter(filter).with_target(true).init();

    info!(version = env!("CARGO_PKG_VERSION"), "Starting Stockline server");

    let config = GatewayConfig::load(std::env::args().nth(1).map(PathBuf::from))?;
    info!(
        db = %config.database.path.display(),
        lock_wait_ms = config.locks.wait_ms,
        "Configuration loaded"
    );

    let gateway = SyncGateway::connect(&config).await?;
    tokio::spawn(log_facts(gateway.context().facts().subscribe()));

    let addr = config.server.bind_address();
    let listener = TcpListener::bind(&addr).await?;
    info!(%addr, "Listening");

    axum::serve(listener, stockline_server::router(gateway.clone()))
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    gateway.context().db().close().await;
    info!("Server shutdown complete");
    Ok(())
}

/// Writes every committed ledger fact to the log.
async fn log_facts(mut facts: Receiver<LedgerFact>) {
    loop {
        match facts.recv().await {
            Ok(LedgerFact::StockBelowThreshold {
                tenant_id,
                branch_id,
                product_id,
                balance,
                threshold,
            }) => warn!(%tenant_id, %branch_id, %product_id, balance, threshold, "Stock below threshold"),
            Ok(fact) => info!(tenant_id = fact.tenant_id(), ?fact, "Ledger fact"),
            Err(RecvError::Lagged(skipped)) => warn!(skipped, "Fact logger fell behind"),
            Err(RecvError::Closed) => {
                debug!("Fact bus closed");
                break;
            }
        }
    }
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!(error = %e, "Failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                warn!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    info!("Shutdown signal received, starting graceful shutdown...");
}
