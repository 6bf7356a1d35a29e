//! # Ledger API Server
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │  1. tracing subscriber (RUST_LOG, default "info,sqlx=warn")             │
//! │  2. EngineConfig::load (file → SALELEDGER_* env → validate)             │
//! │  3. Engine::open (pool, WAL, migrations)                                │
//! │  4. stale PENDING sweep, if ledger.pending_timeout_secs is set          │
//! │  5. axum::serve until Ctrl+C / SIGTERM, then close the pool             │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! Usage: `ledger-api [--config <path>]`

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context};
use tokio::net::TcpListener;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use ledger_api::{router, AppState};
use saleledger_engine::{Engine, EngineConfig, TracingAuditSink};

/// Upper bound between two sweeps.
const SWEEP_INTERVAL: Duration = Duration::from_secs(60);

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info,sqlx=warn")),
        )
        .with_target(true)
        .init();

    info!("Starting ledger API");

    let config = EngineConfig::load(config_path_from_args()?).context("loading configuration")?;
    let bind_addr = config.server.bind_address();
    let pending_timeout = config.pending_timeout();

    let engine = Engine::open(config, Arc::new(TracingAuditSink))
        .await
        .context("opening ledger database")?;

    if let Some(timeout) = pending_timeout {
        spawn_stale_sweep(engine.clone(), timeout);
    }

    let app = router(AppState::new(engine.clone()));
    let listener = TcpListener::bind(&bind_addr)
        .await
        .with_context(|| format!("binding {}", bind_addr))?;
    info!(addr = %bind_addr, "Ledger API listening");

    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal())
    .await
    .context("serving HTTP")?;

    engine.database().close().await;
    info!("Server shutdown complete");
    Ok(())
}

fn config_path_from_args() -> anyhow::Result<Option<PathBuf>> {
    let args: Vec<String> = std::env::args().skip(1).collect();
    match args.as_slice() {
        [] => Ok(None),
        [flag, path] if flag == "--config" => Ok(Some(PathBuf::from(path))),
        _ => bail!("usage: ledger-api [--config <path>]"),
    }
}

/// Cancels PENDING transactions older than `older_than`, forever.
fn spawn_stale_sweep(engine: Engine, older_than: Duration) {
    let period = SWEEP_INTERVAL.min(older_than).max(Duration::from_secs(1));
    info!(
        timeout_secs = older_than.as_secs(),
        period_secs = period.as_secs(),
        "Stale pending sweep enabled"
    );

    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(period);
        loop {
            ticker.tick().await;
            if let Err(e) = engine.payments().expire_stale(older_than).await {
                warn!(error = %e, retryable = e.is_retryable(), "Stale pending sweep failed");
            }
        }
    });
}

/// Resolves on Ctrl+C or SIGTERM.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!(error = %e, "Ctrl+C handler unavailable");
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
                warn!(error = %e, "SIGTERM handler unavailable");
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

    info!("Shutdown signal received, starting graceful shutdown");
}
