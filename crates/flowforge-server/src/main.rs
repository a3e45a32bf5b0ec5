//! Flowforge orchestration server (spec.md §6): the standalone process
//! that runs the queue foremen, cron jobs, and admin/health surface.
//!
//! Thin wrapper grounded on the teacher's `bin/server.rs`: tracing init,
//! a startup banner, `bootstrap()`, wait for a shutdown signal, then a
//! timeout-bounded graceful stop.

mod bootstrap;
mod handlers;
mod health;

use flowforge_shared::config::FlowforgeConfig;
use std::time::Duration;
use tokio::signal;
use tracing::{error, info};

const SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(30);

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .json()
        .init();

    info!("starting flowforge orchestration server");
    info!(version = env!("CARGO_PKG_VERSION"), debug_assertions = cfg!(debug_assertions), "build info");

    let config = FlowforgeConfig::load(None).map_err(|e| format!("failed to load config: {e}"))?;

    let handle = match bootstrap::bootstrap(&config).await {
        Ok(handle) => handle,
        Err(err) => {
            error!(error = %err, "failed to bootstrap orchestration server, exiting");
            std::process::exit(1);
        }
    };

    info!("orchestration server started, press Ctrl+C to shut down");
    shutdown_signal().await;
    info!("shutdown signal received, stopping foremen, cron jobs, and the admin surface");

    match tokio::time::timeout(SHUTDOWN_TIMEOUT, handle.stop()).await {
        Ok(()) => info!("orchestration server stopped cleanly"),
        Err(_) => error!(timeout_secs = SHUTDOWN_TIMEOUT.as_secs(), "graceful shutdown timed out, exiting anyway"),
    }

    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c().await.expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("received Ctrl+C"),
        _ = terminate => info!("received SIGTERM"),
    }
}
