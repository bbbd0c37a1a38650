//! Capped Cache - A thread-safe, memory-capped object cache
//!
//! Serves a memory-capped cache over HTTP and keeps every registered cache
//! within a global byte budget.

use std::net::SocketAddr;

use anyhow::Context;
use tokio::signal;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use capped_cache::api::create_router;
use capped_cache::{spawn_pressure_task, AppState, Config};

/// Main entry point for the Capped Cache server.
///
/// # Startup Sequence
/// 1. Initialize tracing subscriber for logging
/// 2. Load configuration from environment variables
/// 3. Create the server cache inside a fresh registry
/// 4. Start background memory pressure task
/// 5. Create Axum router with all endpoints
/// 6. Start HTTP server on configured port
/// 7. Handle graceful shutdown on SIGINT/SIGTERM
#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Defaults to "info" level, can be overridden with RUST_LOG env var
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "capped_cache=info,tower_http=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!("Starting Capped Cache Server");

    let config = Config::from_env();
    info!(
        "Configuration loaded: cache={}, max_cache_bytes={}, global_budget_bytes={}, port={}, pressure_interval={}s",
        config.cache_name,
        config.max_cache_bytes,
        config.global_budget_bytes,
        config.server_port,
        config.pressure_interval
    );

    let state = AppState::from_config(&config);
    info!("Cache '{}' registered", state.cache.name());

    let pressure_handle = spawn_pressure_task(
        state.registry.clone(),
        config.global_budget_bytes,
        config.pressure_interval,
    );
    info!("Background memory pressure task started");

    let app = create_router(state);

    let addr = SocketAddr::from(([0, 0, 0, 0], config.server_port));
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("failed to bind {}", addr))?;
    info!("Server listening on http://{}", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal(pressure_handle))
        .await
        .context("server error")?;

    info!("Server shutdown complete");
    Ok(())
}

/// Waits for shutdown signal (Ctrl+C or SIGTERM).
///
/// On shutdown signal, aborts the pressure task and allows graceful shutdown.
async fn shutdown_signal(pressure_handle: tokio::task::JoinHandle<()>) {
    let ctrl_c = async {
        if let Err(err) = signal::ctrl_c().await {
            warn!("Failed to listen for Ctrl+C: {}", err);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(err) => {
                warn!("Failed to install SIGTERM handler: {}", err);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C, initiating shutdown...");
        }
        _ = terminate => {
            info!("Received SIGTERM, initiating shutdown...");
        }
    }

    pressure_handle.abort();
    warn!("Memory pressure task aborted");
}
