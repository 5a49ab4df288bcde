mod handlers;
mod metrics;
mod routes;

use anyhow::Context;
use crucible_core::{backend, Backend, RunnerConfig};
use std::sync::Arc;
use tokio::net::TcpListener;
use tracing::info;

#[derive(Clone)]
pub struct AppState {
    pub backend: Arc<dyn Backend>,
}

fn init_tracing() {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));

    // LOG_FORMAT=json for log shippers, human-readable otherwise
    if std::env::var("LOG_FORMAT").map(|v| v == "json").unwrap_or(false) {
        tracing_subscriber::fmt()
            .json()
            .with_env_filter(filter)
            .with_target(false)
            .init();
    } else {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_target(false)
            .with_thread_ids(true)
            .with_line_number(true)
            .init();
    }
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "Failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
    info!("Shutdown signal received, draining in-flight requests");
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_tracing();

    info!("Crucible API booting...");

    let config = RunnerConfig::from_env().context("Failed to load configuration")?;
    let backend = backend::from_config(&config).context("Failed to initialize execution backend")?;

    info!(
        backend = backend.name(),
        compiler = %config.toolchain.command,
        isolation = ?config.isolation.mode,
        scratch_root = %config.scratch_root.display(),
        "Execution backend ready"
    );
    if let Some(url) = &config.remote.url {
        info!(url = %url, "Delegating execution to external runner");
    }

    let state = AppState { backend };
    let app = routes::routes().with_state(state);

    let addr = format!("0.0.0.0:{}", config.port);
    let listener = TcpListener::bind(&addr)
        .await
        .with_context(|| format!("Failed to bind to {}", addr))?;

    info!("HTTP server listening on {}", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("Server error")?;

    info!("Server stopped");
    Ok(())
}
