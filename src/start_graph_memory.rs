//! Startup helpers for the graph memory server.

use std::future::Future;
use std::process::ExitCode;
use std::sync::Arc;

use anyhow::Context;

use crate::memory::core::config::GraphMemoryConfig;
use crate::server::{self, AppState};

/// Install the global tracing subscriber (`RUST_LOG`, default `info`).
///
/// Does nothing if a subscriber is already installed.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(tracing::Level::INFO.into()),
        )
        .try_init();
}

/// Run the server (used by the `graph-memory-server` binary).
///
/// # Returns
/// `ExitCode::SUCCESS` on graceful shutdown, `1` on failure.
#[must_use]
pub fn run() -> ExitCode {
    init_tracing();
    tracing::info!("Starting graph memory v{}", env!("CARGO_PKG_VERSION"));

    let rt = match tokio::runtime::Runtime::new() {
        Ok(rt) => rt,
        Err(e) => {
            tracing::error!("Failed to create runtime: {e}");
            return ExitCode::from(1);
        }
    };

    if let Err(e) = rt.block_on(serve(get_port())) {
        tracing::error!("Server error: {e:#}");
        return ExitCode::from(1);
    }

    ExitCode::SUCCESS
}

async fn serve(port: u16) -> anyhow::Result<()> {
    let state = initialize().await?;
    server::run_server(state, port)
        .await
        .map_err(|e| anyhow::anyhow!(e))
        .context("HTTP server stopped")
}

/// Build application state from `GRAPH_MEMORY_*` environment variables.
///
/// # Errors
/// Returns an error if the configuration is invalid or the graph memory cannot be wired.
pub async fn initialize() -> anyhow::Result<Arc<AppState>> {
    let config = GraphMemoryConfig::from_env().context("Invalid graph memory configuration")?;
    tracing::info!(
        enabled = config.enabled,
        sqlite_path = %config.storage.sqlite_path.display(),
        group = %config.default_group_id,
        "Graph memory configuration loaded"
    );
    AppState::from_config(config)
        .await
        .context("Failed to create state")
}

/// Run server with graceful shutdown.
///
/// # Errors
/// Returns an error if the server fails.
pub async fn run_server_with_shutdown<F>(
    state: Arc<AppState>,
    port: u16,
    shutdown_signal: F,
) -> Result<(), Box<dyn std::error::Error + Send + Sync>>
where
    F: Future<Output = ()> + Send + 'static,
{
    server::run_server_with_shutdown(state, port, shutdown_signal).await
}

/// Get configured server port (`GRAPH_MEMORY_PORT`).
#[must_use]
pub fn get_port() -> u16 {
    std::env::var("GRAPH_MEMORY_PORT")
        .ok()
        .and_then(|p| p.parse().ok())
        .unwrap_or(server::DEFAULT_PORT)
}
