//! Neon Dominance Sync Server
//!
//! Runs the authoritative player-state server. Configuration comes from
//! `SYNC_*` environment variables; log level from `RUST_LOG`.

use anyhow::Context;
use tracing::info;
use tracing_subscriber::EnvFilter;

use neon_sync::{ServerConfig, SyncServer, VERSION};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .init();

    let config = ServerConfig::from_env();
    info!("Neon Dominance sync server v{}", VERSION);
    info!(
        max_connections = config.max_connections,
        verify_interval_ms = config.verifier.interval.as_millis() as u64,
        position_tolerance = config.verifier.position_tolerance,
        color_tolerance = config.verifier.color_tolerance,
        "Configuration loaded"
    );

    let server = SyncServer::bind(config.clone())
        .await
        .with_context(|| format!("binding {}", config.bind_addr))?;

    let shutdown = server.shutdown_handle();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("Ctrl+C received");
            let _ = shutdown.send(());
        }
    });

    server.run().await.context("server stopped with an error")?;
    info!("Server stopped");
    Ok(())
}
