//! # parley-server
//!
//! Chat server binary: serves the client protocol, syncs with a relay when
//! `RELAY_ADDR` is set, and snapshots the model to SQLite.

use parley_server::relay::RemoteRelay;
use parley_server::server::{self, RelayLink, ServerInfo, ServerState};
use parley_server::ServerConfig;
use parley_store::Database;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // -----------------------------------------------------------------------
    // 1. Initialize tracing (respects RUST_LOG env var)
    // -----------------------------------------------------------------------
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("info,parley_server=debug")),
        )
        .init();

    info!("Starting Parley server v{}", env!("CARGO_PKG_VERSION"));

    // -----------------------------------------------------------------------
    // 2. Load configuration
    // -----------------------------------------------------------------------
    let config = ServerConfig::from_env();
    info!(?config, "Loaded configuration");

    // -----------------------------------------------------------------------
    // 3. Build state: snapshot store first so the model is restored
    // -----------------------------------------------------------------------
    let store = Database::open_at(&config.snapshot_path)?;
    let mut state = ServerState::new(ServerInfo::now()).with_store(Box::new(store))?;

    if let Some(addr) = &config.relay_addr {
        state = state.with_relay(RelayLink {
            relay: Box::new(RemoteRelay::new(addr.clone(), config.io_timeout)),
            server: config.server_id,
            secret: config.server_secret.clone(),
            batch_size: config.relay_batch_size,
        });
    }

    // -----------------------------------------------------------------------
    // 4. Run until the listener fails or Ctrl+C
    // -----------------------------------------------------------------------
    let (addr, mut handle) = server::start(&config, state).await?;
    info!(%addr, "Parley server ready");

    tokio::select! {
        result = handle.serving() => {
            if let Err(e) = &result {
                tracing::error!(error = %e, "Accept loop failed");
            }
        }
        _ = tokio::signal::ctrl_c() => {
            info!("Received Ctrl+C, shutting down");
        }
    }

    let state = tokio::task::spawn_blocking(move || handle.shutdown()).await??;
    info!(
        users = state.model.users().count(),
        conversations = state.model.conversations().count(),
        "Server stopped"
    );
    Ok(())
}
