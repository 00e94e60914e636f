//! # parley-relay
//!
//! Relay service: an in-memory bundle log shared by a set of federated
//! servers, each authenticated by team id and secret.

use std::sync::Arc;

use parley_server::connection;
use parley_server::relay::{relay_dispatcher, MemoryRelay};
use parley_server::timeline;
use parley_server::RelayConfig;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("info,parley_server=debug")),
        )
        .init();

    info!("Starting Parley relay v{}", env!("CARGO_PKG_VERSION"));

    let config = RelayConfig::from_env();
    info!(addr = %config.listen_addr, teams = config.teams.len(), "Loaded configuration");

    let (timeline, executor) = timeline::timeline();
    let relay = MemoryRelay::new(config.teams.clone());
    let worker = std::thread::Builder::new()
        .name("parley-relay".to_string())
        .spawn(move || executor.run(relay))?;

    let listener = tokio::net::TcpListener::bind(config.listen_addr).await?;
    let accept = connection::accept_loop(
        listener,
        timeline.clone(),
        Arc::new(relay_dispatcher()),
        config.io_timeout,
    );

    tokio::select! {
        result = accept => {
            if let Err(e) = &result {
                tracing::error!(error = %e, "Accept loop failed");
            }
        }
        _ = tokio::signal::ctrl_c() => {
            info!("Received Ctrl+C, shutting down");
        }
    }

    timeline.shutdown();
    let relay = tokio::task::spawn_blocking(move || worker.join())
        .await?
        .map_err(|_| anyhow::anyhow!("relay worker panicked"))?;
    info!(bundles = relay.len(), "Relay stopped");
    Ok(())
}
