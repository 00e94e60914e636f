//! Server state and wiring.
//!
//! [`ServerState`] is everything the timeline worker owns: the model, the
//! relay cursor and link, and the snapshot store. [`start`] restores the last
//! snapshot, spawns the worker thread, schedules the recurring relay and
//! snapshot tasks, and starts accepting connections.

use std::net::SocketAddr;
use std::sync::Arc;
use std::thread::JoinHandle;

use parley_shared::constants::PROTOCOL_VERSION;
use parley_shared::{Id, Secret, Time};
use parley_store::{Model, SnapshotStore};
use tracing::{info, warn};

use crate::config::ServerConfig;
use crate::connection;
use crate::dispatch::Dispatcher;
use crate::error::ServerError;
use crate::handlers;
use crate::persist::{self, SnapshotTask};
use crate::relay::Relay;
use crate::sync::RelayPull;
use crate::timeline::{self, Timeline};

/// Immutable facts reported by the server-info request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ServerInfo {
    pub version: Id,
    pub start: Time,
}

impl ServerInfo {
    pub fn now() -> Self {
        Self {
            version: PROTOCOL_VERSION,
            start: Time::now(),
        }
    }
}

/// A relay client plus the credentials this server presents to it.
pub struct RelayLink {
    pub relay: Box<dyn Relay>,
    pub server: Id,
    pub secret: Secret,
    pub batch_size: u32,
}

pub struct ServerState {
    pub model: Model,
    pub info: ServerInfo,
    /// Id of the last relay bundle processed.
    pub cursor: Id,
    pub relay: Option<RelayLink>,
    pub store: Option<Box<dyn SnapshotStore>>,
    /// Model revision and cursor covered by the last successful snapshot.
    pub saved: Option<(u64, Id)>,
}

impl ServerState {
    pub fn new(info: ServerInfo) -> Self {
        Self {
            model: Model::new(),
            info,
            cursor: Id::NULL,
            relay: None,
            store: None,
            saved: None,
        }
    }

    pub fn with_relay(mut self, link: RelayLink) -> Self {
        self.relay = Some(link);
        self
    }

    /// Attach a snapshot store, restoring the model and cursor from it when
    /// it holds a snapshot.
    pub fn with_store(mut self, store: Box<dyn SnapshotStore>) -> Result<Self, ServerError> {
        if let Some((model, cursor)) = persist::restore(store.as_ref())? {
            self.model = model;
            self.cursor = cursor;
            self.saved = Some((self.model.revision(), cursor));
        }
        self.store = Some(store);
        Ok(self)
    }
}

/// The dispatch table for client requests.
pub fn dispatcher() -> Dispatcher<ServerState> {
    handlers::register(Dispatcher::new())
}

/// Spawn the timeline worker for `state` and schedule the recurring tasks
/// `config` asks for.
pub fn launch(
    state: ServerState,
    config: &ServerConfig,
) -> Result<(Timeline<ServerState>, JoinHandle<ServerState>), ServerError> {
    let relay_enabled = state.relay.is_some();
    let store_enabled = state.store.is_some();

    let (timeline, executor) = timeline::timeline();
    let worker = std::thread::Builder::new()
        .name("parley-timeline".to_string())
        .spawn(move || executor.run(state))?;

    if relay_enabled {
        timeline.schedule_recurring(config.relay_refresh, RelayPull::new(config.relay_refresh))?;
    }
    if store_enabled {
        timeline.schedule_recurring(
            config.snapshot_refresh,
            SnapshotTask::new(config.snapshot_refresh),
        )?;
    }

    info!(relay = relay_enabled, snapshots = store_enabled, "timeline running");
    Ok((timeline, worker))
}

/// A running server.
pub struct ServerHandle {
    timeline: Timeline<ServerState>,
    worker: JoinHandle<ServerState>,
    accept: tokio::task::JoinHandle<Result<(), ServerError>>,
}

/// Bind `config.listen_addr`, launch the timeline, and accept connections
/// in the background. Returns the bound address.
pub async fn start(
    config: &ServerConfig,
    state: ServerState,
) -> Result<(SocketAddr, ServerHandle), ServerError> {
    let listener = tokio::net::TcpListener::bind(config.listen_addr).await?;
    let addr = listener.local_addr()?;

    let (timeline, worker) = launch(state, config)?;
    let accept = tokio::spawn(connection::accept_loop(
        listener,
        timeline.clone(),
        Arc::new(dispatcher()),
        config.io_timeout,
    ));

    info!(%addr, "server listening");
    Ok((addr, ServerHandle { timeline, worker, accept }))
}

impl ServerHandle {
    /// Resolves when the accept loop stops on its own.
    pub async fn serving(&mut self) -> Result<(), ServerError> {
        match (&mut self.accept).await {
            Ok(result) => result,
            Err(e) => Err(ServerError::Internal(format!("accept loop: {e}"))),
        }
    }

    /// Stop accepting, drain the timeline, write a final snapshot, and hand
    /// back the state.
    pub fn shutdown(self) -> Result<ServerState, ServerError> {
        self.accept.abort();
        self.timeline.shutdown();

        let mut state = self
            .worker
            .join()
            .map_err(|_| ServerError::Internal("timeline worker panicked".to_string()))?;

        match persist::save(&mut state) {
            Ok(true) => info!("final snapshot written"),
            Ok(false) => {}
            Err(e) => warn!(error = %e, "final snapshot failed"),
        }
        Ok(state)
    }
}
