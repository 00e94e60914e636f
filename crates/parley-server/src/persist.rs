//! Periodic model snapshots.

use std::time::Duration;

use parley_shared::Id;
use parley_store::{Model, Snapshot, SnapshotStore};
use tracing::{debug, info};

use crate::error::ServerError;
use crate::server::ServerState;
use crate::timeline::{RecurringTask, Timeline};

pub struct SnapshotTask {
    period: Duration,
}

impl SnapshotTask {
    pub fn new(period: Duration) -> Self {
        Self { period }
    }
}

impl RecurringTask<ServerState> for SnapshotTask {
    fn name(&self) -> &'static str {
        "snapshot"
    }

    fn run(&mut self, state: &mut ServerState, _: &Timeline<ServerState>) -> anyhow::Result<()> {
        save(state)?;
        Ok(())
    }

    fn next_delay(&self) -> Duration {
        self.period
    }
}

/// Write a snapshot if the model or cursor changed since the last one.
/// Returns whether anything was written.
pub fn save(state: &mut ServerState) -> Result<bool, ServerError> {
    let Some(store) = state.store.as_mut() else {
        return Ok(false);
    };

    let marker = (state.model.revision(), state.cursor);
    if state.saved == Some(marker) {
        return Ok(false);
    }

    store.save(&Snapshot::capture(&state.model, state.cursor))?;
    state.saved = Some(marker);
    debug!(revision = marker.0, "snapshot saved");
    Ok(true)
}

/// Load the last snapshot, if any.
pub fn restore(store: &dyn SnapshotStore) -> Result<Option<(Model, Id)>, ServerError> {
    let Some(snapshot) = store.load()? else {
        return Ok(None);
    };
    info!(
        users = snapshot.users.len(),
        conversations = snapshot.conversations.len(),
        messages = snapshot.messages.len(),
        cursor = %snapshot.cursor,
        "snapshot restored"
    );
    Ok(Some(snapshot.into_model()))
}
