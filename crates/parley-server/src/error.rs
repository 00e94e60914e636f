use parley_shared::{Id, ProtocolError};
use parley_store::StoreError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ServerError {
    #[error("Protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// The relay rejected this server's id/secret pair.
    #[error("Relay denied access for server {0}")]
    RelayDenied(Id),

    #[error("Relay replied with unexpected opcode {0}")]
    RelayResponse(u32),

    #[error("Invalid configuration: {0}")]
    Config(String),

    /// The timeline worker is gone; nothing can be scheduled any more.
    #[error("Scheduler stopped")]
    SchedulerStopped,

    #[error("Internal error: {0}")]
    Internal(String),
}
