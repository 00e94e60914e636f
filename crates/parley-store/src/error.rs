use parley_shared::Id;
use thiserror::Error;

/// Errors produced by the store layer.
#[derive(Error, Debug)]
pub enum StoreError {
    /// SQLite error while reading or writing a snapshot.
    #[error("Database error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    /// Generic I/O error (e.g. creating the snapshot directory).
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// A record with this id already exists.
    #[error("Duplicate {kind} id: {id}")]
    Duplicate { kind: &'static str, id: Id },

    /// A record refers to a user, conversation or message that does not exist.
    #[error("Unknown {kind} referenced: {id}")]
    MissingReference { kind: &'static str, id: Id },

    /// Migration failure.
    #[error("Migration error: {0}")]
    Migration(String),

    /// UUID parsing error.
    #[error("UUID error: {0}")]
    Uuid(#[from] uuid::Error),

    /// Interest set body could not be encoded or decoded.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Convenience alias used throughout the crate.
pub type Result<T> = std::result::Result<T, StoreError>;
