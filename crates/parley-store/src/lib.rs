//! # parley-store
//!
//! The in-memory Model Store for a Parley server and its SQLite-backed
//! snapshot persistence.
//!
//! The [`Model`] is the single owner of every user, conversation, message and
//! interest set. A [`Database`] wraps a `rusqlite::Connection`, runs schema
//! migrations on open, and implements [`SnapshotStore`] so the server can save
//! and restore whole-model snapshots.

pub mod conversations;
pub mod database;
pub mod interests;
pub mod messages;
pub mod migrations;
pub mod model;
pub mod models;
pub mod snapshot;
pub mod users;

mod error;

pub use database::Database;
pub use error::{Result, StoreError};
pub use model::Model;
pub use models::*;
pub use snapshot::{Snapshot, SnapshotStore};
