//! # parley-server
//!
//! Federated chat server core.
//!
//! All request handling, relay synchronisation and snapshot persistence run
//! as tasks on one [`timeline`] worker thread that owns the [`ServerState`].
//! The tokio runtime only accepts connections and waits for shutdown.
//!
//! - [`dispatch`] / [`handlers`]: opcode table and per-request handlers
//! - [`authority`]: conversation role rules
//! - [`relay`] / [`sync`]: relay transport, pull and push
//! - [`persist`]: periodic snapshots through `parley-store`

pub mod authority;
pub mod config;
pub mod connection;
pub mod dispatch;
pub mod error;
pub mod handlers;
pub mod persist;
pub mod relay;
pub mod server;
pub mod sync;
pub mod timeline;

pub use config::{RelayConfig, ServerConfig};
pub use error::ServerError;
pub use server::{ServerHandle, ServerInfo, ServerState};
