use crate::types::Id;

/// Protocol version reported by server info
pub const PROTOCOL_VERSION: Id = Id::from_version(1, 0, 0);

/// Maximum length of any string field in bytes (256 KiB)
pub const MAX_STRING_SIZE: usize = 262_144;

/// Maximum number of elements in any collection field
pub const MAX_COLLECTION_LEN: usize = 65_536;

/// Maximum length of a relay secret in bytes
pub const MAX_SECRET_SIZE: usize = 1024;

/// Interval between relay pulls
pub const RELAY_REFRESH_MS: u64 = 5_000;

/// Maximum bundles requested per relay pull
pub const RELAY_BATCH_SIZE: u32 = 32;

/// Interval between model snapshots
pub const SNAPSHOT_REFRESH_MS: u64 = 1_000;

/// Read/write timeout applied to every accepted or outgoing connection
pub const IO_TIMEOUT_MS: u64 = 5_000;

/// Default TCP port for the chat server
pub const DEFAULT_SERVER_PORT: u16 = 2007;

/// Default TCP port for the relay
pub const DEFAULT_RELAY_PORT: u16 = 2008;
