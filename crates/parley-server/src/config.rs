//! Server and relay configuration loaded from environment variables.
//!
//! All settings have defaults so a single server can start with zero
//! configuration for local development. Invalid values are logged and the
//! default is kept.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use parley_shared::constants::{
    DEFAULT_RELAY_PORT, DEFAULT_SERVER_PORT, IO_TIMEOUT_MS, MAX_COLLECTION_LEN, RELAY_BATCH_SIZE,
    RELAY_REFRESH_MS, SNAPSHOT_REFRESH_MS,
};
use parley_shared::{Id, Secret};

use crate::error::ServerError;

/// Chat server configuration.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Address the client listener binds to.
    /// Env: `LISTEN_ADDR`
    /// Default: `0.0.0.0:2007`
    pub listen_addr: SocketAddr,

    /// This server's team id at the relay.
    /// Env: `SERVER_ID`
    /// Default: nil id.
    pub server_id: Id,

    /// Shared secret presented to the relay (hex).
    /// Env: `SERVER_SECRET`
    /// Default: empty.
    pub server_secret: Secret,

    /// Relay `host:port`. Relay sync is disabled when unset.
    /// Env: `RELAY_ADDR`
    pub relay_addr: Option<String>,

    /// SQLite snapshot file.
    /// Env: `SNAPSHOT_PATH`
    /// Default: `./parley.db`
    pub snapshot_path: PathBuf,

    /// Env: `RELAY_REFRESH_MS`
    pub relay_refresh: Duration,

    /// Maximum bundles requested per pull.
    /// Env: `RELAY_BATCH_SIZE`
    pub relay_batch_size: u32,

    /// Env: `SNAPSHOT_REFRESH_MS`
    pub snapshot_refresh: Duration,

    /// Per-connection read/write timeout. A slow client holds the timeline
    /// for at most this long per operation.
    /// Env: `IO_TIMEOUT_MS`
    pub io_timeout: Duration,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen_addr: ([0, 0, 0, 0], DEFAULT_SERVER_PORT).into(),
            server_id: Id::NULL,
            server_secret: Secret::new(Vec::new()),
            relay_addr: None,
            snapshot_path: PathBuf::from("./parley.db"),
            relay_refresh: Duration::from_millis(RELAY_REFRESH_MS),
            relay_batch_size: RELAY_BATCH_SIZE,
            snapshot_refresh: Duration::from_millis(SNAPSHOT_REFRESH_MS),
            io_timeout: Duration::from_millis(IO_TIMEOUT_MS),
        }
    }
}

impl ServerConfig {
    /// Load configuration from environment variables, falling back to defaults.
    pub fn from_env() -> Self {
        Self::from_vars(|key| std::env::var(key).ok())
    }

    /// Load configuration through an arbitrary variable lookup.
    pub fn from_vars(var: impl Fn(&str) -> Option<String>) -> Self {
        let mut config = Self::default();

        parse_into(&var, "LISTEN_ADDR", &mut config.listen_addr);
        parse_into(&var, "SERVER_ID", &mut config.server_id);

        if let Some(hex_secret) = var("SERVER_SECRET") {
            match Secret::from_hex(&hex_secret) {
                Ok(secret) => config.server_secret = secret,
                Err(e) => tracing::warn!(error = %e, "Invalid SERVER_SECRET, using empty secret"),
            }
        }

        if let Some(addr) = var("RELAY_ADDR").filter(|a| !a.trim().is_empty()) {
            config.relay_addr = Some(addr.trim().to_string());
        }

        if let Some(path) = var("SNAPSHOT_PATH") {
            config.snapshot_path = PathBuf::from(path);
        }

        parse_millis(&var, "RELAY_REFRESH_MS", &mut config.relay_refresh);
        parse_into(&var, "RELAY_BATCH_SIZE", &mut config.relay_batch_size);
        parse_millis(&var, "SNAPSHOT_REFRESH_MS", &mut config.snapshot_refresh);
        parse_io_timeout(&var, &mut config.io_timeout);

        if config.relay_batch_size == 0 {
            tracing::warn!("RELAY_BATCH_SIZE of 0 would never advance, using default");
            config.relay_batch_size = RELAY_BATCH_SIZE;
        }
        if config.relay_batch_size as usize > MAX_COLLECTION_LEN {
            tracing::warn!(
                requested = config.relay_batch_size,
                max = MAX_COLLECTION_LEN,
                "RELAY_BATCH_SIZE exceeds the largest encodable batch, clamping"
            );
            config.relay_batch_size = MAX_COLLECTION_LEN as u32;
        }
        if config.relay_addr.is_some() && config.server_id.is_null() {
            tracing::warn!("RELAY_ADDR set without SERVER_ID; the relay will likely deny access");
        }

        config
    }
}

/// Relay service configuration.
#[derive(Debug, Clone)]
pub struct RelayConfig {
    /// Env: `LISTEN_ADDR`
    /// Default: `0.0.0.0:2008`
    pub listen_addr: SocketAddr,

    /// Team ids and their secrets.
    /// Env: `RELAY_TEAMS` as `uuid:hexsecret,uuid:hexsecret`
    pub teams: HashMap<Id, Secret>,

    /// Env: `IO_TIMEOUT_MS`
    pub io_timeout: Duration,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            listen_addr: ([0, 0, 0, 0], DEFAULT_RELAY_PORT).into(),
            teams: HashMap::new(),
            io_timeout: Duration::from_millis(IO_TIMEOUT_MS),
        }
    }
}

impl RelayConfig {
    pub fn from_env() -> Self {
        Self::from_vars(|key| std::env::var(key).ok())
    }

    pub fn from_vars(var: impl Fn(&str) -> Option<String>) -> Self {
        let mut config = Self::default();

        parse_into(&var, "LISTEN_ADDR", &mut config.listen_addr);
        parse_io_timeout(&var, &mut config.io_timeout);

        if let Some(teams) = var("RELAY_TEAMS") {
            match parse_teams(&teams) {
                Ok(parsed) => config.teams = parsed,
                Err(e) => tracing::warn!(error = %e, "Invalid RELAY_TEAMS, no teams configured"),
            }
        }
        if config.teams.is_empty() {
            tracing::warn!("No relay teams configured; every request will be denied");
        }

        config
    }
}

fn parse_into<T>(var: &impl Fn(&str) -> Option<String>, key: &str, slot: &mut T)
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    if let Some(raw) = var(key) {
        match raw.trim().parse::<T>() {
            Ok(value) => *slot = value,
            Err(e) => tracing::warn!(key, value = %raw, error = %e, "Invalid value, using default"),
        }
    }
}

fn parse_millis(var: &impl Fn(&str) -> Option<String>, key: &str, slot: &mut Duration) {
    let mut millis = slot.as_millis() as u64;
    parse_into(var, key, &mut millis);
    *slot = Duration::from_millis(millis);
}

/// Sockets reject a zero timeout, so 0 keeps the default.
fn parse_io_timeout(var: &impl Fn(&str) -> Option<String>, slot: &mut Duration) {
    let fallback = *slot;
    parse_millis(var, "IO_TIMEOUT_MS", slot);
    if slot.is_zero() {
        tracing::warn!("IO_TIMEOUT_MS of 0 is not a valid socket timeout, using default");
        *slot = fallback;
    }
}

/// Parse `uuid:hexsecret` pairs separated by commas.
pub fn parse_teams(raw: &str) -> Result<HashMap<Id, Secret>, ServerError> {
    let mut teams = HashMap::new();
    for entry in raw.split(',').map(str::trim).filter(|e| !e.is_empty()) {
        let (id, secret) = entry
            .split_once(':')
            .ok_or_else(|| ServerError::Config(format!("expected id:secret, got {entry:?}")))?;
        let id = id
            .parse::<Id>()
            .map_err(|e| ServerError::Config(format!("team id {id:?}: {e}")))?;
        let secret = Secret::from_hex(secret)
            .map_err(|e| ServerError::Config(format!("secret for team {id}: {e}")))?;
        teams.insert(id, secret);
    }
    Ok(teams)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn vars(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn test_default_config() {
        let config = ServerConfig::default();
        assert_eq!(config.listen_addr.port(), DEFAULT_SERVER_PORT);
        assert_eq!(config.relay_batch_size, 32);
        assert_eq!(config.relay_refresh, Duration::from_millis(5_000));
        assert_eq!(config.snapshot_refresh, Duration::from_millis(1_000));
        assert!(config.relay_addr.is_none());
    }

    #[test]
    fn test_server_config_from_vars() {
        let id = Id::generate();
        let id_text = id.to_string();
        let config = ServerConfig::from_vars(vars(&[
            ("LISTEN_ADDR", "127.0.0.1:9000"),
            ("SERVER_ID", id_text.as_str()),
            ("SERVER_SECRET", "abcd"),
            ("RELAY_ADDR", "relay.local:2008"),
            ("RELAY_BATCH_SIZE", "8"),
            ("IO_TIMEOUT_MS", "250"),
        ]));
        assert_eq!(config.listen_addr, "127.0.0.1:9000".parse().unwrap());
        assert_eq!(config.server_id, id);
        assert_eq!(config.server_secret.as_bytes(), &[0xab, 0xcd]);
        assert_eq!(config.relay_addr.as_deref(), Some("relay.local:2008"));
        assert_eq!(config.relay_batch_size, 8);
        assert_eq!(config.io_timeout, Duration::from_millis(250));
    }

    #[test]
    fn test_invalid_values_keep_defaults() {
        let config = ServerConfig::from_vars(vars(&[
            ("LISTEN_ADDR", "not an address"),
            ("SERVER_SECRET", "zz"),
            ("RELAY_BATCH_SIZE", "0"),
            ("SNAPSHOT_REFRESH_MS", "soon"),
        ]));
        assert_eq!(config.listen_addr.port(), DEFAULT_SERVER_PORT);
        assert!(config.server_secret.as_bytes().is_empty());
        assert_eq!(config.relay_batch_size, RELAY_BATCH_SIZE);
        assert_eq!(config.snapshot_refresh, Duration::from_millis(SNAPSHOT_REFRESH_MS));
    }

    #[test]
    fn test_zero_io_timeout_keeps_default() {
        let server = ServerConfig::from_vars(vars(&[("IO_TIMEOUT_MS", "0")]));
        assert_eq!(server.io_timeout, Duration::from_millis(IO_TIMEOUT_MS));

        let relay = RelayConfig::from_vars(vars(&[("IO_TIMEOUT_MS", "0")]));
        assert_eq!(relay.io_timeout, Duration::from_millis(IO_TIMEOUT_MS));

        // The resulting timeout is one a socket accepts.
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let stream = std::net::TcpStream::connect(listener.local_addr().unwrap()).unwrap();
        assert!(crate::connection::TcpConnection::new(stream, server.io_timeout).is_ok());
    }

    #[test]
    fn test_batch_size_clamped_to_encodable_collection() {
        let config = ServerConfig::from_vars(vars(&[("RELAY_BATCH_SIZE", "100000")]));
        assert_eq!(config.relay_batch_size as usize, MAX_COLLECTION_LEN);

        let config = ServerConfig::from_vars(vars(&[("RELAY_BATCH_SIZE", "65536")]));
        assert_eq!(config.relay_batch_size, 65_536);
    }

    #[test]
    fn test_parse_teams() {
        let a = Id::generate();
        let b = Id::generate();
        let teams = parse_teams(&format!("{a}:0a0b, {b}:ff")).unwrap();
        assert_eq!(teams.len(), 2);
        assert_eq!(teams[&a].as_bytes(), &[0x0a, 0x0b]);
        assert_eq!(teams[&b].as_bytes(), &[0xff]);

        assert!(parse_teams("missing-colon").is_err());
        assert!(parse_teams(&format!("{a}:")).is_err());
        assert!(parse_teams("").unwrap().is_empty());
    }
}
