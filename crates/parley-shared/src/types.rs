use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use subtle::ConstantTimeEq;
use uuid::Uuid;

use crate::error::ParseError;

// ---------------------------------------------------------------------------
// Identifier
// ---------------------------------------------------------------------------

/// Creation-ordered identifier shared by users, conversations, messages,
/// servers and relay bundles.
///
/// Generated ids are UUIDv7, whose byte order follows creation time, so the
/// derived `Ord` is the creation order. [`Id::NULL`] (all zero bytes) sorts
/// before every other id.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Id(pub Uuid);

impl Id {
    pub const NULL: Id = Id(Uuid::nil());

    /// Generate a fresh id stamped with the current time.
    pub fn generate() -> Self {
        Self(Uuid::now_v7())
    }

    pub fn from_bytes(bytes: [u8; 16]) -> Self {
        Self(Uuid::from_bytes(bytes))
    }

    /// Build an id from a semantic version triple. Used for the protocol
    /// version reported by server info.
    pub const fn from_version(major: u32, minor: u32, patch: u32) -> Self {
        Self(Uuid::from_u128(
            ((major as u128) << 64) | ((minor as u128) << 32) | patch as u128,
        ))
    }

    pub fn as_bytes(&self) -> &[u8; 16] {
        self.0.as_bytes()
    }

    pub fn is_null(&self) -> bool {
        self.0.is_nil()
    }
}

impl Default for Id {
    fn default() -> Self {
        Self::NULL
    }
}

impl fmt::Display for Id {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for Id {
    type Err = ParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(Self(Uuid::parse_str(s.trim())?))
    }
}

// ---------------------------------------------------------------------------
// Time
// ---------------------------------------------------------------------------

/// Wall-clock timestamp with millisecond precision (the wire precision).
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Time(DateTime<Utc>);

impl Time {
    pub fn now() -> Self {
        let now = Utc::now();
        // Truncate so a value survives the wire and the snapshot unchanged.
        Self::from_millis(now.timestamp_millis()).unwrap_or(Self(now))
    }

    pub fn from_millis(millis: i64) -> Option<Self> {
        Utc.timestamp_millis_opt(millis).single().map(Self)
    }

    pub fn as_millis(&self) -> i64 {
        self.0.timestamp_millis()
    }
}

impl fmt::Display for Time {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0.to_rfc3339())
    }
}

// ---------------------------------------------------------------------------
// Secret
// ---------------------------------------------------------------------------

/// Shared federation token proving a server's membership with the relay.
///
/// Never printed: `Debug` is redacted. Equality is the constant-time
/// [`Secret::matches`].
#[derive(Clone)]
pub struct Secret(Vec<u8>);

impl Secret {
    pub fn new(bytes: Vec<u8>) -> Self {
        Self(bytes)
    }

    pub fn from_hex(s: &str) -> Result<Self, ParseError> {
        let bytes = hex::decode(s.trim())?;
        if bytes.is_empty() {
            return Err(ParseError::EmptySecret);
        }
        Ok(Self(bytes))
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    /// Constant-time comparison against a presented token.
    pub fn matches(&self, presented: &Secret) -> bool {
        self.0.len() == presented.0.len() && self.0.ct_eq(&presented.0).unwrap_u8() == 1
    }
}

impl PartialEq for Secret {
    fn eq(&self, other: &Self) -> bool {
        self.matches(other)
    }
}

impl Eq for Secret {}

impl fmt::Debug for Secret {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Secret(<{} bytes>)", self.0.len())
    }
}
