//! # parley-shared
//!
//! Primitives shared by every Parley crate: creation-ordered identifiers,
//! timestamps, the federation secret, and the binary wire codec.

pub mod constants;
pub mod error;
pub mod protocol;
pub mod types;

pub use error::{ParseError, ProtocolError};
pub use protocol::{Opcode, Wire};
pub use types::{Id, Secret, Time};
