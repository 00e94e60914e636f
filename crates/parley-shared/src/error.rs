use thiserror::Error;

/// Failures while reading or writing wire values on a connection.
///
/// Any of these means the exchange is unusable: the caller logs it and closes
/// the connection without a reply.
#[derive(Error, Debug)]
pub enum ProtocolError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("String field too long: {len} bytes (max {max})")]
    StringTooLong { len: usize, max: usize },

    #[error("Collection too large: {count} elements (max {max})")]
    CollectionTooLarge { count: usize, max: usize },

    #[error("Invalid UTF-8 in string field: {0}")]
    Utf8(#[from] std::string::FromUtf8Error),

    #[error("Timestamp out of range: {0} ms")]
    InvalidTime(i64),

    #[error("Invalid presence flag: {0:#04x}")]
    InvalidFlag(u8),

    #[error("Unexpected response code {actual} (expected {expected})")]
    UnexpectedResponse { expected: u32, actual: u32 },
}

/// Failures parsing identifiers and secrets from text (configuration).
#[derive(Error, Debug)]
pub enum ParseError {
    #[error("Invalid identifier: {0}")]
    Id(#[from] uuid::Error),

    #[error("Invalid secret hex: {0}")]
    Secret(#[from] hex::FromHexError),

    #[error("Secret must not be empty")]
    EmptySecret,
}
