use thiserror::Error;

/// A persisted record whose fields do not match the shape its type requires.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DecodeError {
    #[error("Unknown message type: {0}")]
    UnknownKind(String),

    #[error("Invalid URL in {kind} message: {reason}")]
    InvalidUrl { kind: &'static str, reason: String },

    #[error("Invalid location payload: {0}")]
    InvalidLocation(String),

    #[error("Invalid timestamp: {0}")]
    InvalidTimestamp(String),

    #[error("Malformed record: {0}")]
    Malformed(String),
}
