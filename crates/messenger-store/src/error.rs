use thiserror::Error;

/// Errors produced by the store layer.
#[derive(Error, Debug)]
pub enum StoreError {
    /// SQLite error.
    #[error("Database error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    /// Failed to determine a platform data directory.
    #[error("Could not determine application data directory")]
    NoDataDir,

    /// Generic I/O error (database directory, blob files).
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// A stored document is not valid JSON, or a value failed to serialize.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// The requested document or blob does not exist.
    #[error("Record not found: {0}")]
    NotFound(String),

    /// A path contains an empty segment or a reserved character.
    #[error("Invalid path '{path}': {reason}")]
    InvalidPath { path: String, reason: &'static str },

    /// A write tried to descend into a value that is not an object.
    #[error("Cannot write below non-object value at '{0}'")]
    NotAnObject(String),

    /// The write was refused because it would break an invariant of the data.
    #[error("Write rejected: {0}")]
    Conflict(String),

    #[error("Blob too large: {size} bytes (max {max})")]
    BlobTooLarge { size: usize, max: usize },

    /// Migration failure.
    #[error("Migration error: {0}")]
    Migration(String),

    /// The connection mutex was poisoned by a panicking writer.
    #[error("Database lock poisoned")]
    LockPoisoned,
}

/// Convenience alias used throughout the crate.
pub type Result<T> = std::result::Result<T, StoreError>;
