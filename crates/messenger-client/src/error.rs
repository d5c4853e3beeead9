use thiserror::Error;

use messenger_shared::DecodeError;
use messenger_store::StoreError;

/// Errors surfaced by the conversation core.
///
/// Remote failures are reported to the caller as-is and never retried here;
/// a failed create or send can simply be issued again.
#[derive(Error, Debug)]
pub enum SyncError {
    /// A user or conversation document is absent.
    #[error("Not found: {0}")]
    NotFound(String),

    /// The store rejected a write.
    #[error("Write failed: {0}")]
    WriteFailed(#[source] StoreError),

    /// The store could not be read.
    #[error("Read failed: {0}")]
    ReadFailed(#[source] StoreError),

    /// A single record did not have the expected shape.
    #[error("Decode failed: {0}")]
    DecodeFailed(#[from] DecodeError),

    /// No user is signed in.
    #[error("No current user in session")]
    SessionMissing,

    /// The session cache file could not be read or written.
    #[error("Session storage error: {0}")]
    SessionStorage(String),

    #[error("Upload failed: {0}")]
    UploadFailed(#[source] StoreError),

    #[error("Could not resolve download URL: {0}")]
    UrlUnavailable(#[source] StoreError),
}

impl SyncError {
    /// Classify a failed write, keeping "document absent" distinguishable.
    pub(crate) fn write(e: StoreError) -> Self {
        match e {
            StoreError::NotFound(what) => Self::NotFound(what),
            other => Self::WriteFailed(other),
        }
    }

    pub(crate) fn read(e: StoreError) -> Self {
        match e {
            StoreError::NotFound(what) => Self::NotFound(what),
            other => Self::ReadFailed(other),
        }
    }
}

/// Convenience alias used throughout the crate.
pub type Result<T> = std::result::Result<T, SyncError>;
