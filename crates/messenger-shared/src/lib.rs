//! # messenger-shared
//!
//! Types shared by every crate of the workspace: the identity normalizer,
//! typed conversation and message models, and the decode error raised when a
//! persisted record does not have the expected shape.

pub mod constants;
pub mod error;
pub mod identity;
pub mod types;

pub use error::DecodeError;
pub use identity::{normalize, IdentityKey};
pub use types::*;
