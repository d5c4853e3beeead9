//! # messenger-store
//!
//! Storage for the messenger core: a path-addressed JSON document store
//! ([`DocumentStore`]) with an in-memory and a SQLite backend, a blob store
//! for media, and the persisted record shapes of users, conversation
//! summaries and messages.

pub mod blobs;
pub mod database;
pub mod document;
pub mod memory;
pub mod migrations;
pub mod models;
pub mod path;

mod error;

pub use blobs::{BlobStore, FsBlobStore};
pub use database::{default_data_dir, Database};
pub use document::{DocumentStore, TransactFn, UpdateFn};
pub use error::{Result, StoreError};
pub use memory::MemoryStore;
