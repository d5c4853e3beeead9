//! The document store abstraction the conversation core is written against.
//!
//! A store holds a tree of JSON values addressed by `/`-separated paths
//! (see [`crate::path`]). Besides plain reads and whole-value writes it offers
//! a multi-path transaction, which is what makes an atomic fan-out possible,
//! and a broadcast of written paths for live readers.

use async_trait::async_trait;
use serde_json::Value;
use tokio::sync::broadcast;

use crate::error::Result;

/// Closure run inside [`DocumentStore::transact`].
///
/// It receives the current value of every requested path (in request order,
/// `None` when absent) and mutates them in place. Returning an error aborts
/// the transaction without writing anything.
pub type TransactFn<'a> = Box<dyn FnOnce(&mut [Option<Value>]) -> Result<()> + Send + 'a>;

/// Closure run inside [`DocumentStore::update`]: old value in, new value out.
pub type UpdateFn<'a> = Box<dyn FnOnce(Option<Value>) -> Result<Option<Value>> + Send + 'a>;

/// Capacity of the change broadcast channel. Slow subscribers that fall
/// further behind observe a lag and re-read.
pub const CHANGE_CHANNEL_CAPACITY: usize = 256;

#[async_trait]
pub trait DocumentStore: Send + Sync {
    /// Read the value at `path`; `None` if nothing is stored there.
    async fn get(&self, path: &str) -> Result<Option<Value>>;

    /// Replace the value at `path`. Writing `Value::Null` removes it.
    async fn set(&self, path: &str, value: Value) -> Result<()>;

    /// Read several paths, let `f` rewrite them, and write the results back
    /// as one atomic step. No other write to the store interleaves.
    async fn transact(&self, paths: &[&str], f: TransactFn<'_>) -> Result<()>;

    /// Subscribe to the paths of committed writes.
    fn changes(&self) -> broadcast::Receiver<String>;

    /// Atomic read-modify-write of a single path.
    async fn update(&self, path: &str, f: UpdateFn<'_>) -> Result<()> {
        self.transact(
            &[path],
            Box::new(move |slots| {
                let current = slots[0].take();
                slots[0] = f(current)?;
                Ok(())
            }),
        )
        .await
    }
}
