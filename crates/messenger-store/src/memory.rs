//! In-process [`DocumentStore`], used by tests and as a scratch backend.

use async_trait::async_trait;
use serde_json::Value;
use tokio::sync::{broadcast, RwLock};
use tracing::debug;

use crate::document::{DocumentStore, TransactFn, CHANGE_CHANNEL_CAPACITY};
use crate::error::Result;
use crate::path;

/// The whole tree lives in one `serde_json::Value` behind an async lock.
pub struct MemoryStore {
    root: RwLock<Value>,
    changes: broadcast::Sender<String>,
}

impl MemoryStore {
    pub fn new() -> Self {
        let (changes, _) = broadcast::channel(CHANGE_CHANNEL_CAPACITY);
        Self {
            root: RwLock::new(Value::Null),
            changes,
        }
    }

    fn notify(&self, path: &str) {
        // no subscribers is fine
        let _ = self.changes.send(path.to_string());
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl DocumentStore for MemoryStore {
    async fn get(&self, path: &str) -> Result<Option<Value>> {
        let segs = path::segments(path)?;
        let root = self.root.read().await;
        Ok(path::get(&root, &segs).cloned())
    }

    async fn set(&self, path: &str, value: Value) -> Result<()> {
        let segs = path::segments(path)?;
        {
            let mut root = self.root.write().await;
            path::set(&mut root, &segs, value)?;
        }
        debug!(path, "memory store write");
        self.notify(path);
        Ok(())
    }

    async fn transact(&self, paths: &[&str], f: TransactFn<'_>) -> Result<()> {
        let all_segs = paths
            .iter()
            .map(|p| path::segments(p))
            .collect::<Result<Vec<_>>>()?;

        {
            let mut root = self.root.write().await;
            let mut slots: Vec<Option<Value>> = all_segs
                .iter()
                .map(|segs| path::get(&root, segs).cloned())
                .collect();

            f(&mut slots)?;

            // Stage on a copy so a failing write leaves the tree untouched.
            let mut staged = root.clone();
            for (segs, value) in all_segs.iter().zip(slots) {
                path::set(&mut staged, segs, value.unwrap_or(Value::Null))?;
            }
            *root = staged;
        }

        for p in paths {
            self.notify(p);
        }
        debug!(?paths, "memory store transaction committed");
        Ok(())
    }

    fn changes(&self) -> broadcast::Receiver<String> {
        self.changes.subscribe()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::StoreError;
    use serde_json::json;

    #[tokio::test]
    async fn test_get_set() {
        let store = MemoryStore::new();
        assert_eq!(store.get("alice").await.unwrap(), None);

        store
            .set("alice", json!({ "first_name": "Alice" }))
            .await
            .unwrap();
        store
            .set("alice/conversations", json!([]))
            .await
            .unwrap();

        let doc = store.get("alice").await.unwrap().unwrap();
        assert_eq!(doc["first_name"], "Alice");
        assert_eq!(doc["conversations"], json!([]));
    }

    #[tokio::test]
    async fn test_transaction_applies_all_paths() {
        let store = MemoryStore::new();
        store.set("a", json!(1)).await.unwrap();

        store
            .transact(
                &["a", "b/c"],
                Box::new(|slots| {
                    let a = slots[0].as_ref().and_then(Value::as_i64).unwrap_or(0);
                    slots[0] = Some(json!(a + 1));
                    slots[1] = Some(json!("x"));
                    Ok(())
                }),
            )
            .await
            .unwrap();

        assert_eq!(store.get("a").await.unwrap(), Some(json!(2)));
        assert_eq!(store.get("b/c").await.unwrap(), Some(json!("x")));
    }

    #[tokio::test]
    async fn test_aborted_transaction_writes_nothing() {
        let store = MemoryStore::new();
        store.set("a", json!(1)).await.unwrap();

        let result = store
            .transact(
                &["a"],
                Box::new(|slots| {
                    slots[0] = Some(json!(99));
                    Err(StoreError::Conflict("nope".into()))
                }),
            )
            .await;

        assert!(result.is_err());
        assert_eq!(store.get("a").await.unwrap(), Some(json!(1)));
    }

    #[tokio::test]
    async fn test_changes_are_broadcast() {
        let store = MemoryStore::new();
        let mut rx = store.changes();
        store.set("alice/conversations", json!([])).await.unwrap();
        assert_eq!(rx.recv().await.unwrap(), "alice/conversations");
    }

    #[tokio::test]
    async fn test_update_single_path() {
        let store = MemoryStore::new();
        store
            .update("counter", Box::new(|old| {
                let n = old.as_ref().and_then(Value::as_i64).unwrap_or(0);
                Ok(Some(json!(n + 5)))
            }))
            .await
            .unwrap();
        assert_eq!(store.get("counter").await.unwrap(), Some(json!(5)));
    }
}
