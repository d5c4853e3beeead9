//! SQLite-backed [`DocumentStore`].
//!
//! Each top-level path segment (a user's identity key, a conversation id,
//! `users`) is one row of the `documents` table holding the JSON of that
//! subtree. Deeper paths are resolved inside the row's JSON. The connection
//! sits behind a mutex and every `transact` runs as an immediate SQLite
//! transaction, so fan-out writes across several rows commit together.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};

use async_trait::async_trait;
use chrono::Utc;
use directories::ProjectDirs;
use rusqlite::{params, Connection, OptionalExtension, TransactionBehavior};
use serde_json::Value;
use tokio::sync::broadcast;
use tracing::debug;

use crate::document::{DocumentStore, TransactFn, CHANGE_CHANNEL_CAPACITY};
use crate::error::{Result, StoreError};
use crate::migrations;
use crate::path;

/// Wrapper around a [`rusqlite::Connection`].
pub struct Database {
    conn: Mutex<Connection>,
    changes: broadcast::Sender<String>,
}

impl Database {
    /// Open (or create) the default application database.
    ///
    /// The database file is placed in the platform-appropriate data directory:
    /// - Linux:   `~/.local/share/messenger/messenger.db`
    /// - macOS:   `~/Library/Application Support/com.messenger.messenger/messenger.db`
    /// - Windows: `{FOLDERID_RoamingAppData}\messenger\messenger\data\messenger.db`
    pub fn new() -> Result<Self> {
        let data_dir = default_data_dir()?;
        std::fs::create_dir_all(&data_dir)?;

        let db_path = data_dir.join("messenger.db");

        tracing::info!(path = %db_path.display(), "opening database");

        Self::open_at(&db_path)
    }

    /// Open (or create) a database at an explicit path.
    pub fn open_at(path: &Path) -> Result<Self> {
        let conn = Connection::open(path)?;
        conn.pragma_update(None, "journal_mode", "WAL")?;
        Self::from_connection(conn)
    }

    /// Throwaway database, mostly for tests.
    pub fn open_in_memory() -> Result<Self> {
        Self::from_connection(Connection::open_in_memory()?)
    }

    fn from_connection(conn: Connection) -> Result<Self> {
        migrations::run_migrations(&conn)?;
        let (changes, _) = broadcast::channel(CHANGE_CHANNEL_CAPACITY);
        Ok(Self {
            conn: Mutex::new(conn),
            changes,
        })
    }

    /// Return the filesystem path of the open database (if any).
    pub fn path(&self) -> Option<PathBuf> {
        let conn = self.lock().ok()?;
        conn.path().filter(|p| !p.is_empty()).map(PathBuf::from)
    }

    fn lock(&self) -> Result<MutexGuard<'_, Connection>> {
        self.conn.lock().map_err(|_| StoreError::LockPoisoned)
    }

    fn notify(&self, path: &str) {
        let _ = self.changes.send(path.to_string());
    }
}

/// Platform data directory for the application (database, blobs, session).
pub fn default_data_dir() -> Result<PathBuf> {
    let project_dirs =
        ProjectDirs::from("com", "messenger", "messenger").ok_or(StoreError::NoDataDir)?;
    Ok(project_dirs.data_dir().to_path_buf())
}

#[async_trait]
impl DocumentStore for Database {
    async fn get(&self, path: &str) -> Result<Option<Value>> {
        let segs = path::segments(path)?;
        let conn = self.lock()?;
        let root = load_root(&conn, segs[0])?;
        Ok(path::get(&root, &segs[1..]).cloned())
    }

    async fn set(&self, path: &str, value: Value) -> Result<()> {
        let segs = path::segments(path)?;
        {
            let mut conn = self.lock()?;
            let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
            let mut root = load_root(&tx, segs[0])?;
            path::set(&mut root, &segs[1..], value)?;
            store_root(&tx, segs[0], &root)?;
            tx.commit()?;
        }
        debug!(path, "document written");
        self.notify(path);
        Ok(())
    }

    async fn transact(&self, paths: &[&str], f: TransactFn<'_>) -> Result<()> {
        let all_segs = paths
            .iter()
            .map(|p| path::segments(p))
            .collect::<Result<Vec<_>>>()?;

        {
            let mut conn = self.lock()?;
            let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;

            let mut roots: HashMap<&str, Value> = HashMap::new();
            for segs in &all_segs {
                if !roots.contains_key(segs[0]) {
                    roots.insert(segs[0], load_root(&tx, segs[0])?);
                }
            }

            let mut slots: Vec<Option<Value>> = all_segs
                .iter()
                .map(|segs| path::get(&roots[segs[0]], &segs[1..]).cloned())
                .collect();

            // Dropping `tx` on error rolls back.
            f(&mut slots)?;

            for (segs, value) in all_segs.iter().zip(slots) {
                let root = roots
                    .get_mut(segs[0])
                    .ok_or_else(|| StoreError::NotFound(segs[0].to_string()))?;
                path::set(root, &segs[1..], value.unwrap_or(Value::Null))?;
            }
            for (key, root) in &roots {
                store_root(&tx, key, root)?;
            }
            tx.commit()?;
        }

        for p in paths {
            self.notify(p);
        }
        debug!(?paths, "transaction committed");
        Ok(())
    }

    fn changes(&self) -> broadcast::Receiver<String> {
        self.changes.subscribe()
    }
}

fn load_root(conn: &Connection, key: &str) -> Result<Value> {
    let body: Option<String> = conn
        .query_row(
            "SELECT body FROM documents WHERE key = ?1",
            params![key],
            |row| row.get(0),
        )
        .optional()?;

    match body {
        Some(body) => Ok(serde_json::from_str(&body)?),
        None => Ok(Value::Null),
    }
}

fn store_root(conn: &Connection, key: &str, root: &Value) -> Result<()> {
    if root.is_null() {
        conn.execute("DELETE FROM documents WHERE key = ?1", params![key])?;
        return Ok(());
    }

    conn.execute(
        "INSERT INTO documents (key, body, updated_at) VALUES (?1, ?2, ?3)
         ON CONFLICT(key) DO UPDATE SET body = excluded.body, updated_at = excluded.updated_at",
        params![key, serde_json::to_string(root)?, Utc::now().to_rfc3339()],
    )?;
    Ok(())
}
