//! The signed-in user, passed explicitly to every synchronizer operation.
//!
//! [`SessionCache`] only remembers who is signed in between runs; nothing in
//! the core reads it implicitly.

use std::path::{Path, PathBuf};
use std::sync::RwLock;

use serde::{Deserialize, Serialize};
use tracing::info;

use messenger_shared::{IdentityKey, Sender};

use crate::error::{Result, SyncError};

/// Who is acting: the email the user signed in with, its identity key, and
/// the name shown to counterparts.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Session {
    pub email: String,
    pub identity: IdentityKey,
    pub display_name: String,
}

impl Session {
    pub fn new(email: &str, display_name: &str) -> Self {
        Self {
            email: email.to_string(),
            identity: IdentityKey::from_email(email),
            display_name: display_name.to_string(),
        }
    }

    /// The sender stamped on messages written by this user.
    pub fn sender(&self) -> Sender {
        Sender {
            identity: self.identity.clone(),
            display_name: self.display_name.clone(),
        }
    }
}

/// Holds at most one session, optionally mirrored to a JSON file.
pub struct SessionCache {
    current: RwLock<Option<Session>>,
    file: Option<PathBuf>,
}

impl SessionCache {
    /// A cache that forgets everything when dropped.
    pub fn in_memory() -> Self {
        Self {
            current: RwLock::new(None),
            file: None,
        }
    }

    /// Load the cache from `file`. A missing file means nobody is signed in.
    pub fn load(file: &Path) -> Result<Self> {
        let current = match std::fs::read_to_string(file) {
            Ok(body) => Some(
                serde_json::from_str(&body)
                    .map_err(|e| SyncError::SessionStorage(e.to_string()))?,
            ),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => None,
            Err(e) => return Err(SyncError::SessionStorage(e.to_string())),
        };

        Ok(Self {
            current: RwLock::new(current),
            file: Some(file.to_path_buf()),
        })
    }

    /// The signed-in user, or [`SyncError::SessionMissing`].
    pub fn current(&self) -> Result<Session> {
        self.current
            .read()
            .map_err(|_| SyncError::SessionStorage("session lock poisoned".into()))?
            .clone()
            .ok_or(SyncError::SessionMissing)
    }

    pub fn sign_in(&self, session: Session) -> Result<()> {
        if let Some(file) = &self.file {
            let body = serde_json::to_string_pretty(&session)
                .map_err(|e| SyncError::SessionStorage(e.to_string()))?;
            if let Some(parent) = file.parent() {
                std::fs::create_dir_all(parent)
                    .map_err(|e| SyncError::SessionStorage(e.to_string()))?;
            }
            std::fs::write(file, body).map_err(|e| SyncError::SessionStorage(e.to_string()))?;
        }

        info!(identity = %session.identity, "signed in");
        *self
            .current
            .write()
            .map_err(|_| SyncError::SessionStorage("session lock poisoned".into()))? = Some(session);
        Ok(())
    }

    pub fn sign_out(&self) -> Result<()> {
        if let Some(file) = &self.file {
            match std::fs::remove_file(file) {
                Ok(()) => {}
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => return Err(SyncError::SessionStorage(e.to_string())),
            }
        }

        *self
            .current
            .write()
            .map_err(|_| SyncError::SessionStorage("session lock poisoned".into()))? = None;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_cache_reports_missing_session() {
        let cache = SessionCache::in_memory();
        assert!(matches!(cache.current(), Err(SyncError::SessionMissing)));
    }

    #[test]
    fn test_session_derives_identity() {
        let session = Session::new("alice@example.com", "Alice");
        assert_eq!(session.identity.as_str(), "alice-example-com");
        assert_eq!(session.sender().display_name, "Alice");
    }

    #[test]
    fn test_persisted_session_survives_reload() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("session.json");

        let cache = SessionCache::load(&file).unwrap();
        assert!(cache.current().is_err());
        cache
            .sign_in(Session::new("alice@example.com", "Alice"))
            .unwrap();

        let reloaded = SessionCache::load(&file).unwrap();
        assert_eq!(reloaded.current().unwrap().display_name, "Alice");

        reloaded.sign_out().unwrap();
        let after = SessionCache::load(&file).unwrap();
        assert!(matches!(after.current(), Err(SyncError::SessionMissing)));
    }
}
