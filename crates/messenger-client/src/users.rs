//! User records: profile fields, the per-user conversation summary list, and
//! the user directory.

use std::sync::Arc;

use serde_json::{Map, Value};
use tracing::{debug, info};

use messenger_shared::constants::{CONVERSATIONS_CHILD, USER_DIRECTORY_PATH};
use messenger_shared::{ChatUser, ConversationSummary, DecodeError, DirectoryEntry, IdentityKey};
use messenger_store::models::{self, DirectoryRecord, ProfileRecord, SummaryRecord};
use messenger_store::DocumentStore;

use crate::error::{Result, SyncError};

/// Profile fields read back from a user document.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Profile {
    pub identity: IdentityKey,
    pub first_name: String,
    pub last_name: String,
}

impl Profile {
    pub fn full_name(&self) -> String {
        format!("{} {}", self.first_name, self.last_name)
    }
}

pub struct UserRecords {
    docs: Arc<dyn DocumentStore>,
}

impl UserRecords {
    pub fn new(docs: Arc<dyn DocumentStore>) -> Self {
        Self { docs }
    }

    pub fn conversations_path(identity: &IdentityKey) -> String {
        format!("{identity}/{CONVERSATIONS_CHILD}")
    }

    // ------------------------------------------------------------------
    // Accounts
    // ------------------------------------------------------------------

    /// Create (or refresh) a user's profile and list them in the directory.
    ///
    /// Existing children of the user document, such as the conversation list,
    /// are kept.
    pub async fn insert_user(&self, user: &ChatUser) -> Result<()> {
        let identity = user.identity();
        let profile = serde_json::to_value(ProfileRecord::from(user))
            .map_err(|e| SyncError::WriteFailed(e.into()))?;

        self.docs
            .update(
                identity.as_str(),
                Box::new(move |old| {
                    let mut doc = match old {
                        Some(Value::Object(map)) => map,
                        _ => Map::new(),
                    };
                    if let Value::Object(fields) = profile {
                        doc.extend(fields);
                    }
                    Ok(Some(Value::Object(doc)))
                }),
            )
            .await
            .map_err(SyncError::write)?;

        let entry = serde_json::to_value(DirectoryRecord::from(user))
            .map_err(|e| SyncError::WriteFailed(e.into()))?;
        let email = identity.to_string();

        self.docs
            .update(
                USER_DIRECTORY_PATH,
                Box::new(move |old| {
                    let mut users = match old {
                        Some(Value::Array(items)) => items,
                        _ => Vec::new(),
                    };
                    match users.iter().position(|u| u["email"] == email.as_str()) {
                        Some(i) => users[i] = entry,
                        None => users.push(entry),
                    }
                    Ok(Some(Value::Array(users)))
                }),
            )
            .await
            .map_err(SyncError::write)?;

        info!(identity = %identity, "user registered");
        Ok(())
    }

    pub async fn user_exists(&self, email: &str) -> Result<bool> {
        let identity = IdentityKey::from_email(email);
        let doc = self
            .docs
            .get(identity.as_str())
            .await
            .map_err(SyncError::read)?;
        Ok(doc.is_some())
    }

    pub async fn profile(&self, identity: &IdentityKey) -> Result<Profile> {
        let doc = self
            .docs
            .get(identity.as_str())
            .await
            .map_err(SyncError::read)?
            .ok_or_else(|| SyncError::NotFound(identity.to_string()))?;

        let record: ProfileRecord = serde_json::from_value(doc)
            .map_err(|e| SyncError::DecodeFailed(DecodeError::Malformed(e.to_string())))?;

        Ok(Profile {
            identity: identity.clone(),
            first_name: record.first_name,
            last_name: record.last_name,
        })
    }

    // ------------------------------------------------------------------
    // Directory
    // ------------------------------------------------------------------

    pub async fn directory(&self) -> Result<Vec<DirectoryEntry>> {
        let users = self
            .docs
            .get(USER_DIRECTORY_PATH)
            .await
            .map_err(SyncError::read)?
            .ok_or_else(|| SyncError::NotFound(USER_DIRECTORY_PATH.to_string()))?;

        Ok(models::decode_list::<DirectoryRecord, DirectoryEntry>(
            users, "users",
        ))
    }

    /// Users whose name starts with `term` (case-insensitive), leaving out
    /// `excluding` (normally the caller).
    pub async fn search(
        &self,
        term: &str,
        excluding: Option<&IdentityKey>,
    ) -> Result<Vec<DirectoryEntry>> {
        let needle = term.trim().to_lowercase();
        let hits: Vec<DirectoryEntry> = self
            .directory()
            .await?
            .into_iter()
            .filter(|entry| Some(&entry.identity) != excluding)
            .filter(|entry| entry.name.to_lowercase().starts_with(&needle))
            .collect();

        debug!(term, hits = hits.len(), "directory search");
        Ok(hits)
    }

    // ------------------------------------------------------------------
    // Conversation summaries
    // ------------------------------------------------------------------

    /// Typed summary list; entries that fail validation are dropped.
    pub async fn summaries(&self, identity: &IdentityKey) -> Result<Vec<ConversationSummary>> {
        let list = self
            .read_summaries(identity)
            .await?
            .ok_or_else(|| SyncError::NotFound(Self::conversations_path(identity)))?;

        Ok(models::decode_list::<SummaryRecord, ConversationSummary>(
            list,
            "conversations",
        ))
    }

    pub async fn read_summaries(&self, identity: &IdentityKey) -> Result<Option<Value>> {
        self.docs
            .get(&Self::conversations_path(identity))
            .await
            .map_err(SyncError::read)
    }

    pub async fn write_summaries(&self, identity: &IdentityKey, list: Value) -> Result<()> {
        self.docs
            .set(&Self::conversations_path(identity), list)
            .await
            .map_err(SyncError::write)
    }
}
