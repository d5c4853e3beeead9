//! Conversation logs: the ordered message list stored once per conversation.

use std::sync::Arc;

use serde_json::Value;

use messenger_shared::constants::MESSAGES_CHILD;
use messenger_shared::{ConversationId, Message};
use messenger_store::models::{self, MessageRecord};
use messenger_store::DocumentStore;

use crate::error::{Result, SyncError};

pub struct ConversationLogs {
    docs: Arc<dyn DocumentStore>,
}

impl ConversationLogs {
    pub fn new(docs: Arc<dyn DocumentStore>) -> Self {
        Self { docs }
    }

    pub fn messages_path(id: &ConversationId) -> String {
        format!("{id}/{MESSAGES_CHILD}")
    }

    /// Decoded messages in log order. Records with an unknown `type` or a
    /// malformed payload are skipped.
    pub async fn messages(&self, id: &ConversationId) -> Result<Vec<Message>> {
        let list = self
            .read_raw(id)
            .await?
            .ok_or_else(|| SyncError::NotFound(Self::messages_path(id)))?;

        Ok(models::decode_list::<MessageRecord, Message>(list, "messages"))
    }

    pub async fn read_raw(&self, id: &ConversationId) -> Result<Option<Value>> {
        self.docs
            .get(&Self::messages_path(id))
            .await
            .map_err(SyncError::read)
    }

    /// Replace the whole log.
    pub async fn write_raw(&self, id: &ConversationId, list: Value) -> Result<()> {
        self.docs
            .set(&Self::messages_path(id), list)
            .await
            .map_err(SyncError::write)
    }
}
