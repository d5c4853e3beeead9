//! Conversation synchronizer.
//!
//! A logical conversation is stored three times: once as the message log at
//! `<conversation id>/messages`, and once as a summary in each participant's
//! `<identity>/conversations` list. Creating a conversation or sending a
//! message has to touch all three documents.
//!
//! How those writes are issued is chosen with [`FanOut`]:
//!
//! * [`FanOut::Atomic`] runs every fan-out as a single store transaction.
//! * [`FanOut::ReadModifyWrite`] issues three independent get-then-set steps.
//!   Two concurrent sends to the same conversation can each read the same
//!   snapshot and one append is lost; a failure part-way leaves the summaries
//!   out of step with the log. [`Synchronizer::reconcile`] repairs the latter.

use std::future::Future;
use std::str::FromStr;
use std::sync::Arc;

use futures::stream::{self, Stream};
use serde_json::Value;
use tokio::sync::broadcast::{self, error::RecvError};
use tracing::{debug, info, warn};

use messenger_shared::{
    ConversationId, ConversationSummary, IdentityKey, LatestMessage, Message,
};
use messenger_store::models::{self, LatestMessageRecord, MessageRecord, SummaryRecord};
use messenger_store::{path, DocumentStore, StoreError};

use crate::conversations::ConversationLogs;
use crate::error::{Result, SyncError};
use crate::session::Session;
use crate::users::UserRecords;

/// How multi-document writes are issued.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FanOut {
    /// One store transaction per operation.
    #[default]
    Atomic,
    /// Independent read-modify-write of each document, in sequence.
    ReadModifyWrite,
}

impl FromStr for FanOut {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "atomic" => Ok(Self::Atomic),
            "rmw" | "read-modify-write" => Ok(Self::ReadModifyWrite),
            other => Err(format!("unknown fan-out mode '{other}' (expected atomic or rmw)")),
        }
    }
}

pub struct Synchronizer {
    docs: Arc<dyn DocumentStore>,
    users: UserRecords,
    logs: ConversationLogs,
    fan_out: FanOut,
}

impl Synchronizer {
    pub fn new(docs: Arc<dyn DocumentStore>, fan_out: FanOut) -> Self {
        Self {
            users: UserRecords::new(docs.clone()),
            logs: ConversationLogs::new(docs.clone()),
            docs,
            fan_out,
        }
    }

    pub fn users(&self) -> &UserRecords {
        &self.users
    }

    pub fn logs(&self) -> &ConversationLogs {
        &self.logs
    }

    pub fn fan_out(&self) -> FanOut {
        self.fan_out
    }

    // ------------------------------------------------------------------
    // Create
    // ------------------------------------------------------------------

    /// Open a conversation with `counterpart`, whose name is `display_name`,
    /// starting with `first_message`.
    ///
    /// The conversation id is derived from the first message's id. Both
    /// participants get a summary and the log is created with one record.
    ///
    /// Replaying a create (after a partial failure, say) is safe: summaries
    /// already listing the conversation are left as they are, and a log that
    /// starts with `first_message` is kept. A log that starts with any other
    /// message fails with a conflict and nothing is written.
    pub async fn create_conversation(
        &self,
        session: &Session,
        counterpart: &IdentityKey,
        first_message: &Message,
        display_name: &str,
    ) -> Result<ConversationId> {
        let conversation_id = ConversationId::for_first_message(&first_message.id);
        let latest = LatestMessageRecord::from(&LatestMessage::from(first_message));
        let (own, theirs) =
            summary_pair(session, &conversation_id, counterpart, display_name, latest);
        let record = MessageRecord::from(first_message);
        let log_path = ConversationLogs::messages_path(&conversation_id);

        match self.fan_out {
            FanOut::Atomic => {
                let their_path = UserRecords::conversations_path(counterpart);
                let own_path = UserRecords::conversations_path(&session.identity);
                let log = log_path.as_str();

                self.docs
                    .transact(
                        &[their_path.as_str(), own_path.as_str(), log],
                        Box::new(move |slots| {
                            slots[2] = Some(start_log(slots[2].take(), log, &record)?);
                            slots[0] = Some(insert_summary(slots[0].take(), &theirs)?);
                            slots[1] = Some(insert_summary(slots[1].take(), &own)?);
                            Ok(())
                        }),
                    )
                    .await
                    .map_err(SyncError::write)?;
            }
            FanOut::ReadModifyWrite => {
                // Checked up front so a conflicting create touches no summary.
                let current = self.logs.read_raw(&conversation_id).await?;
                let log = start_log(current, &log_path, &record).map_err(SyncError::write)?;

                let current = self.users.read_summaries(counterpart).await?;
                let list = insert_summary(current, &theirs).map_err(SyncError::write)?;
                self.users.write_summaries(counterpart, list).await?;

                let current = self.users.read_summaries(&session.identity).await?;
                let list = insert_summary(current, &own).map_err(SyncError::write)?;
                self.users.write_summaries(&session.identity, list).await?;

                self.logs.write_raw(&conversation_id, log).await?;
            }
        }

        info!(
            conversation = %conversation_id,
            sender = %session.identity,
            counterpart = %counterpart,
            fan_out = ?self.fan_out,
            "conversation created"
        );
        Ok(conversation_id)
    }

    // ------------------------------------------------------------------
    // Send
    // ------------------------------------------------------------------

    /// Append `message` to an existing conversation and move both
    /// participants' latest-message preview to it.
    ///
    /// A participant whose list has no entry for the conversation gets a
    /// fresh summary. The log must already exist.
    pub async fn send_message(
        &self,
        session: &Session,
        conversation_id: &ConversationId,
        counterpart: &IdentityKey,
        display_name: &str,
        message: &Message,
    ) -> Result<()> {
        let record = MessageRecord::from(message);
        let latest = LatestMessageRecord::from(&LatestMessage::from(message));
        let (own, theirs) =
            summary_pair(session, conversation_id, counterpart, display_name, latest);

        let log_path = ConversationLogs::messages_path(conversation_id);

        match self.fan_out {
            FanOut::Atomic => {
                let own_path = UserRecords::conversations_path(&session.identity);
                let their_path = UserRecords::conversations_path(counterpart);
                let log = log_path.clone();

                self.docs
                    .transact(
                        &[log_path.as_str(), own_path.as_str(), their_path.as_str()],
                        Box::new(move |slots| {
                            slots[0] = Some(append_message(slots[0].take(), &log, &record)?);
                            slots[1] = Some(patch_latest(slots[1].take(), &own)?);
                            slots[2] = Some(patch_latest(slots[2].take(), &theirs)?);
                            Ok(())
                        }),
                    )
                    .await
                    .map_err(SyncError::write)?;
            }
            FanOut::ReadModifyWrite => {
                let current = self.logs.read_raw(conversation_id).await?;
                let log = append_message(current, &log_path, &record).map_err(SyncError::write)?;
                self.logs.write_raw(conversation_id, log).await?;

                let current = self.users.read_summaries(&session.identity).await?;
                let list = patch_latest(current, &own).map_err(SyncError::write)?;
                self.users.write_summaries(&session.identity, list).await?;

                let current = self.users.read_summaries(counterpart).await?;
                let list = patch_latest(current, &theirs).map_err(SyncError::write)?;
                self.users.write_summaries(counterpart, list).await?;
            }
        }

        info!(
            conversation = %conversation_id,
            message = %message.id,
            kind = %message.kind(),
            fan_out = ?self.fan_out,
            "message sent"
        );
        Ok(())
    }

    // ------------------------------------------------------------------
    // Read
    // ------------------------------------------------------------------

    pub async fn list_conversations(
        &self,
        identity: &IdentityKey,
    ) -> Result<Vec<ConversationSummary>> {
        let summaries = self.users.summaries(identity).await?;
        debug!(identity = %identity, count = summaries.len(), "listed conversations");
        Ok(summaries)
    }

    pub async fn list_messages(&self, conversation_id: &ConversationId) -> Result<Vec<Message>> {
        let messages = self.logs.messages(conversation_id).await?;
        debug!(conversation = %conversation_id, count = messages.len(), "listed messages");
        Ok(messages)
    }

    /// The summary list now, and again after every write that touches it.
    pub fn watch_conversations<'a>(
        &'a self,
        identity: &IdentityKey,
    ) -> impl Stream<Item = Result<Vec<ConversationSummary>>> + Send + 'a {
        let identity = identity.clone();
        watch(
            self.docs.changes(),
            UserRecords::conversations_path(&identity),
            move || {
                let identity = identity.clone();
                async move { self.users.summaries(&identity).await }
            },
        )
    }

    /// The message log now, and again after every write that touches it.
    pub fn watch_messages<'a>(
        &'a self,
        conversation_id: &ConversationId,
    ) -> impl Stream<Item = Result<Vec<Message>>> + Send + 'a {
        let id = conversation_id.clone();
        watch(
            self.docs.changes(),
            ConversationLogs::messages_path(&id),
            move || {
                let id = id.clone();
                async move { self.logs.messages(&id).await }
            },
        )
    }

    /// Id of an existing conversation between the session user and
    /// `counterpart`, looked up in the counterpart's list.
    pub async fn find_conversation_with(
        &self,
        session: &Session,
        counterpart: &IdentityKey,
    ) -> Result<Option<ConversationId>> {
        let summaries = match self.users.summaries(counterpart).await {
            Ok(summaries) => summaries,
            Err(SyncError::NotFound(_)) => return Ok(None),
            Err(e) => return Err(e),
        };

        Ok(summaries
            .into_iter()
            .find(|s| s.counterpart == session.identity)
            .map(|s| s.id))
    }

    // ------------------------------------------------------------------
    // Reconcile
    // ------------------------------------------------------------------

    /// Point both summaries' latest message at the last record of the log.
    ///
    /// Repairs the divergence a partially failed read-modify-write fan-out
    /// leaves behind. Returns whether any summary had to be rewritten.
    pub async fn reconcile(
        &self,
        session: &Session,
        conversation_id: &ConversationId,
        counterpart: &IdentityKey,
        display_name: &str,
    ) -> Result<bool> {
        let log_path = ConversationLogs::messages_path(conversation_id);
        let own_path = UserRecords::conversations_path(&session.identity);
        let their_path = UserRecords::conversations_path(counterpart);

        let repaired = match self.fan_out {
            FanOut::Atomic => {
                let mut repaired = false;
                let flag = &mut repaired;
                let log = log_path.as_str();

                self.docs
                    .transact(
                        &[log_path.as_str(), own_path.as_str(), their_path.as_str()],
                        Box::new(move |slots| {
                            let latest = latest_from_log(slots[0].clone(), log)?;
                            let (own, theirs) = summary_pair(
                                session,
                                conversation_id,
                                counterpart,
                                display_name,
                                latest,
                            );
                            for (slot, entry) in slots[1..].iter_mut().zip([own, theirs]) {
                                let before = slot.take();
                                let after = patch_latest(before.clone(), &entry)?;
                                *flag |= before.as_ref() != Some(&after);
                                *slot = Some(after);
                            }
                            Ok(())
                        }),
                    )
                    .await
                    .map_err(SyncError::write)?;
                repaired
            }
            FanOut::ReadModifyWrite => {
                let log = self.logs.read_raw(conversation_id).await?;
                let latest = latest_from_log(log, &log_path).map_err(SyncError::write)?;
                let (own, theirs) =
                    summary_pair(session, conversation_id, counterpart, display_name, latest);

                let mut repaired = false;
                for (identity, entry) in [(&session.identity, own), (counterpart, theirs)] {
                    let before = self.users.read_summaries(identity).await?;
                    let after = patch_latest(before.clone(), &entry).map_err(SyncError::write)?;
                    if before.as_ref() != Some(&after) {
                        self.users.write_summaries(identity, after).await?;
                        repaired = true;
                    }
                }
                repaired
            }
        };

        if repaired {
            warn!(conversation = %conversation_id, "repaired diverged conversation summaries");
        } else {
            debug!(conversation = %conversation_id, "conversation summaries consistent");
        }
        Ok(repaired)
    }
}

// ---------------------------------------------------------------------------
// List shaping
//
// These run inside store transactions, so they report failures as
// `StoreError`, which aborts the transaction.
// ---------------------------------------------------------------------------

/// The session user's and the counterpart's copy of a summary.
fn summary_pair(
    session: &Session,
    conversation_id: &ConversationId,
    counterpart: &IdentityKey,
    display_name: &str,
    latest: LatestMessageRecord,
) -> (SummaryRecord, SummaryRecord) {
    let own = SummaryRecord {
        id: conversation_id.to_string(),
        other_user_email: counterpart.to_string(),
        name: display_name.to_string(),
        latest_message: latest.clone(),
    };
    let theirs = SummaryRecord {
        id: conversation_id.to_string(),
        other_user_email: session.identity.to_string(),
        name: session.display_name.clone(),
        latest_message: latest,
    };
    (own, theirs)
}

/// Stored list items; anything that is not a list starts over empty.
fn list_items(list: Option<Value>) -> Vec<Value> {
    match list {
        Some(Value::Array(items)) => items,
        None => Vec::new(),
        Some(_) => {
            warn!("replacing stored value that is not a list");
            Vec::new()
        }
    }
}

/// Add `entry` unless the list already has one with the same id. An existing
/// entry may carry a newer latest message, so it is not overwritten.
fn insert_summary(list: Option<Value>, entry: &SummaryRecord) -> messenger_store::Result<Value> {
    let mut items = list_items(list);
    if !items.iter().any(|item| item["id"] == entry.id.as_str()) {
        items.push(serde_json::to_value(entry)?);
    }
    Ok(Value::Array(items))
}

/// Replace the latest message of the entry for `entry.id`, or append `entry`
/// when the list has none.
fn patch_latest(list: Option<Value>, entry: &SummaryRecord) -> messenger_store::Result<Value> {
    let mut items = list_items(list);
    let latest = serde_json::to_value(&entry.latest_message)?;

    match items.iter().position(|item| item["id"] == entry.id.as_str()) {
        Some(i) if items[i].is_object() => items[i]["latest_message"] = latest,
        _ => items.push(serde_json::to_value(entry)?),
    }
    Ok(Value::Array(items))
}

/// A fresh one-record log, or the existing log when it already starts with
/// `first`. Any other non-empty log is a conflict.
fn start_log(
    log: Option<Value>,
    path: &str,
    first: &MessageRecord,
) -> messenger_store::Result<Value> {
    match log {
        Some(Value::Array(items)) if !items.is_empty() => {
            if items[0]["id"] == first.id.as_str() {
                Ok(Value::Array(items))
            } else {
                Err(StoreError::Conflict(format!(
                    "{path} already holds a conversation"
                )))
            }
        }
        None | Some(Value::Array(_)) => Ok(Value::Array(vec![serde_json::to_value(first)?])),
        Some(_) => Err(StoreError::Conflict(format!("{path} is not a message log"))),
    }
}

fn append_message(
    list: Option<Value>,
    path: &str,
    record: &MessageRecord,
) -> messenger_store::Result<Value> {
    let Some(Value::Array(mut items)) = list else {
        return Err(StoreError::NotFound(path.to_string()));
    };
    if items.iter().any(|item| item["id"] == record.id.as_str()) {
        return Err(StoreError::Conflict(format!(
            "message id {} already in {path}",
            record.id
        )));
    }
    items.push(serde_json::to_value(record)?);
    Ok(Value::Array(items))
}

/// Latest-message preview taken from the last decodable record of a log.
fn latest_from_log(log: Option<Value>, path: &str) -> messenger_store::Result<LatestMessageRecord> {
    let log = log.ok_or_else(|| StoreError::NotFound(path.to_string()))?;
    let messages = models::decode_list::<MessageRecord, Message>(log, "messages");
    let last = messages
        .last()
        .ok_or_else(|| StoreError::NotFound(format!("{path} (no readable messages)")))?;
    Ok(LatestMessageRecord::from(&LatestMessage::from(last)))
}

// ---------------------------------------------------------------------------
// Live reads
// ---------------------------------------------------------------------------

/// Yield `read()` once, then again whenever a committed write overlaps `path`.
///
/// The receiver is created before the first read, so no write between the
/// first read and the subscription goes unnoticed. A lagging receiver
/// re-reads; the stream ends when the store is dropped.
fn watch<'a, T, F, Fut>(
    rx: broadcast::Receiver<String>,
    path: String,
    read: F,
) -> impl Stream<Item = Result<T>> + Send + 'a
where
    T: Send + 'a,
    F: Fn() -> Fut + Send + 'a,
    Fut: Future<Output = Result<T>> + Send + 'a,
{
    stream::unfold(
        (rx, path, read, true),
        |(mut rx, path, read, first)| async move {
            if !first {
                loop {
                    match rx.recv().await {
                        Ok(written) if path::overlaps(&written, &path) => break,
                        Ok(_) => continue,
                        Err(RecvError::Lagged(skipped)) => {
                            debug!(path = %path, skipped, "change feed lagged, re-reading");
                            break;
                        }
                        Err(RecvError::Closed) => return None,
                    }
                }
            }
            let item = read().await;
            Some((item, (rx, path, read, false)))
        },
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use async_trait::async_trait;
    use futures::StreamExt;
    use messenger_shared::{MessageContent, MessageId, MessageKind};
    use messenger_store::{Database, MemoryStore, TransactFn};
    use tokio::sync::Barrier;

    fn alice() -> Session {
        Session::new("alice@example.com", "Alice")
    }

    fn bob_key() -> IdentityKey {
        IdentityKey::from("bob-example-com")
    }

    fn text(session: &Session, id: &str, body: &str) -> Message {
        Message::new(
            MessageId::from(id),
            session.sender(),
            MessageContent::Text(body.to_string()),
        )
    }

    async fn start(sync: &Synchronizer) -> ConversationId {
        sync.create_conversation(&alice(), &bob_key(), &text(&alice(), "m1", "hi"), "Bob")
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn test_create_conversation_fans_out_to_both_users() {
        for fan_out in [FanOut::Atomic, FanOut::ReadModifyWrite] {
            let sync = Synchronizer::new(Arc::new(MemoryStore::new()), fan_out);
            let id = start(&sync).await;
            assert_eq!(id.as_str(), "conversation_m1");

            let mine = sync.list_conversations(&alice().identity).await.unwrap();
            let theirs = sync.list_conversations(&bob_key()).await.unwrap();
            assert_eq!(mine.len(), 1);
            assert_eq!(theirs.len(), 1);
            assert_eq!(mine[0].latest_message.text, "hi");
            assert_eq!(theirs[0].latest_message.text, "hi");

            assert_eq!(mine[0].counterpart, bob_key());
            assert_eq!(mine[0].display_name, "Bob");
            assert_eq!(theirs[0].counterpart, alice().identity);
            assert_eq!(theirs[0].display_name, "Alice");
        }
    }

    #[tokio::test]
    async fn test_first_message_reads_back() {
        let sync = Synchronizer::new(Arc::new(MemoryStore::new()), FanOut::Atomic);
        let id = start(&sync).await;

        let messages = sync.list_messages(&id).await.unwrap();
        assert_eq!(messages.len(), 1);
        assert_eq!(messages[0].id.as_str(), "m1");
        assert_eq!(messages[0].kind(), MessageKind::Text);
        assert_eq!(messages[0].content, MessageContent::Text("hi".into()));
        assert_eq!(messages[0].sender.identity, alice().identity);
    }

    #[tokio::test]
    async fn test_send_appends_exactly_one_message() {
        for fan_out in [FanOut::Atomic, FanOut::ReadModifyWrite] {
            let sync = Synchronizer::new(Arc::new(MemoryStore::new()), fan_out);
            let id = start(&sync).await;
            let before = sync.list_messages(&id).await.unwrap().len();

            let photo = Message::new(
                MessageId::from("m2"),
                alice().sender(),
                MessageContent::Photo(
                    url::Url::parse("https://files.example.com/message_images/photo_message_m2.png")
                        .unwrap(),
                ),
            );
            sync.send_message(&alice(), &id, &bob_key(), "Bob", &photo)
                .await
                .unwrap();

            let messages = sync.list_messages(&id).await.unwrap();
            assert_eq!(messages.len(), before + 1);
            let last = messages.last().unwrap();
            assert_eq!(last.id, photo.id);
            assert_eq!(last.kind(), MessageKind::Photo);
            assert_eq!(last.content, photo.content);

            for identity in [alice().identity, bob_key()] {
                let summaries = sync.list_conversations(&identity).await.unwrap();
                assert_eq!(summaries.len(), 1);
                assert_eq!(summaries[0].latest_message.text, photo.content.raw());
            }
        }
    }

    #[tokio::test]
    async fn test_send_to_missing_conversation_is_not_found() {
        let sync = Synchronizer::new(Arc::new(MemoryStore::new()), FanOut::Atomic);
        let result = sync
            .send_message(
                &alice(),
                &ConversationId::from("conversation_ghost"),
                &bob_key(),
                "Bob",
                &text(&alice(), "m9", "anyone?"),
            )
            .await;
        assert!(matches!(result, Err(SyncError::NotFound(_))));
        assert!(matches!(
            sync.list_conversations(&alice().identity).await,
            Err(SyncError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_duplicate_message_id_is_rejected() {
        let sync = Synchronizer::new(Arc::new(MemoryStore::new()), FanOut::Atomic);
        let id = start(&sync).await;
        let result = sync
            .send_message(&alice(), &id, &bob_key(), "Bob", &text(&alice(), "m1", "again"))
            .await;
        assert!(matches!(
            result,
            Err(SyncError::WriteFailed(StoreError::Conflict(_)))
        ));
        assert_eq!(sync.list_messages(&id).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_send_restores_missing_counterpart_summary() {
        let store = Arc::new(MemoryStore::new());
        let sync = Synchronizer::new(store.clone(), FanOut::Atomic);
        let id = start(&sync).await;
        store
            .set("bob-example-com/conversations", Value::Null)
            .await
            .unwrap();

        sync.send_message(&alice(), &id, &bob_key(), "Bob", &text(&alice(), "m2", "still there?"))
            .await
            .unwrap();

        let theirs = sync.list_conversations(&bob_key()).await.unwrap();
        assert_eq!(theirs.len(), 1);
        assert_eq!(theirs[0].display_name, "Alice");
        assert_eq!(theirs[0].latest_message.text, "still there?");
    }

    #[tokio::test]
    async fn test_unknown_message_type_is_dropped_not_an_error() {
        let store = Arc::new(MemoryStore::new());
        let sync = Synchronizer::new(store.clone(), FanOut::Atomic);
        store
            .set(
                "conversation_x/messages",
                serde_json::json!([{
                    "id": "x", "type": "hologram", "content": "?",
                    "date": "2021-11-28T10:00:00+00:00", "sender_email": "alice-example-com",
                    "is_read": false, "name": "Alice"
                }]),
            )
            .await
            .unwrap();

        let messages = sync
            .list_messages(&ConversationId::from("conversation_x"))
            .await
            .unwrap();
        assert!(messages.is_empty());
    }

    #[tokio::test]
    async fn test_find_existing_conversation() {
        let sync = Synchronizer::new(Arc::new(MemoryStore::new()), FanOut::Atomic);
        assert_eq!(
            sync.find_conversation_with(&alice(), &bob_key()).await.unwrap(),
            None
        );

        let id = start(&sync).await;
        assert_eq!(
            sync.find_conversation_with(&alice(), &bob_key()).await.unwrap(),
            Some(id)
        );

        let carol = Session::new("carol@example.com", "Carol");
        assert_eq!(
            sync.find_conversation_with(&carol, &bob_key()).await.unwrap(),
            None
        );
    }

    #[tokio::test]
    async fn test_sqlite_backend_round_trip() {
        let sync = Synchronizer::new(
            Arc::new(Database::open_in_memory().unwrap()),
            FanOut::Atomic,
        );
        let id = start(&sync).await;
        sync.send_message(&alice(), &id, &bob_key(), "Bob", &text(&alice(), "m2", "there?"))
            .await
            .unwrap();

        let messages = sync.list_messages(&id).await.unwrap();
        assert_eq!(messages.len(), 2);
        assert_eq!(messages[1].content, MessageContent::Text("there?".into()));
        let theirs = sync.list_conversations(&bob_key()).await.unwrap();
        assert_eq!(theirs[0].latest_message.text, "there?");
    }

    // ------------------------------------------------------------------
    // Concurrency
    // ------------------------------------------------------------------

    /// Holds the first `armed` readers of a message log at a barrier until
    /// all of them have read, forcing them to work from the same snapshot.
    struct LockstepStore {
        inner: Arc<MemoryStore>,
        gate: Barrier,
        armed: AtomicUsize,
    }

    impl LockstepStore {
        fn new(inner: Arc<MemoryStore>, readers: usize) -> Self {
            Self {
                inner,
                gate: Barrier::new(readers),
                armed: AtomicUsize::new(readers),
            }
        }
    }

    #[async_trait]
    impl DocumentStore for LockstepStore {
        async fn get(&self, path: &str) -> messenger_store::Result<Option<Value>> {
            let value = self.inner.get(path).await;
            let take_turn = path.ends_with("/messages")
                && self
                    .armed
                    .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
                    .is_ok();
            if take_turn {
                self.gate.wait().await;
            }
            value
        }

        async fn set(&self, path: &str, value: Value) -> messenger_store::Result<()> {
            self.inner.set(path, value).await
        }

        async fn transact(&self, paths: &[&str], f: TransactFn<'_>) -> messenger_store::Result<()> {
            self.inner.transact(paths, f).await
        }

        fn changes(&self) -> broadcast::Receiver<String> {
            self.inner.changes()
        }
    }

    async fn race_two_sends(fan_out: FanOut) -> usize {
        let memory = Arc::new(MemoryStore::new());
        let setup = Synchronizer::new(memory.clone(), FanOut::Atomic);
        let id = start(&setup).await;

        let sync = Synchronizer::new(Arc::new(LockstepStore::new(memory, 2)), fan_out);
        let alice = alice();
        let bob = bob_key();
        let first = text(&alice, "m2", "one");
        let second = text(&alice, "m3", "two");

        let (a, b) = tokio::join!(
            sync.send_message(&alice, &id, &bob, "Bob", &first),
            sync.send_message(&alice, &id, &bob, "Bob", &second),
        );
        a.unwrap();
        b.unwrap();

        setup.list_messages(&id).await.unwrap().len()
    }

    #[tokio::test]
    async fn test_concurrent_read_modify_write_sends_lose_an_update() {
        // m1 + m2 + m3 would be 3; both sends appended to the same snapshot.
        assert_eq!(race_two_sends(FanOut::ReadModifyWrite).await, 2);
    }

    #[tokio::test]
    async fn test_concurrent_atomic_sends_keep_both() {
        assert_eq!(race_two_sends(FanOut::Atomic).await, 3);
    }

    // ------------------------------------------------------------------
    // Reconcile
    // ------------------------------------------------------------------

    /// Rejects writes to one path.
    struct FailingStore {
        inner: Arc<MemoryStore>,
        poisoned: &'static str,
    }

    #[async_trait]
    impl DocumentStore for FailingStore {
        async fn get(&self, path: &str) -> messenger_store::Result<Option<Value>> {
            self.inner.get(path).await
        }

        async fn set(&self, path: &str, value: Value) -> messenger_store::Result<()> {
            if path == self.poisoned {
                return Err(StoreError::Conflict("permission denied".into()));
            }
            self.inner.set(path, value).await
        }

        async fn transact(&self, paths: &[&str], f: TransactFn<'_>) -> messenger_store::Result<()> {
            if paths.contains(&self.poisoned) {
                return Err(StoreError::Conflict("permission denied".into()));
            }
            self.inner.transact(paths, f).await
        }

        fn changes(&self) -> broadcast::Receiver<String> {
            self.inner.changes()
        }
    }

    #[tokio::test]
    async fn test_partial_fan_out_is_repaired_by_reconcile() {
        let memory = Arc::new(MemoryStore::new());
        let healthy = Synchronizer::new(memory.clone(), FanOut::Atomic);
        let id = start(&healthy).await;

        let flaky = Synchronizer::new(
            Arc::new(FailingStore {
                inner: memory.clone(),
                poisoned: "bob-example-com/conversations",
            }),
            FanOut::ReadModifyWrite,
        );
        let result = flaky
            .send_message(&alice(), &id, &bob_key(), "Bob", &text(&alice(), "m2", "late"))
            .await;
        assert!(matches!(result, Err(SyncError::WriteFailed(_))));

        // log and own summary moved on, counterpart's did not
        assert_eq!(healthy.list_messages(&id).await.unwrap().len(), 2);
        let mine = healthy.list_conversations(&alice().identity).await.unwrap();
        assert_eq!(mine[0].latest_message.text, "late");
        let theirs = healthy.list_conversations(&bob_key()).await.unwrap();
        assert_eq!(theirs[0].latest_message.text, "hi");

        for fan_out in [FanOut::ReadModifyWrite, FanOut::Atomic] {
            let repairer = Synchronizer::new(memory.clone(), fan_out);
            let repaired = repairer
                .reconcile(&alice(), &id, &bob_key(), "Bob")
                .await
                .unwrap();
            // only the first pass has anything to fix
            assert_eq!(repaired, fan_out == FanOut::ReadModifyWrite);
        }

        let theirs = healthy.list_conversations(&bob_key()).await.unwrap();
        assert_eq!(theirs.len(), 1);
        assert_eq!(theirs[0].latest_message.text, "late");
    }

    #[tokio::test]
    async fn test_create_retried_after_partial_failure_lists_once() {
        let memory = Arc::new(MemoryStore::new());
        let flaky = Synchronizer::new(
            Arc::new(FailingStore {
                inner: memory.clone(),
                poisoned: "alice-example-com/conversations",
            }),
            FanOut::ReadModifyWrite,
        );
        let first = text(&alice(), "m1", "hi");
        let result = flaky
            .create_conversation(&alice(), &bob_key(), &first, "Bob")
            .await;
        assert!(matches!(result, Err(SyncError::WriteFailed(_))));

        // counterpart's summary landed, own summary and log did not
        let retry = Synchronizer::new(memory.clone(), FanOut::ReadModifyWrite);
        assert_eq!(retry.list_conversations(&bob_key()).await.unwrap().len(), 1);

        let id = retry
            .create_conversation(&alice(), &bob_key(), &first, "Bob")
            .await
            .unwrap();

        assert_eq!(retry.list_conversations(&bob_key()).await.unwrap().len(), 1);
        assert_eq!(
            retry.list_conversations(&alice().identity).await.unwrap().len(),
            1
        );
        assert_eq!(retry.list_messages(&id).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_repeated_create_keeps_history() {
        for fan_out in [FanOut::Atomic, FanOut::ReadModifyWrite] {
            let sync = Synchronizer::new(Arc::new(MemoryStore::new()), fan_out);
            let id = start(&sync).await;
            sync.send_message(&alice(), &id, &bob_key(), "Bob", &text(&alice(), "m2", "two"))
                .await
                .unwrap();

            assert_eq!(start(&sync).await, id);

            let messages = sync.list_messages(&id).await.unwrap();
            assert_eq!(messages.len(), 2);
            assert_eq!(messages[1].id.as_str(), "m2");
            for identity in [alice().identity, bob_key()] {
                let summaries = sync.list_conversations(&identity).await.unwrap();
                assert_eq!(summaries.len(), 1);
                assert_eq!(summaries[0].latest_message.text, "two");
            }
        }
    }

    #[tokio::test]
    async fn test_create_over_foreign_log_is_conflict() {
        for fan_out in [FanOut::Atomic, FanOut::ReadModifyWrite] {
            let store = Arc::new(MemoryStore::new());
            let sync = Synchronizer::new(store.clone(), fan_out);
            start(&sync).await;
            store
                .set(
                    "conversation_m1/messages",
                    serde_json::json!([{ "id": "m0" }]),
                )
                .await
                .unwrap();
            store
                .set("bob-example-com/conversations", Value::Null)
                .await
                .unwrap();

            let result = sync
                .create_conversation(&alice(), &bob_key(), &text(&alice(), "m1", "hi"), "Bob")
                .await;
            assert!(matches!(
                result,
                Err(SyncError::WriteFailed(StoreError::Conflict(_)))
            ));
            // nothing written, so bob still has no list
            assert!(matches!(
                sync.list_conversations(&bob_key()).await,
                Err(SyncError::NotFound(_))
            ));
        }
    }

    // ------------------------------------------------------------------
    // Live reads
    // ------------------------------------------------------------------

    #[tokio::test]
    async fn test_watch_messages_yields_on_each_append() {
        let sync = Synchronizer::new(Arc::new(MemoryStore::new()), FanOut::Atomic);
        let id = start(&sync).await;

        let mut updates = Box::pin(sync.watch_messages(&id));
        assert_eq!(updates.next().await.unwrap().unwrap().len(), 1);

        sync.send_message(&alice(), &id, &bob_key(), "Bob", &text(&alice(), "m2", "two"))
            .await
            .unwrap();
        assert_eq!(updates.next().await.unwrap().unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_watch_conversations_ignores_unrelated_writes() {
        let store = Arc::new(MemoryStore::new());
        let sync = Synchronizer::new(store.clone(), FanOut::Atomic);

        let mut updates = Box::pin(sync.watch_conversations(&bob_key()));
        assert!(matches!(
            updates.next().await.unwrap(),
            Err(SyncError::NotFound(_))
        ));

        store
            .set("carol-example-com/conversations", serde_json::json!([]))
            .await
            .unwrap();
        start(&sync).await;

        let summaries = updates.next().await.unwrap().unwrap();
        assert_eq!(summaries.len(), 1);
        assert_eq!(summaries[0].id.as_str(), "conversation_m1");
    }

    #[test]
    fn test_fan_out_parsing() {
        assert_eq!("atomic".parse::<FanOut>().unwrap(), FanOut::Atomic);
        assert_eq!("RMW".parse::<FanOut>().unwrap(), FanOut::ReadModifyWrite);
        assert!("eventually".parse::<FanOut>().is_err());
    }
}
