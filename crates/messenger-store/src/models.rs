//! Persisted JSON shapes and their conversion to the typed domain models.
//!
//! Field names are the ones stored in the document tree. Reading goes
//! through [`decode_list`], which validates every element on its own and
//! drops the ones that do not fit, so one corrupt entry never hides the rest.

use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::warn;

use messenger_shared::{
    ChatUser, ConversationId, ConversationSummary, DecodeError, DirectoryEntry, IdentityKey,
    LatestMessage, Message, MessageContent, MessageId, Sender,
};

// ---------------------------------------------------------------------------
// Message record -- element of `<conversation id>/messages`
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct MessageRecord {
    pub id: String,
    #[serde(rename = "type")]
    pub kind: String,
    pub content: String,
    pub date: String,
    pub sender_email: String,
    pub is_read: bool,
    /// Sender display name.
    pub name: String,
}

impl From<&Message> for MessageRecord {
    fn from(m: &Message) -> Self {
        Self {
            id: m.id.0.clone(),
            kind: m.kind().as_str().to_string(),
            content: m.content.raw(),
            date: m.sent_at.to_rfc3339(),
            sender_email: m.sender.identity.to_string(),
            is_read: m.is_read,
            name: m.sender.display_name.clone(),
        }
    }
}

impl TryFrom<MessageRecord> for Message {
    type Error = DecodeError;

    fn try_from(r: MessageRecord) -> Result<Self, Self::Error> {
        let content = MessageContent::decode(&r.kind, &r.content)?;
        Ok(Message {
            id: MessageId(r.id),
            sender: Sender {
                identity: IdentityKey::from(r.sender_email.as_str()),
                display_name: r.name,
            },
            sent_at: parse_date(&r.date)?,
            content,
            is_read: r.is_read,
        })
    }
}

// ---------------------------------------------------------------------------
// Conversation summary -- element of `<identity>/conversations`
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct LatestMessageRecord {
    pub date: String,
    pub message: String,
    pub is_read: bool,
}

impl From<&LatestMessage> for LatestMessageRecord {
    fn from(l: &LatestMessage) -> Self {
        Self {
            date: l.sent_at.to_rfc3339(),
            message: l.text.clone(),
            is_read: l.is_read,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SummaryRecord {
    pub id: String,
    pub other_user_email: String,
    pub name: String,
    pub latest_message: LatestMessageRecord,
}

impl From<&ConversationSummary> for SummaryRecord {
    fn from(s: &ConversationSummary) -> Self {
        Self {
            id: s.id.0.clone(),
            other_user_email: s.counterpart.to_string(),
            name: s.display_name.clone(),
            latest_message: LatestMessageRecord::from(&s.latest_message),
        }
    }
}

impl TryFrom<SummaryRecord> for ConversationSummary {
    type Error = DecodeError;

    fn try_from(r: SummaryRecord) -> Result<Self, Self::Error> {
        Ok(ConversationSummary {
            id: ConversationId(r.id),
            counterpart: IdentityKey::from(r.other_user_email.as_str()),
            display_name: r.name,
            latest_message: LatestMessage {
                sent_at: parse_date(&r.latest_message.date)?,
                text: r.latest_message.message,
                is_read: r.latest_message.is_read,
            },
        })
    }
}

// ---------------------------------------------------------------------------
// Users
// ---------------------------------------------------------------------------

/// Profile fields of a user document at `<identity>`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ProfileRecord {
    pub first_name: String,
    pub last_name: String,
}

impl From<&ChatUser> for ProfileRecord {
    fn from(u: &ChatUser) -> Self {
        Self {
            first_name: u.first_name.clone(),
            last_name: u.last_name.clone(),
        }
    }
}

/// Element of the `users` directory.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct DirectoryRecord {
    pub name: String,
    pub email: String,
}

impl From<&ChatUser> for DirectoryRecord {
    fn from(u: &ChatUser) -> Self {
        Self {
            name: u.full_name(),
            email: u.identity().to_string(),
        }
    }
}

impl TryFrom<DirectoryRecord> for DirectoryEntry {
    type Error = DecodeError;

    fn try_from(r: DirectoryRecord) -> Result<Self, Self::Error> {
        Ok(DirectoryEntry {
            name: r.name,
            identity: IdentityKey::from(r.email.as_str()),
        })
    }
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

fn parse_date(s: &str) -> Result<DateTime<Utc>, DecodeError> {
    DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| DecodeError::InvalidTimestamp(format!("{s}: {e}")))
}

/// Decode one stored element into its typed form.
pub fn decode_one<R, T>(value: Value) -> Result<T, DecodeError>
where
    R: DeserializeOwned,
    T: TryFrom<R, Error = DecodeError>,
{
    let record: R =
        serde_json::from_value(value).map_err(|e| DecodeError::Malformed(e.to_string()))?;
    T::try_from(record)
}

/// Decode a stored list element by element, dropping elements that fail.
///
/// A value that is not a list at all decodes as empty. Every drop is logged
/// with the offending index so corruption stays visible in the logs.
pub fn decode_list<R, T>(value: Value, what: &'static str) -> Vec<T>
where
    R: DeserializeOwned,
    T: TryFrom<R, Error = DecodeError>,
{
    let Value::Array(items) = value else {
        warn!(what, "stored value is not a list, ignoring it");
        return Vec::new();
    };

    items
        .into_iter()
        .enumerate()
        .filter_map(|(index, item)| match decode_one::<R, T>(item) {
            Ok(decoded) => Some(decoded),
            Err(error) => {
                warn!(what, index, %error, "dropping undecodable record");
                None
            }
        })
        .collect()
}
