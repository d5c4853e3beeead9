use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use url::Url;
use uuid::Uuid;

use crate::constants::{CONVERSATION_ID_PREFIX, MESSAGE_ID_TIME_FORMAT};
use crate::error::DecodeError;
use crate::identity::IdentityKey;

// ---------------------------------------------------------------------------
// Ids
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(transparent)]
pub struct MessageId(pub String);

impl MessageId {
    /// Generate an id for a message from `sender` to `counterpart`.
    ///
    /// Counterpart, sender and a millisecond timestamp, followed by a random
    /// suffix so two sends within the same millisecond still differ.
    pub fn generate(counterpart: &IdentityKey, sender: &IdentityKey, at: DateTime<Utc>) -> Self {
        let nonce = Uuid::new_v4().simple().to_string();
        Self(format!(
            "{}_{}_{}_{}",
            counterpart,
            sender,
            at.format(MESSAGE_ID_TIME_FORMAT),
            &nonce[..8]
        ))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for MessageId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for MessageId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(transparent)]
pub struct ConversationId(pub String);

impl ConversationId {
    /// A conversation is named after the message that opened it.
    pub fn for_first_message(first: &MessageId) -> Self {
        Self(format!("{CONVERSATION_ID_PREFIX}{first}"))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for ConversationId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for ConversationId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

// ---------------------------------------------------------------------------
// Message content
// ---------------------------------------------------------------------------

/// Closed set of message types, as stored in a record's `type` field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageKind {
    Text,
    Photo,
    Video,
    Audio,
    Location,
    Contact,
    AttributedText,
    LinkPreview,
    Emoji,
    Custom,
}

impl MessageKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Text => "text",
            Self::Photo => "photo",
            Self::Video => "video",
            Self::Audio => "audio",
            Self::Location => "location",
            Self::Contact => "contact",
            Self::AttributedText => "attributed_text",
            Self::LinkPreview => "link_preview",
            Self::Emoji => "emoji",
            Self::Custom => "custom",
        }
    }
}

impl FromStr for MessageKind {
    type Err = DecodeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(match s {
            "text" => Self::Text,
            "photo" => Self::Photo,
            "video" => Self::Video,
            "audio" => Self::Audio,
            "location" => Self::Location,
            "contact" => Self::Contact,
            "attributed_text" => Self::AttributedText,
            "link_preview" => Self::LinkPreview,
            "emoji" => Self::Emoji,
            "custom" => Self::Custom,
            other => return Err(DecodeError::UnknownKind(other.to_string())),
        })
    }
}

impl std::fmt::Display for MessageKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Location {
    pub latitude: f64,
    pub longitude: f64,
}

/// Typed payload of a message. The stored form is a `(type, content)` string
/// pair, see [`MessageContent::raw`] and [`MessageContent::decode`].
#[derive(Debug, Clone, PartialEq)]
pub enum MessageContent {
    Text(String),
    AttributedText(String),
    Emoji(String),
    Contact(String),
    Custom(String),
    /// Remote URL of the uploaded image.
    Photo(Url),
    Video(Url),
    Audio(Url),
    LinkPreview(Url),
    Location(Location),
}

impl MessageContent {
    pub fn kind(&self) -> MessageKind {
        match self {
            Self::Text(_) => MessageKind::Text,
            Self::AttributedText(_) => MessageKind::AttributedText,
            Self::Emoji(_) => MessageKind::Emoji,
            Self::Contact(_) => MessageKind::Contact,
            Self::Custom(_) => MessageKind::Custom,
            Self::Photo(_) => MessageKind::Photo,
            Self::Video(_) => MessageKind::Video,
            Self::Audio(_) => MessageKind::Audio,
            Self::LinkPreview(_) => MessageKind::LinkPreview,
            Self::Location(_) => MessageKind::Location,
        }
    }

    /// The string stored in a record's `content` field.
    pub fn raw(&self) -> String {
        match self {
            Self::Text(s)
            | Self::AttributedText(s)
            | Self::Emoji(s)
            | Self::Contact(s)
            | Self::Custom(s) => s.clone(),
            Self::Photo(u) | Self::Video(u) | Self::Audio(u) | Self::LinkPreview(u) => {
                u.to_string()
            }
            // longitude first
            Self::Location(loc) => format!("{},{}", loc.longitude, loc.latitude),
        }
    }

    /// Rebuild typed content from a stored `(type, content)` pair.
    pub fn decode(kind: &str, raw: &str) -> Result<Self, DecodeError> {
        let kind: MessageKind = kind.parse()?;
        let url = |raw: &str| {
            Url::parse(raw).map_err(|e| DecodeError::InvalidUrl {
                kind: kind.as_str(),
                reason: e.to_string(),
            })
        };

        Ok(match kind {
            MessageKind::Text => Self::Text(raw.to_string()),
            MessageKind::AttributedText => Self::AttributedText(raw.to_string()),
            MessageKind::Emoji => Self::Emoji(raw.to_string()),
            MessageKind::Contact => Self::Contact(raw.to_string()),
            MessageKind::Custom => Self::Custom(raw.to_string()),
            MessageKind::Photo => Self::Photo(url(raw)?),
            MessageKind::Video => Self::Video(url(raw)?),
            MessageKind::Audio => Self::Audio(url(raw)?),
            MessageKind::LinkPreview => Self::LinkPreview(url(raw)?),
            MessageKind::Location => Self::Location(parse_location(raw)?),
        })
    }
}

fn parse_location(raw: &str) -> Result<Location, DecodeError> {
    let (lon, lat) = raw
        .split_once(',')
        .ok_or_else(|| DecodeError::InvalidLocation(raw.to_string()))?;
    let longitude: f64 = lon
        .trim()
        .parse()
        .map_err(|_| DecodeError::InvalidLocation(raw.to_string()))?;
    let latitude: f64 = lat
        .trim()
        .parse()
        .map_err(|_| DecodeError::InvalidLocation(raw.to_string()))?;
    Ok(Location {
        latitude,
        longitude,
    })
}

// ---------------------------------------------------------------------------
// Messages and summaries
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Sender {
    pub identity: IdentityKey,
    pub display_name: String,
}

/// One entry of a conversation log.
#[derive(Debug, Clone, PartialEq)]
pub struct Message {
    pub id: MessageId,
    pub sender: Sender,
    pub sent_at: DateTime<Utc>,
    pub content: MessageContent,
    pub is_read: bool,
}

impl Message {
    /// A new, unread message stamped with the current time.
    pub fn new(id: MessageId, sender: Sender, content: MessageContent) -> Self {
        Self {
            id,
            sender,
            sent_at: Utc::now(),
            content,
            is_read: false,
        }
    }

    pub fn kind(&self) -> MessageKind {
        self.content.kind()
    }
}

/// Preview of the newest message, embedded in each conversation summary.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LatestMessage {
    pub sent_at: DateTime<Utc>,
    pub text: String,
    pub is_read: bool,
}

impl From<&Message> for LatestMessage {
    fn from(m: &Message) -> Self {
        Self {
            sent_at: m.sent_at,
            text: m.content.raw(),
            is_read: m.is_read,
        }
    }
}

/// One user's copy of a conversation's metadata.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConversationSummary {
    pub id: ConversationId,
    pub counterpart: IdentityKey,
    /// Name shown for the counterpart.
    pub display_name: String,
    pub latest_message: LatestMessage,
}

// ---------------------------------------------------------------------------
// Users
// ---------------------------------------------------------------------------

/// A registered user.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatUser {
    pub first_name: String,
    pub last_name: String,
    pub email: String,
}

impl ChatUser {
    pub fn identity(&self) -> IdentityKey {
        IdentityKey::from_email(&self.email)
    }

    pub fn full_name(&self) -> String {
        format!("{} {}", self.first_name, self.last_name)
    }
}

/// Entry of the user directory used when picking someone to talk to.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DirectoryEntry {
    pub name: String,
    pub identity: IdentityKey,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_conversation_id_from_first_message() {
        let id = ConversationId::for_first_message(&MessageId::from("m1"));
        assert_eq!(id.as_str(), "conversation_m1");
    }

    #[test]
    fn test_generated_ids_differ_within_same_instant() {
        let bob = IdentityKey::from_email("bob@example.com");
        let alice = IdentityKey::from_email("alice@example.com");
        let now = Utc::now();
        let a = MessageId::generate(&bob, &alice, now);
        let b = MessageId::generate(&bob, &alice, now);
        assert_ne!(a, b);
        assert!(a.as_str().starts_with("bob-example-com_alice-example-com_"));
        assert!(!a.as_str().contains('.'));
    }

    #[test]
    fn test_kind_names() {
        for kind in [
            MessageKind::Text,
            MessageKind::Photo,
            MessageKind::AttributedText,
            MessageKind::LinkPreview,
            MessageKind::Custom,
        ] {
            assert_eq!(kind.as_str().parse::<MessageKind>().unwrap(), kind);
        }
        assert_eq!(
            "sticker".parse::<MessageKind>(),
            Err(DecodeError::UnknownKind("sticker".into()))
        );
    }

    #[test]
    fn test_decode_photo_requires_url() {
        let ok = MessageContent::decode("photo", "https://cdn.example.com/a.png").unwrap();
        assert_eq!(ok.kind(), MessageKind::Photo);
        assert_eq!(ok.raw(), "https://cdn.example.com/a.png");

        assert!(matches!(
            MessageContent::decode("photo", "not a url"),
            Err(DecodeError::InvalidUrl { kind: "photo", .. })
        ));
    }

    #[test]
    fn test_location_is_longitude_first() {
        let content = MessageContent::decode("location", "30.5,50.45").unwrap();
        assert_eq!(
            content,
            MessageContent::Location(Location {
                latitude: 50.45,
                longitude: 30.5
            })
        );
        assert_eq!(content.raw(), "30.5,50.45");
        assert!(MessageContent::decode("location", "north").is_err());
    }

    #[test]
    fn test_latest_message_from_message() {
        let msg = Message::new(
            MessageId::from("m1"),
            Sender {
                identity: IdentityKey::from_email("alice@example.com"),
                display_name: "Alice".into(),
            },
            MessageContent::Text("hi".into()),
        );
        let latest = LatestMessage::from(&msg);
        assert_eq!(latest.text, "hi");
        assert!(!latest.is_read);
        assert_eq!(latest.sent_at, msg.sent_at);
    }
}
