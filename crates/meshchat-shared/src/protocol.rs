use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::ProtocolError;
use crate::identity::PeerIdentity;
use crate::types::{MessageId, PeerId};

/// Every frame exchanged over a peer channel, sent verbatim as JSON with a
/// `type` discriminator.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum WireMessage {
    /// User chat line; the only kind that is flooded across the mesh
    #[serde(rename = "message")]
    Chat(ChatMessage),

    /// Free-form notice (e.g. a peer leaving); shown, never relayed
    #[serde(rename = "system")]
    System(SystemNotice),

    /// Presence announcement sent once per newly opened channel
    #[serde(rename = "user_joined")]
    UserJoined(Presence),

    /// Ask the remote side for its recent history
    #[serde(rename = "request_history")]
    RequestHistory,

    /// Answer to `RequestHistory`
    #[serde(rename = "history")]
    History { messages: Vec<HistoryEntry> },
}

/// A chat line. Immutable once created.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatMessage {
    pub id: MessageId,
    pub user_id: PeerId,
    pub username: String,
    pub content: String,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SystemNotice {
    pub content: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Presence {
    pub username: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_id: Option<PeerId>,
}

/// One line of the history buffer, as stored locally and as replayed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum HistoryEntry {
    #[serde(rename = "message")]
    Chat(ChatMessage),
    #[serde(rename = "system")]
    System(SystemNotice),
}

impl ChatMessage {
    /// Stamp a new message from `author` with a fresh id.
    pub fn new(author: &PeerIdentity, content: impl Into<String>, sent_at: DateTime<Utc>) -> Self {
        Self {
            id: MessageId::generate(sent_at),
            user_id: author.id.clone(),
            username: author.username.clone(),
            content: content.into(),
            timestamp: sent_at,
        }
    }
}

impl SystemNotice {
    pub fn new(content: impl Into<String>) -> Self {
        Self {
            content: content.into(),
        }
    }

    pub fn joined(username: &str) -> Self {
        Self::new(format!("{username} joined the chat"))
    }

    pub fn left(username: &str) -> Self {
        Self::new(format!("{username} left the chat"))
    }
}

impl HistoryEntry {
    pub fn chat_id(&self) -> Option<&MessageId> {
        match self {
            HistoryEntry::Chat(msg) => Some(&msg.id),
            HistoryEntry::System(_) => None,
        }
    }
}

impl WireMessage {
    /// Short label for log fields.
    pub fn kind(&self) -> &'static str {
        match self {
            WireMessage::Chat(_) => "message",
            WireMessage::System(_) => "system",
            WireMessage::UserJoined(_) => "user_joined",
            WireMessage::RequestHistory => "request_history",
            WireMessage::History { .. } => "history",
        }
    }

    pub fn to_json(&self) -> Result<String, ProtocolError> {
        serde_json::to_string(self).map_err(ProtocolError::Encode)
    }

    pub fn from_json(data: &str) -> Result<Self, ProtocolError> {
        serde_json::from_str(data).map_err(ProtocolError::Decode)
    }
}
