//! Direct messages, conversations and unread counters.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::entity::Entity;
use crate::types::UserId;

/// Message content kinds accepted by the server.
pub mod kinds {
    pub const TEXT: &str = "text";
    pub const IMAGE: &str = "image";
    pub const LOCATION: &str = "location";
}

fn default_kind() -> String {
    kinds::TEXT.to_string()
}

/// A direct message between two users.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DirectMessage {
    pub message_id: String,
    pub conversation_id: String,
    pub sender_id: UserId,
    #[serde(default)]
    pub sender_name: String,
    pub recipient_id: UserId,
    #[serde(default)]
    pub recipient_name: String,
    pub content: String,
    #[serde(default = "default_kind")]
    pub message_type: String,
    pub sent_at: DateTime<Utc>,
    #[serde(default)]
    pub read_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub latitude: f64,
    #[serde(default)]
    pub longitude: f64,
}

impl DirectMessage {
    pub fn is_read(&self) -> bool {
        self.read_at.is_some()
    }
}

impl Entity for DirectMessage {
    type Id = String;

    fn id(&self) -> String {
        self.message_id.clone()
    }
}

/// A one-to-one conversation summary.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Conversation {
    pub conversation_id: String,
    pub peer_id: UserId,
    #[serde(default)]
    pub peer_name: String,
    #[serde(default)]
    pub last_message: String,
    #[serde(default)]
    pub last_message_time: Option<DateTime<Utc>>,
    #[serde(default)]
    pub unread_count: i64,
}

impl Entity for Conversation {
    type Id = String;

    fn id(&self) -> String {
        self.conversation_id.clone()
    }
}

/// Payload of `/message/send_direct`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SendDirectMessageRequest {
    pub recipient_id: UserId,
    pub content: String,
    #[serde(default = "default_kind")]
    pub message_type: String,
    pub latitude: f64,
    pub longitude: f64,
}

/// Response of `/message/send_direct`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SendDirectMessageResponse {
    pub message_id: String,
    pub conversation_id: String,
    pub recipient_id: UserId,
    #[serde(default = "default_kind")]
    pub message_type: String,
    pub sent_at: DateTime<Utc>,
}

/// Payload of `/message/mark_read`. Without a message id the whole
/// conversation is marked read.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MarkReadRequest {
    pub conversation_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message_id: Option<String>,
}

/// Unread counters per category.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct UnreadCounts {
    pub total: i64,
    pub system: i64,
    pub direct: i64,
    pub checkin: i64,
    pub like: i64,
    pub comment: i64,
}
