//! Live-channel wire protocol.
//!
//! Every frame on the WebSocket is a JSON object tagged with an
//! `event` field; payload field names are camelCase to match the
//! browser client.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::types::{MessageId, UserId};

/// Messages longer than this many characters are truncated in push
/// notification bodies.
pub const PUSH_BODY_LIMIT: usize = 50;

/// Number of characters kept when a push body is truncated.
pub const PUSH_BODY_KEEP: usize = 47;

/// Client -> server events.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "event", content = "data", rename_all = "lowercase")]
pub enum ClientEvent {
    /// Send a chat message to a peer, addressed by display name.
    Message {
        #[serde(rename = "receivedUser")]
        received_user: String,
        message: String,
        timestamp: DateTime<Utc>,
        #[serde(rename = "iconColor", skip_serializing_if = "Option::is_none")]
        icon_color: Option<String>,
    },

    /// Replace the text of an earlier message (sender only).
    Edit {
        #[serde(rename = "receivedUser")]
        received_user: String,
        #[serde(rename = "msgId")]
        msg_id: MessageId,
        message: String,
    },

    /// Remove an earlier message from the room log (sender only).
    Delete {
        #[serde(rename = "receivedUser")]
        received_user: String,
        #[serde(rename = "msgId")]
        msg_id: MessageId,
    },

    /// Typing indicator. Forwarded live, never persisted.
    Writing {
        #[serde(rename = "receivedUser")]
        received_user: String,
        #[serde(rename = "senderUser")]
        sender_user: String,
    },

    /// Client reports which peer's conversation is currently open.
    /// Feeds the presence tracker; suppresses redundant pushes.
    Current {
        #[serde(rename = "userId")]
        user_id: UserId,
        current: Option<String>,
    },
}

/// Server -> client events.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "event", content = "data", rename_all = "lowercase")]
pub enum ServerEvent {
    Message(MessageBroadcast),

    Edit {
        #[serde(rename = "msgId")]
        msg_id: MessageId,
        message: String,
    },

    Delete {
        #[serde(rename = "msgId")]
        msg_id: MessageId,
    },

    Writing {
        #[serde(rename = "senderUser")]
        sender_user: String,
    },
}

/// The live broadcast emitted to both participants' connections when
/// a message is delivered.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct MessageBroadcast {
    pub id: MessageId,
    pub sender_id: UserId,
    pub receiver_id: UserId,
    pub message: String,
    pub timestamp: DateTime<Utc>,
    pub is_read: BTreeMap<UserId, bool>,
    pub sender_name: String,
    pub receiver_name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub icon_color: Option<String>,
}

/// Payload handed to the push dispatcher for offline/background
/// recipients.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct PushPayload {
    /// Sender display name.
    pub title: String,
    /// Message text, truncated per [`truncate_push_body`].
    pub body: String,
    /// Deep link referencing the sender's conversation.
    pub url: String,
    pub timestamp: DateTime<Utc>,
}

/// Truncate a message body for display in a push notification.
///
/// Bodies over [`PUSH_BODY_LIMIT`] characters are cut to
/// [`PUSH_BODY_KEEP`] characters plus an ellipsis marker; shorter
/// bodies pass through unchanged.
pub fn truncate_push_body(body: &str) -> String {
    if body.chars().count() > PUSH_BODY_LIMIT {
        let kept: String = body.chars().take(PUSH_BODY_KEEP).collect();
        format!("{kept}...")
    } else {
        body.to_string()
    }
}
