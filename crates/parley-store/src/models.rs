//! Domain model structs persisted in the database.
//!
//! Every struct derives `Serialize` and `Deserialize`; messages are
//! stored as JSON inside their room document, so their serde shape
//! *is* their storage format.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use parley_shared::{MessageId, RoomId, UserId};

// ---------------------------------------------------------------------------
// Room
// ---------------------------------------------------------------------------

/// A two-party conversation and its append-only message log.
///
/// At most one room exists per unordered participant pair; the store
/// enforces this with a uniqueness constraint over the sorted pair.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Room {
    pub id: RoomId,
    /// Exactly two participants, stored sorted.
    pub participants: [UserId; 2],
    pub last_message_at: DateTime<Utc>,
    /// Ordered message log. Append-only except for sender-authorized
    /// edit/delete and read-state flips.
    pub messages: Vec<StoredMessage>,
    /// Optimistic concurrency token; bumped on every saved mutation.
    pub version: i64,
}

impl Room {
    /// Build a fresh, empty room for the given pair.
    pub fn new(a: UserId, b: UserId) -> Self {
        let (lo, hi) = sort_pair(a, b);
        Self {
            id: RoomId::new(),
            participants: [lo, hi],
            last_message_at: Utc::now(),
            messages: Vec::new(),
            version: 0,
        }
    }

    /// The participant that is not `user`, if `user` is a member.
    pub fn other_participant(&self, user: &UserId) -> Option<&UserId> {
        match &self.participants {
            [a, b] if a == user => Some(b),
            [a, b] if b == user => Some(a),
            _ => None,
        }
    }

    pub fn is_participant(&self, user: &UserId) -> bool {
        self.participants.iter().any(|p| p == user)
    }

    /// Number of messages `user` has not read yet.
    pub fn unread_count(&self, user: &UserId) -> usize {
        self.messages
            .iter()
            .filter(|m| !m.is_read.get(user).copied().unwrap_or(false))
            .count()
    }
}

/// Order a participant pair lexicographically.
pub fn sort_pair(a: UserId, b: UserId) -> (UserId, UserId) {
    if a.as_str() <= b.as_str() {
        (a, b)
    } else {
        (b, a)
    }
}

// ---------------------------------------------------------------------------
// Message
// ---------------------------------------------------------------------------

/// A single chat message inside a room document.
///
/// Serialized camelCase: the same shape is stored in the room
/// document and served to clients in history pages.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct StoredMessage {
    pub id: MessageId,
    pub sender: UserId,
    pub message: String,
    pub timestamp: DateTime<Utc>,
    /// Per-participant read flags, seeded `{sender: true, recipient: false}`.
    /// Entries only ever flip to `true`.
    pub is_read: BTreeMap<UserId, bool>,
    pub is_edit: bool,
}

impl StoredMessage {
    /// Create a message at send time with the initial read map.
    pub fn new(
        sender: UserId,
        recipient: UserId,
        message: String,
        timestamp: DateTime<Utc>,
    ) -> Self {
        let is_read = BTreeMap::from([(sender.clone(), true), (recipient, false)]);
        Self {
            id: MessageId::new(),
            sender,
            message,
            timestamp,
            is_read,
            is_edit: false,
        }
    }

    pub fn is_read_by(&self, user: &UserId) -> bool {
        self.is_read.get(user).copied().unwrap_or(false)
    }
}

// ---------------------------------------------------------------------------
// User
// ---------------------------------------------------------------------------

/// An identity directory record: opaque id plus profile fields.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct UserRecord {
    pub id: UserId,
    /// Unique display name; the addressing handle on the live channel.
    pub name: String,
    pub icon_color: String,
    pub created_at: DateTime<Utc>,
}

// ---------------------------------------------------------------------------
// Friend status
// ---------------------------------------------------------------------------

/// Relationship gate status between two identities.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum FriendStatus {
    Pending,
    Accepted,
    Blocked,
}

impl FriendStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            FriendStatus::Pending => "pending",
            FriendStatus::Accepted => "accepted",
            FriendStatus::Blocked => "blocked",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(FriendStatus::Pending),
            "accepted" => Some(FriendStatus::Accepted),
            "blocked" => Some(FriendStatus::Blocked),
            _ => None,
        }
    }
}

// ---------------------------------------------------------------------------
// Push subscription
// ---------------------------------------------------------------------------

/// A stored push subscription for one user endpoint.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct PushSubscription {
    pub user_id: UserId,
    pub endpoint: String,
    pub key_p256dh: String,
    pub key_auth: String,
    pub created_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn room_participants_are_sorted() {
        let room = Room::new(UserId::new("zed"), UserId::new("amy"));
        assert_eq!(room.participants[0].as_str(), "amy");
        assert_eq!(room.participants[1].as_str(), "zed");
    }

    #[test]
    fn other_participant_lookup() {
        let alice = UserId::new("alice");
        let bob = UserId::new("bob");
        let room = Room::new(alice.clone(), bob.clone());
        assert_eq!(room.other_participant(&alice), Some(&bob));
        assert_eq!(room.other_participant(&bob), Some(&alice));
        assert_eq!(room.other_participant(&UserId::new("carol")), None);
    }

    #[test]
    fn new_message_read_map() {
        let alice = UserId::new("alice");
        let bob = UserId::new("bob");
        let msg = StoredMessage::new(alice.clone(), bob.clone(), "hi".into(), Utc::now());
        assert!(msg.is_read_by(&alice));
        assert!(!msg.is_read_by(&bob));
        assert!(!msg.is_edit);
    }

    #[test]
    fn unread_count_counts_only_unread() {
        let alice = UserId::new("alice");
        let bob = UserId::new("bob");
        let mut room = Room::new(alice.clone(), bob.clone());
        room.messages.push(StoredMessage::new(
            alice.clone(),
            bob.clone(),
            "one".into(),
            Utc::now(),
        ));
        room.messages.push(StoredMessage::new(
            alice.clone(),
            bob.clone(),
            "two".into(),
            Utc::now(),
        ));
        assert_eq!(room.unread_count(&bob), 2);
        assert_eq!(room.unread_count(&alice), 0);
    }
}
