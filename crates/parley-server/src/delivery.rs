//! The delivery engine: message fan-out and room lifecycle.
//!
//! Per inbound send: resolve participants, locate-or-create the room
//! (friend-gated), broadcast to currently connected participants,
//! then persist and notify as independent background tasks. The
//! broadcast is issued before persistence; background failures are
//! logged and never surfaced to the sender or rolled back.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use tracing::{debug, warn};

use parley_shared::protocol::{
    truncate_push_body, MessageBroadcast, PushPayload, ServerEvent,
};
use parley_shared::{MessageId, UserId};
use parley_store::{Room, StoredMessage, UserRecord};

use crate::collab::{Directory, Notifier, RelationshipGate};
use crate::error::ApiError;
use crate::history::{self, Direction, HistoryPage};
use crate::registry::ConnectionRegistry;
use crate::store::Store;

/// Marker returned by a history fetch that found (and could not
/// bootstrap) no room for the pair.
pub const NO_ROOM_MARKER: &str = "chatroom not found";

pub struct DeliveryEngine {
    store: Store,
    registry: ConnectionRegistry,
    directory: Arc<dyn Directory>,
    gate: Arc<dyn RelationshipGate>,
    notifier: Arc<dyn Notifier>,
}

/// One entry of the caller's room listing.
#[derive(Debug, Clone, serde::Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RoomSummary {
    pub participant_name: String,
    pub icon_color: String,
    pub last_message_at: DateTime<Utc>,
    pub unread_count: usize,
}

impl DeliveryEngine {
    pub fn new(
        store: Store,
        registry: ConnectionRegistry,
        directory: Arc<dyn Directory>,
        gate: Arc<dyn RelationshipGate>,
        notifier: Arc<dyn Notifier>,
    ) -> Arc<Self> {
        Arc::new(Self {
            store,
            registry,
            directory,
            gate,
            notifier,
        })
    }

    // ------------------------------------------------------------------
    // Send
    // ------------------------------------------------------------------

    /// Deliver one message from `sender` to the user named
    /// `receiver_name`.
    ///
    /// Synchronous failures (unknown receiver, gate rejection) abort
    /// with no side effects. After the live broadcast, persistence and
    /// push dispatch run as fire-and-forget tasks.
    pub async fn send_message(
        self: &Arc<Self>,
        sender: &UserId,
        receiver_name: &str,
        body: String,
        timestamp: DateTime<Utc>,
        icon_color: Option<String>,
    ) -> Result<MessageBroadcast, ApiError> {
        let sender_profile = self.require_user_by_id(sender).await?;
        let receiver = self.require_user_by_name(receiver_name).await?;

        let room = self.find_or_create_room(sender, &receiver.id).await?;

        let message = StoredMessage::new(
            sender.clone(),
            receiver.id.clone(),
            body,
            timestamp,
        );

        let broadcast = MessageBroadcast {
            id: message.id,
            sender_id: sender.clone(),
            receiver_id: receiver.id.clone(),
            message: message.message.clone(),
            timestamp: message.timestamp,
            is_read: message.is_read.clone(),
            sender_name: sender_profile.name.clone(),
            receiver_name: receiver.name.clone(),
            icon_color: icon_color.or(Some(sender_profile.icon_color.clone())),
        };

        // Live broadcast first: each currently connected participant
        // gets the event; absent ones are skipped silently (the
        // persisted log is the only offline path).
        for participant in &room.participants {
            let delivered = self
                .registry
                .send_to(participant, ServerEvent::Message(broadcast.clone()))
                .await;
            debug!(user = %participant, delivered, "message broadcast");
        }

        // Persistence and push are independent background tasks; a
        // failure in one must not affect the other, and neither may
        // block or fail the sender's path.
        let engine = Arc::clone(self);
        let room_id = room.id;
        let persist_msg = message.clone();
        tokio::spawn(async move {
            let result = engine
                .store
                .with(move |db| db.append_message(room_id, persist_msg))
                .await;
            if let Err(e) = result {
                warn!(room = %room_id, error = %e, "failed to persist delivered message");
            }
        });

        let engine = Arc::clone(self);
        let push_receiver = receiver.id.clone();
        let push_sender_name = sender_profile.name.clone();
        let push_body = message.message.clone();
        let push_ts = message.timestamp;
        tokio::spawn(async move {
            engine
                .notify(push_receiver, push_sender_name, push_body, push_ts)
                .await;
        });

        Ok(broadcast)
    }

    /// Push dispatch with presence-based suppression.
    async fn notify(
        &self,
        receiver: UserId,
        sender_name: String,
        body: String,
        timestamp: DateTime<Utc>,
    ) {
        // If the receiver is actively viewing this conversation, the
        // live broadcast already reached them.
        if self.registry.viewing(&receiver).await.as_deref() == Some(sender_name.as_str()) {
            debug!(user = %receiver, "push suppressed, receiver is viewing this conversation");
            return;
        }

        let payload = PushPayload {
            title: sender_name.clone(),
            body: truncate_push_body(&body),
            url: format!("/chat/{sender_name}"),
            timestamp,
        };

        if let Err(e) = self.notifier.dispatch(&receiver, &payload).await {
            warn!(user = %receiver, error = %e, "push dispatch failed");
        }
    }

    // ------------------------------------------------------------------
    // Edit / delete / read
    // ------------------------------------------------------------------

    /// Replace the text of a message. Only the original sender may
    /// edit; the change is broadcast as a lightweight event.
    pub async fn edit_message(
        &self,
        actor: &UserId,
        receiver_name: &str,
        msg_id: MessageId,
        new_text: String,
    ) -> Result<(), ApiError> {
        let (room, message) = self.locate_message(actor, receiver_name, msg_id).await?;

        if message.sender != *actor {
            return Err(ApiError::Forbidden("only the sender may edit".into()));
        }

        let room_id = room.id;
        let text = new_text.clone();
        self.store
            .with(move |db| db.edit_message(room_id, msg_id, &text))
            .await?;

        let event = ServerEvent::Edit {
            msg_id,
            message: new_text,
        };
        for participant in &room.participants {
            self.registry.send_to(participant, event.clone()).await;
        }
        Ok(())
    }

    /// Remove a message from the room log. Only the original sender
    /// may delete.
    pub async fn delete_message(
        &self,
        actor: &UserId,
        receiver_name: &str,
        msg_id: MessageId,
    ) -> Result<(), ApiError> {
        let (room, message) = self.locate_message(actor, receiver_name, msg_id).await?;

        if message.sender != *actor {
            return Err(ApiError::Forbidden("only the sender may delete".into()));
        }

        let room_id = room.id;
        self.store
            .with(move |db| db.delete_message(room_id, msg_id))
            .await?;

        let event = ServerEvent::Delete { msg_id };
        for participant in &room.participants {
            self.registry.send_to(participant, event.clone()).await;
        }
        Ok(())
    }

    /// Flip the acting participant's read flag for one message to
    /// true. The sender cannot acknowledge their own message, and the
    /// flip is never broadcast.
    pub async fn mark_read(
        &self,
        actor: &UserId,
        receiver_name: &str,
        msg_id: MessageId,
    ) -> Result<(), ApiError> {
        let (room, message) = self.locate_message(actor, receiver_name, msg_id).await?;

        if message.sender == *actor {
            return Err(ApiError::Forbidden(
                "sender cannot acknowledge their own message".into(),
            ));
        }

        let room_id = room.id;
        let reader = actor.clone();
        self.store
            .with(move |db| db.mark_read(room_id, msg_id, &reader))
            .await?;
        Ok(())
    }

    /// Forward a typing indicator to the receiver's live connection.
    /// Never persisted; silently dropped when the receiver is unknown
    /// or offline.
    pub async fn typing(&self, sender_name: &str, receiver_name: &str) {
        let Ok(Some(receiver)) = self.directory.user_by_name(receiver_name).await else {
            debug!(receiver = %receiver_name, "typing indicator for unknown receiver dropped");
            return;
        };

        self.registry
            .send_to(
                &receiver.id,
                ServerEvent::Writing {
                    sender_user: sender_name.to_string(),
                },
            )
            .await;
    }

    /// Record which peer's conversation the client has open.
    pub async fn set_current(&self, actor: UserId, current: Option<String>) {
        self.registry.set_viewing(actor, current).await;
    }

    // ------------------------------------------------------------------
    // History / listing
    // ------------------------------------------------------------------

    /// Serve one page of chat history between `caller` and the user
    /// named `receiver_name`.
    ///
    /// When no room exists yet, creation is attempted through the
    /// same gated path as sending (the first-contact bootstrap); a
    /// gate rejection degrades to an empty page rather than an error.
    pub async fn history(
        &self,
        caller: &UserId,
        receiver_name: &str,
        anchor: Option<MessageId>,
        direction: Option<Direction>,
        page_size: usize,
    ) -> Result<HistoryPage, ApiError> {
        let receiver = self.require_user_by_name(receiver_name).await?;

        let (caller_c, receiver_id) = (caller.clone(), receiver.id.clone());
        let room = self
            .store
            .with(move |db| db.find_room_by_participants(&caller_c, &receiver_id))
            .await?;

        let Some(room) = room else {
            // First-contact bootstrap: create the room so the pair can
            // start exchanging, but only through the relationship gate.
            if self.gate.dm_allowed(caller, &receiver.id).await? {
                let (a, b) = (caller.clone(), receiver.id.clone());
                self.store.with(move |db| db.create_room(&a, &b)).await?;
            } else {
                debug!(caller = %caller, peer = %receiver.id, "history bootstrap blocked by gate");
            }
            return Ok(HistoryPage {
                marker: Some(NO_ROOM_MARKER),
                messages: Vec::new(),
                total_count: 0,
            });
        };

        history::page(&room.messages, caller, anchor, direction, page_size)
    }

    /// List the caller's rooms with peer profile enrichment and
    /// unread counts, most recent activity first.
    pub async fn list_rooms(&self, caller: &UserId) -> Result<Vec<RoomSummary>, ApiError> {
        let caller_c = caller.clone();
        let rooms = self
            .store
            .with(move |db| db.rooms_for_user(&caller_c))
            .await?;

        let mut summaries = Vec::with_capacity(rooms.len());
        for room in rooms {
            let Some(peer) = room.other_participant(caller) else {
                continue;
            };

            let (name, icon_color) = match self.directory.user_by_id(peer).await? {
                Some(profile) => (profile.name, profile.icon_color),
                None => ("Unknown".to_string(), "#000000".to_string()),
            };

            summaries.push(RoomSummary {
                participant_name: name,
                icon_color,
                last_message_at: room.last_message_at,
                unread_count: room.unread_count(caller),
            });
        }
        Ok(summaries)
    }

    // ------------------------------------------------------------------
    // Internal
    // ------------------------------------------------------------------

    /// Find the room for the pair, or create it through the
    /// relationship gate. Gate rejection is terminal: the message is
    /// not queued, buffered, or retried.
    async fn find_or_create_room(
        &self,
        initiator: &UserId,
        peer: &UserId,
    ) -> Result<Room, ApiError> {
        let (a, b) = (initiator.clone(), peer.clone());
        if let Some(room) = self
            .store
            .with(move |db| db.find_room_by_participants(&a, &b))
            .await?
        {
            return Ok(room);
        }

        if !self.gate.dm_allowed(initiator, peer).await? {
            return Err(ApiError::Forbidden(
                "no accepted relationship between participants".into(),
            ));
        }

        let (a, b) = (initiator.clone(), peer.clone());
        Ok(self.store.with(move |db| db.create_room(&a, &b)).await?)
    }

    /// Resolve receiver name -> room -> message for the mutation
    /// paths. The actor must be a participant of the located room.
    async fn locate_message(
        &self,
        actor: &UserId,
        receiver_name: &str,
        msg_id: MessageId,
    ) -> Result<(Room, StoredMessage), ApiError> {
        let receiver = self.require_user_by_name(receiver_name).await?;

        let (a, b) = (actor.clone(), receiver.id.clone());
        let room = self
            .store
            .with(move |db| db.find_room_by_participants(&a, &b))
            .await?
            .ok_or_else(|| ApiError::NotFound("chat room not found".into()))?;

        if !room.is_participant(actor) {
            return Err(ApiError::Forbidden("not a participant of this room".into()));
        }

        let message = room
            .messages
            .iter()
            .find(|m| m.id == msg_id)
            .cloned()
            .ok_or_else(|| ApiError::NotFound("message not found".into()))?;

        Ok((room, message))
    }

    async fn require_user_by_id(&self, id: &UserId) -> Result<UserRecord, ApiError> {
        self.directory
            .user_by_id(id)
            .await?
            .ok_or_else(|| ApiError::NotFound("sender not found".into()))
    }

    async fn require_user_by_name(&self, name: &str) -> Result<UserRecord, ApiError> {
        self.directory
            .user_by_name(name)
            .await?
            .ok_or_else(|| ApiError::NotFound("receiver not found".into()))
    }
}
