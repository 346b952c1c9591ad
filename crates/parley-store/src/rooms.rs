//! Room store: document-style CRUD over two-party conversations.
//!
//! Every mutation is a whole-document read-modify-write. Writes are
//! guarded by `WHERE version = ?`; a lost race reloads the document
//! and retries a bounded number of times, so concurrent mutation is
//! explicit rather than silently last-write-wins.

use chrono::{DateTime, Utc};
use rusqlite::params;

use parley_shared::{MessageId, RoomId, UserId};

use crate::database::Database;
use crate::error::{Result, StoreError};
use crate::models::{sort_pair, Room, StoredMessage};

/// Retry budget for the optimistic version check.
const VERSION_RETRIES: u32 = 3;

impl Database {
    // ------------------------------------------------------------------
    // Create
    // ------------------------------------------------------------------

    /// Create the room for an unordered participant pair.
    ///
    /// Idempotent under the one-room-per-pair invariant: if another
    /// writer creates the room first, the uniqueness constraint fires
    /// and the existing room is fetched and returned instead.
    pub fn create_room(&self, a: &UserId, b: &UserId) -> Result<Room> {
        let room = Room::new(a.clone(), b.clone());

        let inserted = self.conn().execute(
            "INSERT INTO rooms (id, participant_lo, participant_hi, last_message_at, messages, version)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![
                room.id.to_string(),
                room.participants[0].as_str(),
                room.participants[1].as_str(),
                room.last_message_at.to_rfc3339(),
                serde_json::to_string(&room.messages)?,
                room.version,
            ],
        );

        match inserted {
            Ok(_) => Ok(room),
            Err(rusqlite::Error::SqliteFailure(err, _))
                if err.code == rusqlite::ErrorCode::ConstraintViolation =>
            {
                // Lost the creation race; converge on the stored room.
                tracing::debug!(a = %a, b = %b, "room already exists, re-fetching");
                self.find_room_by_participants(a, b)?
                    .ok_or(StoreError::NotFound)
            }
            Err(e) => Err(e.into()),
        }
    }

    // ------------------------------------------------------------------
    // Read
    // ------------------------------------------------------------------

    /// Fetch a room by id.
    pub fn get_room(&self, id: RoomId) -> Result<Room> {
        self.conn()
            .query_row(
                "SELECT id, participant_lo, participant_hi, last_message_at, messages, version
                 FROM rooms WHERE id = ?1",
                params![id.to_string()],
                row_to_room,
            )
            .map_err(|e| match e {
                rusqlite::Error::QueryReturnedNoRows => StoreError::NotFound,
                other => StoreError::Sqlite(other),
            })
    }

    /// Look up the room whose participant set equals `{a, b}`.
    /// Order-insensitive.
    pub fn find_room_by_participants(&self, a: &UserId, b: &UserId) -> Result<Option<Room>> {
        let (lo, hi) = sort_pair(a.clone(), b.clone());
        let room = self
            .conn()
            .query_row(
                "SELECT id, participant_lo, participant_hi, last_message_at, messages, version
                 FROM rooms WHERE participant_lo = ?1 AND participant_hi = ?2",
                params![lo.as_str(), hi.as_str()],
                row_to_room,
            )
            .map(Some)
            .or_else(|e| match e {
                rusqlite::Error::QueryReturnedNoRows => Ok(None),
                other => Err(StoreError::Sqlite(other)),
            })?;
        Ok(room)
    }

    /// All rooms `user` participates in, most recent activity first.
    pub fn rooms_for_user(&self, user: &UserId) -> Result<Vec<Room>> {
        let mut stmt = self.conn().prepare(
            "SELECT id, participant_lo, participant_hi, last_message_at, messages, version
             FROM rooms
             WHERE participant_lo = ?1 OR participant_hi = ?1
             ORDER BY last_message_at DESC",
        )?;

        let rows = stmt.query_map(params![user.as_str()], row_to_room)?;

        let mut rooms = Vec::new();
        for row in rows {
            rooms.push(row?);
        }
        Ok(rooms)
    }

    /// Fetch a single message from a room's log.
    pub fn find_message(&self, room_id: RoomId, msg_id: MessageId) -> Result<StoredMessage> {
        let room = self.get_room(room_id)?;
        room.messages
            .iter()
            .find(|m| m.id == msg_id)
            .cloned()
            .ok_or(StoreError::NotFound)
    }

    // ------------------------------------------------------------------
    // Mutate
    // ------------------------------------------------------------------

    /// Append a message to the room log and bump `last_message_at`.
    pub fn append_message(&self, room_id: RoomId, message: StoredMessage) -> Result<Room> {
        self.mutate_room(room_id, |room| {
            room.last_message_at = message.timestamp;
            room.messages.push(message.clone());
            Ok(())
        })
    }

    /// Replace the text of a message and set its edited flag.
    /// Sender authorization is checked by the caller.
    pub fn edit_message(
        &self,
        room_id: RoomId,
        msg_id: MessageId,
        new_text: &str,
    ) -> Result<Room> {
        self.mutate_room(room_id, |room| {
            let msg = room
                .messages
                .iter_mut()
                .find(|m| m.id == msg_id)
                .ok_or(StoreError::NotFound)?;
            msg.message = new_text.to_string();
            msg.is_edit = true;
            Ok(())
        })
    }

    /// Remove a message from the room log.
    pub fn delete_message(&self, room_id: RoomId, msg_id: MessageId) -> Result<Room> {
        self.mutate_room(room_id, |room| {
            let before = room.messages.len();
            room.messages.retain(|m| m.id != msg_id);
            if room.messages.len() == before {
                return Err(StoreError::NotFound);
            }
            Ok(())
        })
    }

    /// Flip `reader`'s read flag for one message to true.
    /// Read flags are monotonic; this never resets an entry to false.
    pub fn mark_read(&self, room_id: RoomId, msg_id: MessageId, reader: &UserId) -> Result<Room> {
        self.mutate_room(room_id, |room| {
            let msg = room
                .messages
                .iter_mut()
                .find(|m| m.id == msg_id)
                .ok_or(StoreError::NotFound)?;
            msg.is_read.insert(reader.clone(), true);
            Ok(())
        })
    }

    /// Read-modify-write a room document under the optimistic version
    /// check, retrying on a lost race.
    fn mutate_room<F>(&self, room_id: RoomId, mutate: F) -> Result<Room>
    where
        F: Fn(&mut Room) -> Result<()>,
    {
        for attempt in 0..VERSION_RETRIES {
            let mut room = self.get_room(room_id)?;
            mutate(&mut room)?;

            let updated = self.conn().execute(
                "UPDATE rooms
                 SET last_message_at = ?1, messages = ?2, version = version + 1
                 WHERE id = ?3 AND version = ?4",
                params![
                    room.last_message_at.to_rfc3339(),
                    serde_json::to_string(&room.messages)?,
                    room.id.to_string(),
                    room.version,
                ],
            )?;

            if updated == 1 {
                room.version += 1;
                return Ok(room);
            }

            tracing::debug!(
                room = %room_id,
                attempt,
                "room version check failed, retrying"
            );
        }

        Err(StoreError::Conflict)
    }
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

/// Map a `rusqlite::Row` to a [`Room`].
fn row_to_room(row: &rusqlite::Row<'_>) -> rusqlite::Result<Room> {
    let id_str: String = row.get(0)?;
    let lo: String = row.get(1)?;
    let hi: String = row.get(2)?;
    let last_str: String = row.get(3)?;
    let messages_json: String = row.get(4)?;
    let version: i64 = row.get(5)?;

    let id = uuid::Uuid::parse_str(&id_str).map_err(|e| {
        rusqlite::Error::FromSqlConversionFailure(0, rusqlite::types::Type::Text, Box::new(e))
    })?;

    let last_message_at: DateTime<Utc> = DateTime::parse_from_rfc3339(&last_str)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| {
            rusqlite::Error::FromSqlConversionFailure(3, rusqlite::types::Type::Text, Box::new(e))
        })?;

    let messages: Vec<StoredMessage> = serde_json::from_str(&messages_json).map_err(|e| {
        rusqlite::Error::FromSqlConversionFailure(4, rusqlite::types::Type::Text, Box::new(e))
    })?;

    Ok(Room {
        id: parley_shared::RoomId(id),
        participants: [UserId::new(lo), UserId::new(hi)],
        last_message_at,
        messages,
        version,
    })
}
