//! v001 -- Initial schema creation.
//!
//! Creates the four core tables: `rooms`, `users`, `friends`, and
//! `push_subscriptions`.

use rusqlite::Connection;

/// SQL executed when upgrading from version 0 to version 1.
const UP_SQL: &str = r#"
-- ----------------------------------------------------------------
-- Rooms
--
-- A room is stored as a whole document: the ordered message log
-- lives in the `messages` JSON column and every mutation rewrites
-- it under the optimistic `version` check. The sorted participant
-- pair carries the one-room-per-pair invariant.
-- ----------------------------------------------------------------
CREATE TABLE IF NOT EXISTS rooms (
    id              TEXT PRIMARY KEY NOT NULL,  -- UUID v4
    participant_lo  TEXT NOT NULL,              -- lexicographically smaller user id
    participant_hi  TEXT NOT NULL,              -- lexicographically larger user id
    last_message_at TEXT NOT NULL,              -- ISO-8601 / RFC-3339
    messages        TEXT NOT NULL,              -- JSON array of messages
    version         INTEGER NOT NULL DEFAULT 0,

    UNIQUE (participant_lo, participant_hi)
);

CREATE INDEX IF NOT EXISTS idx_rooms_participant_lo ON rooms(participant_lo);
CREATE INDEX IF NOT EXISTS idx_rooms_participant_hi ON rooms(participant_hi);

-- ----------------------------------------------------------------
-- Users (identity directory records)
-- ----------------------------------------------------------------
CREATE TABLE IF NOT EXISTS users (
    id         TEXT PRIMARY KEY NOT NULL,       -- opaque identity handle
    name       TEXT NOT NULL UNIQUE,            -- display name
    icon_color TEXT NOT NULL DEFAULT '#000000',
    created_at TEXT NOT NULL
);

-- ----------------------------------------------------------------
-- Friends (relationship gate records; directional rows)
-- ----------------------------------------------------------------
CREATE TABLE IF NOT EXISTS friends (
    user_id    TEXT NOT NULL,
    friend_id  TEXT NOT NULL,
    status     TEXT NOT NULL,                   -- pending | accepted | blocked
    updated_at TEXT NOT NULL,

    PRIMARY KEY (user_id, friend_id)
);

-- ----------------------------------------------------------------
-- Push subscriptions
-- ----------------------------------------------------------------
CREATE TABLE IF NOT EXISTS push_subscriptions (
    user_id    TEXT NOT NULL,
    endpoint   TEXT NOT NULL,
    key_p256dh TEXT NOT NULL,
    key_auth   TEXT NOT NULL,
    created_at TEXT NOT NULL,

    PRIMARY KEY (user_id, endpoint)
);
"#;

/// Apply the initial migration.
pub fn up(conn: &Connection) -> Result<(), rusqlite::Error> {
    conn.execute_batch(UP_SQL)
}
