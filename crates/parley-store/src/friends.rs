//! Relationship gate records.
//!
//! Rows are directional: `(user, friend)` holds the status from
//! `user`'s point of view. Room creation consults the initiating
//! identity's row.

use chrono::Utc;
use rusqlite::params;

use parley_shared::UserId;

use crate::database::Database;
use crate::error::{Result, StoreError};
use crate::models::FriendStatus;

impl Database {
    /// Set the relationship status from `user` towards `friend`.
    pub fn set_friend_status(
        &self,
        user: &UserId,
        friend: &UserId,
        status: FriendStatus,
    ) -> Result<()> {
        self.conn().execute(
            "INSERT INTO friends (user_id, friend_id, status, updated_at)
             VALUES (?1, ?2, ?3, ?4)
             ON CONFLICT (user_id, friend_id) DO UPDATE SET status = ?3, updated_at = ?4",
            params![
                user.as_str(),
                friend.as_str(),
                status.as_str(),
                Utc::now().to_rfc3339(),
            ],
        )?;
        Ok(())
    }

    /// The relationship status from `user` towards `friend`, if any.
    pub fn friend_status(&self, user: &UserId, friend: &UserId) -> Result<Option<FriendStatus>> {
        let status: Option<String> = self
            .conn()
            .query_row(
                "SELECT status FROM friends WHERE user_id = ?1 AND friend_id = ?2",
                params![user.as_str(), friend.as_str()],
                |row| row.get(0),
            )
            .map(Some)
            .or_else(|e| match e {
                rusqlite::Error::QueryReturnedNoRows => Ok(None),
                other => Err(StoreError::Sqlite(other)),
            })?;

        Ok(status.as_deref().and_then(FriendStatus::parse))
    }
}
