//! Push subscription storage.

use chrono::{DateTime, Utc};
use rusqlite::params;

use parley_shared::UserId;

use crate::database::Database;
use crate::error::Result;
use crate::models::PushSubscription;

impl Database {
    /// Insert or refresh a subscription for `(user, endpoint)`.
    pub fn save_subscription(&self, sub: &PushSubscription) -> Result<()> {
        self.conn().execute(
            "INSERT INTO push_subscriptions (user_id, endpoint, key_p256dh, key_auth, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5)
             ON CONFLICT (user_id, endpoint) DO UPDATE SET key_p256dh = ?3, key_auth = ?4",
            params![
                sub.user_id.as_str(),
                sub.endpoint,
                sub.key_p256dh,
                sub.key_auth,
                sub.created_at.to_rfc3339(),
            ],
        )?;
        Ok(())
    }

    /// All stored subscriptions for one user.
    pub fn subscriptions_for_user(&self, user: &UserId) -> Result<Vec<PushSubscription>> {
        let mut stmt = self.conn().prepare(
            "SELECT user_id, endpoint, key_p256dh, key_auth, created_at
             FROM push_subscriptions WHERE user_id = ?1",
        )?;

        let rows = stmt.query_map(params![user.as_str()], row_to_subscription)?;

        let mut subs = Vec::new();
        for row in rows {
            subs.push(row?);
        }
        Ok(subs)
    }

    /// Drop a single subscription (e.g. after the push service reports
    /// it gone). Returns `true` if a row was deleted.
    pub fn remove_subscription(&self, user: &UserId, endpoint: &str) -> Result<bool> {
        let affected = self.conn().execute(
            "DELETE FROM push_subscriptions WHERE user_id = ?1 AND endpoint = ?2",
            params![user.as_str(), endpoint],
        )?;
        Ok(affected > 0)
    }
}

/// Map a `rusqlite::Row` to a [`PushSubscription`].
fn row_to_subscription(row: &rusqlite::Row<'_>) -> rusqlite::Result<PushSubscription> {
    let user_id: String = row.get(0)?;
    let endpoint: String = row.get(1)?;
    let key_p256dh: String = row.get(2)?;
    let key_auth: String = row.get(3)?;
    let created_str: String = row.get(4)?;

    let created_at: DateTime<Utc> = DateTime::parse_from_rfc3339(&created_str)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| {
            rusqlite::Error::FromSqlConversionFailure(4, rusqlite::types::Type::Text, Box::new(e))
        })?;

    Ok(PushSubscription {
        user_id: UserId::new(user_id),
        endpoint,
        key_p256dh,
        key_auth,
        created_at,
    })
}
