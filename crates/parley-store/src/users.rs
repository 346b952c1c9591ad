//! CRUD operations for identity directory records.

use chrono::{DateTime, Utc};
use rusqlite::params;

use parley_shared::UserId;

use crate::database::Database;
use crate::error::{Result, StoreError};
use crate::models::UserRecord;

impl Database {
    /// Insert or update a user record.
    pub fn upsert_user(&self, user: &UserRecord) -> Result<()> {
        self.conn().execute(
            "INSERT INTO users (id, name, icon_color, created_at)
             VALUES (?1, ?2, ?3, ?4)
             ON CONFLICT (id) DO UPDATE SET name = ?2, icon_color = ?3",
            params![
                user.id.as_str(),
                user.name,
                user.icon_color,
                user.created_at.to_rfc3339(),
            ],
        )?;
        Ok(())
    }

    /// Fetch a user by opaque id.
    pub fn get_user(&self, id: &UserId) -> Result<UserRecord> {
        self.conn()
            .query_row(
                "SELECT id, name, icon_color, created_at FROM users WHERE id = ?1",
                params![id.as_str()],
                row_to_user,
            )
            .map_err(|e| match e {
                rusqlite::Error::QueryReturnedNoRows => StoreError::NotFound,
                other => StoreError::Sqlite(other),
            })
    }

    /// Look up a user by display name. Returns `None` on miss so the
    /// caller can map it to its own not-found semantics.
    pub fn find_user_by_name(&self, name: &str) -> Result<Option<UserRecord>> {
        self.conn()
            .query_row(
                "SELECT id, name, icon_color, created_at FROM users WHERE name = ?1",
                params![name],
                row_to_user,
            )
            .map(Some)
            .or_else(|e| match e {
                rusqlite::Error::QueryReturnedNoRows => Ok(None),
                other => Err(StoreError::Sqlite(other)),
            })
    }
}

/// Map a `rusqlite::Row` to a [`UserRecord`].
fn row_to_user(row: &rusqlite::Row<'_>) -> rusqlite::Result<UserRecord> {
    let id: String = row.get(0)?;
    let name: String = row.get(1)?;
    let icon_color: String = row.get(2)?;
    let created_str: String = row.get(3)?;

    let created_at: DateTime<Utc> = DateTime::parse_from_rfc3339(&created_str)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| {
            rusqlite::Error::FromSqlConversionFailure(3, rusqlite::types::Type::Text, Box::new(e))
        })?;

    Ok(UserRecord {
        id: UserId::new(id),
        name,
        icon_color,
        created_at,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(id: &str, name: &str) -> UserRecord {
        UserRecord {
            id: UserId::new(id),
            name: name.to_string(),
            icon_color: "#ff8800".to_string(),
            created_at: Utc::now(),
        }
    }

    #[test]
    fn upsert_and_lookup() {
        let db = Database::open_in_memory().unwrap();
        db.upsert_user(&record("u1", "alice")).unwrap();

        let by_id = db.get_user(&UserId::new("u1")).unwrap();
        assert_eq!(by_id.name, "alice");

        let by_name = db.find_user_by_name("alice").unwrap().unwrap();
        assert_eq!(by_name.id.as_str(), "u1");

        assert!(db.find_user_by_name("nobody").unwrap().is_none());
    }

    #[test]
    fn upsert_updates_profile() {
        let db = Database::open_in_memory().unwrap();
        db.upsert_user(&record("u1", "alice")).unwrap();
        db.upsert_user(&record("u1", "alice-renamed")).unwrap();

        let user = db.get_user(&UserId::new("u1")).unwrap();
        assert_eq!(user.name, "alice-renamed");
    }
}
