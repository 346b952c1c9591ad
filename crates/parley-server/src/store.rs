//! Async wrapper around the synchronous store.
//!
//! The store owns a single SQLite connection, so the server shares it
//! behind one async mutex. Point lookups and document updates are
//! short; holding the lock across one call is acceptable at the scale
//! of a single-process chat server.

use std::sync::Arc;

use tokio::sync::Mutex;

use parley_store::{Database, StoreError};

/// Shared handle to the database, cloneable across tasks.
#[derive(Clone)]
pub struct Store {
    db: Arc<Mutex<Database>>,
}

impl Store {
    pub fn new(db: Database) -> Self {
        Self {
            db: Arc::new(Mutex::new(db)),
        }
    }

    /// Run one store operation under the connection lock.
    pub async fn with<T, F>(&self, f: F) -> Result<T, StoreError>
    where
        F: FnOnce(&Database) -> Result<T, StoreError>,
    {
        let db = self.db.lock().await;
        f(&db)
    }
}
