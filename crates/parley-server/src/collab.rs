//! External collaborator seams.
//!
//! The delivery engine does not care where identities, friend status,
//! or push delivery live; it consumes three narrow interfaces. The
//! production impls here are backed by the local store (directory,
//! gate) and plain HTTP (push); tests substitute their own.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tracing::{debug, warn};

use parley_shared::protocol::PushPayload;
use parley_shared::UserId;
use parley_store::UserRecord;

use crate::error::ApiError;
use crate::store::Store;

/// Identity directory: opaque id <-> display name plus profile fields.
#[async_trait]
pub trait Directory: Send + Sync {
    async fn user_by_id(&self, id: &UserId) -> Result<Option<UserRecord>, ApiError>;
    async fn user_by_name(&self, name: &str) -> Result<Option<UserRecord>, ApiError>;
}

/// Relationship gate: may a direct-message room be created between
/// these two identities?
#[async_trait]
pub trait RelationshipGate: Send + Sync {
    async fn dm_allowed(&self, initiator: &UserId, peer: &UserId) -> Result<bool, ApiError>;
}

/// Push dispatcher for disconnected participants. Failures are the
/// caller's to log; dispatch is never retried.
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn dispatch(&self, recipient: &UserId, payload: &PushPayload) -> anyhow::Result<()>;
}

// ---------------------------------------------------------------------------
// Store-backed impls
// ---------------------------------------------------------------------------

pub struct StoreDirectory {
    store: Store,
}

impl StoreDirectory {
    pub fn new(store: Store) -> Arc<Self> {
        Arc::new(Self { store })
    }
}

#[async_trait]
impl Directory for StoreDirectory {
    async fn user_by_id(&self, id: &UserId) -> Result<Option<UserRecord>, ApiError> {
        let id = id.clone();
        let user = self.store.with(move |db| match db.get_user(&id) {
            Ok(user) => Ok(Some(user)),
            Err(parley_store::StoreError::NotFound) => Ok(None),
            Err(e) => Err(e),
        });
        Ok(user.await?)
    }

    async fn user_by_name(&self, name: &str) -> Result<Option<UserRecord>, ApiError> {
        let name = name.to_string();
        Ok(self.store.with(move |db| db.find_user_by_name(&name)).await?)
    }
}

pub struct StoreGate {
    store: Store,
}

impl StoreGate {
    pub fn new(store: Store) -> Arc<Self> {
        Arc::new(Self { store })
    }
}

#[async_trait]
impl RelationshipGate for StoreGate {
    async fn dm_allowed(&self, initiator: &UserId, peer: &UserId) -> Result<bool, ApiError> {
        let (initiator, peer) = (initiator.clone(), peer.clone());
        let status = self
            .store
            .with(move |db| db.friend_status(&initiator, &peer))
            .await?;
        Ok(matches!(status, Some(parley_store::FriendStatus::Accepted)))
    }
}

// ---------------------------------------------------------------------------
// HTTP push dispatcher
// ---------------------------------------------------------------------------

/// Delivers push payloads by POSTing JSON to each stored subscription
/// endpoint. A `410 Gone` response means the subscription expired and
/// is removed from the store.
pub struct HttpPushNotifier {
    store: Store,
    client: reqwest::Client,
}

impl HttpPushNotifier {
    pub fn new(store: Store, timeout: Duration) -> Arc<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .unwrap_or_default();
        Arc::new(Self { store, client })
    }
}

#[async_trait]
impl Notifier for HttpPushNotifier {
    async fn dispatch(&self, recipient: &UserId, payload: &PushPayload) -> anyhow::Result<()> {
        let user = recipient.clone();
        let subs = self
            .store
            .with(move |db| db.subscriptions_for_user(&user))
            .await?;

        if subs.is_empty() {
            debug!(user = %recipient, "no push subscription stored, nothing to deliver");
            return Ok(());
        }

        let mut last_err = None;
        for sub in subs {
            let result = self
                .client
                .post(&sub.endpoint)
                .json(payload)
                .send()
                .await;

            match result {
                Ok(resp) if resp.status() == reqwest::StatusCode::GONE => {
                    // Subscription expired at the push service.
                    warn!(user = %recipient, endpoint = %sub.endpoint, "subscription gone, removing");
                    let (user, endpoint) = (recipient.clone(), sub.endpoint.clone());
                    let _ = self
                        .store
                        .with(move |db| db.remove_subscription(&user, &endpoint))
                        .await;
                }
                Ok(resp) if !resp.status().is_success() => {
                    last_err = Some(anyhow::anyhow!(
                        "push endpoint returned {}",
                        resp.status()
                    ));
                }
                Ok(_) => {}
                Err(e) => last_err = Some(e.into()),
            }
        }

        match last_err {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }
}
