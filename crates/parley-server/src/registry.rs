//! Connection registry and presence tracker.
//!
//! Process-wide mapping from authenticated identity to the live
//! connection's outbound channel. Exposes only register / unregister
//! / lookup so the at-most-one-mapping-per-identity invariant is
//! enforced at a single boundary. The presence map ("which peer's
//! conversation does this user have open") lives under the same lock
//! rather than as a second unsynchronized global.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::mpsc::UnboundedSender;
use tokio::sync::RwLock;
use tracing::debug;

use parley_shared::protocol::ServerEvent;
use parley_shared::{ConnectionId, UserId};

/// Non-owning handle to one live connection: the transport layer owns
/// the socket, the registry holds the outbound queue.
#[derive(Debug, Clone)]
pub struct ConnectionHandle {
    pub id: ConnectionId,
    pub tx: UnboundedSender<ServerEvent>,
}

#[derive(Default)]
struct Inner {
    /// identity -> live connection. At most one entry per identity;
    /// a reconnect overwrites the previous handle.
    connections: HashMap<UserId, ConnectionHandle>,
    /// identity -> display name of the peer whose conversation the
    /// client currently has open. Used for push suppression only.
    viewing: HashMap<UserId, String>,
}

/// Lifecycle-scoped singleton service guarding both maps.
#[derive(Clone, Default)]
pub struct ConnectionRegistry {
    inner: Arc<RwLock<Inner>>,
}

impl ConnectionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Associate `identity` with a live connection, unconditionally
    /// overwriting any existing mapping (last connection wins).
    pub async fn register(&self, identity: UserId, handle: ConnectionHandle) {
        let mut inner = self.inner.write().await;
        if let Some(old) = inner.connections.insert(identity.clone(), handle) {
            debug!(user = %identity, stale = %old.id, "replaced existing connection mapping");
        }
    }

    /// Remove the mapping whose stored handle equals `conn_id`.
    ///
    /// Lookup is by handle equality, not by identity: if the identity
    /// reconnected and the registry already holds a newer handle, the
    /// teardown of the old connection must not remove it. No-op when
    /// nothing matches.
    pub async fn unregister(&self, conn_id: ConnectionId) {
        let mut inner = self.inner.write().await;
        let owner = inner
            .connections
            .iter()
            .find(|(_, handle)| handle.id == conn_id)
            .map(|(user, _)| user.clone());

        if let Some(user) = owner {
            inner.connections.remove(&user);
            inner.viewing.remove(&user);
            debug!(user = %user, conn = %conn_id, "connection unregistered");
        }
    }

    /// The live handle for `identity`, if connected.
    pub async fn lookup(&self, identity: &UserId) -> Option<ConnectionHandle> {
        self.inner.read().await.connections.get(identity).cloned()
    }

    /// Push a live event to `identity`'s connection. Returns `false`
    /// when the identity is not connected (callers skip silently; the
    /// persisted log is the only offline delivery path).
    pub async fn send_to(&self, identity: &UserId, event: ServerEvent) -> bool {
        let inner = self.inner.read().await;
        match inner.connections.get(identity) {
            Some(handle) => handle.tx.send(event).is_ok(),
            None => false,
        }
    }

    /// Record which peer's conversation `identity` currently has open
    /// (`None` clears the entry). Overwrites on every report.
    pub async fn set_viewing(&self, identity: UserId, peer_name: Option<String>) {
        let mut inner = self.inner.write().await;
        match peer_name {
            Some(name) => {
                inner.viewing.insert(identity, name);
            }
            None => {
                inner.viewing.remove(&identity);
            }
        }
    }

    /// The display name of the peer `identity` is currently viewing.
    pub async fn viewing(&self, identity: &UserId) -> Option<String> {
        self.inner.read().await.viewing.get(identity).cloned()
    }

    /// Number of live connections. Diagnostic only.
    pub async fn connection_count(&self) -> usize {
        self.inner.read().await.connections.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::sync::mpsc;

    fn handle() -> (ConnectionHandle, mpsc::UnboundedReceiver<ServerEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (
            ConnectionHandle {
                id: ConnectionId::new(),
                tx,
            },
            rx,
        )
    }

    #[tokio::test]
    async fn at_most_one_mapping_per_identity() {
        let registry = ConnectionRegistry::new();
        let alice = UserId::new("alice");

        let (first, _rx1) = handle();
        let (second, mut rx2) = handle();
        let second_id = second.id;

        registry.register(alice.clone(), first).await;
        registry.register(alice.clone(), second).await;
        assert_eq!(registry.connection_count().await, 1);

        // The second registration is authoritative.
        let current = registry.lookup(&alice).await.unwrap();
        assert_eq!(current.id, second_id);

        assert!(registry.send_to(&alice, ServerEvent::Delete {
            msg_id: parley_shared::MessageId::new(),
        }).await);
        assert!(rx2.recv().await.is_some());
    }

    #[tokio::test]
    async fn stale_unregister_keeps_newer_mapping() {
        let registry = ConnectionRegistry::new();
        let alice = UserId::new("alice");

        let (old, _rx1) = handle();
        let old_id = old.id;
        let (new, _rx2) = handle();
        let new_id = new.id;

        registry.register(alice.clone(), old).await;
        registry.register(alice.clone(), new).await;

        // Teardown of the replaced connection must be a no-op.
        registry.unregister(old_id).await;
        let current = registry.lookup(&alice).await.unwrap();
        assert_eq!(current.id, new_id);

        // Teardown of the live connection removes the mapping.
        registry.unregister(new_id).await;
        assert!(registry.lookup(&alice).await.is_none());
    }

    #[tokio::test]
    async fn unregister_unknown_handle_is_noop() {
        let registry = ConnectionRegistry::new();
        registry.unregister(ConnectionId::new()).await;
        assert_eq!(registry.connection_count().await, 0);
    }

    #[tokio::test]
    async fn send_to_disconnected_identity_reports_false() {
        let registry = ConnectionRegistry::new();
        let sent = registry
            .send_to(
                &UserId::new("ghost"),
                ServerEvent::Delete {
                    msg_id: parley_shared::MessageId::new(),
                },
            )
            .await;
        assert!(!sent);
    }

    #[tokio::test]
    async fn presence_overwrites_and_clears_on_disconnect() {
        let registry = ConnectionRegistry::new();
        let alice = UserId::new("alice");

        let (conn, _rx) = handle();
        let conn_id = conn.id;
        registry.register(alice.clone(), conn).await;

        registry.set_viewing(alice.clone(), Some("bob".into())).await;
        assert_eq!(registry.viewing(&alice).await.as_deref(), Some("bob"));

        registry.set_viewing(alice.clone(), Some("carol".into())).await;
        assert_eq!(registry.viewing(&alice).await.as_deref(), Some("carol"));

        registry.set_viewing(alice.clone(), None).await;
        assert!(registry.viewing(&alice).await.is_none());

        registry.set_viewing(alice.clone(), Some("bob".into())).await;
        registry.unregister(conn_id).await;
        assert!(registry.viewing(&alice).await.is_none());
    }
}
