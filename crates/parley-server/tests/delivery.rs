//! End-to-end delivery engine tests over an in-memory store.
//!
//! These wire the production directory and relationship gate to a
//! throwaway database and swap only the push dispatcher for a
//! recording stub.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::mpsc::{self, UnboundedReceiver};
use tokio::sync::Mutex;

use parley_server::collab::{Notifier, StoreDirectory, StoreGate};
use parley_server::delivery::{DeliveryEngine, NO_ROOM_MARKER};
use parley_server::error::ApiError;
use parley_server::registry::{ConnectionHandle, ConnectionRegistry};
use parley_server::store::Store;
use parley_shared::protocol::{PushPayload, ServerEvent};
use parley_shared::{ConnectionId, UserId};
use parley_store::{Database, FriendStatus, UserRecord};

// ---------------------------------------------------------------------------
// Harness
// ---------------------------------------------------------------------------

#[derive(Default)]
struct RecordingNotifier {
    sent: Mutex<Vec<(UserId, PushPayload)>>,
}

#[async_trait]
impl Notifier for RecordingNotifier {
    async fn dispatch(&self, recipient: &UserId, payload: &PushPayload) -> anyhow::Result<()> {
        self.sent
            .lock()
            .await
            .push((recipient.clone(), payload.clone()));
        Ok(())
    }
}

struct Harness {
    engine: Arc<DeliveryEngine>,
    registry: ConnectionRegistry,
    store: Store,
    notifier: Arc<RecordingNotifier>,
}

impl Harness {
    async fn new() -> Self {
        let store = Store::new(Database::open_in_memory().unwrap());

        store
            .with(|db| {
                for name in ["alice", "bob", "carol"] {
                    db.upsert_user(&UserRecord {
                        id: UserId::new(format!("{name}-id")),
                        name: name.to_string(),
                        icon_color: "#336699".to_string(),
                        created_at: Utc::now(),
                    })?;
                }
                // alice <-> bob are friends; carol knows nobody.
                db.set_friend_status(
                    &UserId::new("alice-id"),
                    &UserId::new("bob-id"),
                    FriendStatus::Accepted,
                )?;
                db.set_friend_status(
                    &UserId::new("bob-id"),
                    &UserId::new("alice-id"),
                    FriendStatus::Accepted,
                )?;
                Ok(())
            })
            .await
            .unwrap();

        let registry = ConnectionRegistry::new();
        let notifier = Arc::new(RecordingNotifier::default());
        let engine = DeliveryEngine::new(
            store.clone(),
            registry.clone(),
            StoreDirectory::new(store.clone()),
            StoreGate::new(store.clone()),
            notifier.clone(),
        );

        Self {
            engine,
            registry,
            store,
            notifier,
        }
    }

    async fn connect(&self, user: &str) -> UnboundedReceiver<ServerEvent> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.registry
            .register(
                UserId::new(user),
                ConnectionHandle {
                    id: ConnectionId::new(),
                    tx,
                },
            )
            .await;
        rx
    }
}

fn alice() -> UserId {
    UserId::new("alice-id")
}

fn bob() -> UserId {
    UserId::new("bob-id")
}

fn carol() -> UserId {
    UserId::new("carol-id")
}

/// Poll until `check` passes or the deadline expires. Background
/// persistence and push run on spawned tasks, so tests wait rather
/// than assert immediately.
async fn eventually<F, Fut>(mut check: F)
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = bool>,
{
    for _ in 0..100 {
        if check().await {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("condition not reached within deadline");
}

// ---------------------------------------------------------------------------
// Send path
// ---------------------------------------------------------------------------

#[tokio::test]
async fn send_broadcasts_to_both_connected_participants() {
    let h = Harness::new().await;
    let mut alice_rx = h.connect("alice-id").await;
    let mut bob_rx = h.connect("bob-id").await;

    let broadcast = h
        .engine
        .send_message(&alice(), "bob", "hello bob".into(), Utc::now(), None)
        .await
        .unwrap();

    assert_eq!(broadcast.sender_name, "alice");
    assert_eq!(broadcast.receiver_name, "bob");
    assert_eq!(broadcast.message, "hello bob");
    // icon_color falls back to the sender's stored profile color.
    assert_eq!(broadcast.icon_color.as_deref(), Some("#336699"));

    for rx in [&mut alice_rx, &mut bob_rx] {
        match rx.recv().await {
            Some(ServerEvent::Message(m)) => assert_eq!(m.id, broadcast.id),
            other => panic!("expected message broadcast, got {other:?}"),
        }
    }
}

#[tokio::test]
async fn send_persists_in_background() {
    let h = Harness::new().await;

    let broadcast = h
        .engine
        .send_message(&alice(), "bob", "persisted".into(), Utc::now(), None)
        .await
        .unwrap();

    let (a, b) = (alice(), bob());
    eventually(|| {
        let store = h.store.clone();
        let (a, b) = (a.clone(), b.clone());
        let id = broadcast.id;
        async move {
            store
                .with(move |db| db.find_room_by_participants(&a, &b))
                .await
                .unwrap()
                .map(|room| room.messages.iter().any(|m| m.id == id))
                .unwrap_or(false)
        }
    })
    .await;
}

#[tokio::test]
async fn send_to_offline_receiver_still_succeeds() {
    let h = Harness::new().await;

    // Nobody connected at all; the call must not error.
    h.engine
        .send_message(&alice(), "bob", "into the void".into(), Utc::now(), None)
        .await
        .unwrap();
}

#[tokio::test]
async fn send_to_unknown_receiver_is_not_found() {
    let h = Harness::new().await;

    let err = h
        .engine
        .send_message(&alice(), "nobody", "hi".into(), Utc::now(), None)
        .await
        .unwrap_err();
    assert!(matches!(err, ApiError::NotFound(_)));
}

#[tokio::test]
async fn send_without_friendship_is_forbidden_and_leaves_no_room() {
    let h = Harness::new().await;

    let err = h
        .engine
        .send_message(&alice(), "carol", "hi stranger".into(), Utc::now(), None)
        .await
        .unwrap_err();
    assert!(matches!(err, ApiError::Forbidden(_)));

    let (a, c) = (alice(), carol());
    let room = h
        .store
        .with(move |db| db.find_room_by_participants(&a, &c))
        .await
        .unwrap();
    assert!(room.is_none());

    // And no push was attempted.
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert!(h.notifier.sent.lock().await.is_empty());
}

#[tokio::test]
async fn repeated_sends_reuse_the_same_room() {
    let h = Harness::new().await;

    h.engine
        .send_message(&alice(), "bob", "one".into(), Utc::now(), None)
        .await
        .unwrap();
    h.engine
        .send_message(&bob(), "alice", "two".into(), Utc::now(), None)
        .await
        .unwrap();

    let a = alice();
    eventually(|| {
        let store = h.store.clone();
        let a = a.clone();
        async move {
            let rooms = store.with(move |db| db.rooms_for_user(&a)).await.unwrap();
            rooms.len() == 1 && rooms[0].messages.len() == 2
        }
    })
    .await;
}

// ---------------------------------------------------------------------------
// Push dispatch
// ---------------------------------------------------------------------------

#[tokio::test]
async fn push_goes_to_receiver_with_truncated_body() {
    let h = Harness::new().await;

    let long = "x".repeat(80);
    h.engine
        .send_message(&alice(), "bob", long, Utc::now(), None)
        .await
        .unwrap();

    eventually(|| async { !h.notifier.sent.lock().await.is_empty() }).await;

    let sent = h.notifier.sent.lock().await;
    let (recipient, payload) = &sent[0];
    assert_eq!(recipient, &bob());
    assert_eq!(payload.title, "alice");
    assert_eq!(payload.body, format!("{}...", "x".repeat(47)));
    assert_eq!(payload.url, "/chat/alice");
}

#[tokio::test]
async fn push_suppressed_while_receiver_views_the_conversation() {
    let h = Harness::new().await;

    // Bob has alice's conversation open on his client.
    h.engine.set_current(bob(), Some("alice".into())).await;

    h.engine
        .send_message(&alice(), "bob", "seen live".into(), Utc::now(), None)
        .await
        .unwrap();

    tokio::time::sleep(Duration::from_millis(100)).await;
    assert!(h.notifier.sent.lock().await.is_empty());

    // Viewing a different conversation does not suppress.
    h.engine.set_current(bob(), Some("carol".into())).await;
    h.engine
        .send_message(&alice(), "bob", "notify this".into(), Utc::now(), None)
        .await
        .unwrap();

    eventually(|| async { !h.notifier.sent.lock().await.is_empty() }).await;
}

// ---------------------------------------------------------------------------
// Edit / delete / read
// ---------------------------------------------------------------------------

async fn seeded_message(h: &Harness) -> parley_shared::MessageId {
    let broadcast = h
        .engine
        .send_message(&alice(), "bob", "original".into(), Utc::now(), None)
        .await
        .unwrap();

    // Wait for the background persist before mutating.
    let id = broadcast.id;
    eventually(|| {
        let store = h.store.clone();
        async move {
            let (a, b) = (alice(), bob());
            store
                .with(move |db| db.find_room_by_participants(&a, &b))
                .await
                .unwrap()
                .map(|room| room.messages.iter().any(|m| m.id == id))
                .unwrap_or(false)
        }
    })
    .await;
    id
}

#[tokio::test]
async fn edit_by_sender_updates_and_broadcasts() {
    let h = Harness::new().await;
    let msg_id = seeded_message(&h).await;
    let mut bob_rx = h.connect("bob-id").await;

    h.engine
        .edit_message(&alice(), "bob", msg_id, "amended".into())
        .await
        .unwrap();

    match bob_rx.recv().await {
        Some(ServerEvent::Edit { msg_id: id, message }) => {
            assert_eq!(id, msg_id);
            assert_eq!(message, "amended");
        }
        other => panic!("expected edit event, got {other:?}"),
    }

    let (a, b) = (alice(), bob());
    let room = h
        .store
        .with(move |db| db.find_room_by_participants(&a, &b))
        .await
        .unwrap()
        .unwrap();
    let msg = room.messages.iter().find(|m| m.id == msg_id).unwrap();
    assert_eq!(msg.message, "amended");
    assert!(msg.is_edit);
}

#[tokio::test]
async fn edit_by_non_sender_is_forbidden() {
    let h = Harness::new().await;
    let msg_id = seeded_message(&h).await;

    let err = h
        .engine
        .edit_message(&bob(), "alice", msg_id, "hijacked".into())
        .await
        .unwrap_err();
    assert!(matches!(err, ApiError::Forbidden(_)));
}

#[tokio::test]
async fn delete_removes_message_and_broadcasts() {
    let h = Harness::new().await;
    let msg_id = seeded_message(&h).await;
    let mut alice_rx = h.connect("alice-id").await;

    h.engine
        .delete_message(&alice(), "bob", msg_id)
        .await
        .unwrap();

    match alice_rx.recv().await {
        Some(ServerEvent::Delete { msg_id: id }) => assert_eq!(id, msg_id),
        other => panic!("expected delete event, got {other:?}"),
    }

    let err = h
        .engine
        .delete_message(&alice(), "bob", msg_id)
        .await
        .unwrap_err();
    assert!(matches!(err, ApiError::NotFound(_)));
}

#[tokio::test]
async fn mark_read_flips_flag_without_broadcasting() {
    let h = Harness::new().await;
    let msg_id = seeded_message(&h).await;
    let mut alice_rx = h.connect("alice-id").await;

    h.engine.mark_read(&bob(), "alice", msg_id).await.unwrap();

    let (a, b) = (alice(), bob());
    let room = h
        .store
        .with(move |db| db.find_room_by_participants(&a, &b))
        .await
        .unwrap()
        .unwrap();
    let msg = room.messages.iter().find(|m| m.id == msg_id).unwrap();
    assert!(msg.is_read_by(&bob()));

    // The acknowledgment itself is never broadcast.
    assert!(alice_rx.try_recv().is_err());
}

#[tokio::test]
async fn sender_cannot_acknowledge_own_message() {
    let h = Harness::new().await;
    let msg_id = seeded_message(&h).await;

    let err = h
        .engine
        .mark_read(&alice(), "bob", msg_id)
        .await
        .unwrap_err();
    assert!(matches!(err, ApiError::Forbidden(_)));
}

// ---------------------------------------------------------------------------
// Typing
// ---------------------------------------------------------------------------

#[tokio::test]
async fn typing_reaches_only_the_receiver() {
    let h = Harness::new().await;
    let mut alice_rx = h.connect("alice-id").await;
    let mut bob_rx = h.connect("bob-id").await;

    h.engine.typing("alice", "bob").await;

    match bob_rx.recv().await {
        Some(ServerEvent::Writing { sender_user }) => assert_eq!(sender_user, "alice"),
        other => panic!("expected writing event, got {other:?}"),
    }
    assert!(alice_rx.try_recv().is_err());

    // Unknown receivers are dropped silently.
    h.engine.typing("alice", "nobody").await;
}

// ---------------------------------------------------------------------------
// History and room listing
// ---------------------------------------------------------------------------

#[tokio::test]
async fn first_history_fetch_bootstraps_the_room_for_friends() {
    let h = Harness::new().await;

    let page = h
        .engine
        .history(&alice(), "bob", None, None, 30)
        .await
        .unwrap();
    assert_eq!(page.marker, Some(NO_ROOM_MARKER));
    assert!(page.messages.is_empty());

    let (a, b) = (alice(), bob());
    let room = h
        .store
        .with(move |db| db.find_room_by_participants(&a, &b))
        .await
        .unwrap();
    assert!(room.is_some());
}

#[tokio::test]
async fn history_fetch_for_stranger_degrades_without_creating_a_room() {
    let h = Harness::new().await;

    let page = h
        .engine
        .history(&alice(), "carol", None, None, 30)
        .await
        .unwrap();
    assert_eq!(page.marker, Some(NO_ROOM_MARKER));
    assert!(page.messages.is_empty());

    let (a, c) = (alice(), carol());
    let room = h
        .store
        .with(move |db| db.find_room_by_participants(&a, &c))
        .await
        .unwrap();
    assert!(room.is_none());
}

#[tokio::test]
async fn history_returns_the_stored_log() {
    let h = Harness::new().await;
    for i in 0..3 {
        h.engine
            .send_message(&alice(), "bob", format!("m{i}"), Utc::now(), None)
            .await
            .unwrap();
        // Persist is async; keep the log ordered deterministically.
        eventually(|| {
            let store = h.store.clone();
            async move {
                let (a, b) = (alice(), bob());
                store
                    .with(move |db| db.find_room_by_participants(&a, &b))
                    .await
                    .unwrap()
                    .map(|room| room.messages.len() == i + 1)
                    .unwrap_or(false)
            }
        })
        .await;
    }

    let page = h
        .engine
        .history(&alice(), "bob", None, None, 30)
        .await
        .unwrap();
    assert_eq!(page.marker, None);
    assert_eq!(page.total_count, 3);
    let texts: Vec<_> = page.messages.iter().map(|m| m.message.as_str()).collect();
    assert_eq!(texts, ["m0", "m1", "m2"]);
}

#[tokio::test]
async fn room_listing_orders_by_activity_with_unread_counts() {
    let h = Harness::new().await;

    // carol befriends bob so a second room can exist.
    h.store
        .with(|db| {
            db.set_friend_status(&bob(), &carol(), FriendStatus::Accepted)?;
            db.set_friend_status(&carol(), &bob(), FriendStatus::Accepted)?;
            Ok(())
        })
        .await
        .unwrap();

    h.engine
        .send_message(&alice(), "bob", "older".into(), Utc::now(), None)
        .await
        .unwrap();
    eventually(|| {
        let store = h.store.clone();
        async move {
            let b = bob();
            store.with(move |db| db.rooms_for_user(&b)).await.unwrap().len() == 1
        }
    })
    .await;

    h.engine
        .send_message(&carol(), "bob", "newer".into(), Utc::now(), None)
        .await
        .unwrap();
    eventually(|| {
        let store = h.store.clone();
        async move {
            let b = bob();
            let rooms = store.with(move |db| db.rooms_for_user(&b)).await.unwrap();
            rooms.len() == 2 && rooms.iter().all(|r| !r.messages.is_empty())
        }
    })
    .await;

    let summaries = h.engine.list_rooms(&bob()).await.unwrap();
    assert_eq!(summaries.len(), 2);
    assert_eq!(summaries[0].participant_name, "carol");
    assert_eq!(summaries[1].participant_name, "alice");
    assert_eq!(summaries[0].unread_count, 1);
    assert_eq!(summaries[1].unread_count, 1);
}
