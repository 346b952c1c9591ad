//! HTTP surface: router construction and the REST handlers.
//!
//! Every chat route authenticates the caller from the request token;
//! the WebSocket upgrade lives in [`crate::gateway`].

use axum::extract::{Path, Query, State};
use axum::http::{HeaderMap, Method};
use axum::routing::{delete, get, patch, post};
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use tokio::net::TcpListener;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::info;

use parley_shared::{AuthError, MessageId, UserId};
use parley_store::StoredMessage;

use crate::config::ServerConfig;
use crate::delivery::RoomSummary;
use crate::error::ApiError;
use crate::gateway;
use crate::history::{self, Direction};
use crate::state::AppState;

pub fn build_router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([
            Method::GET,
            Method::POST,
            Method::PATCH,
            Method::DELETE,
            Method::OPTIONS,
        ])
        .allow_headers(Any);

    Router::new()
        .route("/health", get(health_check))
        .route("/ws", get(gateway::ws_handler))
        .route("/chat/history/:receiver_name", get(chat_history))
        .route("/chat/rooms", get(chat_rooms))
        .route("/chat/edit", patch(chat_edit))
        .route("/chat/delete", delete(chat_delete))
        .route("/chat/read", post(chat_read))
        .route("/push/subscribe", post(push_subscribe))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Bind and serve until the listener fails or the task is dropped.
pub async fn serve(config: &ServerConfig, state: AppState) -> anyhow::Result<()> {
    let router = build_router(state);
    let listener = TcpListener::bind(config.http_addr).await?;
    info!(addr = %config.http_addr, "http server listening");
    axum::serve(listener, router).await?;
    Ok(())
}

fn authenticate(state: &AppState, headers: &HeaderMap) -> Result<UserId, ApiError> {
    let token = gateway::extract_token(headers, None)
        .ok_or(ApiError::Unauthenticated(AuthError::Missing))?;
    Ok(state.verifier.verify(&token)?)
}

// ---------------------------------------------------------------------------
// Request / response shapes
// ---------------------------------------------------------------------------

#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
    version: &'static str,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct HistoryQuery {
    /// Anchor message id; omitted on first open.
    last_read_msg_id: Option<MessageId>,
    direction: Option<String>,
    page_size: Option<usize>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct HistoryResponse {
    /// Boundary marker, present only for empty boundary pages.
    #[serde(skip_serializing_if = "Option::is_none")]
    message: Option<&'static str>,
    messages: Vec<StoredMessage>,
    /// Echo of the authenticated caller, so the client can tell its
    /// own messages apart.
    sender_id: UserId,
    total_count: usize,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct EditRequest {
    receiver_name: String,
    msg_id: MessageId,
    new_msg: String,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct MessageRefRequest {
    receiver_name: String,
    msg_id: MessageId,
}

#[derive(Deserialize)]
struct SubscribeRequest {
    endpoint: String,
    keys: SubscriptionKeys,
}

#[derive(Deserialize)]
struct SubscriptionKeys {
    p256dh: String,
    auth: String,
}

#[derive(Serialize)]
struct OkResponse {
    ok: bool,
}

// ---------------------------------------------------------------------------
// Handlers
// ---------------------------------------------------------------------------

async fn health_check() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
    })
}

async fn chat_history(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(receiver_name): Path<String>,
    Query(query): Query<HistoryQuery>,
) -> Result<Json<HistoryResponse>, ApiError> {
    let caller = authenticate(&state, &headers)?;

    // A direction string that parses to neither variant is a caller
    // bug and is rejected; an absent one is only valid without an
    // anchor.
    let direction = match query.direction.as_deref() {
        Some(s) => Some(Direction::parse(s).ok_or_else(|| {
            ApiError::InvalidArgument("invalid direction specified".into())
        })?),
        None => None,
    };

    let page = state
        .engine
        .history(
            &caller,
            &receiver_name,
            query.last_read_msg_id,
            direction,
            query.page_size.unwrap_or(history::DEFAULT_PAGE_SIZE),
        )
        .await?;

    Ok(Json(HistoryResponse {
        message: page.marker,
        messages: page.messages,
        sender_id: caller,
        total_count: page.total_count,
    }))
}

async fn chat_rooms(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<Json<Vec<RoomSummary>>, ApiError> {
    let caller = authenticate(&state, &headers)?;
    Ok(Json(state.engine.list_rooms(&caller).await?))
}

async fn chat_edit(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(req): Json<EditRequest>,
) -> Result<Json<OkResponse>, ApiError> {
    let caller = authenticate(&state, &headers)?;
    state
        .engine
        .edit_message(&caller, &req.receiver_name, req.msg_id, req.new_msg)
        .await?;
    Ok(Json(OkResponse { ok: true }))
}

async fn chat_delete(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(req): Json<MessageRefRequest>,
) -> Result<Json<OkResponse>, ApiError> {
    let caller = authenticate(&state, &headers)?;
    state
        .engine
        .delete_message(&caller, &req.receiver_name, req.msg_id)
        .await?;
    Ok(Json(OkResponse { ok: true }))
}

async fn chat_read(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(req): Json<MessageRefRequest>,
) -> Result<Json<OkResponse>, ApiError> {
    let caller = authenticate(&state, &headers)?;
    state
        .engine
        .mark_read(&caller, &req.receiver_name, req.msg_id)
        .await?;
    Ok(Json(OkResponse { ok: true }))
}

async fn push_subscribe(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(req): Json<SubscribeRequest>,
) -> Result<Json<OkResponse>, ApiError> {
    let caller = authenticate(&state, &headers)?;

    if req.endpoint.is_empty() {
        return Err(ApiError::InvalidArgument("endpoint must not be empty".into()));
    }

    let sub = parley_store::PushSubscription {
        user_id: caller,
        endpoint: req.endpoint,
        key_p256dh: req.keys.p256dh,
        key_auth: req.keys.auth,
        created_at: chrono::Utc::now(),
    };
    state.store.with(move |db| db.save_subscription(&sub)).await?;
    Ok(Json(OkResponse { ok: true }))
}
