//! WebSocket gateway.
//!
//! Upgrades `/ws`, authenticates the supplied token before accepting
//! the upgrade, then runs one forward task (outbound queue -> socket)
//! and one receive loop (socket -> delivery engine) until either side
//! closes.

use axum::extract::ws::{Message as WsMessage, WebSocket, WebSocketUpgrade};
use axum::extract::State;
use axum::http::HeaderMap;
use axum::response::IntoResponse;
use futures::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use parley_shared::protocol::ClientEvent;
use parley_shared::{ConnectionId, ProtocolError, UserId};

use crate::error::ApiError;
use crate::state::AppState;

/// `GET /ws` upgrade handler. The token is accepted from the
/// `Authorization: Bearer` header, a `token` cookie, or a `?token=`
/// query parameter; a missing or invalid token refuses the upgrade.
pub async fn ws_handler(
    ws: WebSocketUpgrade,
    State(state): State<AppState>,
    headers: HeaderMap,
    axum::extract::RawQuery(query): axum::extract::RawQuery,
) -> Result<impl IntoResponse, ApiError> {
    let token = extract_token(&headers, query.as_deref())
        .ok_or(ApiError::Unauthenticated(parley_shared::AuthError::Missing))?;
    let identity = state.verifier.verify(&token)?;

    Ok(ws.on_upgrade(move |socket| handle_socket(socket, state, identity)))
}

async fn handle_socket(socket: WebSocket, state: AppState, identity: UserId) {
    let conn_id = ConnectionId::new();
    let (tx, mut rx) = mpsc::unbounded_channel();

    state
        .registry
        .register(
            identity.clone(),
            crate::registry::ConnectionHandle { id: conn_id, tx },
        )
        .await;
    info!(user = %identity, conn = %conn_id, "websocket connected");

    let (mut sink, mut stream) = socket.split();

    // Outbound: drain the registry queue onto the socket.
    let mut forward = tokio::spawn(async move {
        while let Some(event) = rx.recv().await {
            let text = match serde_json::to_string(&event) {
                Ok(text) => text,
                Err(e) => {
                    warn!(error = %e, "failed to encode outbound event");
                    continue;
                }
            };
            if sink.send(WsMessage::Text(text)).await.is_err() {
                break;
            }
        }
    });

    // Inbound: parse frames and hand them to the engine. Malformed or
    // rejected frames are logged and dropped; the connection stays up.
    let engine = state.engine.clone();
    let recv_identity = identity.clone();
    let mut receive = tokio::spawn(async move {
        while let Some(frame) = stream.next().await {
            let text = match frame {
                Ok(WsMessage::Text(text)) => text,
                Ok(WsMessage::Close(_)) | Err(_) => break,
                Ok(WsMessage::Ping(_)) | Ok(WsMessage::Pong(_)) => continue,
                Ok(_) => {
                    debug!(user = %recv_identity, error = %ProtocolError::UnsupportedFrame,
                        "non-text frame dropped");
                    continue;
                }
            };

            let event: ClientEvent = match serde_json::from_str(&text)
                .map_err(ProtocolError::InvalidEvent)
            {
                Ok(event) => event,
                Err(e) => {
                    debug!(user = %recv_identity, error = %e, "unparseable client frame dropped");
                    continue;
                }
            };

            if let Err(e) = dispatch(&engine, &recv_identity, event).await {
                debug!(user = %recv_identity, error = %e, "client event rejected");
            }
        }
    });

    tokio::select! {
        _ = &mut forward => receive.abort(),
        _ = &mut receive => forward.abort(),
    }

    state.registry.unregister(conn_id).await;
    info!(user = %identity, conn = %conn_id, "websocket disconnected");
}

async fn dispatch(
    engine: &std::sync::Arc<crate::delivery::DeliveryEngine>,
    identity: &UserId,
    event: ClientEvent,
) -> Result<(), ApiError> {
    match event {
        ClientEvent::Message {
            received_user,
            message,
            timestamp,
            icon_color,
        } => {
            engine
                .send_message(identity, &received_user, message, timestamp, icon_color)
                .await?;
        }
        ClientEvent::Edit {
            received_user,
            msg_id,
            message,
        } => {
            engine
                .edit_message(identity, &received_user, msg_id, message)
                .await?;
        }
        ClientEvent::Delete {
            received_user,
            msg_id,
        } => {
            engine.delete_message(identity, &received_user, msg_id).await?;
        }
        ClientEvent::Writing {
            received_user,
            sender_user,
        } => {
            engine.typing(&sender_user, &received_user).await;
        }
        // The authenticated identity wins over the identity named in
        // the frame.
        ClientEvent::Current { user_id: _, current } => {
            engine.set_current(identity.clone(), current).await;
        }
    }
    Ok(())
}

/// Pull the auth token out of the request, in precedence order:
/// bearer header, `token` cookie, `token` query parameter.
pub(crate) fn extract_token(headers: &HeaderMap, query: Option<&str>) -> Option<String> {
    if let Some(value) = headers.get(axum::http::header::AUTHORIZATION) {
        if let Ok(value) = value.to_str() {
            if let Some(token) = value.strip_prefix("Bearer ") {
                return Some(token.trim().to_string());
            }
        }
    }

    if let Some(cookies) = headers.get(axum::http::header::COOKIE) {
        if let Ok(cookies) = cookies.to_str() {
            if let Some(token) = cookie_value(cookies, "token") {
                return Some(token);
            }
        }
    }

    if let Some(query) = query {
        for pair in query.split('&') {
            if let Some(token) = pair.strip_prefix("token=") {
                if !token.is_empty() {
                    return Some(token.to_string());
                }
            }
        }
    }

    None
}

fn cookie_value(header: &str, name: &str) -> Option<String> {
    header.split(';').find_map(|pair| {
        let (key, value) = pair.trim().split_once('=')?;
        (key == name && !value.is_empty()).then(|| value.to_string())
    })
}
