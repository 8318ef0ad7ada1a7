// Message routing for the chat and whiteboard WebSocket channels.
//
// One task per connection. The chat channel classifies inbound payloads
// (structured chat, clear, legacy plain text); the whiteboard channel
// relays every payload verbatim. Both channels share the same session
// registry, so a session's broadcasts reach connections of either kind.

use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        Path, State,
    },
    response::IntoResponse,
    routing::get,
    Router,
};
use chrono::Utc;
use drawbridge_common::protocol::ws::{ClientMessage, PresenceAction, ServerEvent};
use serde_json::Value;
use tokio::sync::mpsc;
use tracing::{debug, warn};

use crate::history::chat_collection_path;
use crate::presence;
use crate::registry::{ConnectionId, UNKNOWN_USERNAME};
use crate::state::AppState;

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/ws/chat/{session_id}", get(chat_upgrade))
        .route("/ws/whiteboard/{session_id}", get(whiteboard_upgrade))
        .with_state(state)
}

async fn chat_upgrade(
    Path(session_id): Path<String>,
    State(state): State<AppState>,
    ws: WebSocketUpgrade,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_chat_socket(state, session_id, socket))
}

async fn whiteboard_upgrade(
    Path(session_id): Path<String>,
    State(state): State<AppState>,
    ws: WebSocketUpgrade,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_whiteboard_socket(state, session_id, socket))
}

async fn handle_chat_socket(state: AppState, session_id: String, mut socket: WebSocket) {
    let (outbound_sender, mut outbound_receiver) = mpsc::unbounded_channel::<String>();
    let (connection_id, identity) =
        state.registry.join(&session_id, outbound_sender, None, None).await;
    debug!(%connection_id, %session_id, username = %identity.username, "chat connection joined");

    presence::announce(&state.registry, &session_id, PresenceAction::Joined, &identity.username)
        .await;

    // Users-list snapshot straight to the new connection. No ordering is
    // guaranteed relative to the joined broadcast above.
    let users = state.registry.active_users(&session_id).await;
    match serde_json::to_string(&ServerEvent::UsersList { users }) {
        Ok(frame) => {
            if socket.send(Message::Text(frame.into())).await.is_err() {
                let username = state.registry.leave(connection_id).await;
                presence::announce(&state.registry, &session_id, PresenceAction::Left, &username)
                    .await;
                return;
            }
        }
        Err(error) => warn!(%session_id, ?error, "failed to encode users list"),
    }

    loop {
        tokio::select! {
            maybe_outbound = outbound_receiver.recv() => {
                match maybe_outbound {
                    Some(frame) => {
                        if socket.send(Message::Text(frame.into())).await.is_err() {
                            break;
                        }
                    }
                    None => break,
                }
            }
            maybe_message = socket.recv() => {
                let Some(message) = maybe_message else {
                    break;
                };
                match message {
                    Ok(Message::Text(raw)) => {
                        route_chat_payload(&state, &session_id, connection_id, raw.as_str()).await;
                    }
                    Ok(Message::Ping(payload)) => {
                        if socket.send(Message::Pong(payload)).await.is_err() {
                            break;
                        }
                    }
                    Ok(Message::Close(_)) => break,
                    Ok(_) => {}
                    Err(_) => break,
                }
            }
        }
    }

    let username = state.registry.leave(connection_id).await;
    presence::announce(&state.registry, &session_id, PresenceAction::Left, &username).await;
    debug!(%connection_id, %session_id, %username, "chat connection closed");
}

async fn handle_whiteboard_socket(state: AppState, session_id: String, mut socket: WebSocket) {
    let (outbound_sender, mut outbound_receiver) = mpsc::unbounded_channel::<String>();
    let (connection_id, identity) =
        state.registry.join(&session_id, outbound_sender, None, None).await;
    debug!(%connection_id, %session_id, username = %identity.username, "whiteboard connection joined");

    presence::announce(&state.registry, &session_id, PresenceAction::Joined, &identity.username)
        .await;

    loop {
        tokio::select! {
            maybe_outbound = outbound_receiver.recv() => {
                match maybe_outbound {
                    Some(frame) => {
                        if socket.send(Message::Text(frame.into())).await.is_err() {
                            break;
                        }
                    }
                    None => break,
                }
            }
            maybe_message = socket.recv() => {
                let Some(message) = maybe_message else {
                    break;
                };
                match message {
                    Ok(Message::Text(raw)) => {
                        // Verbatim relay: drawing data and clear commands
                        // alike are passed through uninterpreted.
                        state.registry.broadcast(&session_id, raw.as_str(), None).await;
                    }
                    Ok(Message::Ping(payload)) => {
                        if socket.send(Message::Pong(payload)).await.is_err() {
                            break;
                        }
                    }
                    Ok(Message::Close(_)) => break,
                    Ok(_) => {}
                    Err(_) => break,
                }
            }
        }
    }

    let username = state.registry.leave(connection_id).await;
    presence::announce(&state.registry, &session_id, PresenceAction::Left, &username).await;
    debug!(%connection_id, %session_id, %username, "whiteboard connection closed");
}

/// Classify one inbound chat-channel payload and dispatch it.
async fn route_chat_payload(
    state: &AppState,
    session_id: &str,
    sender: ConnectionId,
    raw: &str,
) {
    match serde_json::from_str::<Value>(raw) {
        Ok(value) => match serde_json::from_value::<ClientMessage>(value) {
            Ok(ClientMessage::Chat { text, username }) => {
                // Payload-supplied username wins for this event only.
                let username = match username.filter(|name| !name.is_empty()) {
                    Some(name) => name,
                    None => stored_username(state, sender).await,
                };
                broadcast_chat(state, session_id, text, username).await;
            }
            Ok(ClientMessage::Clear) => {
                let event =
                    ServerEvent::ClearCanvas { username: stored_username(state, sender).await };
                broadcast_event(state, session_id, &event).await;
            }
            // Valid JSON with an unrecognized type: not an error, ignored.
            Err(_) => debug!(%session_id, "ignoring unrecognized chat payload"),
        },
        // Legacy plain-text path: the raw payload becomes the chat text.
        Err(_) => {
            let username = stored_username(state, sender).await;
            broadcast_chat(state, session_id, raw.to_owned(), username).await;
        }
    }
}

async fn stored_username(state: &AppState, id: ConnectionId) -> String {
    state
        .registry
        .identity(id)
        .await
        .map(|identity| identity.username)
        .unwrap_or_else(|| UNKNOWN_USERNAME.to_owned())
}

/// Build the chat record, persist it fire-and-forget, and echo it to the
/// whole session (sender included).
async fn broadcast_chat(state: &AppState, session_id: &str, text: String, username: String) {
    let event = ServerEvent::Chat { text, username, timestamp: Utc::now() };
    match serde_json::to_value(&event) {
        Ok(record) => state.persist.enqueue(&chat_collection_path(session_id), record),
        Err(error) => warn!(%session_id, ?error, "failed to encode chat record"),
    }
    broadcast_event(state, session_id, &event).await;
}

async fn broadcast_event(state: &AppState, session_id: &str, event: &ServerEvent) {
    match serde_json::to_string(event) {
        Ok(frame) => {
            state.registry.broadcast(session_id, &frame, None).await;
        }
        Err(error) => warn!(%session_id, ?error, "failed to encode outbound event"),
    }
}
