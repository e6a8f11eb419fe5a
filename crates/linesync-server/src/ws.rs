use axum::{
    extract::{
        ws::{Message, WebSocket},
        State, WebSocketUpgrade,
    },
    response::Response,
};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tokio::sync::mpsc::Receiver;
use uuid::Uuid;

use linesync_core::{ConnectionId, OutboundEvent};

use crate::state::AppState;

/// Event name of per-connection protocol errors.
pub const ERROR_EVENT: &str = "error";

/// WebSocket upgrade handler for dashboard clients
pub async fn ws_handler(ws: WebSocketUpgrade, State(state): State<AppState>) -> Response {
    ws.on_upgrade(move |socket| handle_socket(socket, state))
}

/// Messages a client sends
#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum ClientMessage {
    Subscribe { topic: String },
    Unsubscribe { topic: String },
}

/// Frame pushed to a client
#[derive(Debug, Serialize, Deserialize)]
pub struct ServerMessage {
    pub event: String,
    pub data: Value,
}

impl From<OutboundEvent> for ServerMessage {
    fn from(event: OutboundEvent) -> Self {
        Self {
            event: event.event,
            data: event.data,
        }
    }
}

async fn handle_socket(socket: WebSocket, state: AppState) {
    let connection = ConnectionId::new(Uuid::new_v4().to_string());
    let outbox = state.rooms.register(connection.clone());
    tracing::info!(%connection, "client connected");

    pump(socket, &state, &connection, outbox).await;

    // Topic lifecycles first, then transport cleanup.
    state.manager.disconnect(&connection).await;
    state.rooms.unregister(&connection);
}

async fn pump(
    mut socket: WebSocket,
    state: &AppState,
    connection: &ConnectionId,
    mut outbox: Receiver<OutboundEvent>,
) {
    loop {
        tokio::select! {
            incoming = socket.recv() => {
                let text = match incoming {
                    Some(Ok(Message::Text(text))) => text,
                    Some(Ok(Message::Close(_))) | None => break,
                    Some(Ok(_)) => continue,
                    Some(Err(e)) => {
                        tracing::warn!(%connection, "WebSocket error: {}", e);
                        break;
                    }
                };
                handle_message(state, connection, &text).await;
            }
            outgoing = outbox.recv() => {
                let Some(event) = outgoing else { break };
                let frame = match serde_json::to_string(&ServerMessage::from(event)) {
                    Ok(frame) => frame,
                    Err(e) => {
                        tracing::error!(%connection, "failed to encode event: {}", e);
                        continue;
                    }
                };
                if socket.send(Message::Text(frame)).await.is_err() {
                    break;
                }
            }
        }
    }
}

async fn handle_message(state: &AppState, connection: &ConnectionId, text: &str) {
    let message: ClientMessage = match serde_json::from_str(text) {
        Ok(message) => message,
        Err(e) => {
            reply_error(state, connection, format!("Invalid request: {}", e));
            return;
        }
    };

    let result = match message {
        ClientMessage::Subscribe { topic } => state
            .manager
            .subscribe(connection, &topic)
            .await
            .map(|_| ()),
        ClientMessage::Unsubscribe { topic } => state
            .manager
            .unsubscribe(connection, &topic)
            .await
            .map(|_| ()),
    };

    if let Err(e) = result {
        reply_error(state, connection, e.to_string());
    }
}

fn reply_error(state: &AppState, connection: &ConnectionId, message: String) {
    use linesync_core::Transport;

    tracing::debug!(%connection, %message, "rejected client message");
    let _ = state
        .rooms
        .emit_to(connection, ERROR_EVENT, json!({ "message": message }));
}
