//! WebSocket API handler and subscriber session lifecycle.
//!
//! A session moves through `Connecting -> Active -> (Draining | Disconnected)`:
//! registration with the registry completes the handshake, heartbeat lapses
//! or transport errors disconnect, and graceful shutdown drains. All frames
//! in both directions are JSON text messages.

use crate::dispatch::Event;
use crate::registry::SessionId;
use crate::AppState;
use axum::{
    extract::{
        ws::{Message as AxumMessage, WebSocket},
        ConnectInfo, Extension, WebSocketUpgrade,
    },
    response::IntoResponse,
};
use beacon_types::validate_channel_name;
use futures_util::{SinkExt, StreamExt};
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;

/// Bound on the per-session outbound frame buffer. Beyond this the client is
/// too slow and the dispatcher's retry/drop policy takes over.
const SESSION_SEND_BUFFER: usize = 256;

/// Client-to-server operations.
#[derive(Debug, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum IncomingOp {
    Subscribe { channel: String },
    Unsubscribe { channel: String },
    HeartbeatAck,
}

/// Server-to-client frames.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum OutgoingFrame {
    /// A broadcast event with its per-channel sequence number.
    Event {
        channel: String,
        sequence: u64,
        event: Event,
    },
    /// Periodic liveness probe; clients must answer with `heartbeat_ack`.
    Heartbeat,
    /// Graceful shutdown notice; the client should reconnect elsewhere.
    Drain { message: String },
    /// A per-session error (bad frame, refused subscribe).
    Error { message: String },
}

/// The drain frame pushed to every session during graceful shutdown.
pub fn drain_frame_json() -> String {
    serde_json::to_string(&OutgoingFrame::Drain {
        message: "server is shutting down, reconnect to continue receiving events".to_string(),
    })
    .unwrap_or_else(|_| r#"{"type":"drain"}"#.to_string())
}

/// Sends a JSON-serialized error frame over the session's sender channel.
fn send_ws_error(tx: &mpsc::Sender<String>, message: String) {
    match serde_json::to_string(&OutgoingFrame::Error { message }) {
        Ok(json) => {
            if let Err(e) = tx.try_send(json) {
                tracing::warn!("failed to send WebSocket error to client: {}", e);
            }
        }
        Err(e) => {
            tracing::error!("failed to serialize WebSocket error frame: {}", e);
        }
    }
}

/// WebSocket handler: `GET /ws`.
pub async fn ws_handler(
    Extension(state): Extension<Arc<AppState>>,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    ws: WebSocketUpgrade,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_socket(socket, state, addr))
}

/// Handles one subscriber session from handshake to disconnect.
async fn handle_socket(socket: WebSocket, state: Arc<AppState>, addr: SocketAddr) {
    let (mut sender, mut receiver) = socket.split();

    // Bounded channel so a slow consumer cannot grow memory without limit.
    let (tx, mut rx) = mpsc::channel::<String>(SESSION_SEND_BUFFER);

    // Registration completes the Connecting phase; only from here on are
    // subscribe ops accepted.
    let session_id = state.registry.add_session(tx.clone()).await;
    tracing::info!(
        session_id = %session_id,
        remote_addr = %addr,
        "subscriber session active"
    );

    // Forward frames from the session buffer to the websocket.
    let send_task = tokio::spawn(async move {
        while let Some(msg) = rx.recv().await {
            if sender.send(AxumMessage::Text(msg.into())).await.is_err() {
                break;
            }
        }
    });

    let heartbeat_interval =
        Duration::from_secs(state.config.session.heartbeat_interval_secs.max(1));
    let max_missed = state.config.session.max_missed_heartbeats.max(1);
    let mut heartbeat = tokio::time::interval_at(
        tokio::time::Instant::now() + heartbeat_interval,
        heartbeat_interval,
    );

    // Consecutive heartbeats sent without any inbound frame. Any client
    // activity counts as liveness, not just explicit acks.
    let mut missed: u32 = 0;

    loop {
        tokio::select! {
            _ = heartbeat.tick() => {
                if missed >= max_missed {
                    tracing::info!(
                        session_id = %session_id,
                        missed,
                        "session missed heartbeats, disconnecting"
                    );
                    break;
                }
                let frame = match serde_json::to_string(&OutgoingFrame::Heartbeat) {
                    Ok(frame) => frame,
                    Err(e) => {
                        tracing::error!("failed to serialize heartbeat frame: {}", e);
                        break;
                    }
                };
                if tx.try_send(frame).is_err() {
                    // A buffer full of unread frames is itself evidence the
                    // peer has stopped consuming.
                    tracing::warn!(
                        session_id = %session_id,
                        "failed to push heartbeat, disconnecting"
                    );
                    break;
                }
                missed += 1;
            }
            inbound = receiver.next() => {
                match inbound {
                    None => break,
                    Some(Err(e)) => {
                        tracing::debug!(
                            session_id = %session_id,
                            "websocket transport error: {}",
                            e
                        );
                        break;
                    }
                    Some(Ok(AxumMessage::Text(text))) => {
                        missed = 0;
                        handle_frame(&state, session_id, &tx, text.as_str()).await;
                    }
                    Some(Ok(AxumMessage::Close(_))) => break,
                    Some(Ok(_)) => {
                        // Binary/ping/pong frames still prove liveness.
                        missed = 0;
                    }
                }
            }
        }
    }

    // Disconnected: terminal, clears all subscriptions.
    state.registry.drop_session(session_id).await;
    send_task.abort();
    tracing::info!(session_id = %session_id, "subscriber session closed");
}

/// Applies one parsed client operation.
async fn handle_frame(
    state: &Arc<AppState>,
    session_id: SessionId,
    tx: &mpsc::Sender<String>,
    text: &str,
) {
    let op = match serde_json::from_str::<IncomingOp>(text) {
        Ok(op) => op,
        Err(_) => {
            tracing::warn!(session_id = %session_id, "failed to parse incoming WebSocket frame");
            send_ws_error(tx, "invalid frame format".to_string());
            return;
        }
    };

    match op {
        IncomingOp::Subscribe { channel } => {
            if let Err(e) = validate_channel_name(&channel) {
                send_ws_error(tx, e.message);
                return;
            }
            if state.registry.subscribe(session_id, &channel).await {
                tracing::debug!(session_id = %session_id, channel = %channel, "subscribed");
            } else {
                send_ws_error(tx, "session is draining; reconnect to subscribe".to_string());
            }
        }
        IncomingOp::Unsubscribe { channel } => {
            state.registry.unsubscribe(session_id, &channel).await;
            tracing::debug!(session_id = %session_id, channel = %channel, "unsubscribed");
        }
        IncomingOp::HeartbeatAck => {
            // Liveness already registered by the session loop.
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn incoming_ops_parse_with_op_tag() {
        let op: IncomingOp =
            serde_json::from_str(r#"{"op":"subscribe","channel":"incidents"}"#).unwrap();
        assert!(matches!(op, IncomingOp::Subscribe { channel } if channel == "incidents"));

        let op: IncomingOp = serde_json::from_str(r#"{"op":"heartbeat_ack"}"#).unwrap();
        assert!(matches!(op, IncomingOp::HeartbeatAck));

        assert!(serde_json::from_str::<IncomingOp>(r#"{"op":"shout"}"#).is_err());
    }

    #[test]
    fn heartbeat_frame_is_minimal() {
        let json = serde_json::to_string(&OutgoingFrame::Heartbeat).unwrap();
        assert_eq!(json, r#"{"type":"heartbeat"}"#);
    }

    #[test]
    fn drain_frame_carries_type_tag() {
        let json = drain_frame_json();
        let value: serde_json::Value = serde_json::from_str(&json).unwrap();
        assert_eq!(value["type"], "drain");
        assert!(value["message"].is_string());
    }
}
