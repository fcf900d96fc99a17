//! WebSocket bridge between a client and the room hub

use std::sync::Arc;

use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        State,
    },
    response::Response,
};
use futures::{SinkExt, StreamExt};
use tracing::{debug, info, warn};

use super::ServerState;
use crate::signaling::{SignalingError, SignalingLink, SignalingMessage};

/// Heartbeat interval
const PING_INTERVAL_SECS: u64 = 30;

/// WebSocket upgrade handler for `/ws`
pub async fn ws_handler(ws: WebSocketUpgrade, State(state): State<Arc<ServerState>>) -> Response {
    ws.on_upgrade(move |socket| handle_socket(socket, state))
}

async fn handle_socket(socket: WebSocket, state: Arc<ServerState>) {
    let (mut sender, mut receiver) = socket.split();

    // Dropping `outbound` when this handler returns removes the client from
    // every room it joined.
    let SignalingLink {
        outbound,
        mut inbound,
    } = state.hub.connect();

    info!("Signaling client connected");
    let mut heartbeat = tokio::time::interval(tokio::time::Duration::from_secs(PING_INTERVAL_SECS));

    loop {
        tokio::select! {
            msg = receiver.next() => {
                match msg {
                    Some(Ok(Message::Text(text))) => match serde_json::from_str::<SignalingMessage>(&text) {
                        Ok(msg) => {
                            debug!("Client sent {} for room {}", msg.kind(), msg.room_id());
                            if outbound.send(msg).is_err() {
                                break;
                            }
                        }
                        Err(e) => {
                            warn!("Rejecting malformed signaling message: {}", e);
                            let reply = SignalingMessage::Error {
                                room_id: String::new(),
                                payload: SignalingError::invalid_message(),
                            };
                            if send_json(&mut sender, &reply).await.is_err() {
                                break;
                            }
                        }
                    },
                    Some(Ok(Message::Close(_))) | None => {
                        info!("Signaling client disconnected");
                        break;
                    }
                    Some(Err(e)) => {
                        warn!("WebSocket receive error: {}", e);
                        break;
                    }
                    _ => {}
                }
            }

            event = inbound.recv() => {
                match event {
                    Some(msg) => {
                        if send_json(&mut sender, &msg).await.is_err() {
                            warn!("Failed to deliver {} to client, disconnecting", msg.kind());
                            break;
                        }
                    }
                    None => break,
                }
            }

            _ = heartbeat.tick() => {
                if sender.send(Message::Ping(vec![])).await.is_err() {
                    warn!("Failed to send ping, disconnecting");
                    break;
                }
            }
        }
    }

    debug!("Signaling handler exiting");
}

async fn send_json<S>(sender: &mut S, msg: &SignalingMessage) -> Result<(), ()>
where
    S: futures::Sink<Message> + Unpin,
{
    let json = serde_json::to_string(msg).map_err(|e| warn!("Failed to encode {}: {}", msg.kind(), e))?;
    sender.send(Message::Text(json)).await.map_err(|_| ())
}
