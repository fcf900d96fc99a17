//! Duplex signaling channel to a rendezvous endpoint

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use futures::{SinkExt, StreamExt};
use parking_lot::{Mutex, RwLock};
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::Message;
use tracing::{debug, info, warn};

use super::message::{MessageKind, SignalingMessage};
use crate::error::{CallError, Result};

/// Inbound message handler
///
/// Handlers run synchronously on the receive loop and must not block; the
/// loop logs a returned error and moves on to the next handler.
pub type Handler = Arc<dyn Fn(&SignalingMessage) -> Result<()> + Send + Sync>;

/// Registration handle returned by [`SignalingChannel::on`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct HandlerId(u64);

type HandlerTable = HashMap<MessageKind, Vec<(HandlerId, Handler)>>;

/// A pair of message queues connecting a client to a rendezvous point
///
/// `outbound` carries messages the client sends, `inbound` the messages it
/// receives. Dropping `outbound` tells the other side the client is gone.
pub struct SignalingLink {
    pub outbound: mpsc::UnboundedSender<SignalingMessage>,
    pub inbound: mpsc::UnboundedReceiver<SignalingMessage>,
}

/// Transport state of a channel
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChannelState {
    Connected,
    Disconnected,
}

impl std::fmt::Display for ChannelState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ChannelState::Connected => write!(f, "connected"),
            ChannelState::Disconnected => write!(f, "disconnected"),
        }
    }
}

/// Signaling channel with a kind-keyed dispatch table
pub struct SignalingChannel {
    /// Identifier announced in join/leave messages
    peer_id: String,
    /// Single outbound queue; `None` after `disconnect`
    outbound: Mutex<Option<mpsc::UnboundedSender<SignalingMessage>>>,
    handlers: Arc<RwLock<HandlerTable>>,
    next_handler: AtomicU64,
    state: Arc<watch::Sender<ChannelState>>,
    state_rx: watch::Receiver<ChannelState>,
    /// Receive-side tasks, aborted on disconnect
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl SignalingChannel {
    /// Connect to a WebSocket rendezvous endpoint
    pub async fn connect(endpoint: &str) -> Result<Arc<Self>> {
        let (ws, _response) = tokio_tungstenite::connect_async(endpoint)
            .await
            .map_err(|e| CallError::SignalingUnavailable(format!("{}: {}", endpoint, e)))?;
        info!("Signaling connected to {}", endpoint);

        let (mut sink, mut stream) = ws.split();
        let (out_tx, mut out_rx) = mpsc::unbounded_channel::<SignalingMessage>();
        let (in_tx, in_rx) = mpsc::unbounded_channel::<SignalingMessage>();

        // One writer drains the outbound queue, preserving send order. It is
        // detached and ends once the queue is dropped, after flushing.
        tokio::spawn(async move {
            while let Some(msg) = out_rx.recv().await {
                let json = match serde_json::to_string(&msg) {
                    Ok(json) => json,
                    Err(e) => {
                        warn!("Failed to encode {} message: {}", msg.kind(), e);
                        continue;
                    }
                };
                if let Err(e) = sink.send(Message::Text(json)).await {
                    warn!("Signaling send failed: {}", e);
                    break;
                }
            }
            let _ = sink.close().await;
            debug!("Signaling writer stopped");
        });

        let reader = tokio::spawn(async move {
            while let Some(frame) = stream.next().await {
                match frame {
                    Ok(Message::Text(text)) => match serde_json::from_str::<SignalingMessage>(&text) {
                        Ok(msg) => {
                            if in_tx.send(msg).is_err() {
                                break;
                            }
                        }
                        Err(e) => warn!("Dropping malformed signaling frame: {}", e),
                    },
                    Ok(Message::Close(_)) => {
                        info!("Signaling server closed the connection");
                        break;
                    }
                    Ok(_) => {}
                    Err(e) => {
                        warn!("Signaling receive error: {}", e);
                        break;
                    }
                }
            }
            debug!("Signaling reader stopped");
        });

        let channel = Self::from_link(
            uuid::Uuid::new_v4().to_string(),
            SignalingLink {
                outbound: out_tx,
                inbound: in_rx,
            },
        );
        channel.tasks.lock().push(reader);
        Ok(channel)
    }

    /// Build a channel over an existing link and start its receive loop
    pub fn from_link(peer_id: impl Into<String>, link: SignalingLink) -> Arc<Self> {
        let (state_tx, state_rx) = watch::channel(ChannelState::Connected);
        let channel = Arc::new(Self {
            peer_id: peer_id.into(),
            outbound: Mutex::new(Some(link.outbound)),
            handlers: Arc::new(RwLock::new(HashMap::new())),
            next_handler: AtomicU64::new(0),
            state: Arc::new(state_tx),
            state_rx,
            tasks: Mutex::new(Vec::new()),
        });

        let handlers = channel.handlers.clone();
        let state = channel.state.clone();
        let peer_id = channel.peer_id.clone();
        let mut inbound = link.inbound;
        let receive_loop = tokio::spawn(async move {
            while let Some(msg) = inbound.recv().await {
                dispatch(&handlers, &msg);
            }
            info!("Signaling channel for peer {} disconnected", peer_id);
            let _ = state.send(ChannelState::Disconnected);
        });
        channel.tasks.lock().push(receive_loop);

        channel
    }

    /// Identifier this channel announces
    pub fn peer_id(&self) -> &str {
        &self.peer_id
    }

    /// Register a handler for one message kind
    ///
    /// Several handlers per kind may coexist; each is invoked once per
    /// inbound message of that kind, in registration order.
    pub fn on<F>(&self, kind: MessageKind, handler: F) -> HandlerId
    where
        F: Fn(&SignalingMessage) -> Result<()> + Send + Sync + 'static,
    {
        let id = HandlerId(self.next_handler.fetch_add(1, Ordering::Relaxed));
        self.handlers
            .write()
            .entry(kind)
            .or_default()
            .push((id, Arc::new(handler)));
        id
    }

    /// Unregister a handler; false if it was not registered
    pub fn off(&self, id: HandlerId) -> bool {
        let mut handlers = self.handlers.write();
        let mut removed = false;
        handlers.retain(|_, registered| {
            let before = registered.len();
            registered.retain(|(handler_id, _)| *handler_id != id);
            removed |= registered.len() != before;
            !registered.is_empty()
        });
        removed
    }

    /// Emit a message
    pub fn send(&self, msg: SignalingMessage) -> Result<()> {
        let outbound = self.outbound.lock();
        let tx = outbound
            .as_ref()
            .ok_or_else(|| CallError::SignalingUnavailable("channel disconnected".to_string()))?;
        debug!("Signaling send: {} (room {})", msg.kind(), msg.room_id());
        tx.send(msg)
            .map_err(|_| CallError::SignalingUnavailable("transport closed".to_string()))
    }

    /// Announce this peer in a room
    pub fn join_room(&self, room_id: &str, context_id: &str) -> Result<()> {
        self.send(SignalingMessage::join(room_id, &self.peer_id, context_id))
    }

    /// Leave a room (best-effort)
    pub fn leave_room(&self, room_id: &str) {
        if let Err(e) = self.send(SignalingMessage::leave(room_id, &self.peer_id)) {
            debug!("Leave for room {} not delivered: {}", room_id, e);
        }
    }

    /// Close the channel (best-effort, idempotent)
    ///
    /// Messages already queued are still flushed by the writer.
    pub fn disconnect(&self) {
        if self.outbound.lock().take().is_some() {
            info!("Signaling channel for peer {} closing", self.peer_id);
        }
        for task in self.tasks.lock().drain(..) {
            task.abort();
        }
        let _ = self.state.send(ChannelState::Disconnected);
    }

    /// Current transport state
    pub fn state(&self) -> ChannelState {
        *self.state_rx.borrow()
    }

    /// Subscribe to transport state changes
    pub fn state_watch(&self) -> watch::Receiver<ChannelState> {
        self.state_rx.clone()
    }

    /// Number of handlers registered for a kind
    pub fn handler_count(&self, kind: MessageKind) -> usize {
        self.handlers.read().get(&kind).map(Vec::len).unwrap_or(0)
    }
}

impl Drop for SignalingChannel {
    fn drop(&mut self) {
        for task in self.tasks.lock().drain(..) {
            task.abort();
        }
    }
}

fn dispatch(handlers: &RwLock<HandlerTable>, msg: &SignalingMessage) {
    let kind = msg.kind();
    let registered: Vec<Handler> = handlers
        .read()
        .get(&kind)
        .map(|list| list.iter().map(|(_, handler)| handler.clone()).collect())
        .unwrap_or_default();

    if registered.is_empty() {
        debug!("No handler for {} message", kind);
        return;
    }

    for handler in registered {
        if let Err(e) = handler(msg) {
            warn!("Handler for {} message failed: {}", kind, e);
        }
    }
}
