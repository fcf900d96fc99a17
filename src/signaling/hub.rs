//! In-memory rendezvous hub
//!
//! Rooms hold at most two peers. Joins and leaves are announced to the other
//! occupant; offers, answers and candidates are relayed to it unchanged.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use super::channel::SignalingLink;
use super::message::{PeerPayload, SignalingError, SignalingMessage};

/// Peers allowed in one room
pub const ROOM_CAPACITY: usize = 2;

type ConnectionId = u64;

struct Occupant {
    conn: ConnectionId,
    peer_id: String,
    context_id: String,
    tx: mpsc::UnboundedSender<SignalingMessage>,
}

/// Room occupancy snapshot
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RoomInfo {
    pub room_id: String,
    pub peers: Vec<String>,
    pub context_ids: Vec<String>,
}

/// Rendezvous hub shared by all connections
#[derive(Default)]
pub struct RoomHub {
    rooms: Mutex<HashMap<String, Vec<Occupant>>>,
    next_conn: AtomicU64,
}

impl RoomHub {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Open a client link to the hub
    ///
    /// The returned link is the client's side: messages sent on `outbound`
    /// are routed by the hub, hub events arrive on `inbound`. Dropping
    /// `outbound` removes the client from every room it joined.
    pub fn connect(self: &Arc<Self>) -> SignalingLink {
        let conn = self.next_conn.fetch_add(1, Ordering::Relaxed);
        let (client_out_tx, mut client_out_rx) = mpsc::unbounded_channel::<SignalingMessage>();
        let (client_in_tx, client_in_rx) = mpsc::unbounded_channel::<SignalingMessage>();

        let hub = self.clone();
        tokio::spawn(async move {
            debug!("Hub connection {} opened", conn);
            while let Some(msg) = client_out_rx.recv().await {
                hub.route(conn, &client_in_tx, msg);
            }
            hub.drop_connection(conn);
            debug!("Hub connection {} closed", conn);
        });

        SignalingLink {
            outbound: client_out_tx,
            inbound: client_in_rx,
        }
    }

    fn route(&self, conn: ConnectionId, reply: &mpsc::UnboundedSender<SignalingMessage>, msg: SignalingMessage) {
        match msg {
            SignalingMessage::Join { room_id, payload } => {
                let mut rooms = self.rooms.lock();
                let occupants = rooms.entry(room_id.clone()).or_default();

                if occupants.iter().any(|o| o.conn == conn) {
                    debug!("Duplicate join for room {} ignored", room_id);
                    return;
                }
                if occupants.len() >= ROOM_CAPACITY {
                    warn!("Room {} is full, rejecting peer {}", room_id, payload.peer_id);
                    let _ = reply.send(SignalingMessage::Error {
                        room_id,
                        payload: SignalingError::room_full(),
                    });
                    return;
                }

                for other in occupants.iter() {
                    let _ = other.tx.send(SignalingMessage::PeerJoined {
                        room_id: room_id.clone(),
                        payload: PeerPayload::new(&payload.peer_id),
                    });
                }
                info!(
                    "Peer {} joined room {} (context {})",
                    payload.peer_id, room_id, payload.context_id
                );
                occupants.push(Occupant {
                    conn,
                    peer_id: payload.peer_id,
                    context_id: payload.context_id,
                    tx: reply.clone(),
                });
            }
            SignalingMessage::Leave { room_id, .. } => {
                self.remove_from_room(conn, &room_id);
            }
            msg @ (SignalingMessage::Offer { .. }
            | SignalingMessage::Answer { .. }
            | SignalingMessage::IceCandidate { .. }) => {
                let rooms = self.rooms.lock();
                let room_id = msg.room_id();
                let occupants = match rooms.get(room_id) {
                    Some(o) if o.iter().any(|o| o.conn == conn) => o,
                    _ => {
                        let _ = reply.send(SignalingMessage::Error {
                            room_id: room_id.to_string(),
                            payload: SignalingError::not_in_room(),
                        });
                        return;
                    }
                };
                for other in occupants.iter().filter(|o| o.conn != conn) {
                    debug!("Relaying {} in room {} to {}", msg.kind(), room_id, other.peer_id);
                    let _ = other.tx.send(msg.clone());
                }
            }
            other => {
                let _ = reply.send(SignalingMessage::Error {
                    room_id: other.room_id().to_string(),
                    payload: SignalingError::invalid_message(),
                });
            }
        }
    }

    fn remove_from_room(&self, conn: ConnectionId, room_id: &str) {
        let mut rooms = self.rooms.lock();
        let Some(occupants) = rooms.get_mut(room_id) else {
            return;
        };
        let Some(pos) = occupants.iter().position(|o| o.conn == conn) else {
            return;
        };

        let left = occupants.remove(pos);
        info!("Peer {} left room {}", left.peer_id, room_id);
        for other in occupants.iter() {
            let _ = other.tx.send(SignalingMessage::PeerLeft {
                room_id: room_id.to_string(),
                payload: PeerPayload::new(&left.peer_id),
            });
        }
        if occupants.is_empty() {
            rooms.remove(room_id);
        }
    }

    fn drop_connection(&self, conn: ConnectionId) {
        let joined: Vec<String> = self
            .rooms
            .lock()
            .iter()
            .filter(|(_, occupants)| occupants.iter().any(|o| o.conn == conn))
            .map(|(room_id, _)| room_id.clone())
            .collect();

        for room_id in joined {
            self.remove_from_room(conn, &room_id);
        }
    }

    /// Snapshot of one room
    pub fn room(&self, room_id: &str) -> Option<RoomInfo> {
        self.rooms.lock().get(room_id).map(|occupants| RoomInfo {
            room_id: room_id.to_string(),
            peers: occupants.iter().map(|o| o.peer_id.clone()).collect(),
            context_ids: occupants.iter().map(|o| o.context_id.clone()).collect(),
        })
    }

    /// Number of non-empty rooms
    pub fn room_count(&self) -> usize {
        self.rooms.lock().len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::signaling::message::{IceCandidate, MessageKind};
    use std::time::Duration;

    async fn next(link: &mut SignalingLink) -> SignalingMessage {
        tokio::time::timeout(Duration::from_secs(1), link.inbound.recv())
            .await
            .expect("timed out")
            .expect("link closed")
    }

    async fn settle() {
        tokio::time::sleep(Duration::from_millis(20)).await;
    }

    #[tokio::test]
    async fn test_join_announces_to_existing_occupant() {
        let hub = RoomHub::new();
        let mut a = hub.connect();
        let mut b = hub.connect();

        a.outbound.send(SignalingMessage::join("room-42", "a", "appt-7")).unwrap();
        settle().await;
        b.outbound.send(SignalingMessage::join("room-42", "b", "appt-7")).unwrap();

        let msg = next(&mut a).await;
        assert_eq!(
            msg,
            SignalingMessage::PeerJoined {
                room_id: "room-42".into(),
                payload: PeerPayload::new("b"),
            }
        );
        settle().await;
        assert!(b.inbound.try_recv().is_err());

        let room = hub.room("room-42").unwrap();
        assert_eq!(room.peers, vec!["a".to_string(), "b".to_string()]);
        assert_eq!(room.context_ids, vec!["appt-7".to_string(), "appt-7".to_string()]);
    }

    #[tokio::test]
    async fn test_relay_to_other_occupant_only() {
        let hub = RoomHub::new();
        let mut a = hub.connect();
        let mut b = hub.connect();
        a.outbound.send(SignalingMessage::join("r", "a", "c")).unwrap();
        settle().await;
        b.outbound.send(SignalingMessage::join("r", "b", "c")).unwrap();
        assert_eq!(next(&mut a).await.kind(), MessageKind::PeerJoined);

        a.outbound.send(SignalingMessage::offer("r", "a", "v=0 offer")).unwrap();
        a.outbound
            .send(SignalingMessage::candidate("r", IceCandidate::new("candidate:1")))
            .unwrap();

        assert_eq!(next(&mut b).await, SignalingMessage::offer("r", "a", "v=0 offer"));
        assert_eq!(next(&mut b).await.kind(), MessageKind::IceCandidate);
        settle().await;
        assert!(a.inbound.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_third_peer_rejected() {
        let hub = RoomHub::new();
        let a = hub.connect();
        let b = hub.connect();
        let mut c = hub.connect();
        a.outbound.send(SignalingMessage::join("r", "a", "x")).unwrap();
        b.outbound.send(SignalingMessage::join("r", "b", "x")).unwrap();
        settle().await;
        c.outbound.send(SignalingMessage::join("r", "c", "x")).unwrap();

        match next(&mut c).await {
            SignalingMessage::Error { payload, .. } => assert_eq!(payload.code, 409),
            other => panic!("unexpected {:?}", other),
        }
        assert_eq!(hub.room("r").unwrap().peers.len(), ROOM_CAPACITY);
    }

    #[tokio::test]
    async fn test_leave_and_drop_announce_peer_left() {
        let hub = RoomHub::new();
        let mut a = hub.connect();
        let b = hub.connect();
        a.outbound.send(SignalingMessage::join("r", "a", "x")).unwrap();
        settle().await;
        b.outbound.send(SignalingMessage::join("r", "b", "x")).unwrap();
        assert_eq!(next(&mut a).await.kind(), MessageKind::PeerJoined);

        // Abrupt close of b's transport
        drop(b);
        let msg = next(&mut a).await;
        assert_eq!(msg.kind(), MessageKind::PeerLeft);

        a.outbound.send(SignalingMessage::leave("r", "a")).unwrap();
        settle().await;
        assert_eq!(hub.room_count(), 0);
    }

    #[tokio::test]
    async fn test_relay_requires_membership() {
        let hub = RoomHub::new();
        let mut a = hub.connect();
        a.outbound.send(SignalingMessage::offer("r", "a", "v=0")).unwrap();
        match next(&mut a).await {
            SignalingMessage::Error { payload, .. } => assert_eq!(payload.code, 403),
            other => panic!("unexpected {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_duplicate_join_ignored() {
        let hub = RoomHub::new();
        let a = hub.connect();
        a.outbound.send(SignalingMessage::join("r", "a", "x")).unwrap();
        a.outbound.send(SignalingMessage::join("r", "a", "x")).unwrap();
        settle().await;
        assert_eq!(hub.room("r").unwrap().peers, vec!["a".to_string()]);
    }
}
