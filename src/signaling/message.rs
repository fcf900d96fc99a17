//! Signaling wire types
//!
//! Every message is a JSON object of the shape
//! `{"kind": "...", "roomId": "...", "payload": {...}}`.

use serde::{Deserialize, Serialize};

/// Signaling message exchanged with the rendezvous endpoint
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "kebab-case", rename_all_fields = "camelCase")]
pub enum SignalingMessage {
    /// Peer asks to enter a room
    Join { room_id: String, payload: JoinPayload },
    /// Server notification: another peer entered the room
    PeerJoined { room_id: String, payload: PeerPayload },
    /// SDP offer
    Offer { room_id: String, payload: SdpPayload },
    /// SDP answer
    Answer { room_id: String, payload: SdpPayload },
    /// Trickle ICE candidate
    IceCandidate { room_id: String, payload: IceCandidate },
    /// Peer leaves a room
    Leave { room_id: String, payload: PeerPayload },
    /// Server notification: the other peer left
    PeerLeft { room_id: String, payload: PeerPayload },
    /// Server-side rejection
    Error { room_id: String, payload: SignalingError },
}

/// Message kind, used as the dispatch key for inbound handlers
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MessageKind {
    Join,
    PeerJoined,
    Offer,
    Answer,
    IceCandidate,
    Leave,
    PeerLeft,
    Error,
}

impl std::fmt::Display for MessageKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            MessageKind::Join => "join",
            MessageKind::PeerJoined => "peer-joined",
            MessageKind::Offer => "offer",
            MessageKind::Answer => "answer",
            MessageKind::IceCandidate => "ice-candidate",
            MessageKind::Leave => "leave",
            MessageKind::PeerLeft => "peer-left",
            MessageKind::Error => "error",
        };
        f.write_str(s)
    }
}

impl SignalingMessage {
    pub fn join(room_id: impl Into<String>, peer_id: impl Into<String>, context_id: impl Into<String>) -> Self {
        SignalingMessage::Join {
            room_id: room_id.into(),
            payload: JoinPayload {
                peer_id: peer_id.into(),
                context_id: context_id.into(),
            },
        }
    }

    pub fn leave(room_id: impl Into<String>, peer_id: impl Into<String>) -> Self {
        SignalingMessage::Leave {
            room_id: room_id.into(),
            payload: PeerPayload::new(peer_id),
        }
    }

    pub fn offer(room_id: impl Into<String>, from: impl Into<String>, sdp: impl Into<String>) -> Self {
        SignalingMessage::Offer {
            room_id: room_id.into(),
            payload: SdpPayload::new(from, sdp),
        }
    }

    pub fn answer(room_id: impl Into<String>, from: impl Into<String>, sdp: impl Into<String>) -> Self {
        SignalingMessage::Answer {
            room_id: room_id.into(),
            payload: SdpPayload::new(from, sdp),
        }
    }

    pub fn candidate(room_id: impl Into<String>, candidate: IceCandidate) -> Self {
        SignalingMessage::IceCandidate {
            room_id: room_id.into(),
            payload: candidate,
        }
    }

    /// Kind tag of this message
    pub fn kind(&self) -> MessageKind {
        match self {
            SignalingMessage::Join { .. } => MessageKind::Join,
            SignalingMessage::PeerJoined { .. } => MessageKind::PeerJoined,
            SignalingMessage::Offer { .. } => MessageKind::Offer,
            SignalingMessage::Answer { .. } => MessageKind::Answer,
            SignalingMessage::IceCandidate { .. } => MessageKind::IceCandidate,
            SignalingMessage::Leave { .. } => MessageKind::Leave,
            SignalingMessage::PeerLeft { .. } => MessageKind::PeerLeft,
            SignalingMessage::Error { .. } => MessageKind::Error,
        }
    }

    /// Room this message belongs to
    pub fn room_id(&self) -> &str {
        match self {
            SignalingMessage::Join { room_id, .. }
            | SignalingMessage::PeerJoined { room_id, .. }
            | SignalingMessage::Offer { room_id, .. }
            | SignalingMessage::Answer { room_id, .. }
            | SignalingMessage::IceCandidate { room_id, .. }
            | SignalingMessage::Leave { room_id, .. }
            | SignalingMessage::PeerLeft { room_id, .. }
            | SignalingMessage::Error { room_id, .. } => room_id,
        }
    }
}

/// Join request payload
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JoinPayload {
    /// Identifier of the joining peer
    pub peer_id: String,
    /// Opaque id tying the call to a scheduled appointment
    pub context_id: String,
}

/// Payload naming a single peer
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PeerPayload {
    pub peer_id: String,
}

impl PeerPayload {
    pub fn new(peer_id: impl Into<String>) -> Self {
        Self {
            peer_id: peer_id.into(),
        }
    }
}

/// SDP offer or answer
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SdpPayload {
    /// Sending peer
    pub from: String,
    /// SDP content
    pub sdp: String,
}

impl SdpPayload {
    pub fn new(from: impl Into<String>, sdp: impl Into<String>) -> Self {
        Self {
            from: from.into(),
            sdp: sdp.into(),
        }
    }
}

/// ICE candidate
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IceCandidate {
    /// Candidate string
    pub candidate: String,
    /// SDP mid (media ID)
    #[serde(rename = "sdpMid")]
    pub sdp_mid: Option<String>,
    /// SDP mline index
    #[serde(rename = "sdpMLineIndex")]
    pub sdp_mline_index: Option<u16>,
    /// Username fragment
    #[serde(rename = "usernameFragment")]
    pub username_fragment: Option<String>,
}

impl IceCandidate {
    pub fn new(candidate: impl Into<String>) -> Self {
        Self {
            candidate: candidate.into(),
            sdp_mid: None,
            sdp_mline_index: None,
            username_fragment: None,
        }
    }

    pub fn with_mid(mut self, mid: impl Into<String>, index: u16) -> Self {
        self.sdp_mid = Some(mid.into());
        self.sdp_mline_index = Some(index);
        self
    }
}

/// Signaling error
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SignalingError {
    /// Error code
    pub code: u32,
    /// Error message
    pub message: String,
}

impl SignalingError {
    pub fn new(code: u32, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }

    pub fn room_full() -> Self {
        Self::new(409, "Room is full")
    }

    pub fn not_in_room() -> Self {
        Self::new(403, "Not a member of this room")
    }

    pub fn invalid_message() -> Self {
        Self::new(400, "Invalid signaling message")
    }
}
