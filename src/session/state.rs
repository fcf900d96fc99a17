use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::error::FailureKind;
use crate::peer::RemoteMedia;

/// Lifecycle status of a session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum CallStatus {
    #[default]
    Idle,
    Connecting,
    Connected,
    /// Torn down by the remote side or a lost transport; `end()` returns to idle
    Ended,
}

impl std::fmt::Display for CallStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CallStatus::Idle => write!(f, "idle"),
            CallStatus::Connecting => write!(f, "connecting"),
            CallStatus::Connected => write!(f, "connected"),
            CallStatus::Ended => write!(f, "ended"),
        }
    }
}

/// Media connection status shown to the user
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ConnectionStatus {
    Connecting,
    Connected,
    #[default]
    Disconnected,
}

/// Observable state of a call session
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CallState {
    pub status: CallStatus,
    pub connection: ConnectionStatus,
    pub is_call_active: bool,
    pub is_muted: bool,
    pub is_video_off: bool,
    pub is_screen_sharing: bool,
    pub room_id: Option<String>,
    pub context_id: Option<String>,
    /// Own peer id first, then the remote peer once known
    pub participants: Vec<String>,
    pub remote_media: Option<RemoteMedia>,
    /// When remote media first arrived
    pub connected_at: Option<DateTime<Utc>>,
    /// Why the last session failed or was cut off
    pub failure: Option<FailureKind>,
}

impl CallState {
    /// State of a session that is starting
    pub(crate) fn connecting(room_id: &str, context_id: &str, own_peer: &str) -> Self {
        Self {
            status: CallStatus::Connecting,
            connection: ConnectionStatus::Connecting,
            room_id: Some(room_id.to_string()),
            context_id: Some(context_id.to_string()),
            participants: vec![own_peer.to_string()],
            ..Default::default()
        }
    }

    pub(crate) fn add_participant(&mut self, peer_id: &str) -> bool {
        if self.participants.iter().any(|p| p == peer_id) {
            return false;
        }
        self.participants.push(peer_id.to_string());
        true
    }

    /// Teardown result: everything cleared, only the outcome kept
    pub(crate) fn finished(status: CallStatus, failure: Option<FailureKind>) -> Self {
        Self {
            status,
            failure,
            ..Default::default()
        }
    }
}
