//! Call event types

use serde::Serialize;

use crate::error::FailureKind;
use crate::peer::RemoteTrack;
use crate::session::{CallStatus, ConnectionStatus};

/// Event broadcast by a call session
///
/// Serialized as:
/// ```json
/// { "event": "call.state_changed", "data": { "status": "connected", "connection": "connected" } }
/// ```
#[derive(Clone, Debug, Serialize)]
#[serde(tag = "event", content = "data")]
pub enum CallEvent {
    /// Lifecycle status or connection status changed
    #[serde(rename = "call.state_changed")]
    StateChanged {
        status: CallStatus,
        connection: ConnectionStatus,
        #[serde(skip_serializing_if = "Option::is_none")]
        failure: Option<FailureKind>,
    },

    #[serde(rename = "call.participant_joined")]
    ParticipantJoined { peer_id: String },

    #[serde(rename = "call.participant_left")]
    ParticipantLeft { peer_id: String },

    /// Remote media arrived (once per negotiation)
    #[serde(rename = "call.remote_media")]
    RemoteMedia {
        stream_id: String,
        tracks: Vec<RemoteTrack>,
    },

    /// Mute, video or screen-share flag changed
    #[serde(rename = "call.media_toggled")]
    MediaToggled {
        muted: bool,
        video_off: bool,
        screen_sharing: bool,
    },
}

impl CallEvent {
    pub fn event_name(&self) -> &'static str {
        match self {
            Self::StateChanged { .. } => "call.state_changed",
            Self::ParticipantJoined { .. } => "call.participant_joined",
            Self::ParticipantLeft { .. } => "call.participant_left",
            Self::RemoteMedia { .. } => "call.remote_media",
            Self::MediaToggled { .. } => "call.media_toggled",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_serialization_shape() {
        let event = CallEvent::StateChanged {
            status: CallStatus::Ended,
            connection: ConnectionStatus::Disconnected,
            failure: Some(FailureKind::SignalingUnavailable),
        };
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["event"], "call.state_changed");
        assert_eq!(json["data"]["status"], "ended");
        assert_eq!(json["data"]["failure"], "signaling-unavailable");
        assert_eq!(event.event_name(), "call.state_changed");
    }

    #[test]
    fn test_failure_omitted_when_absent() {
        let event = CallEvent::StateChanged {
            status: CallStatus::Idle,
            connection: ConnectionStatus::Disconnected,
            failure: None,
        };
        let json = serde_json::to_value(&event).unwrap();
        assert!(json["data"].get("failure").is_none());
    }
}
