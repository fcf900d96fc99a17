use std::sync::Arc;

use parking_lot::RwLock;
use serde::ser::SerializeStruct;
use serde::{Serialize, Serializer};

use crate::media::TrackKind;
use crate::signaling::message::IceCandidate;

/// Negotiation phase of one peer connection
///
/// ```text
/// New --peer-joined--> Offering --answer--> Negotiating --track--> Connected
///  \--offer--> Answering --answer sent--/                            |
///  any phase --close--> Closed (terminal) <--------------------------/
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum NegotiationPhase {
    New,
    Offering,
    Answering,
    Negotiating,
    Connected,
    Closed,
}

impl std::fmt::Display for NegotiationPhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            NegotiationPhase::New => write!(f, "new"),
            NegotiationPhase::Offering => write!(f, "offering"),
            NegotiationPhase::Answering => write!(f, "answering"),
            NegotiationPhase::Negotiating => write!(f, "negotiating"),
            NegotiationPhase::Connected => write!(f, "connected"),
            NegotiationPhase::Closed => write!(f, "closed"),
        }
    }
}

/// Peer connection state as reported by the platform
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ConnectionState {
    New,
    Connecting,
    Connected,
    Disconnected,
    Failed,
    Closed,
}

impl std::fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConnectionState::New => write!(f, "new"),
            ConnectionState::Connecting => write!(f, "connecting"),
            ConnectionState::Connected => write!(f, "connected"),
            ConnectionState::Disconnected => write!(f, "disconnected"),
            ConnectionState::Failed => write!(f, "failed"),
            ConnectionState::Closed => write!(f, "closed"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SdpKind {
    Offer,
    Answer,
}

/// SDP blob with its role
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionDescription {
    pub kind: SdpKind,
    pub sdp: String,
}

impl SessionDescription {
    pub fn offer(sdp: impl Into<String>) -> Self {
        Self {
            kind: SdpKind::Offer,
            sdp: sdp.into(),
        }
    }

    pub fn answer(sdp: impl Into<String>) -> Self {
        Self {
            kind: SdpKind::Answer,
            sdp: sdp.into(),
        }
    }
}

/// One inbound track
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RemoteTrack {
    pub id: String,
    pub kind: TrackKind,
}

/// Inbound media handle
///
/// Published once per negotiation when the first track arrives. Tracks that
/// arrive later are appended to the same handle.
#[derive(Debug, Clone)]
pub struct RemoteMedia {
    stream_id: String,
    tracks: Arc<RwLock<Vec<RemoteTrack>>>,
}

impl RemoteMedia {
    pub fn new(stream_id: impl Into<String>, first: RemoteTrack) -> Self {
        Self {
            stream_id: stream_id.into(),
            tracks: Arc::new(RwLock::new(vec![first])),
        }
    }

    pub fn stream_id(&self) -> &str {
        &self.stream_id
    }

    /// Snapshot of the tracks received so far
    pub fn tracks(&self) -> Vec<RemoteTrack> {
        self.tracks.read().clone()
    }

    pub fn has_kind(&self, kind: TrackKind) -> bool {
        self.tracks.read().iter().any(|t| t.kind == kind)
    }

    /// Append a track; false if it is already known
    pub(crate) fn push(&self, track: RemoteTrack) -> bool {
        let mut tracks = self.tracks.write();
        if tracks.iter().any(|t| t.id == track.id) {
            return false;
        }
        tracks.push(track);
        true
    }
}

impl PartialEq for RemoteMedia {
    fn eq(&self, other: &Self) -> bool {
        self.stream_id == other.stream_id && Arc::ptr_eq(&self.tracks, &other.tracks)
    }
}

impl Serialize for RemoteMedia {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        let mut s = serializer.serialize_struct("RemoteMedia", 2)?;
        s.serialize_field("streamId", &self.stream_id)?;
        s.serialize_field("tracks", &self.tracks())?;
        s.end()
    }
}

/// Effect of an inbound track on the remote media handle
#[derive(Debug, Clone, PartialEq)]
pub enum RemoteTrackUpdate {
    /// First track: the handle is published
    Published(RemoteMedia),
    /// Another track appended to the published handle
    Appended(RemoteMedia),
    /// Already known, or the connection is closed
    Ignored,
}

/// Event raised by a peer link
#[derive(Debug, Clone)]
pub enum PeerLinkEvent {
    /// Locally gathered candidate, to be trickled to the remote peer
    LocalCandidate(IceCandidate),
    /// Inbound media track
    RemoteTrack {
        stream_id: String,
        track: RemoteTrack,
    },
    StateChanged(ConnectionState),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_remote_media_append_and_dedup() {
        let media = RemoteMedia::new(
            "remote",
            RemoteTrack {
                id: "a1".into(),
                kind: TrackKind::Audio,
            },
        );
        let published = media.clone();
        assert!(media.push(RemoteTrack {
            id: "v1".into(),
            kind: TrackKind::Video,
        }));
        assert!(!media.push(RemoteTrack {
            id: "v1".into(),
            kind: TrackKind::Video,
        }));

        // The published clone sees tracks added later
        assert_eq!(published.tracks().len(), 2);
        assert!(published.has_kind(TrackKind::Video));
        assert_eq!(published, media);
    }

    #[test]
    fn test_remote_media_serialize() {
        let media = RemoteMedia::new(
            "remote",
            RemoteTrack {
                id: "a1".into(),
                kind: TrackKind::Audio,
            },
        );
        let json = serde_json::to_value(&media).unwrap();
        assert_eq!(json["streamId"], "remote");
        assert_eq!(json["tracks"][0]["kind"], "audio");
    }
}
