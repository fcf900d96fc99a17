//! Peer connection: the platform seam and the negotiation state machine

pub mod link;
pub mod manager;
pub mod rtc;
pub mod types;

pub use link::{PeerLink, PeerLinkFactory};
pub use manager::PeerConnectionManager;
pub use rtc::{RtcPeerLink, RtcPeerLinkFactory};
pub use types::{
    ConnectionState, NegotiationPhase, PeerLinkEvent, RemoteMedia, RemoteTrack, RemoteTrackUpdate,
    SdpKind, SessionDescription,
};
