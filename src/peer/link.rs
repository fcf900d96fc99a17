//! Platform seam for peer connections

use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::mpsc;

use super::types::{PeerLinkEvent, SessionDescription};
use crate::error::Result;
use crate::media::MediaTrack;
use crate::signaling::message::IceCandidate;

/// Platform peer connection
///
/// Every rejection by the platform surfaces as `NegotiationFailed`.
/// Asynchronous happenings (gathered candidates, inbound tracks, state
/// changes) are reported on the event queue the link was created with.
#[async_trait]
pub trait PeerLink: Send + Sync {
    /// Attach a local track for sending
    async fn add_track(&self, track: Arc<MediaTrack>) -> Result<()>;

    /// Swap the outgoing video track in place, without renegotiation
    async fn replace_video_track(&self, track: Arc<MediaTrack>) -> Result<()>;

    async fn create_offer(&self) -> Result<SessionDescription>;

    async fn create_answer(&self) -> Result<SessionDescription>;

    async fn set_local_description(&self, desc: SessionDescription) -> Result<()>;

    async fn set_remote_description(&self, desc: SessionDescription) -> Result<()>;

    async fn add_ice_candidate(&self, candidate: IceCandidate) -> Result<()>;

    async fn close(&self) -> Result<()>;
}

/// Creates one link per session
#[async_trait]
pub trait PeerLinkFactory: Send + Sync {
    async fn create(&self, events: mpsc::UnboundedSender<PeerLinkEvent>) -> Result<Arc<dyn PeerLink>>;
}
