//! Offer/answer/ICE negotiation state machine

use std::collections::VecDeque;
use std::sync::Arc;

use tracing::{debug, info, warn};

use super::link::PeerLink;
use super::types::{NegotiationPhase, RemoteMedia, RemoteTrack, RemoteTrackUpdate, SessionDescription};
use crate::error::{CallError, Result};
use crate::media::{LocalMedia, MediaTrack};
use crate::signaling::{IceCandidate, SignalingChannel, SignalingMessage};

/// Drives one peer connection through negotiation
///
/// At most one offer/answer exchange happens per manager. Remote candidates
/// that arrive before the remote description are queued and applied right
/// after it is set, in receipt order, exactly once.
pub struct PeerConnectionManager {
    room_id: String,
    link: Arc<dyn PeerLink>,
    signaling: Arc<SignalingChannel>,
    phase: NegotiationPhase,
    local_description_set: bool,
    remote_description_set: bool,
    pending_candidates: VecDeque<IceCandidate>,
    local_tracks: usize,
    remote_peer: Option<String>,
    remote_media: Option<RemoteMedia>,
}

impl PeerConnectionManager {
    pub fn new(room_id: impl Into<String>, link: Arc<dyn PeerLink>, signaling: Arc<SignalingChannel>) -> Self {
        Self {
            room_id: room_id.into(),
            link,
            signaling,
            phase: NegotiationPhase::New,
            local_description_set: false,
            remote_description_set: false,
            pending_candidates: VecDeque::new(),
            local_tracks: 0,
            remote_peer: None,
            remote_media: None,
        }
    }

    pub fn phase(&self) -> NegotiationPhase {
        self.phase
    }

    pub fn remote_peer(&self) -> Option<&str> {
        self.remote_peer.as_deref()
    }

    pub fn remote_media(&self) -> Option<&RemoteMedia> {
        self.remote_media.as_ref()
    }

    pub fn pending_candidates(&self) -> usize {
        self.pending_candidates.len()
    }

    pub fn has_remote_description(&self) -> bool {
        self.remote_description_set
    }

    /// Attach every local track for sending
    pub async fn add_local_media(&mut self, media: &LocalMedia) -> Result<()> {
        self.ensure_open()?;
        for track in media.tracks() {
            self.link.add_track(track).await?;
            self.local_tracks += 1;
        }
        debug!("Attached {} local tracks", self.local_tracks);
        Ok(())
    }

    /// Another peer entered the room: send an offer
    ///
    /// Returns false when ignored (negotiation already started).
    pub async fn handle_peer_joined(&mut self, peer_id: &str) -> Result<bool> {
        if self.phase != NegotiationPhase::New {
            debug!("Ignoring peer-joined from {} in phase {}", peer_id, self.phase);
            return Ok(false);
        }
        if self.local_tracks == 0 {
            return Err(CallError::InvalidState(
                "cannot offer without local media".to_string(),
            ));
        }

        self.remote_peer = Some(peer_id.to_string());
        self.phase = NegotiationPhase::Offering;

        let offer = self.link.create_offer().await?;
        self.link.set_local_description(offer.clone()).await?;
        self.local_description_set = true;

        self.signaling.send(SignalingMessage::offer(
            &self.room_id,
            self.signaling.peer_id(),
            offer.sdp,
        ))?;
        info!("Sent offer to {} in room {}", peer_id, self.room_id);
        Ok(true)
    }

    /// Remote offer: answer it
    ///
    /// Returns false when ignored (negotiation already started).
    pub async fn handle_offer(&mut self, from: &str, sdp: &str) -> Result<bool> {
        if self.phase != NegotiationPhase::New {
            debug!("Ignoring offer from {} in phase {}", from, self.phase);
            return Ok(false);
        }

        self.remote_peer = Some(from.to_string());
        self.phase = NegotiationPhase::Answering;

        self.link
            .set_remote_description(SessionDescription::offer(sdp))
            .await?;
        self.remote_description_set = true;
        self.apply_pending_candidates().await?;

        let answer = self.link.create_answer().await?;
        self.link.set_local_description(answer.clone()).await?;
        self.local_description_set = true;

        self.signaling.send(SignalingMessage::answer(
            &self.room_id,
            self.signaling.peer_id(),
            answer.sdp,
        ))?;
        self.advance(NegotiationPhase::Negotiating);
        info!("Answered offer from {} in room {}", from, self.room_id);
        Ok(true)
    }

    /// Remote answer to our offer
    pub async fn handle_answer(&mut self, from: &str, sdp: &str) -> Result<bool> {
        if self.phase != NegotiationPhase::Offering {
            debug!("Ignoring answer from {} in phase {}", from, self.phase);
            return Ok(false);
        }

        self.link
            .set_remote_description(SessionDescription::answer(sdp))
            .await?;
        self.remote_description_set = true;
        self.apply_pending_candidates().await?;
        self.advance(NegotiationPhase::Negotiating);
        info!("Applied answer from {} in room {}", from, self.room_id);
        Ok(true)
    }

    /// Remote trickle candidate: apply now or queue until the remote description exists
    pub async fn handle_remote_candidate(&mut self, candidate: IceCandidate) -> Result<()> {
        self.ensure_open()?;
        if self.remote_description_set {
            self.link.add_ice_candidate(candidate).await
        } else {
            debug!("Queueing early ICE candidate ({} pending)", self.pending_candidates.len() + 1);
            self.pending_candidates.push_back(candidate);
            Ok(())
        }
    }

    /// Local candidate: forward it right away
    pub fn handle_local_candidate(&self, candidate: IceCandidate) -> Result<()> {
        self.ensure_open()?;
        self.signaling
            .send(SignalingMessage::candidate(&self.room_id, candidate))
    }

    /// Inbound track; the remote media handle is published on the first one
    pub fn handle_remote_track(&mut self, stream_id: &str, track: RemoteTrack) -> RemoteTrackUpdate {
        if self.phase == NegotiationPhase::Closed {
            return RemoteTrackUpdate::Ignored;
        }
        match self.remote_media {
            Some(ref media) => {
                let id = track.id.clone();
                if media.push(track) {
                    debug!("Remote track {} added to {}", id, media.stream_id());
                    RemoteTrackUpdate::Appended(media.clone())
                } else {
                    RemoteTrackUpdate::Ignored
                }
            }
            None => {
                let media = RemoteMedia::new(stream_id, track);
                self.remote_media = Some(media.clone());
                self.phase = NegotiationPhase::Connected;
                info!("Remote media {} published, connection established", stream_id);
                RemoteTrackUpdate::Published(media)
            }
        }
    }

    /// Swap the outgoing video (screen share), never renegotiating
    pub async fn replace_video_track(&self, track: &Arc<MediaTrack>) -> Result<()> {
        self.ensure_open()?;
        self.link.replace_video_track(track.clone()).await
    }

    /// Close the link (idempotent); the manager is unusable afterwards
    pub async fn close(&mut self) {
        if self.phase == NegotiationPhase::Closed {
            return;
        }
        self.phase = NegotiationPhase::Closed;
        self.pending_candidates.clear();
        self.remote_media = None;
        if let Err(e) = self.link.close().await {
            warn!("Closing peer link for room {} failed: {}", self.room_id, e);
        }
        info!("Peer connection for room {} closed", self.room_id);
    }

    async fn apply_pending_candidates(&mut self) -> Result<()> {
        if !self.pending_candidates.is_empty() {
            debug!("Applying {} queued ICE candidates", self.pending_candidates.len());
        }
        while let Some(candidate) = self.pending_candidates.pop_front() {
            self.link.add_ice_candidate(candidate).await?;
        }
        Ok(())
    }

    /// Move forward unless the first track already connected us
    fn advance(&mut self, phase: NegotiationPhase) {
        if self.phase != NegotiationPhase::Connected && self.phase != NegotiationPhase::Closed {
            self.phase = phase;
        }
    }

    fn ensure_open(&self) -> Result<()> {
        if self.phase == NegotiationPhase::Closed {
            return Err(CallError::InvalidState("peer connection closed".to_string()));
        }
        Ok(())
    }
}

impl Drop for PeerConnectionManager {
    fn drop(&mut self) {
        if self.phase == NegotiationPhase::Closed {
            return;
        }
        let link = self.link.clone();
        if let Ok(handle) = tokio::runtime::Handle::try_current() {
            handle.spawn(async move {
                let _ = link.close().await;
            });
        }
    }
}
