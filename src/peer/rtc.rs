//! Peer link over a webrtc-rs peer connection

use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::sync::mpsc;
use tracing::{debug, info, trace};
use webrtc::api::interceptor_registry::register_default_interceptors;
use webrtc::api::media_engine::MediaEngine;
use webrtc::api::APIBuilder;
use webrtc::ice_transport::ice_candidate::{RTCIceCandidate, RTCIceCandidateInit};
use webrtc::ice_transport::ice_server::RTCIceServer;
use webrtc::interceptor::registry::Registry;
use webrtc::peer_connection::configuration::RTCConfiguration;
use webrtc::peer_connection::peer_connection_state::RTCPeerConnectionState;
use webrtc::peer_connection::sdp::session_description::RTCSessionDescription;
use webrtc::peer_connection::RTCPeerConnection;
use webrtc::rtp_transceiver::rtp_codec::RTPCodecType;
use webrtc::rtp_transceiver::rtp_sender::RTCRtpSender;

use super::link::{PeerLink, PeerLinkFactory};
use super::types::{ConnectionState, PeerLinkEvent, RemoteTrack, SdpKind, SessionDescription};
use crate::config::IceConfig;
use crate::error::{CallError, Result};
use crate::media::{MediaTrack, TrackKind};
use crate::signaling::message::IceCandidate;

/// Build ICE servers from configuration
pub fn ice_servers(config: &IceConfig) -> Vec<RTCIceServer> {
    let mut servers = vec![];

    for stun_url in &config.stun_servers {
        servers.push(RTCIceServer {
            urls: vec![stun_url.clone()],
            ..Default::default()
        });
    }

    for turn in &config.turn_servers {
        servers.push(RTCIceServer {
            urls: turn.urls.clone(),
            username: turn.username.clone(),
            credential: turn.credential.clone(),
            ..Default::default()
        });
    }

    servers
}

fn negotiation_error(context: &str, e: webrtc::Error) -> CallError {
    CallError::NegotiationFailed(format!("{}: {}", context, e))
}

/// `PeerLink` backed by `RTCPeerConnection`
pub struct RtcPeerLink {
    pc: Arc<RTCPeerConnection>,
    /// Sender of the outgoing video, target of track replacement
    video_sender: Mutex<Option<Arc<RTCRtpSender>>>,
}

impl RtcPeerLink {
    pub async fn new(ice: &IceConfig, events: mpsc::UnboundedSender<PeerLinkEvent>) -> Result<Self> {
        let mut media_engine = MediaEngine::default();
        media_engine
            .register_default_codecs()
            .map_err(|e| negotiation_error("Failed to register codecs", e))?;

        let mut registry = Registry::new();
        registry = register_default_interceptors(registry, &mut media_engine)
            .map_err(|e| negotiation_error("Failed to register interceptors", e))?;

        let api = APIBuilder::new()
            .with_media_engine(media_engine)
            .with_interceptor_registry(registry)
            .build();

        let rtc_config = RTCConfiguration {
            ice_servers: ice_servers(ice),
            ..Default::default()
        };

        let pc = api
            .new_peer_connection(rtc_config)
            .await
            .map_err(|e| negotiation_error("Failed to create peer connection", e))?;

        let link = Self {
            pc: Arc::new(pc),
            video_sender: Mutex::new(None),
        };
        link.setup_event_handlers(events);
        Ok(link)
    }

    fn setup_event_handlers(&self, events: mpsc::UnboundedSender<PeerLinkEvent>) {
        let state_events = events.clone();
        self.pc
            .on_peer_connection_state_change(Box::new(move |s: RTCPeerConnectionState| {
                let events = state_events.clone();

                Box::pin(async move {
                    let state = match s {
                        RTCPeerConnectionState::New => ConnectionState::New,
                        RTCPeerConnectionState::Connecting => ConnectionState::Connecting,
                        RTCPeerConnectionState::Connected => ConnectionState::Connected,
                        RTCPeerConnectionState::Disconnected => ConnectionState::Disconnected,
                        RTCPeerConnectionState::Failed => ConnectionState::Failed,
                        RTCPeerConnectionState::Closed => ConnectionState::Closed,
                        _ => return,
                    };

                    info!("Peer connection state: {}", state);
                    let _ = events.send(PeerLinkEvent::StateChanged(state));
                })
            }));

        // Trickle: every gathered candidate is reported as soon as it exists
        let candidate_events = events.clone();
        self.pc
            .on_ice_candidate(Box::new(move |candidate: Option<RTCIceCandidate>| {
                let events = candidate_events.clone();

                Box::pin(async move {
                    let Some(c) = candidate else {
                        debug!("ICE gathering complete");
                        return;
                    };
                    match c.to_json() {
                        Ok(init) => {
                            debug!("Local ICE candidate: {}", init.candidate);
                            let _ = events.send(PeerLinkEvent::LocalCandidate(IceCandidate {
                                candidate: init.candidate,
                                sdp_mid: init.sdp_mid,
                                sdp_mline_index: init.sdp_mline_index,
                                username_fragment: init.username_fragment,
                            }));
                        }
                        Err(e) => debug!("Unserializable ICE candidate: {}", e),
                    }
                })
            }));

        let track_events = events;
        self.pc.on_track(Box::new(move |track, _receiver, _transceiver| {
            let events = track_events.clone();

            Box::pin(async move {
                let kind = match track.kind() {
                    RTPCodecType::Audio => TrackKind::Audio,
                    RTPCodecType::Video => TrackKind::Video,
                    _ => return,
                };
                let stream_id = track.stream_id();
                let remote = RemoteTrack {
                    id: track.id(),
                    kind,
                };
                info!("Remote {} track {} on stream {}", kind, remote.id, stream_id);
                let _ = events.send(PeerLinkEvent::RemoteTrack {
                    stream_id,
                    track: remote,
                });

                // Inbound RTP has no local consumer; drain it so the
                // receiver's buffers keep moving.
                tokio::spawn(async move {
                    let mut packets: u64 = 0;
                    while track.read_rtp().await.is_ok() {
                        packets += 1;
                    }
                    trace!("Remote {} track drained after {} packets", kind, packets);
                });
            })
        }));
    }
}

#[async_trait]
impl PeerLink for RtcPeerLink {
    async fn add_track(&self, track: Arc<MediaTrack>) -> Result<()> {
        let sender = self
            .pc
            .add_track(track.local_track())
            .await
            .map_err(|e| negotiation_error("Failed to add track", e))?;

        if track.kind() == TrackKind::Video {
            *self.video_sender.lock() = Some(sender.clone());
        }

        // Read incoming RTCP so interceptors (NACK, reports) run
        tokio::spawn(async move {
            let mut buf = vec![0u8; 1500];
            while sender.read(&mut buf).await.is_ok() {}
        });

        debug!("Added local {} track {}", track.kind(), track.id());
        Ok(())
    }

    async fn replace_video_track(&self, track: Arc<MediaTrack>) -> Result<()> {
        let sender = self
            .video_sender
            .lock()
            .clone()
            .ok_or_else(|| CallError::InvalidState("no outgoing video sender".to_string()))?;

        sender
            .replace_track(Some(track.local_track()))
            .await
            .map_err(|e| negotiation_error("Failed to replace video track", e))?;
        debug!("Outgoing video replaced with {}", track.id());
        Ok(())
    }

    async fn create_offer(&self) -> Result<SessionDescription> {
        let offer = self
            .pc
            .create_offer(None)
            .await
            .map_err(|e| negotiation_error("Failed to create offer", e))?;
        Ok(SessionDescription::offer(offer.sdp))
    }

    async fn create_answer(&self) -> Result<SessionDescription> {
        let answer = self
            .pc
            .create_answer(None)
            .await
            .map_err(|e| negotiation_error("Failed to create answer", e))?;
        Ok(SessionDescription::answer(answer.sdp))
    }

    async fn set_local_description(&self, desc: SessionDescription) -> Result<()> {
        let sdp = to_rtc(desc)?;
        self.pc
            .set_local_description(sdp)
            .await
            .map_err(|e| negotiation_error("Failed to set local description", e))
    }

    async fn set_remote_description(&self, desc: SessionDescription) -> Result<()> {
        let sdp = to_rtc(desc)?;
        self.pc
            .set_remote_description(sdp)
            .await
            .map_err(|e| negotiation_error("Failed to set remote description", e))
    }

    async fn add_ice_candidate(&self, candidate: IceCandidate) -> Result<()> {
        let init = RTCIceCandidateInit {
            candidate: candidate.candidate,
            sdp_mid: candidate.sdp_mid,
            sdp_mline_index: candidate.sdp_mline_index,
            username_fragment: candidate.username_fragment,
        };

        self.pc
            .add_ice_candidate(init)
            .await
            .map_err(|e| negotiation_error("Failed to add ICE candidate", e))
    }

    async fn close(&self) -> Result<()> {
        self.video_sender.lock().take();
        self.pc
            .close()
            .await
            .map_err(|e| negotiation_error("Failed to close peer connection", e))
    }
}

fn to_rtc(desc: SessionDescription) -> Result<RTCSessionDescription> {
    match desc.kind {
        SdpKind::Offer => RTCSessionDescription::offer(desc.sdp),
        SdpKind::Answer => RTCSessionDescription::answer(desc.sdp),
    }
    .map_err(|e| negotiation_error("Invalid SDP", e))
}

/// Creates `RtcPeerLink`s with the configured ICE servers
pub struct RtcPeerLinkFactory {
    ice: IceConfig,
}

impl RtcPeerLinkFactory {
    pub fn new(ice: IceConfig) -> Self {
        Self { ice }
    }
}

#[async_trait]
impl PeerLinkFactory for RtcPeerLinkFactory {
    async fn create(&self, events: mpsc::UnboundedSender<PeerLinkEvent>) -> Result<Arc<dyn PeerLink>> {
        let link = RtcPeerLink::new(&self.ice, events).await?;
        Ok(Arc::new(link))
    }
}
