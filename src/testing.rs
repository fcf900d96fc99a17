//! Test doubles shared by unit tests

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::sync::mpsc;

use crate::error::{CallError, Result};
use crate::media::{DisplayConstraints, LocalMedia, MediaConstraints, MediaDevices, MediaTrack, TrackKind};
use crate::peer::{ConnectionState, PeerLink, PeerLinkEvent, PeerLinkFactory, RemoteTrack, SdpKind, SessionDescription};
use crate::signaling::{IceCandidate, SignalingChannel, SignalingLink, SignalingMessage};

/// Call recorded by a [`ScriptedLink`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LinkCall {
    AddTrack(TrackKind),
    ReplaceVideo(String),
    CreateOffer,
    CreateAnswer,
    SetLocal(SdpKind),
    SetRemote(SdpKind),
    AddCandidate(String),
    Close,
}

/// Peer link that records calls and simulates connectivity
///
/// Setting the local description yields one local candidate. Once both
/// descriptions are set the link reports an audio and a video remote track
/// followed by `Connected`.
pub struct ScriptedLink {
    name: String,
    calls: Mutex<Vec<LinkCall>>,
    events: mpsc::UnboundedSender<PeerLinkEvent>,
    reject_remote: bool,
    local_set: AtomicBool,
    remote_set: AtomicBool,
    connected: AtomicBool,
}

impl ScriptedLink {
    pub fn new(name: &str, events: mpsc::UnboundedSender<PeerLinkEvent>) -> Self {
        Self {
            name: name.to_string(),
            calls: Mutex::new(Vec::new()),
            events,
            reject_remote: false,
            local_set: AtomicBool::new(false),
            remote_set: AtomicBool::new(false),
            connected: AtomicBool::new(false),
        }
    }

    /// Make `set_remote_description` fail
    pub fn rejecting(mut self) -> Self {
        self.reject_remote = true;
        self
    }

    pub fn calls(&self) -> Vec<LinkCall> {
        self.calls.lock().clone()
    }

    pub fn count(&self, call: &LinkCall) -> usize {
        self.calls.lock().iter().filter(|c| *c == call).count()
    }

    fn record(&self, call: LinkCall) {
        self.calls.lock().push(call);
    }

    fn maybe_connect(&self) {
        if self.local_set.load(Ordering::SeqCst)
            && self.remote_set.load(Ordering::SeqCst)
            && !self.connected.swap(true, Ordering::SeqCst)
        {
            let stream_id = format!("{}-remote", self.name);
            for kind in [TrackKind::Audio, TrackKind::Video] {
                let _ = self.events.send(PeerLinkEvent::RemoteTrack {
                    stream_id: stream_id.clone(),
                    track: RemoteTrack {
                        id: format!("{}-{}", stream_id, kind),
                        kind,
                    },
                });
            }
            let _ = self
                .events
                .send(PeerLinkEvent::StateChanged(ConnectionState::Connected));
        }
    }
}

#[async_trait]
impl PeerLink for ScriptedLink {
    async fn add_track(&self, track: Arc<MediaTrack>) -> Result<()> {
        self.record(LinkCall::AddTrack(track.kind()));
        Ok(())
    }

    async fn replace_video_track(&self, track: Arc<MediaTrack>) -> Result<()> {
        self.record(LinkCall::ReplaceVideo(track.id().to_string()));
        Ok(())
    }

    async fn create_offer(&self) -> Result<SessionDescription> {
        self.record(LinkCall::CreateOffer);
        Ok(SessionDescription::offer(format!("v=0 offer from {}", self.name)))
    }

    async fn create_answer(&self) -> Result<SessionDescription> {
        self.record(LinkCall::CreateAnswer);
        Ok(SessionDescription::answer(format!("v=0 answer from {}", self.name)))
    }

    async fn set_local_description(&self, desc: SessionDescription) -> Result<()> {
        self.record(LinkCall::SetLocal(desc.kind));
        self.local_set.store(true, Ordering::SeqCst);
        let _ = self.events.send(PeerLinkEvent::LocalCandidate(
            IceCandidate::new(format!("candidate:{} 1 udp 1 127.0.0.1 9 typ host", self.name)).with_mid("0", 0),
        ));
        self.maybe_connect();
        Ok(())
    }

    async fn set_remote_description(&self, desc: SessionDescription) -> Result<()> {
        if self.reject_remote {
            return Err(CallError::NegotiationFailed("remote description rejected".to_string()));
        }
        self.record(LinkCall::SetRemote(desc.kind));
        self.remote_set.store(true, Ordering::SeqCst);
        self.maybe_connect();
        Ok(())
    }

    async fn add_ice_candidate(&self, candidate: IceCandidate) -> Result<()> {
        self.record(LinkCall::AddCandidate(candidate.candidate));
        Ok(())
    }

    async fn close(&self) -> Result<()> {
        self.record(LinkCall::Close);
        Ok(())
    }
}

/// Factory handing out [`ScriptedLink`]s and keeping them for inspection
#[derive(Default)]
pub struct ScriptedLinkFactory {
    name: String,
    reject_remote: bool,
    fail_create: bool,
    links: Mutex<Vec<Arc<ScriptedLink>>>,
}

impl ScriptedLinkFactory {
    pub fn new(name: &str) -> Arc<Self> {
        Arc::new(Self {
            name: name.to_string(),
            ..Default::default()
        })
    }

    pub fn rejecting(name: &str) -> Arc<Self> {
        Arc::new(Self {
            name: name.to_string(),
            reject_remote: true,
            ..Default::default()
        })
    }

    pub fn failing(name: &str) -> Arc<Self> {
        Arc::new(Self {
            name: name.to_string(),
            fail_create: true,
            ..Default::default()
        })
    }

    /// Most recently created link
    pub fn last(&self) -> Option<Arc<ScriptedLink>> {
        self.links.lock().last().cloned()
    }

    pub fn created(&self) -> usize {
        self.links.lock().len()
    }
}

#[async_trait]
impl PeerLinkFactory for ScriptedLinkFactory {
    async fn create(&self, events: mpsc::UnboundedSender<PeerLinkEvent>) -> Result<Arc<dyn PeerLink>> {
        if self.fail_create {
            return Err(CallError::NegotiationFailed("peer connection unavailable".to_string()));
        }
        let mut link = ScriptedLink::new(&self.name, events);
        if self.reject_remote {
            link = link.rejecting();
        }
        let link = Arc::new(link);
        self.links.lock().push(link.clone());
        Ok(link)
    }
}

/// Media devices that count requests and fail on demand
pub struct ScriptedDevices {
    inner: crate::media::SyntheticDevices,
    user_requests: AtomicUsize,
    display_requests: AtomicUsize,
    deny_display: AtomicBool,
}

impl ScriptedDevices {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            inner: crate::media::SyntheticDevices::new(crate::config::MediaConfig::default()),
            user_requests: AtomicUsize::new(0),
            display_requests: AtomicUsize::new(0),
            deny_display: AtomicBool::new(false),
        })
    }

    pub fn deny_display(&self, deny: bool) {
        self.deny_display.store(deny, Ordering::SeqCst);
    }

    pub fn user_requests(&self) -> usize {
        self.user_requests.load(Ordering::SeqCst)
    }

    pub fn display_requests(&self) -> usize {
        self.display_requests.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl MediaDevices for ScriptedDevices {
    async fn get_user_media(&self, constraints: MediaConstraints) -> Result<LocalMedia> {
        self.user_requests.fetch_add(1, Ordering::SeqCst);
        self.inner.get_user_media(constraints).await
    }

    async fn get_display_media(&self, constraints: DisplayConstraints) -> Result<LocalMedia> {
        self.display_requests.fetch_add(1, Ordering::SeqCst);
        if self.deny_display.load(Ordering::SeqCst) {
            return Err(CallError::PermissionDenied("screen capture denied".to_string()));
        }
        self.inner.get_display_media(constraints).await
    }
}

/// Channel over a bare link: returns what it sends and a handle to inject
/// inbound messages (dropping it simulates transport loss)
pub fn loopback_channel(
    peer_id: &str,
) -> (
    Arc<SignalingChannel>,
    mpsc::UnboundedReceiver<SignalingMessage>,
    mpsc::UnboundedSender<SignalingMessage>,
) {
    let (out_tx, out_rx) = mpsc::unbounded_channel();
    let (in_tx, in_rx) = mpsc::unbounded_channel();
    let channel = SignalingChannel::from_link(
        peer_id,
        SignalingLink {
            outbound: out_tx,
            inbound: in_rx,
        },
    );
    (channel, out_rx, in_tx)
}

/// Poll a condition until it holds, panicking after two seconds
pub async fn wait_until<F: Fn() -> bool>(what: &str, condition: F) {
    let deadline = tokio::time::Instant::now() + Duration::from_secs(2);
    while !condition() {
        if tokio::time::Instant::now() > deadline {
            panic!("timed out waiting for {}", what);
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
}

/// Drain everything currently queued on a receiver
pub fn drain<T>(rx: &mut mpsc::UnboundedReceiver<T>) -> Vec<T> {
    let mut items = Vec::new();
    while let Ok(item) = rx.try_recv() {
        items.push(item);
    }
    items
}
