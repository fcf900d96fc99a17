//! Call session controller
//!
//! Every input of an active call (signaling messages, peer link events, the
//! end of a screen capture, loss of the signaling transport) goes through one
//! queue drained by one task, under the same lock the public commands take.

use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use parking_lot::{Mutex as SyncMutex, RwLock};
use tokio::sync::{broadcast, mpsc, Mutex};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::state::{CallState, CallStatus, ConnectionStatus};
use crate::error::{CallError, FailureKind, Result};
use crate::events::{CallEvent, EventBus};
use crate::media::{LocalMedia, MediaAcquisition, MediaConstraints, MediaDevices, SourceKind};
use crate::peer::{
    ConnectionState, NegotiationPhase, PeerConnectionManager, PeerLinkEvent, PeerLinkFactory, RemoteTrackUpdate,
};
use crate::signaling::{ChannelState, HandlerId, MessageKind, SignalingChannel, SignalingError, SignalingMessage};

/// Synchronous state observer
pub type Observer = Arc<dyn Fn(&CallState) + Send + Sync>;

enum SessionInput {
    Signaling(SignalingMessage),
    Link(PeerLinkEvent),
    /// Screen capture track (by id) ended
    ScreenEnded(String),
    TransportLost,
}

enum Outcome {
    Continue,
    Terminate(Option<FailureKind>),
}

/// Resources of the running call
struct ActiveCall {
    generation: u64,
    room_id: String,
    media: MediaAcquisition,
    manager: PeerConnectionManager,
    inputs: mpsc::UnboundedSender<SessionInput>,
    event_loop: Option<JoinHandle<()>>,
    /// Link event forwarder and transport watcher
    tasks: Vec<JoinHandle<()>>,
    screen_watch: Option<JoinHandle<()>>,
}

impl ActiveCall {
    fn abort_tasks(&mut self) {
        for task in self.tasks.drain(..) {
            task.abort();
        }
        if let Some(task) = self.screen_watch.take() {
            task.abort();
        }
    }
}

struct SessionInner {
    signaling: Arc<SignalingChannel>,
    devices: Arc<dyn MediaDevices>,
    links: Arc<dyn PeerLinkFactory>,
    constraints: MediaConstraints,
    state: RwLock<CallState>,
    observers: RwLock<Vec<Observer>>,
    events: EventBus,
    /// Session lock
    active: Mutex<Option<ActiveCall>>,
    /// Queue of the running call, fed by signaling handlers
    inputs: SyncMutex<Option<mpsc::UnboundedSender<SessionInput>>>,
    generation: AtomicU64,
    /// Cancels an `initialize` still in progress; taken without the session lock
    pending: SyncMutex<Option<CancellationToken>>,
    /// Registrations on the channel, removed on drop
    handlers: Vec<HandlerId>,
}

/// Controller for one call at a time
///
/// ```text
/// idle --initialize--> connecting --remote media--> connected
///   ^                      |                            |
///   |                      +--- peer-left / transport loss / failure ---> ended
///   +------------------------------- end() (from any state) -----------------+
/// ```
pub struct CallSession {
    inner: Arc<SessionInner>,
}

impl CallSession {
    pub fn new(
        signaling: Arc<SignalingChannel>,
        devices: Arc<dyn MediaDevices>,
        links: Arc<dyn PeerLinkFactory>,
        constraints: MediaConstraints,
    ) -> Self {
        let inner = Arc::new_cyclic(|weak: &Weak<SessionInner>| {
            let handlers: Vec<HandlerId> = [
                MessageKind::PeerJoined,
                MessageKind::Offer,
                MessageKind::Answer,
                MessageKind::IceCandidate,
                MessageKind::PeerLeft,
                MessageKind::Error,
            ]
            .into_iter()
            .map(|kind| {
                let weak = weak.clone();
                signaling.on(kind, move |msg| {
                    if let Some(inner) = weak.upgrade() {
                        inner.enqueue(SessionInput::Signaling(msg.clone()));
                    }
                    Ok(())
                })
            })
            .collect();

            SessionInner {
                signaling,
                devices,
                links,
                constraints,
                state: RwLock::new(CallState::default()),
                observers: RwLock::new(Vec::new()),
                events: EventBus::new(),
                active: Mutex::new(None),
                inputs: SyncMutex::new(None),
                generation: AtomicU64::new(0),
                pending: SyncMutex::new(None),
                handlers,
            }
        });

        Self { inner }
    }

    /// Peer id this session announces
    pub fn peer_id(&self) -> &str {
        self.inner.signaling.peer_id()
    }

    /// Snapshot of the observable state
    pub fn state(&self) -> CallState {
        self.inner.state.read().clone()
    }

    /// Register an observer, called once per state mutation
    ///
    /// Observers run on the task performing the mutation and must not block.
    pub fn observe<F>(&self, observer: F)
    where
        F: Fn(&CallState) + Send + Sync + 'static,
    {
        self.inner.observers.write().push(Arc::new(observer));
    }

    pub fn subscribe(&self) -> broadcast::Receiver<CallEvent> {
        self.inner.events.subscribe()
    }

    /// Start a call: acquire media, prepare the peer connection, join the room
    ///
    /// On failure everything acquired so far is released, the status returns
    /// to idle and no join is sent if media could not be acquired. An `end()`
    /// issued while this is pending cancels it with `CallError::Cancelled`.
    pub async fn initialize(&self, room_id: &str, context_id: &str) -> Result<()> {
        let inner = &self.inner;
        let mut active = inner.active.lock().await;
        if let Some(ref call) = *active {
            return Err(CallError::InvalidState(format!(
                "a call in room {} is already active",
                call.room_id
            )));
        }

        info!("Starting call in room {} (context {})", room_id, context_id);
        let cancel = CancellationToken::new();
        *inner.pending.lock() = Some(cancel.clone());
        inner.mutate(|s| *s = CallState::connecting(room_id, context_id, inner.signaling.peer_id()));

        let started = inner.start(room_id, context_id, &cancel).await;
        inner.pending.lock().take();

        match started {
            Ok(call) => {
                *active = Some(call);
                inner.mutate(|s| s.is_call_active = true);
                Ok(())
            }
            Err(e @ CallError::Cancelled(_)) => {
                info!("Call start in room {} cancelled", room_id);
                inner.mutate(|s| *s = CallState::default());
                Err(e)
            }
            Err(e) => {
                warn!("Call start in room {} failed: {}", room_id, e);
                inner.mutate(|s| *s = CallState::finished(CallStatus::Idle, e.failure_kind()));
                Err(e)
            }
        }
    }

    /// Flip the microphone; returns whether it is now muted
    pub async fn toggle_mute(&self) -> Result<bool> {
        let active = self.inner.active.lock().await;
        let call = active.as_ref().ok_or_else(no_call)?;

        let muted = !self.inner.state.read().is_muted;
        if !call.media.set_audio_enabled(!muted) {
            return Err(CallError::DeviceUnavailable("no audio track".to_string()));
        }
        self.inner.mutate(|s| s.is_muted = muted);
        self.inner.publish_toggles();
        debug!("Microphone {}", if muted { "muted" } else { "unmuted" });
        Ok(muted)
    }

    /// Flip the outgoing video; returns whether it is now off
    pub async fn toggle_video(&self) -> Result<bool> {
        let active = self.inner.active.lock().await;
        let call = active.as_ref().ok_or_else(no_call)?;

        let video_off = !self.inner.state.read().is_video_off;
        if !call.media.set_video_enabled(!video_off) {
            return Err(CallError::DeviceUnavailable("no video track".to_string()));
        }
        self.inner.mutate(|s| s.is_video_off = video_off);
        self.inner.publish_toggles();
        debug!("Video {}", if video_off { "off" } else { "on" });
        Ok(video_off)
    }

    /// Start or stop screen sharing; returns whether sharing is now on
    pub async fn toggle_screen_share(&self) -> Result<bool> {
        let mut active = self.inner.active.lock().await;
        let call = active.as_mut().ok_or_else(no_call)?;

        if call.media.source() == SourceKind::Screen {
            self.inner.stop_screen_share(call).await?;
            Ok(false)
        } else {
            self.inner.start_screen_share(call).await?;
            Ok(true)
        }
    }

    /// End the call and return to idle
    ///
    /// Safe in any state and idempotent. A pending `initialize` is cancelled
    /// first. When it returns, local tracks are stopped, the peer connection
    /// is closed and the leave is queued.
    pub async fn end(&self) {
        let pending = self.inner.pending.lock().take();
        if let Some(cancel) = pending {
            cancel.cancel();
        }
        let mut active = self.inner.active.lock().await;
        if let Some(mut call) = active.take() {
            if let Some(event_loop) = call.event_loop.take() {
                event_loop.abort();
            }
            info!("Ending call in room {}", call.room_id);
            self.inner.teardown(call).await;
        }
        self.inner.mutate(|s| *s = CallState::default());
    }

    /// Local media of the running call
    pub async fn local_media(&self) -> Option<LocalMedia> {
        let active = self.inner.active.lock().await;
        active.as_ref().and_then(|c| c.media.local().cloned())
    }

    /// Negotiation phase of the running call
    pub async fn negotiation_phase(&self) -> Option<NegotiationPhase> {
        let active = self.inner.active.lock().await;
        active.as_ref().map(|c| c.manager.phase())
    }
}

fn no_call() -> CallError {
    CallError::InvalidState("no active call".to_string())
}

impl SessionInner {
    /// Apply a state change and notify observers if anything changed
    fn mutate<F: FnOnce(&mut CallState)>(&self, f: F) -> bool {
        let (before, after) = {
            let mut state = self.state.write();
            let before = state.clone();
            f(&mut state);
            if *state == before {
                return false;
            }
            (before, state.clone())
        };

        self.notify(&after);

        if before.status != after.status
            || before.connection != after.connection
            || before.failure != after.failure
        {
            debug!("Call status {} -> {}", before.status, after.status);
            self.events.publish(CallEvent::StateChanged {
                status: after.status,
                connection: after.connection,
                failure: after.failure,
            });
        }
        true
    }

    fn notify(&self, state: &CallState) {
        let observers = self.observers.read().clone();
        for observer in observers.iter() {
            observer(state);
        }
    }

    fn publish_toggles(&self) {
        let state = self.state.read();
        self.events.publish(CallEvent::MediaToggled {
            muted: state.is_muted,
            video_off: state.is_video_off,
            screen_sharing: state.is_screen_sharing,
        });
    }

    fn note_participant(&self, peer_id: &str) {
        if self.mutate(|s| {
            s.add_participant(peer_id);
        }) {
            info!("Participant {} joined", peer_id);
            self.events.publish(CallEvent::ParticipantJoined {
                peer_id: peer_id.to_string(),
            });
        }
    }

    fn enqueue(&self, input: SessionInput) {
        match *self.inputs.lock() {
            Some(ref tx) => {
                let _ = tx.send(input);
            }
            None => debug!("No active call, dropping input"),
        }
    }

    async fn start(
        self: &Arc<Self>,
        room_id: &str,
        context_id: &str,
        cancel: &CancellationToken,
    ) -> Result<ActiveCall> {
        // Anything acquired below is released on drop if a later step fails
        // or the start is cancelled
        let mut media = MediaAcquisition::new(self.devices.clone());
        let local = unless_cancelled(cancel, media.acquire_user_media(self.constraints)).await?;

        let (link_tx, mut link_rx) = mpsc::unbounded_channel();
        let link = unless_cancelled(cancel, self.links.create(link_tx)).await?;
        let mut manager = PeerConnectionManager::new(room_id, link, self.signaling.clone());
        unless_cancelled(cancel, manager.add_local_media(&local)).await?;

        // No await from here to the join, so a cancelled start never joins
        if cancel.is_cancelled() {
            return Err(cancelled());
        }
        if self.signaling.state() == ChannelState::Disconnected {
            return Err(CallError::SignalingUnavailable(
                "signaling channel is disconnected".to_string(),
            ));
        }

        let generation = self.generation.fetch_add(1, Ordering::SeqCst) + 1;
        let (tx, rx) = mpsc::unbounded_channel();
        let mut tasks = Vec::new();

        let forward = tx.clone();
        tasks.push(tokio::spawn(async move {
            while let Some(event) = link_rx.recv().await {
                if forward.send(SessionInput::Link(event)).is_err() {
                    break;
                }
            }
        }));

        let lost = tx.clone();
        let mut channel_state = self.signaling.state_watch();
        tasks.push(tokio::spawn(async move {
            loop {
                if *channel_state.borrow_and_update() == ChannelState::Disconnected {
                    let _ = lost.send(SessionInput::TransportLost);
                    break;
                }
                if channel_state.changed().await.is_err() {
                    break;
                }
            }
        }));

        *self.inputs.lock() = Some(tx.clone());
        if let Err(e) = self.signaling.join_room(room_id, context_id) {
            self.inputs.lock().take();
            for task in tasks {
                task.abort();
            }
            return Err(e);
        }

        let event_loop = tokio::spawn(run_event_loop(Arc::downgrade(self), generation, rx));
        info!("Joined room {} as {}", room_id, self.signaling.peer_id());

        Ok(ActiveCall {
            generation,
            room_id: room_id.to_string(),
            media,
            manager,
            inputs: tx,
            event_loop: Some(event_loop),
            tasks,
            screen_watch: None,
        })
    }

    /// Returns false once the call this loop belongs to is gone
    async fn process(&self, generation: u64, input: SessionInput) -> bool {
        let mut active = self.active.lock().await;
        let Some(call) = active.as_mut() else {
            return false;
        };
        if call.generation != generation {
            return false;
        }

        let outcome = match input {
            SessionInput::Signaling(msg) => self.on_signaling(call, msg).await,
            SessionInput::Link(event) => self.on_link_event(call, event),
            SessionInput::ScreenEnded(track_id) => self.on_screen_ended(call, &track_id).await,
            SessionInput::TransportLost => {
                warn!("Signaling transport lost during call in room {}", call.room_id);
                Outcome::Terminate(Some(FailureKind::SignalingUnavailable))
            }
        };

        match outcome {
            Outcome::Continue => true,
            Outcome::Terminate(failure) => {
                if let Some(mut call) = active.take() {
                    // This task is the event loop; let it finish on its own
                    drop(call.event_loop.take());
                    self.teardown(call).await;
                }
                self.mutate(|s| *s = CallState::finished(CallStatus::Ended, failure));
                false
            }
        }
    }

    async fn on_signaling(&self, call: &mut ActiveCall, msg: SignalingMessage) -> Outcome {
        if msg.room_id() != call.room_id {
            debug!("Ignoring {} for room {}", msg.kind(), msg.room_id());
            return Outcome::Continue;
        }
        let own = self.signaling.peer_id();

        let result = match msg {
            SignalingMessage::PeerJoined { payload, .. } => {
                if payload.peer_id == own {
                    return Outcome::Continue;
                }
                self.note_participant(&payload.peer_id);
                call.manager.handle_peer_joined(&payload.peer_id).await.map(|_| ())
            }
            SignalingMessage::Offer { payload, .. } => {
                self.note_participant(&payload.from);
                call.manager.handle_offer(&payload.from, &payload.sdp).await.map(|_| ())
            }
            SignalingMessage::Answer { payload, .. } => {
                call.manager.handle_answer(&payload.from, &payload.sdp).await.map(|_| ())
            }
            SignalingMessage::IceCandidate { payload, .. } => {
                call.manager.handle_remote_candidate(payload).await
            }
            SignalingMessage::PeerLeft { payload, .. } => {
                if payload.peer_id == own {
                    return Outcome::Continue;
                }
                info!("Peer {} left room {}", payload.peer_id, call.room_id);
                self.events.publish(CallEvent::ParticipantLeft {
                    peer_id: payload.peer_id,
                });
                return Outcome::Terminate(None);
            }
            SignalingMessage::Error { payload, .. } => {
                warn!(
                    "Signaling error {} in room {}: {}",
                    payload.code, call.room_id, payload.message
                );
                if payload.code == SignalingError::room_full().code {
                    return Outcome::Terminate(Some(FailureKind::SignalingUnavailable));
                }
                Ok(())
            }
            SignalingMessage::Join { .. } | SignalingMessage::Leave { .. } => Ok(()),
        };

        outcome_of(result)
    }

    fn on_link_event(&self, call: &mut ActiveCall, event: PeerLinkEvent) -> Outcome {
        match event {
            PeerLinkEvent::LocalCandidate(candidate) => {
                outcome_of(call.manager.handle_local_candidate(candidate))
            }
            PeerLinkEvent::RemoteTrack { stream_id, track } => {
                match call.manager.handle_remote_track(&stream_id, track) {
                    RemoteTrackUpdate::Published(remote) => {
                        let remote_peer = call.manager.remote_peer().map(str::to_string);
                        self.events.publish(CallEvent::RemoteMedia {
                            stream_id: remote.stream_id().to_string(),
                            tracks: remote.tracks(),
                        });
                        self.mutate(|s| {
                            s.status = CallStatus::Connected;
                            s.connection = ConnectionStatus::Connected;
                            s.remote_media = Some(remote);
                            s.connected_at = Some(chrono::Utc::now());
                            if let Some(ref peer) = remote_peer {
                                s.add_participant(peer);
                            }
                        });
                    }
                    RemoteTrackUpdate::Appended(remote) => {
                        // The shared handle changed in place; the snapshot
                        // compares equal, so notify explicitly
                        self.events.publish(CallEvent::RemoteMedia {
                            stream_id: remote.stream_id().to_string(),
                            tracks: remote.tracks(),
                        });
                        let state = self.state.read().clone();
                        self.notify(&state);
                    }
                    RemoteTrackUpdate::Ignored => {}
                }
                Outcome::Continue
            }
            PeerLinkEvent::StateChanged(state) => {
                let connection = match state {
                    ConnectionState::Connected => Some(ConnectionStatus::Connected),
                    ConnectionState::Disconnected | ConnectionState::Failed => {
                        Some(ConnectionStatus::Disconnected)
                    }
                    _ => None,
                };
                if let Some(connection) = connection {
                    self.mutate(|s| s.connection = connection);
                }
                Outcome::Continue
            }
        }
    }

    async fn on_screen_ended(&self, call: &mut ActiveCall, track_id: &str) -> Outcome {
        let current = call
            .media
            .local()
            .and_then(|m| m.video_track())
            .map(|t| t.id().to_string());
        if call.media.source() != SourceKind::Screen || current.as_deref() != Some(track_id) {
            return Outcome::Continue;
        }

        info!("Screen capture ended, switching back to the camera");
        if let Err(e) = self.stop_screen_share(call).await {
            warn!("Could not restore the camera after screen share: {}", e);
        }
        Outcome::Continue
    }

    async fn start_screen_share(&self, call: &mut ActiveCall) -> Result<()> {
        let screen = call.media.acquire_display_track().await?;
        if let Err(e) = call.manager.replace_video_track(&screen).await {
            screen.stop();
            return Err(e);
        }
        call.media.install_video(screen.clone())?;

        let inputs = call.inputs.clone();
        let mut ended = screen.ended_watch();
        let track_id = screen.id().to_string();
        let watch = tokio::spawn(async move {
            if ended.wait_for(|stopped| *stopped).await.is_ok() {
                let _ = inputs.send(SessionInput::ScreenEnded(track_id));
            }
        });
        if let Some(previous) = call.screen_watch.replace(watch) {
            previous.abort();
        }

        self.mutate(|s| s.is_screen_sharing = true);
        self.publish_toggles();
        info!("Screen sharing started in room {}", call.room_id);
        Ok(())
    }

    async fn stop_screen_share(&self, call: &mut ActiveCall) -> Result<()> {
        let camera = call.media.acquire_camera_track().await?;
        if let Err(e) = call.manager.replace_video_track(&camera).await {
            camera.stop();
            return Err(e);
        }
        if let Some(watch) = call.screen_watch.take() {
            watch.abort();
        }
        call.media.install_video(camera)?;

        self.mutate(|s| s.is_screen_sharing = false);
        self.publish_toggles();
        info!("Screen sharing stopped in room {}", call.room_id);
        Ok(())
    }

    async fn teardown(&self, mut call: ActiveCall) {
        self.inputs.lock().take();
        call.abort_tasks();
        call.manager.close().await;
        call.media.release();
        self.signaling.leave_room(&call.room_id);
        info!("Call in room {} torn down", call.room_id);
    }
}

impl Drop for SessionInner {
    fn drop(&mut self) {
        for id in self.handlers.drain(..) {
            self.signaling.off(id);
        }
        if let Some(cancel) = self.pending.get_mut().take() {
            cancel.cancel();
        }
        if let Some(mut call) = self.active.get_mut().take() {
            if let Some(event_loop) = call.event_loop.take() {
                event_loop.abort();
            }
            call.abort_tasks();
            call.media.release();
            self.signaling.leave_room(&call.room_id);
            // The manager closes its link when dropped
            info!("Call in room {} released on drop", call.room_id);
        }
    }
}

fn cancelled() -> CallError {
    CallError::Cancelled("call start aborted by end()".to_string())
}

/// Race a start step against cancellation
async fn unless_cancelled<T, F>(cancel: &CancellationToken, step: F) -> Result<T>
where
    F: Future<Output = Result<T>>,
{
    tokio::select! {
        biased;
        _ = cancel.cancelled() => Err(cancelled()),
        result = step => result,
    }
}

fn outcome_of(result: Result<()>) -> Outcome {
    match result {
        Ok(()) => Outcome::Continue,
        Err(e) => match e.failure_kind() {
            Some(kind) => {
                warn!("Call failed: {}", e);
                Outcome::Terminate(Some(kind))
            }
            None => {
                warn!("Ignoring call input: {}", e);
                Outcome::Continue
            }
        },
    }
}

async fn run_event_loop(inner: Weak<SessionInner>, generation: u64, mut rx: mpsc::UnboundedReceiver<SessionInput>) {
    while let Some(input) = rx.recv().await {
        let Some(inner) = inner.upgrade() else {
            break;
        };
        if !inner.process(generation, input).await {
            break;
        }
    }
    debug!("Event loop for call {} stopped", generation);
}
