//! Local media tracks and the local media handle

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tokio::sync::watch;
use tracing::debug;
use webrtc::rtp_transceiver::rtp_codec::RTCRtpCodecCapability;
use webrtc::track::track_local::track_local_static_sample::TrackLocalStaticSample;
use webrtc::track::track_local::TrackLocal;

use super::types::{SourceKind, TrackKind};

/// Create RTP codec capability for video (VP8)
pub fn video_codec_capability() -> RTCRtpCodecCapability {
    RTCRtpCodecCapability {
        mime_type: "video/VP8".to_string(),
        clock_rate: 90000,
        channels: 0,
        sdp_fmtp_line: String::new(),
        rtcp_feedback: vec![],
    }
}

/// Create RTP codec capability for audio (Opus)
pub fn audio_codec_capability() -> RTCRtpCodecCapability {
    RTCRtpCodecCapability {
        mime_type: "audio/opus".to_string(),
        clock_rate: 48000,
        channels: 2,
        sdp_fmtp_line: "minptime=10;useinbandfec=1".to_string(),
        rtcp_feedback: vec![],
    }
}

/// One captured audio or video track
///
/// `enabled` gates whether samples are produced; `stop` is final and fires
/// the ended signal observed by the session controller.
pub struct MediaTrack {
    id: String,
    kind: TrackKind,
    source: SourceKind,
    label: String,
    enabled: AtomicBool,
    ended: watch::Sender<bool>,
    /// Sample track handed to the peer connection
    rtp: Arc<TrackLocalStaticSample>,
}

impl MediaTrack {
    pub fn new(kind: TrackKind, source: SourceKind, label: impl Into<String>, stream_id: &str) -> Self {
        let id = format!("{}-{}", kind, uuid::Uuid::new_v4());
        let capability = match kind {
            TrackKind::Audio => audio_codec_capability(),
            TrackKind::Video => video_codec_capability(),
        };
        let rtp = Arc::new(TrackLocalStaticSample::new(
            capability,
            id.clone(),
            stream_id.to_string(),
        ));
        let (ended, _) = watch::channel(false);

        Self {
            id,
            kind,
            source,
            label: label.into(),
            enabled: AtomicBool::new(true),
            ended,
            rtp,
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn kind(&self) -> TrackKind {
        self.kind
    }

    pub fn source(&self) -> SourceKind {
        self.source
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled.load(Ordering::SeqCst)
    }

    pub fn set_enabled(&self, enabled: bool) {
        self.enabled.store(enabled, Ordering::SeqCst);
    }

    /// Stop the track (idempotent)
    pub fn stop(&self) {
        if !self.ended.send_replace(true) {
            debug!("Track {} ({}) stopped", self.id, self.label);
        }
    }

    pub fn is_stopped(&self) -> bool {
        *self.ended.borrow()
    }

    /// Watch for the track ending
    pub fn ended_watch(&self) -> watch::Receiver<bool> {
        self.ended.subscribe()
    }

    /// Sample track for the peer connection
    pub fn sample_track(&self) -> Arc<TrackLocalStaticSample> {
        self.rtp.clone()
    }

    /// Sample track as a generic local track
    pub fn local_track(&self) -> Arc<dyn TrackLocal + Send + Sync> {
        self.rtp.clone()
    }
}

impl std::fmt::Debug for MediaTrack {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MediaTrack")
            .field("id", &self.id)
            .field("kind", &self.kind)
            .field("source", &self.source)
            .field("enabled", &self.is_enabled())
            .field("stopped", &self.is_stopped())
            .finish()
    }
}

/// Local camera/microphone (or screen) capture handle
#[derive(Debug, Clone)]
pub struct LocalMedia {
    stream_id: String,
    audio: Option<Arc<MediaTrack>>,
    video: Option<Arc<MediaTrack>>,
}

impl LocalMedia {
    pub fn new(stream_id: impl Into<String>, audio: Option<MediaTrack>, video: Option<MediaTrack>) -> Self {
        Self {
            stream_id: stream_id.into(),
            audio: audio.map(Arc::new),
            video: video.map(Arc::new),
        }
    }

    pub fn stream_id(&self) -> &str {
        &self.stream_id
    }

    pub fn audio_track(&self) -> Option<&Arc<MediaTrack>> {
        self.audio.as_ref()
    }

    pub fn video_track(&self) -> Option<&Arc<MediaTrack>> {
        self.video.as_ref()
    }

    /// All tracks, audio first
    pub fn tracks(&self) -> Vec<Arc<MediaTrack>> {
        self.audio.iter().chain(self.video.iter()).cloned().collect()
    }

    pub fn audio_enabled(&self) -> bool {
        self.audio.as_ref().map(|t| t.is_enabled()).unwrap_or(false)
    }

    pub fn video_enabled(&self) -> bool {
        self.video.as_ref().map(|t| t.is_enabled()).unwrap_or(false)
    }

    /// Source of the outgoing video
    pub fn source(&self) -> SourceKind {
        self.video
            .as_ref()
            .map(|t| t.source())
            .unwrap_or(SourceKind::Camera)
    }

    /// Toggle the audio track without renegotiation; false if there is none
    pub fn set_audio_enabled(&self, enabled: bool) -> bool {
        match self.audio {
            Some(ref track) => {
                track.set_enabled(enabled);
                true
            }
            None => false,
        }
    }

    /// Toggle the video track without renegotiation; false if there is none
    pub fn set_video_enabled(&self, enabled: bool) -> bool {
        match self.video {
            Some(ref track) => {
                track.set_enabled(enabled);
                true
            }
            None => false,
        }
    }

    /// Swap the video track, returning the previous one
    pub fn replace_video(&mut self, track: Arc<MediaTrack>) -> Option<Arc<MediaTrack>> {
        self.video.replace(track)
    }

    /// Take the video track out of a freshly acquired handle
    pub fn take_video(&mut self) -> Option<Arc<MediaTrack>> {
        self.video.take()
    }

    /// Stop all tracks (idempotent)
    pub fn release(&self) {
        for track in self.tracks() {
            track.stop();
        }
    }

    /// Whether every track has been stopped
    pub fn is_released(&self) -> bool {
        self.tracks().iter().all(|t| t.is_stopped())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn camera_media() -> LocalMedia {
        LocalMedia::new(
            "stream",
            Some(MediaTrack::new(TrackKind::Audio, SourceKind::Camera, "mic", "stream")),
            Some(MediaTrack::new(TrackKind::Video, SourceKind::Camera, "cam", "stream")),
        )
    }

    #[test]
    fn test_toggle_does_not_stop() {
        let media = camera_media();
        assert!(media.audio_enabled());
        assert!(media.set_audio_enabled(false));
        assert!(!media.audio_enabled());
        assert!(media.video_enabled());
        assert!(!media.is_released());
    }

    #[test]
    fn test_release_idempotent() {
        let media = camera_media();
        let mut ended = media.video_track().unwrap().ended_watch();
        media.release();
        media.release();
        assert!(media.is_released());
        assert!(ended.has_changed().unwrap());
        assert!(*ended.borrow_and_update());
    }

    #[test]
    fn test_replace_video_keeps_audio() {
        let mut media = camera_media();
        let audio_id = media.audio_track().unwrap().id().to_string();
        let screen = Arc::new(MediaTrack::new(TrackKind::Video, SourceKind::Screen, "screen", "stream"));

        let old = media.replace_video(screen).unwrap();
        assert_eq!(old.source(), SourceKind::Camera);
        assert_eq!(media.source(), SourceKind::Screen);
        assert_eq!(media.audio_track().unwrap().id(), audio_id);
    }

    #[test]
    fn test_missing_track_toggle() {
        let media = LocalMedia::new(
            "s",
            Some(MediaTrack::new(TrackKind::Audio, SourceKind::Camera, "mic", "s")),
            None,
        );
        assert!(!media.set_video_enabled(false));
        assert!(!media.video_enabled());
        assert_eq!(media.tracks().len(), 1);
    }

    #[test]
    fn test_track_ids_carry_kind() {
        let track = MediaTrack::new(TrackKind::Video, SourceKind::Camera, "cam", "s");
        assert!(track.id().starts_with("video-"));
        assert_eq!(track.local_track().kind(), webrtc::rtp_transceiver::rtp_codec::RTPCodecType::Video);
    }
}
