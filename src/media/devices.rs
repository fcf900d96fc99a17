//! Capture devices

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use tracing::{debug, info, trace};
use webrtc::media::Sample;

use super::track::{LocalMedia, MediaTrack};
use super::types::{DisplayConstraints, MediaConstraints, SourceKind, TrackKind};
use crate::config::MediaConfig;
use crate::error::{CallError, Result};

/// Source of local capture streams
///
/// Implementations prompt for access where the platform requires it; a
/// refusal is `PermissionDenied`, a missing device `DeviceUnavailable`.
/// Neither is retried here.
#[async_trait]
pub trait MediaDevices: Send + Sync {
    /// Open camera and/or microphone
    async fn get_user_media(&self, constraints: MediaConstraints) -> Result<LocalMedia>;

    /// Open a display capture; its video track ends when the user stops sharing
    async fn get_display_media(&self, constraints: DisplayConstraints) -> Result<LocalMedia>;
}

/// Opus frame carrying digital silence
const OPUS_SILENCE: &[u8] = &[0xf8, 0xff, 0xfe];

/// Small constant VP8 payload used as a placeholder frame
const VP8_PLACEHOLDER: &[u8] = &[
    0x10, 0x02, 0x00, 0x9d, 0x01, 0x2a, 0x10, 0x00, 0x10, 0x00, 0x00, 0x47, 0x08, 0x85, 0x85, 0x88,
];

/// Headless capture devices producing paced placeholder samples
///
/// Used by the command-line peer, where no camera exists. Access can be
/// denied per device class through [`MediaConfig`].
pub struct SyntheticDevices {
    config: MediaConfig,
}

impl SyntheticDevices {
    pub fn new(config: MediaConfig) -> Self {
        Self { config }
    }

    fn frame_period(&self, kind: TrackKind) -> Duration {
        match kind {
            TrackKind::Audio => Duration::from_millis(self.config.audio_frame_ms.max(1)),
            TrackKind::Video => Duration::from_millis(1000 / u64::from(self.config.video_fps.max(1))),
        }
    }

    fn start(&self, media: &LocalMedia) {
        for track in media.tracks() {
            let period = self.frame_period(track.kind());
            spawn_sample_pump(track, period);
        }
    }
}

#[async_trait]
impl MediaDevices for SyntheticDevices {
    async fn get_user_media(&self, constraints: MediaConstraints) -> Result<LocalMedia> {
        if !constraints.audio && !constraints.video {
            return Err(CallError::DeviceUnavailable(
                "no audio or video requested".to_string(),
            ));
        }
        if !self.config.allow_camera {
            return Err(CallError::PermissionDenied(
                "camera and microphone access denied".to_string(),
            ));
        }

        let stream_id = format!("user-{}", uuid::Uuid::new_v4());
        let audio = constraints
            .audio
            .then(|| MediaTrack::new(TrackKind::Audio, SourceKind::Camera, "synthetic microphone", &stream_id));
        let video = constraints
            .video
            .then(|| MediaTrack::new(TrackKind::Video, SourceKind::Camera, "synthetic camera", &stream_id));

        let media = LocalMedia::new(stream_id, audio, video);
        self.start(&media);
        info!(
            "Opened synthetic user media (audio: {}, video: {})",
            constraints.audio, constraints.video
        );
        Ok(media)
    }

    async fn get_display_media(&self, constraints: DisplayConstraints) -> Result<LocalMedia> {
        if !constraints.video {
            return Err(CallError::DeviceUnavailable(
                "display capture requires video".to_string(),
            ));
        }
        if !self.config.allow_screen {
            return Err(CallError::PermissionDenied(
                "screen capture access denied".to_string(),
            ));
        }

        let stream_id = format!("display-{}", uuid::Uuid::new_v4());
        let video = MediaTrack::new(TrackKind::Video, SourceKind::Screen, "synthetic display", &stream_id);
        let media = LocalMedia::new(stream_id, None, Some(video));
        self.start(&media);
        info!("Opened synthetic display capture");
        Ok(media)
    }
}

/// Write placeholder samples to a track until it stops
fn spawn_sample_pump(track: Arc<MediaTrack>, period: Duration) {
    let payload = match track.kind() {
        TrackKind::Audio => Bytes::from_static(OPUS_SILENCE),
        TrackKind::Video => Bytes::from_static(VP8_PLACEHOLDER),
    };
    let mut ended = track.ended_watch();

    tokio::spawn(async move {
        let sample_track = track.sample_track();
        let mut ticker = tokio::time::interval(period);
        let mut written: u64 = 0;

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    if track.is_stopped() {
                        break;
                    }
                    if !track.is_enabled() {
                        continue;
                    }
                    let sample = Sample {
                        data: payload.clone(),
                        duration: period,
                        ..Default::default()
                    };
                    if let Err(e) = sample_track.write_sample(&sample).await {
                        trace!("Sample write on {} failed: {}", track.id(), e);
                    }
                    written += 1;
                }
                changed = ended.changed() => {
                    if changed.is_err() || *ended.borrow() {
                        break;
                    }
                }
            }
        }
        debug!("Sample pump for {} stopped after {} samples", track.id(), written);
    });
}
