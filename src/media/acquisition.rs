//! Ownership of the local media handle

use std::sync::Arc;

use tracing::{debug, info};

use super::devices::MediaDevices;
use super::track::{LocalMedia, MediaTrack};
use super::types::{DisplayConstraints, MediaConstraints, SourceKind};
use crate::error::{CallError, Result};

/// Owns the local capture for one session
///
/// Tracks are only mutated through the methods below. Video source swaps are
/// two-phase: a replacement track is acquired first, and installed only after
/// the caller has moved the outgoing sender over to it.
pub struct MediaAcquisition {
    devices: Arc<dyn MediaDevices>,
    local: Option<LocalMedia>,
}

impl MediaAcquisition {
    pub fn new(devices: Arc<dyn MediaDevices>) -> Self {
        Self {
            devices,
            local: None,
        }
    }

    /// Open camera/microphone and take ownership of the handle
    pub async fn acquire_user_media(&mut self, constraints: MediaConstraints) -> Result<LocalMedia> {
        if self.local.is_some() {
            return Err(CallError::InvalidState(
                "local media already acquired".to_string(),
            ));
        }
        let media = self.devices.get_user_media(constraints).await?;
        self.local = Some(media.clone());
        Ok(media)
    }

    /// Current local media, if acquired
    pub fn local(&self) -> Option<&LocalMedia> {
        self.local.as_ref()
    }

    pub fn set_audio_enabled(&self, enabled: bool) -> bool {
        self.local
            .as_ref()
            .map(|m| m.set_audio_enabled(enabled))
            .unwrap_or(false)
    }

    pub fn set_video_enabled(&self, enabled: bool) -> bool {
        self.local
            .as_ref()
            .map(|m| m.set_video_enabled(enabled))
            .unwrap_or(false)
    }

    pub fn source(&self) -> SourceKind {
        self.local.as_ref().map(|m| m.source()).unwrap_or_default()
    }

    /// Open a display capture track (not yet installed)
    pub async fn acquire_display_track(&self) -> Result<Arc<MediaTrack>> {
        let mut display = self
            .devices
            .get_display_media(DisplayConstraints::default())
            .await?;
        take_single_video(&mut display)
    }

    /// Re-open the camera video track (not yet installed)
    pub async fn acquire_camera_track(&self) -> Result<Arc<MediaTrack>> {
        let mut camera = self
            .devices
            .get_user_media(MediaConstraints::video_only())
            .await?;
        take_single_video(&mut camera)
    }

    /// Install a video track as the outgoing video, stopping the previous one
    ///
    /// The new track inherits the enabled flag of the one it replaces.
    pub fn install_video(&mut self, track: Arc<MediaTrack>) -> Result<()> {
        let local = self.local.as_mut().ok_or_else(|| {
            track.stop();
            CallError::InvalidState("no local media to update".to_string())
        })?;

        if let Some(previous) = local.replace_video(track.clone()) {
            track.set_enabled(previous.is_enabled());
            previous.stop();
            debug!("Replaced video track {} with {}", previous.id(), track.id());
        }
        info!("Outgoing video source is now {:?}", track.source());
        Ok(())
    }

    /// Stop every track and drop the handle (idempotent)
    pub fn release(&mut self) {
        if let Some(media) = self.local.take() {
            media.release();
            info!("Local media released");
        }
    }
}

impl Drop for MediaAcquisition {
    fn drop(&mut self) {
        self.release();
    }
}

fn take_single_video(media: &mut LocalMedia) -> Result<Arc<MediaTrack>> {
    let track = media
        .take_video()
        .ok_or_else(|| CallError::DeviceUnavailable("no video track in capture".to_string()))?;
    // Anything else that came with the capture is not used
    media.release();
    Ok(track)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::MediaConfig;
    use crate::media::SyntheticDevices;
    use tokio_test::{assert_err, assert_ok};

    fn acquisition() -> MediaAcquisition {
        MediaAcquisition::new(Arc::new(SyntheticDevices::new(MediaConfig::default())))
    }

    #[tokio::test]
    async fn test_screen_swap_and_revert() {
        let mut media = acquisition();
        let local = media.acquire_user_media(MediaConstraints::default()).await.unwrap();
        let camera = local.video_track().unwrap().clone();
        let audio = local.audio_track().unwrap().clone();

        let screen = media.acquire_display_track().await.unwrap();
        media.install_video(screen.clone()).unwrap();
        assert_eq!(media.source(), SourceKind::Screen);
        assert!(camera.is_stopped());
        assert!(!audio.is_stopped());

        let camera2 = media.acquire_camera_track().await.unwrap();
        media.install_video(camera2.clone()).unwrap();
        assert_eq!(media.source(), SourceKind::Camera);
        assert!(screen.is_stopped());
        assert!(!camera2.is_stopped());
        assert_eq!(
            media.local().unwrap().audio_track().unwrap().id(),
            audio.id()
        );
    }

    #[tokio::test]
    async fn test_install_inherits_enabled_flag() {
        let mut media = acquisition();
        media.acquire_user_media(MediaConstraints::default()).await.unwrap();
        media.set_video_enabled(false);

        let screen = media.acquire_display_track().await.unwrap();
        media.install_video(screen).unwrap();
        assert!(!media.local().unwrap().video_enabled());
    }

    #[tokio::test]
    async fn test_release_twice() {
        let mut media = acquisition();
        let local = media.acquire_user_media(MediaConstraints::default()).await.unwrap();
        media.release();
        media.release();
        assert!(local.is_released());
        assert!(media.local().is_none());
        assert!(!media.set_audio_enabled(true));
    }

    #[tokio::test]
    async fn test_install_without_media_stops_track() {
        let mut media = acquisition();
        let screen = assert_ok!(media.acquire_display_track().await);
        assert_err!(media.install_video(screen.clone()));
        assert!(screen.is_stopped());
    }

    #[tokio::test]
    async fn test_acquire_twice_rejected() {
        let mut media = acquisition();
        let first = assert_ok!(media.acquire_user_media(MediaConstraints::default()).await);
        let err = assert_err!(media.acquire_user_media(MediaConstraints::default()).await);
        assert!(matches!(err, CallError::InvalidState(_)));
        assert!(!first.is_released());
    }
}
