use serde::{Deserialize, Serialize};

/// Kind of media carried by a track
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TrackKind {
    Audio,
    Video,
}

impl std::fmt::Display for TrackKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TrackKind::Audio => write!(f, "audio"),
            TrackKind::Video => write!(f, "video"),
        }
    }
}

/// Where the outgoing video comes from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SourceKind {
    #[default]
    Camera,
    Screen,
}

/// Constraints for camera/microphone acquisition
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MediaConstraints {
    pub audio: bool,
    pub video: bool,
}

impl MediaConstraints {
    pub fn audio_video() -> Self {
        Self {
            audio: true,
            video: true,
        }
    }

    pub fn video_only() -> Self {
        Self {
            audio: false,
            video: true,
        }
    }
}

impl Default for MediaConstraints {
    fn default() -> Self {
        Self::audio_video()
    }
}

/// Constraints for display capture
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DisplayConstraints {
    pub video: bool,
}

impl Default for DisplayConstraints {
    fn default() -> Self {
        Self { video: true }
    }
}

impl From<&crate::config::MediaConfig> for MediaConstraints {
    fn from(config: &crate::config::MediaConfig) -> Self {
        Self {
            audio: config.audio,
            video: config.video,
        }
    }
}
