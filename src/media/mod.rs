//! Local media acquisition
//!
//! Camera, microphone and display capture behind the [`MediaDevices`] trait,
//! with [`MediaAcquisition`] owning the handle for the lifetime of a session.
//!
//! Screen-share transitions:
//! ```text
//! camera --start--> screen   replace outgoing video track, stop camera video
//! screen --stop---> camera   re-acquire camera video, replace back, stop screen
//!        (explicit, or the screen track's ended signal)
//! ```

pub mod acquisition;
pub mod devices;
pub mod track;
pub mod types;

pub use acquisition::MediaAcquisition;
pub use devices::{MediaDevices, SyntheticDevices};
pub use track::{LocalMedia, MediaTrack};
pub use types::{DisplayConstraints, MediaConstraints, SourceKind, TrackKind};
