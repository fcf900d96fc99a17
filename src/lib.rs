//! telecall - peer-to-peer consultation call core
//!
//! Signaling to a rendezvous endpoint, local media acquisition, WebRTC
//! offer/answer/ICE negotiation and an observable call session for one
//! appointment at a time. A small rendezvous server is included.

pub mod config;
pub mod error;
pub mod events;
pub mod media;
pub mod peer;
pub mod server;
pub mod session;
pub mod signaling;

#[cfg(test)]
pub(crate) mod testing;

pub use error::{CallError, FailureKind, Result};
pub use session::{CallSession, CallState, CallStatus};
