//! Call session: the observable state container and command surface

pub mod controller;
pub mod state;

pub use controller::{CallSession, Observer};
pub use state::{CallState, CallStatus, ConnectionStatus};
