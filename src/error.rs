use serde::Serialize;
use thiserror::Error;

/// Call-core error type
#[derive(Error, Debug)]
pub enum CallError {
    #[error("Permission denied: {0}")]
    PermissionDenied(String),

    #[error("Device unavailable: {0}")]
    DeviceUnavailable(String),

    #[error("Signaling unavailable: {0}")]
    SignalingUnavailable(String),

    #[error("Negotiation failed: {0}")]
    NegotiationFailed(String),

    #[error("Invalid state: {0}")]
    InvalidState(String),

    /// Aborted by `end()` before it completed
    #[error("Cancelled: {0}")]
    Cancelled(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Coarse failure indicator exposed to observers
///
/// Observers only learn which class of failure ended or aborted a session,
/// never the underlying platform error.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum FailureKind {
    PermissionDenied,
    DeviceUnavailable,
    SignalingUnavailable,
    NegotiationFailed,
}

impl CallError {
    /// Failure class reported to observers, if this error aborts a session
    pub fn failure_kind(&self) -> Option<FailureKind> {
        match self {
            CallError::PermissionDenied(_) => Some(FailureKind::PermissionDenied),
            CallError::DeviceUnavailable(_) => Some(FailureKind::DeviceUnavailable),
            CallError::SignalingUnavailable(_) => Some(FailureKind::SignalingUnavailable),
            CallError::NegotiationFailed(_) => Some(FailureKind::NegotiationFailed),
            _ => None,
        }
    }

    /// Actionable message for the user interface
    pub fn user_message(&self) -> &'static str {
        match self {
            CallError::PermissionDenied(_) => "Enable camera and microphone access to join the call",
            CallError::DeviceUnavailable(_) => "No camera or microphone was found",
            CallError::SignalingUnavailable(_) => "Could not reach the call server",
            CallError::NegotiationFailed(_) => "Could not establish a connection with the other participant",
            _ => "The call could not be started",
        }
    }
}

impl From<webrtc::Error> for CallError {
    fn from(e: webrtc::Error) -> Self {
        CallError::NegotiationFailed(e.to_string())
    }
}

impl From<tokio_tungstenite::tungstenite::Error> for CallError {
    fn from(e: tokio_tungstenite::tungstenite::Error) -> Self {
        CallError::SignalingUnavailable(e.to_string())
    }
}

/// Result type alias for call operations
pub type Result<T> = std::result::Result<T, CallError>;
