use serde::{Deserialize, Serialize};

/// Main application configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    /// Rendezvous endpoint used by call peers
    pub signaling: SignalingConfig,
    /// ICE server settings
    pub ice: IceConfig,
    /// Local media settings
    pub media: MediaConfig,
    /// Rendezvous server settings
    pub server: ServerConfig,
}

/// Signaling client configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct SignalingConfig {
    /// WebSocket endpoint of the rendezvous server
    pub endpoint: String,
}

impl Default for SignalingConfig {
    fn default() -> Self {
        Self {
            endpoint: "ws://localhost:3001/ws".to_string(),
        }
    }
}

/// ICE server configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct IceConfig {
    /// STUN server URLs
    pub stun_servers: Vec<String>,
    /// TURN server configuration
    pub turn_servers: Vec<TurnServer>,
}

impl Default for IceConfig {
    fn default() -> Self {
        Self {
            stun_servers: vec![
                "stun:stun.l.google.com:19302".to_string(),
                "stun:stun1.l.google.com:19302".to_string(),
            ],
            turn_servers: vec![],
        }
    }
}

/// TURN server configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TurnServer {
    /// TURN server URLs (e.g., ["turn:turn.example.com:3478?transport=udp"])
    pub urls: Vec<String>,
    /// Username for TURN authentication
    pub username: String,
    /// Credential for TURN authentication
    pub credential: String,
}

/// Local media configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct MediaConfig {
    /// Request a microphone on call start
    pub audio: bool,
    /// Request a camera on call start
    pub video: bool,
    /// Whether the synthetic camera/microphone may be opened
    pub allow_camera: bool,
    /// Whether the synthetic display capture may be opened
    pub allow_screen: bool,
    /// Synthetic video frame rate
    pub video_fps: u32,
    /// Synthetic audio packet duration in milliseconds
    pub audio_frame_ms: u64,
}

impl Default for MediaConfig {
    fn default() -> Self {
        Self {
            audio: true,
            video: true,
            allow_camera: true,
            allow_screen: true,
            video_fps: 30,
            audio_frame_ms: 20,
        }
    }
}

/// Rendezvous server configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ServerConfig {
    /// Bind address
    pub bind_address: String,
    /// HTTP/WebSocket port
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_address: "0.0.0.0".to_string(),
            port: 3001,
        }
    }
}
