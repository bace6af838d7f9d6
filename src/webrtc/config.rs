//! WebRTC configuration

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Peer session configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WebRtcConfig {
    /// STUN server URLs
    pub stun_servers: Vec<String>,
    /// TURN server configuration
    pub turn_servers: Vec<TurnServer>,
    /// How long a link may negotiate before it is given up
    pub negotiation_timeout_secs: u64,
}

impl Default for WebRtcConfig {
    fn default() -> Self {
        Self {
            // Host candidates are enough on a LAN; remote viewers need STUN/TURN configured
            stun_servers: vec![],
            turn_servers: vec![],
            negotiation_timeout_secs: 30,
        }
    }
}

impl WebRtcConfig {
    pub fn negotiation_timeout(&self) -> Duration {
        Duration::from_secs(self.negotiation_timeout_secs)
    }
}

/// TURN server configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TurnServer {
    /// TURN URLs, e.g. `turn:turn.example.com:3478?transport=udp`
    pub urls: Vec<String>,
    pub username: String,
    pub credential: String,
}
