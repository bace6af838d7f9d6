use serde::{Deserialize, Serialize};

pub use crate::webrtc::config::{TurnServer, WebRtcConfig};

/// Main application configuration
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct AppConfig {
    /// Web server settings
    pub web: WebConfig,
    /// Signaling relay settings
    pub relay: RelayConfig,
    /// Peer session settings used by clients of the relay
    pub webrtc: WebRtcConfig,
}

/// Web server configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WebConfig {
    /// Bind address
    pub bind_address: String,
    /// HTTP port
    pub http_port: u16,
}

impl Default for WebConfig {
    fn default() -> Self {
        Self {
            bind_address: "0.0.0.0".to_string(),
            http_port: 8080,
        }
    }
}

/// Signaling relay configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RelayConfig {
    /// Identical chat payloads within this window are suppressed
    pub chat_dedup_window_secs: u64,
    /// WebSocket ping interval
    pub heartbeat_interval_secs: u64,
    /// Chat messages longer than this (in characters) are dropped
    pub max_chat_length: usize,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            chat_dedup_window_secs: 5,
            heartbeat_interval_secs: 30,
            max_chat_length: 2000,
        }
    }
}

impl RelayConfig {
    pub fn chat_dedup_window(&self) -> std::time::Duration {
        std::time::Duration::from_secs(self.chat_dedup_window_secs)
    }

    pub fn heartbeat_interval(&self) -> std::time::Duration {
        std::time::Duration::from_secs(self.heartbeat_interval_secs.max(1))
    }
}
