use serde::Deserialize;
use std::path::PathBuf;

/// Complete YAML configuration structure
///
/// This structure represents the full configuration that can be loaded from a YAML file.
/// All fields are optional to allow partial configuration. Values present here override
/// environment variables.
///
/// # Example YAML structure
/// ```yaml
/// server:
///   host: "0.0.0.0"
///   port: 8765
///
/// gemini:
///   api_key: "your-gemini-key"
///   model: "gemini-live-2.5-flash-preview"
///   voice: "Puck"
///   ws_url: "wss://generativelanguage.googleapis.com/ws/..."
///   system_instruction: "You are a helpful voice assistant."
///   connect_timeout_ms: 10000
///
/// audio:
///   inbound_buffer_ceiling_bytes: 262144
///   jitter_buffer_ceiling_bytes: 480000
///   outbound_chunk_bytes: 9600
///
/// session:
///   client_send_timeout_ms: 5000
///   idle_timeout_secs: 300
///
/// security:
///   cors_allowed_origins: "https://example.com"
///   max_websocket_connections: 1000
///   max_connections_per_ip: 100
/// ```
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct YamlConfig {
    pub server: Option<ServerYaml>,
    pub gemini: Option<GeminiYaml>,
    pub audio: Option<AudioYaml>,
    pub session: Option<SessionYaml>,
    pub security: Option<SecurityYaml>,
}

/// Server configuration from YAML
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct ServerYaml {
    pub host: Option<String>,
    pub port: Option<u16>,
}

/// Upstream speech model settings from YAML
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct GeminiYaml {
    pub api_key: Option<String>,
    pub model: Option<String>,
    pub voice: Option<String>,
    pub ws_url: Option<String>,
    pub system_instruction: Option<String>,
    /// Bound on connect plus the setup round trip, in milliseconds
    pub connect_timeout_ms: Option<u64>,
}

/// Buffer sizing from YAML
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct AudioYaml {
    /// Forwarded-but-unacknowledged capture audio per session
    pub inbound_buffer_ceiling_bytes: Option<usize>,
    /// Playback audio queued per session
    pub jitter_buffer_ceiling_bytes: Option<usize>,
    /// Largest binary frame sent to a client; must be even
    pub outbound_chunk_bytes: Option<usize>,
}

/// Session timeouts from YAML
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct SessionYaml {
    pub client_send_timeout_ms: Option<u64>,
    pub idle_timeout_secs: Option<u64>,
}

/// Security configuration from YAML
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct SecurityYaml {
    /// CORS allowed origins (comma-separated list or "*" for all)
    pub cors_allowed_origins: Option<String>,
    /// Maximum concurrent WebSocket connections
    pub max_websocket_connections: Option<usize>,
    /// Maximum connections per IP address
    pub max_connections_per_ip: Option<u32>,
}

impl YamlConfig {
    /// Load configuration from a YAML file
    ///
    /// # Errors
    /// Returns an error if:
    /// - The file cannot be read
    /// - The YAML is malformed
    /// - Fields have invalid types
    pub fn from_file(path: &PathBuf) -> Result<Self, Box<dyn std::error::Error>> {
        let contents = std::fs::read_to_string(path)
            .map_err(|e| format!("Failed to read config file {}: {e}", path.display()))?;

        let config: YamlConfig = serde_yaml::from_str(&contents)
            .map_err(|e| format!("Failed to parse YAML config: {e}"))?;

        Ok(config)
    }
}
