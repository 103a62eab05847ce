//! Configuration module for the audio relay server
//!
//! This module handles server configuration from various sources: .env files, YAML files,
//! and environment variables. Priority: YAML > ENV vars > .env values > defaults.
//!
//! # Modules
//! - `yaml`: YAML configuration file loading
//! - `env`: Environment variable loading
//! - `merge`: Merging YAML and environment configurations
//! - `validation`: Configuration validation logic
//!
//! # Example
//! ```rust,no_run
//! use audio_relay::config::ServerConfig;
//! use std::path::PathBuf;
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! // Load from environment variables only
//! let config = ServerConfig::from_env()?;
//!
//! // Load from YAML file with environment variable base
//! let config_path = PathBuf::from("config.yaml");
//! let config = ServerConfig::from_file(&config_path)?;
//!
//! println!("Server listening on {}", config.address());
//! # Ok(())
//! # }
//! ```

use std::path::PathBuf;
use std::time::Duration;

use crate::core::session::SessionSettings;
use crate::core::upstream::GeminiLiveConfig;

mod env;
mod merge;
mod validation;
mod yaml;

pub use yaml::YamlConfig;

pub const DEFAULT_HOST: &str = "0.0.0.0";
pub const DEFAULT_PORT: u16 = 8765;
pub const DEFAULT_UPSTREAM_CONNECT_TIMEOUT_MS: u64 = 10_000;
pub const DEFAULT_INBOUND_BUFFER_CEILING_BYTES: usize = 256 * 1024;
/// 10 s of 24 kHz PCM16
pub const DEFAULT_JITTER_BUFFER_CEILING_BYTES: usize = 480_000;
/// 200 ms of 24 kHz PCM16
pub const DEFAULT_OUTBOUND_CHUNK_BYTES: usize = 9600;
pub const DEFAULT_CLIENT_SEND_TIMEOUT_MS: u64 = 5000;
pub const DEFAULT_SESSION_IDLE_TIMEOUT_SECS: u64 = 300;
pub const DEFAULT_MAX_CONNECTIONS_PER_IP: u32 = 100;

/// Server configuration
///
/// Contains everything needed to run the relay:
/// - Server settings (host, port)
/// - Upstream speech model settings (Gemini Live)
/// - Per-session buffer ceilings and timeouts
/// - Security settings (CORS, connection limits)
#[derive(Debug, Clone)]
pub struct ServerConfig {
    // Server settings
    pub host: String,
    pub port: u16,

    // Upstream speech model
    /// Gemini API key, from GEMINI_API_KEY or GOOGLE_API_KEY
    pub gemini_api_key: Option<String>,
    pub gemini_model: String,
    pub gemini_voice: String,
    /// Live API WebSocket endpoint, overridable for testing
    pub gemini_ws_url: String,
    pub system_instruction: Option<String>,
    pub upstream_connect_timeout_ms: u64,

    // Buffering
    /// Forwarded-but-unacknowledged capture audio allowed per session
    pub inbound_buffer_ceiling_bytes: usize,
    /// Playback audio allowed in a session's jitter buffer
    pub jitter_buffer_ceiling_bytes: usize,
    /// Largest binary frame sent to a client
    pub outbound_chunk_bytes: usize,

    // Session timeouts
    pub client_send_timeout_ms: u64,
    pub session_idle_timeout_secs: u64,

    // Security configuration
    /// CORS allowed origins (comma-separated list or "*" for all)
    /// Default: None (CORS disabled, same-origin only)
    pub cors_allowed_origins: Option<String>,
    /// Maximum concurrent WebSocket connections
    /// Default: None (unlimited)
    pub max_websocket_connections: Option<usize>,
    /// Maximum connections per IP address
    /// Default: 100
    pub max_connections_per_ip: u32,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: DEFAULT_HOST.to_string(),
            port: DEFAULT_PORT,
            gemini_api_key: None,
            gemini_model: crate::core::upstream::gemini::DEFAULT_GEMINI_MODEL.to_string(),
            gemini_voice: crate::core::upstream::gemini::DEFAULT_GEMINI_VOICE.to_string(),
            gemini_ws_url: crate::core::upstream::GEMINI_LIVE_URL.to_string(),
            system_instruction: None,
            upstream_connect_timeout_ms: DEFAULT_UPSTREAM_CONNECT_TIMEOUT_MS,
            inbound_buffer_ceiling_bytes: DEFAULT_INBOUND_BUFFER_CEILING_BYTES,
            jitter_buffer_ceiling_bytes: DEFAULT_JITTER_BUFFER_CEILING_BYTES,
            outbound_chunk_bytes: DEFAULT_OUTBOUND_CHUNK_BYTES,
            client_send_timeout_ms: DEFAULT_CLIENT_SEND_TIMEOUT_MS,
            session_idle_timeout_secs: DEFAULT_SESSION_IDLE_TIMEOUT_SECS,
            cors_allowed_origins: None,
            max_websocket_connections: None,
            max_connections_per_ip: DEFAULT_MAX_CONNECTIONS_PER_IP,
        }
    }
}

/// Zeroize the API key when the configuration is dropped.
impl Drop for ServerConfig {
    fn drop(&mut self) {
        use zeroize::Zeroize;

        if let Some(ref mut key) = self.gemini_api_key {
            key.zeroize();
        }
    }
}

impl ServerConfig {
    /// Load configuration from environment variables with defaults, then validate.
    ///
    /// # Errors
    /// Returns an error if a variable has an invalid format or validation fails.
    pub fn from_env() -> Result<Self, Box<dyn std::error::Error>> {
        let config = merge::merge_config(None)?;
        validation::validate(&config)?;
        Ok(config)
    }

    /// Load configuration from a YAML file with environment variable base
    ///
    /// Priority order (highest to lowest):
    /// 1. YAML file values
    /// 2. Environment variables (actual ENV vars override .env values)
    /// 3. .env file values
    /// 4. Default values
    ///
    /// After loading and merging, performs validation on the final configuration.
    ///
    /// # Errors
    /// Returns an error if:
    /// - The YAML file cannot be read or is malformed
    /// - Environment variables have invalid formats
    /// - Configuration validation fails
    pub fn from_file(path: &PathBuf) -> Result<Self, Box<dyn std::error::Error>> {
        // .env is loaded into the environment in main.rs before this runs
        let yaml_config = yaml::YamlConfig::from_file(path)?;
        let config = merge::merge_config(Some(yaml_config))?;
        validation::validate(&config)?;
        Ok(config)
    }

    /// Get the server address as a string
    ///
    /// Returns the address in the format "host:port"
    pub fn address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    /// Connection settings for the Gemini Live upstream.
    pub fn gemini_config(&self) -> GeminiLiveConfig {
        GeminiLiveConfig {
            api_key: self.gemini_api_key.clone().unwrap_or_default(),
            model: self.gemini_model.clone(),
            voice: self.gemini_voice.clone(),
            system_instruction: self.system_instruction.clone(),
            endpoint: self.gemini_ws_url.clone(),
            connect_timeout: Duration::from_millis(self.upstream_connect_timeout_ms),
        }
    }

    /// Limits applied to every relay session.
    pub fn session_settings(&self) -> SessionSettings {
        SessionSettings {
            inbound_ceiling: self.inbound_buffer_ceiling_bytes,
            jitter_ceiling: self.jitter_buffer_ceiling_bytes,
            outbound_chunk_bytes: self.outbound_chunk_bytes,
            client_send_timeout: Duration::from_millis(self.client_send_timeout_ms),
            idle_timeout: Duration::from_secs(self.session_idle_timeout_secs),
        }
    }
}
