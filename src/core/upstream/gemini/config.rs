//! Gemini Live API configuration types.

use std::time::Duration;

/// Gemini Live bidirectional streaming endpoint.
pub const GEMINI_LIVE_URL: &str = "wss://generativelanguage.googleapis.com/ws/google.ai.generativelanguage.v1beta.GenerativeService.BidiGenerateContent";

/// Default Gemini Live model.
pub const DEFAULT_GEMINI_MODEL: &str = "gemini-live-2.5-flash-preview";

/// Default prebuilt voice.
pub const DEFAULT_GEMINI_VOICE: &str = "Puck";

/// MIME type of the PCM the relay forwards upstream.
pub const GEMINI_INPUT_MIME_TYPE: &str = "audio/pcm;rate=16000";

/// Default bound on connect plus setup handshake.
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// Connection settings for [`GeminiLiveConnector`](super::GeminiLiveConnector).
///
/// The API key is zeroized when the config is dropped.
#[derive(Clone)]
pub struct GeminiLiveConfig {
    pub api_key: String,
    pub model: String,
    pub voice: String,
    pub system_instruction: Option<String>,
    /// WebSocket endpoint, without query string
    pub endpoint: String,
    /// Bound on TCP/TLS connect plus the `setupComplete` round trip
    pub connect_timeout: Duration,
}

impl GeminiLiveConfig {
    pub fn new(api_key: impl Into<String>) -> Self {
        // Drop impl rules out struct update syntax
        let mut config = Self::default();
        config.api_key = api_key.into();
        config
    }

    /// Fully qualified model resource name, as the setup message expects it.
    pub fn model_resource(&self) -> String {
        if self.model.starts_with("models/") {
            self.model.clone()
        } else {
            format!("models/{}", self.model)
        }
    }
}

impl Default for GeminiLiveConfig {
    fn default() -> Self {
        Self {
            api_key: String::new(),
            model: DEFAULT_GEMINI_MODEL.to_string(),
            voice: DEFAULT_GEMINI_VOICE.to_string(),
            system_instruction: None,
            endpoint: GEMINI_LIVE_URL.to_string(),
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
        }
    }
}

impl std::fmt::Debug for GeminiLiveConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GeminiLiveConfig")
            .field("api_key", &"[REDACTED]")
            .field("model", &self.model)
            .field("voice", &self.voice)
            .field("system_instruction", &self.system_instruction)
            .field("endpoint", &self.endpoint)
            .field("connect_timeout", &self.connect_timeout)
            .finish()
    }
}

impl Drop for GeminiLiveConfig {
    fn drop(&mut self) {
        use zeroize::Zeroize;
        self.api_key.zeroize();
    }
}
