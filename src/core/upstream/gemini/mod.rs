//! Gemini Live API module.
//!
//! Bidirectional audio streaming against Google's Gemini Live API with
//! server-side voice activity detection, input and output transcription and
//! session resumption handles.
//!
//! # Audio Format
//!
//! Input is PCM 16-bit signed little-endian at 16kHz; output is the same at
//! 24kHz.
//!
//! # Example
//!
//! ```rust,ignore
//! use audio_relay::core::upstream::{GeminiLiveConfig, GeminiLiveConnector, OpenSessionRequest, UpstreamConnector};
//!
//! let connector = GeminiLiveConnector::new(GeminiLiveConfig::new("api-key"));
//! let mut session = connector.open_session(OpenSessionRequest::fresh()).await?;
//! session.handle.send_text("Hello").await?;
//! while let Some(event) = session.events.recv().await {
//!     println!("{event:?}");
//! }
//! ```

mod client;
mod config;
mod messages;

pub use client::{GeminiLiveConnector, GeminiLiveHandle};
pub use config::{
    DEFAULT_CONNECT_TIMEOUT, DEFAULT_GEMINI_MODEL, DEFAULT_GEMINI_VOICE, GEMINI_INPUT_MIME_TYPE,
    GEMINI_LIVE_URL, GeminiLiveConfig,
};
pub use messages::{ClientMessage, ServerMessage};
