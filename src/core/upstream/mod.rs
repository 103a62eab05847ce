//! Upstream speech model module.
//!
//! # Architecture
//!
//! - [`UpstreamConnector`] opens sessions; one connector per process
//! - [`UpstreamHandle`] is the per-session command side
//! - [`UpstreamEvent`] values arrive on a bounded channel; when the relay
//!   stops reading, the provider task stops reading its socket
//!
//! # Supported Providers
//!
//! - **Gemini Live** - bidirectional audio over WebSocket
//!
//! # Audio Format
//!
//! - Input: PCM 16-bit signed little-endian at 16 kHz
//! - Output: PCM 16-bit signed little-endian at 24 kHz

mod base;
pub mod gemini;

pub use base::{
    OpenSessionRequest, UpstreamConnector, UpstreamError, UpstreamEvent, UpstreamHandle,
    UpstreamResult, UpstreamSession,
};
pub use gemini::{GEMINI_LIVE_URL, GeminiLiveConfig, GeminiLiveConnector};
