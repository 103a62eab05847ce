//! Relay WebSocket endpoint
//!
//! # Protocol
//!
//! Client to server:
//! - Binary frames: PCM16 LE mono 16 kHz capture audio
//! - `{"type":"end"}`: end of the user's spoken turn
//! - `{"type":"text","data":"..."}`: a complete typed user turn
//!
//! Server to client:
//! - `{"type":"ready"}`: always first; audio is accepted afterwards
//! - Binary frames: PCM16 LE mono 24 kHz playback audio
//! - `{"type":"text","data":"..."}`: transcript of the model's speech
//! - `{"type":"turn_complete"}`, `{"type":"interrupted","data":"..."}`
//! - `{"type":"session_id","data":"..."}`: pass back as `?session_id=` to resume

mod handler;

pub use handler::{RelayParams, relay_handler};
