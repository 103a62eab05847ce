//! Base traits and types for the upstream speech model.
//!
//! The relay treats the upstream model as an opaque duplex stream: PCM and
//! text go in through an [`UpstreamHandle`], and audio, transcripts and turn
//! events come back on an [`UpstreamEvent`] channel.
//!
//! # Ownership
//!
//! An [`UpstreamConnector`] is shared by every session but holds only
//! immutable configuration. Each call to [`UpstreamConnector::open_session`]
//! yields a fresh [`UpstreamSession`] that is owned by exactly one relay
//! session. Handles are never pooled or shared across connections.

use async_trait::async_trait;
use bytes::Bytes;
use thiserror::Error;
use tokio::sync::mpsc;

use crate::core::audio::AudioFrame;

// =============================================================================
// Error Types
// =============================================================================

/// Errors that can occur while talking to the upstream model.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum UpstreamError {
    /// Connection to the upstream service failed
    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    /// The upstream refused to resume the presented session identifier
    #[error("Session resumption rejected: {0}")]
    ResumeRejected(String),

    /// No live upstream connection
    #[error("Not connected")]
    NotConnected,

    /// A message could not be handed to the upstream connection
    #[error("Send failed: {0}")]
    SendFailed(String),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Operation timeout
    #[error("Operation timed out: {0}")]
    Timeout(String),

    /// The outgoing queue toward the upstream socket is full
    #[error("Outgoing queue full")]
    QueueFull,

    /// The upstream connection was closed
    #[error("Connection closed")]
    Closed,
}

/// Result type for upstream operations.
pub type UpstreamResult<T> = Result<T, UpstreamError>;

// =============================================================================
// Events
// =============================================================================

/// Events produced by the upstream model, in production order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UpstreamEvent {
    /// Synthesized speech (PCM16 mono, 24 kHz)
    AudioChunk(Bytes),
    /// Transcript fragment of the model's speech
    TextChunk(String),
    /// The model finished its response
    TurnComplete,
    /// The model stopped its response because it detected user speech
    Interrupted,
    /// Resumable session identifier issued by the upstream
    SessionId(String),
    /// Transcript fragment of the user's speech
    InputTranscript(String),
    /// The upstream will close this connection soon
    GoAway {
        /// Remaining time as reported by the upstream
        time_left: Option<String>,
    },
    /// Upstream-side error; treated as an upstream failure
    Error(String),
}

// =============================================================================
// Traits
// =============================================================================

/// Parameters for opening an upstream session.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct OpenSessionRequest {
    /// Previously issued session identifier to resume, if any
    pub resume_handle: Option<String>,
}

impl OpenSessionRequest {
    pub fn fresh() -> Self {
        Self::default()
    }

    pub fn resume(handle: impl Into<String>) -> Self {
        Self {
            resume_handle: Some(handle.into()),
        }
    }
}

/// A freshly opened upstream session: the command side and the event side.
pub struct UpstreamSession {
    pub handle: Box<dyn UpstreamHandle>,
    pub events: mpsc::Receiver<UpstreamEvent>,
}

impl std::fmt::Debug for UpstreamSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("UpstreamSession").finish_non_exhaustive()
    }
}

/// Opens upstream sessions.
#[async_trait]
pub trait UpstreamConnector: Send + Sync {
    /// Open a new upstream session, optionally resuming a previous one.
    ///
    /// Returns [`UpstreamError::ResumeRejected`] when a resume handle was
    /// supplied and the upstream refused it.
    async fn open_session(&self, request: OpenSessionRequest) -> UpstreamResult<UpstreamSession>;

    /// Provider name for logs and health output.
    fn name(&self) -> &'static str;
}

/// Command side of one upstream session.
#[async_trait]
pub trait UpstreamHandle: Send + Sync {
    /// Forward a capture frame (PCM16 mono, 16 kHz).
    async fn send_audio(&mut self, frame: AudioFrame) -> UpstreamResult<()>;

    /// Send text as user input; completes the user turn.
    async fn send_text(&mut self, text: &str) -> UpstreamResult<()>;

    /// Signal the end of the user's spoken turn.
    async fn end_user_turn(&mut self) -> UpstreamResult<()>;

    /// Ask the upstream to abandon the response in flight. Best-effort:
    /// audio already produced may still arrive.
    async fn cancel_response(&mut self) -> UpstreamResult<()>;

    /// Audio bytes accepted by this handle but not yet written upstream.
    fn pending_audio_bytes(&self) -> usize;

    /// Close the upstream connection. Best-effort, never retried.
    async fn close(&mut self);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = UpstreamError::ConnectionFailed("refused".to_string());
        assert!(err.to_string().contains("Connection failed"));

        assert_eq!(UpstreamError::NotConnected.to_string(), "Not connected");
        assert_eq!(UpstreamError::QueueFull.to_string(), "Outgoing queue full");
        assert!(
            UpstreamError::ResumeRejected("expired".to_string())
                .to_string()
                .contains("resumption rejected")
        );
    }

    #[test]
    fn test_open_session_request() {
        assert_eq!(OpenSessionRequest::fresh().resume_handle, None);
        assert_eq!(
            OpenSessionRequest::resume("abc").resume_handle.as_deref(),
            Some("abc")
        );
    }
}
