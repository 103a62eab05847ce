//! Error taxonomy for relay sessions.
//!
//! Only [`RelayError::TransportClosed`] is fatal for a session. Protocol errors
//! are recovered locally (the offending message is dropped), resource exhaustion
//! applies backpressure, and upstream failures are surfaced to the client as an
//! interruption.

use thiserror::Error;

use crate::core::upstream::UpstreamError;

/// Malformed or out-of-sequence client input. The message is dropped and the
/// session continues.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ProtocolError {
    /// Text frame that is not a JSON object, lacks a string `type`, or lacks a
    /// required `data` field
    #[error("Invalid control message: {0}")]
    InvalidControlMessage(String),

    /// Data received before the `ready` handshake frame was delivered
    #[error("Data received before ready was sent")]
    PrematureData,

    /// Control message that is not valid in the current turn state
    #[error("Out-of-sequence message '{message}' in state {state}")]
    OutOfSequence {
        message: &'static str,
        state: &'static str,
    },

    /// Binary frame with no payload
    #[error("Empty audio frame")]
    EmptyAudioFrame,
}

/// Errors surfaced by the session pipeline.
#[derive(Debug, Error)]
pub enum RelayError {
    #[error("Protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    /// A buffer ceiling would be exceeded; the caller must back off
    #[error("Resource exhausted: {buffered} bytes buffered, ceiling {ceiling} bytes")]
    ResourceExhausted { buffered: usize, ceiling: usize },

    #[error("Upstream failure: {0}")]
    Upstream(#[from] UpstreamError),

    /// The client transport is gone. Always fatal for the session.
    #[error("Transport closed: {0}")]
    TransportClosed(String),
}

impl RelayError {
    /// Whether the session must be torn down.
    pub fn is_fatal(&self) -> bool {
        matches!(self, RelayError::TransportClosed(_))
    }

    /// Short machine-readable label used in structured logs.
    pub fn kind(&self) -> &'static str {
        match self {
            RelayError::Protocol(_) => "protocol_error",
            RelayError::ResourceExhausted { .. } => "resource_exhausted",
            RelayError::Upstream(_) => "upstream_failure",
            RelayError::TransportClosed(_) => "transport_closed",
        }
    }
}

/// Result type for relay operations.
pub type RelayResult<T> = Result<T, RelayError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_only_transport_closed_is_fatal() {
        assert!(RelayError::TransportClosed("reset".to_string()).is_fatal());
        assert!(!RelayError::Protocol(ProtocolError::PrematureData).is_fatal());
        assert!(
            !RelayError::ResourceExhausted {
                buffered: 10,
                ceiling: 5
            }
            .is_fatal()
        );
        assert!(!RelayError::Upstream(UpstreamError::NotConnected).is_fatal());
    }

    #[test]
    fn test_error_display() {
        let err = RelayError::from(ProtocolError::OutOfSequence {
            message: "text",
            state: "ModelResponding",
        });
        assert_eq!(
            err.to_string(),
            "Protocol error: Out-of-sequence message 'text' in state ModelResponding"
        );
        assert_eq!(err.kind(), "protocol_error");

        let err = RelayError::ResourceExhausted {
            buffered: 300,
            ceiling: 256,
        };
        assert!(err.to_string().contains("ceiling 256"));
    }
}
