//! Control-event router.
//!
//! Maps decoded client frames and upstream events onto turn-machine triggers,
//! carrying the payload the resulting effect needs. Messages that never touch
//! turn state (session identifiers, input transcripts, go-away notices) are
//! routed directly. [`TurnTranscript`] gathers transcript fragments so each
//! exchange is logged once.

use crate::core::audio::AudioFrame;
use crate::core::upstream::UpstreamEvent;
use crate::errors::ProtocolError;

use super::codec::{ControlMessage, InboundFrame};
use super::turn::Trigger;

/// `interrupted` data sent when the user talks over the model.
pub const BARGE_IN_REASON: &str = "Response interrupted by user input";

/// `interrupted` data sent when the upstream model fails.
pub const UPSTREAM_ERROR_REASON: &str = "upstream_error";

/// Payload carried alongside a trigger.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Payload {
    None,
    Audio(AudioFrame),
    Text(String),
}

/// Where an input goes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Route {
    /// Drive the turn machine
    Turn(Trigger, Payload),
    /// Record and relay a resumable session identifier
    SessionId(String),
    /// Transcript fragment of the user's speech; logged, never relayed
    UserTranscript(String),
    /// Nothing to do
    Ignore,
}

/// Route a decoded client frame.
pub fn route_client(frame: InboundFrame) -> Result<Route, ProtocolError> {
    match frame {
        InboundFrame::Audio(audio) if audio.is_empty() => Err(ProtocolError::EmptyAudioFrame),
        InboundFrame::Audio(audio) => Ok(Route::Turn(Trigger::InboundAudio, Payload::Audio(audio))),
        InboundFrame::Control(ControlMessage::End) => Ok(Route::Turn(Trigger::ClientEnd, Payload::None)),
        InboundFrame::Control(ControlMessage::Text(text)) => {
            Ok(Route::Turn(Trigger::ClientText, Payload::Text(text)))
        }
        InboundFrame::Control(other) => {
            // ready, turn_complete, interrupted and session_id are server-to-client only
            tracing::debug!(message = other.type_name(), "Ignoring server-only message from client");
            Ok(Route::Ignore)
        }
    }
}

/// Route an upstream event.
pub fn route_upstream(event: UpstreamEvent) -> Route {
    match event {
        UpstreamEvent::AudioChunk(data) => Route::Turn(
            Trigger::UpstreamAudio,
            Payload::Audio(AudioFrame::outbound(data)),
        ),
        UpstreamEvent::TextChunk(text) => Route::Turn(Trigger::UpstreamText, Payload::Text(text)),
        UpstreamEvent::TurnComplete => Route::Turn(Trigger::UpstreamTurnComplete, Payload::None),
        UpstreamEvent::Interrupted => Route::Turn(Trigger::UpstreamInterrupted, Payload::None),
        UpstreamEvent::Error(message) => {
            Route::Turn(Trigger::UpstreamFailure, Payload::Text(message))
        }
        UpstreamEvent::SessionId(id) => Route::SessionId(id),
        UpstreamEvent::InputTranscript(text) => Route::UserTranscript(text),
        UpstreamEvent::GoAway { time_left } => {
            tracing::warn!(?time_left, "Upstream will disconnect soon");
            Route::Ignore
        }
    }
}

/// Both sides of one exchange, joined from upstream transcript fragments.
#[derive(Debug, Default)]
pub struct TurnTranscript {
    user: String,
    model: String,
}

impl TurnTranscript {
    pub fn push_user(&mut self, fragment: &str) {
        self.user.push_str(fragment);
    }

    pub fn push_model(&mut self, fragment: &str) {
        self.model.push_str(fragment);
    }

    pub fn is_empty(&self) -> bool {
        self.user.is_empty() && self.model.is_empty()
    }

    /// Hand back `(user, model)` and start the next exchange empty.
    pub fn take(&mut self) -> (String, String) {
        (
            std::mem::take(&mut self.user),
            std::mem::take(&mut self.model),
        )
    }
}
