//! Turn state machine.
//!
//! Tracks whose turn it is and decides what every client signal and upstream
//! event means for the session. The machine is pure: it returns an [`Effect`]
//! and the session manager performs the I/O.
//!
//! ```text
//!            audio                     end / text
//!   Idle ─────────────► UserSpeaking ─────────────► ModelResponding
//!    ▲                    ▲    ▲                       │   │
//!    │                    │    └────── barge-in ───────┘   │
//!    └──────────────────── turn complete ──────────────────┘
//! ```
//!
//! After a barge-in the interrupted response is *abandoned*: any audio or text
//! still arriving for it is discarded until the upstream acknowledges the
//! interruption (`TurnComplete` or `Interrupted`) or the client commits a new
//! turn.

use crate::errors::ProtocolError;

/// Whose turn it is.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TurnState {
    #[default]
    Idle,
    UserSpeaking,
    ModelResponding,
}

impl TurnState {
    pub fn name(&self) -> &'static str {
        match self {
            TurnState::Idle => "Idle",
            TurnState::UserSpeaking => "UserSpeaking",
            TurnState::ModelResponding => "ModelResponding",
        }
    }
}

impl std::fmt::Display for TurnState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

/// Inputs to the machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Trigger {
    /// Non-empty capture frame from the client
    InboundAudio,
    /// Client `end`
    ClientEnd,
    /// Client `text`
    ClientText,
    /// Audio chunk from the upstream
    UpstreamAudio,
    /// Transcript fragment of the model's speech
    UpstreamText,
    UpstreamTurnComplete,
    /// Upstream detected user speech and stopped its response
    UpstreamInterrupted,
    /// Upstream error, closed event stream or failed send
    UpstreamFailure,
}

/// What the session must do in response to a trigger.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Effect {
    /// Forward the capture frame upstream
    ForwardAudio,
    /// Emit `interrupted`, clear the jitter buffer, cancel the upstream
    /// response, then forward the capture frame
    BargeIn,
    /// Signal end of user turn upstream
    EndUserTurn,
    /// Forward the text upstream as a complete user turn
    SubmitText,
    /// Enqueue the upstream audio or text for the client
    Deliver,
    /// Emit `turn_complete` after any queued audio
    CompleteTurn,
    /// Emit `interrupted` and clear the jitter buffer
    Interrupt,
    /// Emit `interrupted` with `upstream_error`, clear the jitter buffer and
    /// release the upstream handle
    Fail,
    /// Discard output belonging to an abandoned response
    Discard,
    /// Nothing to do
    Ignore,
    /// Drop the client message as out of sequence
    Reject(ProtocolError),
}

/// Per-session turn state.
#[derive(Debug, Default)]
pub struct TurnMachine {
    state: TurnState,
    abandoned: bool,
}

impl TurnMachine {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn state(&self) -> TurnState {
        self.state
    }

    /// Whether output from an interrupted response is still being discarded.
    pub fn is_abandoned(&self) -> bool {
        self.abandoned
    }

    /// Apply a trigger and return the effect the caller must perform.
    pub fn apply(&mut self, trigger: Trigger) -> Effect {
        use TurnState::*;

        match (trigger, self.state) {
            (Trigger::InboundAudio, ModelResponding) => {
                self.state = UserSpeaking;
                self.abandoned = true;
                Effect::BargeIn
            }
            (Trigger::InboundAudio, _) => {
                self.state = UserSpeaking;
                Effect::ForwardAudio
            }

            (Trigger::ClientEnd, UserSpeaking) => {
                self.state = ModelResponding;
                self.abandoned = false;
                Effect::EndUserTurn
            }
            (Trigger::ClientEnd, _) => Effect::Ignore,

            (Trigger::ClientText, ModelResponding) => Effect::Reject(ProtocolError::OutOfSequence {
                message: "text",
                state: ModelResponding.name(),
            }),
            (Trigger::ClientText, _) => {
                self.state = ModelResponding;
                self.abandoned = false;
                Effect::SubmitText
            }

            (Trigger::UpstreamAudio | Trigger::UpstreamText, _) if self.abandoned => {
                Effect::Discard
            }
            (Trigger::UpstreamAudio, _) => {
                self.state = ModelResponding;
                Effect::Deliver
            }
            (Trigger::UpstreamText, _) => Effect::Deliver,

            (Trigger::UpstreamTurnComplete | Trigger::UpstreamInterrupted, _)
                if self.abandoned =>
            {
                self.abandoned = false;
                Effect::Discard
            }
            (Trigger::UpstreamTurnComplete, _) => {
                self.state = Idle;
                Effect::CompleteTurn
            }
            (Trigger::UpstreamInterrupted, ModelResponding) => {
                self.state = UserSpeaking;
                Effect::Interrupt
            }
            (Trigger::UpstreamInterrupted, _) => Effect::Ignore,

            (Trigger::UpstreamFailure, _) => {
                self.state = Idle;
                self.abandoned = false;
                Effect::Fail
            }
        }
    }
}
