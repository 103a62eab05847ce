//! Gemini Live WebSocket message types.
//!
//! All messages are JSON objects keyed by a single camelCase message name.
//!
//! Client messages (sent to server):
//! - setup - First message; model, voice and session resumption
//! - realtimeInput - Streaming audio and end-of-stream signal
//! - clientContent - Text turns
//!
//! Server messages (received from server):
//! - setupComplete - Session is open
//! - serverContent - Model audio, transcriptions, turn and interruption flags
//! - sessionResumptionUpdate - New resumable handle
//! - goAway - Server will disconnect soon
//! - toolCall, usageMetadata - Not used by the relay

use base64::prelude::*;
use serde::{Deserialize, Serialize};

use super::config::{GEMINI_INPUT_MIME_TYPE, GeminiLiveConfig};
use crate::core::upstream::UpstreamEvent;

// =============================================================================
// Shared Types
// =============================================================================

/// A conversation turn.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Content {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub role: Option<String>,
    #[serde(default)]
    pub parts: Vec<Part>,
}

/// One part of a turn: text or inline media.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Part {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub inline_data: Option<Blob>,
}

/// Base64 media payload.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Blob {
    pub mime_type: String,
    pub data: String,
}

/// Empty object used to enable a feature (`{}`).
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct Enabled {}

// =============================================================================
// Client Messages
// =============================================================================

/// Messages sent to the Gemini Live server.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum ClientMessage {
    Setup(Setup),
    RealtimeInput(RealtimeInput),
    ClientContent(ClientContent),
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Setup {
    pub model: String,
    pub generation_config: GenerationConfig,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub system_instruction: Option<Content>,
    pub input_audio_transcription: Enabled,
    pub output_audio_transcription: Enabled,
    pub session_resumption: SessionResumption,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GenerationConfig {
    pub response_modalities: Vec<String>,
    pub speech_config: SpeechConfig,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SpeechConfig {
    pub voice_config: VoiceConfig,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct VoiceConfig {
    pub prebuilt_voice_config: PrebuiltVoiceConfig,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PrebuiltVoiceConfig {
    pub voice_name: String,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct SessionResumption {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub handle: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RealtimeInput {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub audio: Option<Blob>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub audio_stream_end: Option<bool>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ClientContent {
    pub turns: Vec<Content>,
    pub turn_complete: bool,
}

impl ClientMessage {
    /// Build the setup message for a new or resumed session.
    pub fn setup(config: &GeminiLiveConfig, resume_handle: Option<String>) -> Self {
        ClientMessage::Setup(Setup {
            model: config.model_resource(),
            generation_config: GenerationConfig {
                response_modalities: vec!["AUDIO".to_string()],
                speech_config: SpeechConfig {
                    voice_config: VoiceConfig {
                        prebuilt_voice_config: PrebuiltVoiceConfig {
                            voice_name: config.voice.clone(),
                        },
                    },
                },
            },
            system_instruction: config.system_instruction.as_ref().map(|text| Content {
                role: None,
                parts: vec![Part {
                    text: Some(text.clone()),
                    inline_data: None,
                }],
            }),
            input_audio_transcription: Enabled {},
            output_audio_transcription: Enabled {},
            session_resumption: SessionResumption {
                handle: resume_handle,
            },
        })
    }

    /// Wrap 16 kHz PCM in a realtime input message.
    pub fn audio(pcm: &[u8]) -> Self {
        ClientMessage::RealtimeInput(RealtimeInput {
            audio: Some(Blob {
                mime_type: GEMINI_INPUT_MIME_TYPE.to_string(),
                data: BASE64_STANDARD.encode(pcm),
            }),
            audio_stream_end: None,
        })
    }

    pub fn audio_stream_end() -> Self {
        ClientMessage::RealtimeInput(RealtimeInput {
            audio: None,
            audio_stream_end: Some(true),
        })
    }

    /// A complete user text turn.
    pub fn user_text(text: &str) -> Self {
        ClientMessage::ClientContent(ClientContent {
            turns: vec![Content {
                role: Some("user".to_string()),
                parts: vec![Part {
                    text: Some(text.to_string()),
                    inline_data: None,
                }],
            }],
            turn_complete: true,
        })
    }
}

// =============================================================================
// Server Messages
// =============================================================================

/// A server message. Exactly one top-level field is normally present.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ServerMessage {
    pub setup_complete: Option<serde_json::Value>,
    pub server_content: Option<ServerContent>,
    pub session_resumption_update: Option<SessionResumptionUpdate>,
    pub go_away: Option<GoAway>,
    pub tool_call: Option<serde_json::Value>,
    pub usage_metadata: Option<serde_json::Value>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ServerContent {
    pub model_turn: Option<Content>,
    pub turn_complete: Option<bool>,
    pub generation_complete: Option<bool>,
    pub interrupted: Option<bool>,
    pub input_transcription: Option<Transcription>,
    pub output_transcription: Option<Transcription>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Transcription {
    pub text: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct SessionResumptionUpdate {
    pub new_handle: Option<String>,
    pub resumable: Option<bool>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct GoAway {
    pub time_left: Option<String>,
}

impl ServerMessage {
    pub fn is_setup_complete(&self) -> bool {
        self.setup_complete.is_some()
    }

    /// Translate into relay events, in the order the relay must observe them.
    ///
    /// `interrupted` precedes any audio in the same message and `turnComplete`
    /// follows it.
    pub fn into_events(self) -> Vec<UpstreamEvent> {
        let mut events = Vec::new();

        if let Some(update) = self.session_resumption_update
            && update.resumable.unwrap_or(false)
            && let Some(handle) = update.new_handle.filter(|h| !h.is_empty())
        {
            events.push(UpstreamEvent::SessionId(handle));
        }

        if let Some(go_away) = self.go_away {
            events.push(UpstreamEvent::GoAway {
                time_left: go_away.time_left,
            });
        }

        let Some(content) = self.server_content else {
            return events;
        };

        if content.interrupted.unwrap_or(false) {
            events.push(UpstreamEvent::Interrupted);
        }

        if let Some(transcript) = content.input_transcription.and_then(|t| t.text)
            && !transcript.is_empty()
        {
            events.push(UpstreamEvent::InputTranscript(transcript));
        }

        if let Some(turn) = content.model_turn {
            for part in turn.parts {
                let Some(blob) = part.inline_data else {
                    continue;
                };
                match BASE64_STANDARD.decode(blob.data.as_bytes()) {
                    Ok(pcm) if !pcm.is_empty() => {
                        events.push(UpstreamEvent::AudioChunk(pcm.into()));
                    }
                    Ok(_) => {}
                    Err(e) => {
                        tracing::warn!("Skipping undecodable inline audio: {}", e);
                    }
                }
            }
        }

        if let Some(transcript) = content.output_transcription.and_then(|t| t.text)
            && !transcript.is_empty()
        {
            events.push(UpstreamEvent::TextChunk(transcript));
        }

        if content.turn_complete.unwrap_or(false) {
            events.push(UpstreamEvent::TurnComplete);
        }

        events
    }
}
