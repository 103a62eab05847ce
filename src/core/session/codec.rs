//! Frame codec: classifies inbound wire messages and serializes outbound frames.
//!
//! Binary frames are raw PCM with no header. Text frames are JSON objects with
//! a string `type` and an optional string `data`:
//!
//! | type            | data     |
//! |-----------------|----------|
//! | `ready`         | absent   |
//! | `text`          | required |
//! | `end`           | absent   |
//! | `turn_complete` | absent   |
//! | `interrupted`   | required |
//! | `session_id`    | required |
//!
//! Unknown types decode to `None` so newer peers can add messages freely.

use serde::Deserialize;

use super::transport::WireMessage;
use crate::core::audio::AudioFrame;
use crate::errors::ProtocolError;

/// A JSON control message, in either direction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ControlMessage {
    Ready,
    Text(String),
    End,
    TurnComplete,
    Interrupted(String),
    SessionId(String),
}

impl ControlMessage {
    /// The wire `type` value.
    pub fn type_name(&self) -> &'static str {
        match self {
            ControlMessage::Ready => "ready",
            ControlMessage::Text(_) => "text",
            ControlMessage::End => "end",
            ControlMessage::TurnComplete => "turn_complete",
            ControlMessage::Interrupted(_) => "interrupted",
            ControlMessage::SessionId(_) => "session_id",
        }
    }

    /// Serialize to the wire JSON body.
    pub fn to_json(&self) -> String {
        match self {
            ControlMessage::Ready | ControlMessage::End | ControlMessage::TurnComplete => {
                format!(r#"{{"type":"{}"}}"#, self.type_name())
            }
            ControlMessage::Text(data)
            | ControlMessage::Interrupted(data)
            | ControlMessage::SessionId(data) => serde_json::json!({
                "type": self.type_name(),
                "data": data,
            })
            .to_string(),
        }
    }
}

/// Lenient shape used to decode control frames before validating them.
#[derive(Debug, Deserialize)]
struct RawControl {
    #[serde(rename = "type")]
    kind: Option<serde_json::Value>,
    data: Option<serde_json::Value>,
}

/// A classified inbound frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InboundFrame {
    Audio(AudioFrame),
    Control(ControlMessage),
}

/// A frame queued for delivery to the client.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OutboundFrame {
    Control(ControlMessage),
    Audio(AudioFrame),
}

impl OutboundFrame {
    /// Bytes this frame counts against the jitter ceiling.
    pub fn audio_len(&self) -> usize {
        match self {
            OutboundFrame::Audio(frame) => frame.len(),
            OutboundFrame::Control(_) => 0,
        }
    }
}

/// Decode a control message from a text frame.
///
/// Returns `Ok(None)` for a well-formed message with an unrecognized `type`.
pub fn decode_control(text: &str) -> Result<Option<ControlMessage>, ProtocolError> {
    let value: serde_json::Value = serde_json::from_str(text)
        .map_err(|e| ProtocolError::InvalidControlMessage(format!("invalid JSON: {e}")))?;
    if !value.is_object() {
        return Err(ProtocolError::InvalidControlMessage(
            "not a JSON object".to_string(),
        ));
    }

    let raw: RawControl = serde_json::from_value(value)
        .map_err(|e| ProtocolError::InvalidControlMessage(e.to_string()))?;

    let kind = match raw.kind {
        Some(serde_json::Value::String(kind)) => kind,
        Some(_) => {
            return Err(ProtocolError::InvalidControlMessage(
                "`type` is not a string".to_string(),
            ));
        }
        None => {
            return Err(ProtocolError::InvalidControlMessage(
                "missing `type`".to_string(),
            ));
        }
    };

    let required = |data: Option<serde_json::Value>| match data {
        Some(serde_json::Value::String(data)) => Ok(data),
        Some(_) => Err(ProtocolError::InvalidControlMessage(format!(
            "`{kind}` data is not a string"
        ))),
        None => Err(ProtocolError::InvalidControlMessage(format!(
            "`{kind}` requires data"
        ))),
    };

    let message = match kind.as_str() {
        "ready" => ControlMessage::Ready,
        "end" => ControlMessage::End,
        "turn_complete" => ControlMessage::TurnComplete,
        "text" => {
            let text = required(raw.data)?;
            if text.trim().is_empty() {
                return Err(ProtocolError::InvalidControlMessage(
                    "`text` data is empty".to_string(),
                ));
            }
            ControlMessage::Text(text)
        }
        "interrupted" => ControlMessage::Interrupted(required(raw.data)?),
        "session_id" => ControlMessage::SessionId(required(raw.data)?),
        _ => return Ok(None),
    };
    Ok(Some(message))
}

/// Classify an inbound wire message.
///
/// `Close` is not a frame and yields `Ok(None)`; callers handle it before
/// decoding.
pub fn decode(message: WireMessage) -> Result<Option<InboundFrame>, ProtocolError> {
    match message {
        WireMessage::Binary(data) => Ok(Some(InboundFrame::Audio(AudioFrame::inbound(data)))),
        WireMessage::Text(text) => Ok(decode_control(&text)?.map(InboundFrame::Control)),
        WireMessage::Close => Ok(None),
    }
}

/// Serialize an outbound frame. Audio bytes are sent verbatim.
pub fn encode(frame: OutboundFrame) -> WireMessage {
    match frame {
        OutboundFrame::Audio(audio) => WireMessage::Binary(audio.into_data()),
        OutboundFrame::Control(control) => WireMessage::Text(control.to_json()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;

    #[test]
    fn test_decode_known_types() {
        assert_eq!(
            decode_control(r#"{"type":"end"}"#).unwrap(),
            Some(ControlMessage::End)
        );
        assert_eq!(
            decode_control(r#"{"type":"text","data":"hello"}"#).unwrap(),
            Some(ControlMessage::Text("hello".to_string()))
        );
        assert_eq!(
            decode_control(r#"{"type":"session_id","data":"abc"}"#).unwrap(),
            Some(ControlMessage::SessionId("abc".to_string()))
        );
        // Extra fields are tolerated
        assert_eq!(
            decode_control(r#"{"type":"end","ts":12}"#).unwrap(),
            Some(ControlMessage::End)
        );
    }

    #[test]
    fn test_unknown_type_is_dropped_silently() {
        assert_eq!(decode_control(r#"{"type":"ping"}"#).unwrap(), None);
        assert_eq!(
            decode_control(r#"{"type":"future","data":{"x":1}}"#).unwrap(),
            None
        );
    }

    #[test]
    fn test_malformed_payloads() {
        for raw in [
            "not json",
            "[1,2,3]",
            r#""end""#,
            r#"{"data":"x"}"#,
            r#"{"type":5}"#,
            r#"{"type":"text"}"#,
            r#"{"type":"interrupted","data":7}"#,
        ] {
            assert!(
                matches!(
                    decode_control(raw),
                    Err(ProtocolError::InvalidControlMessage(_))
                ),
                "expected InvalidControlMessage for {raw}"
            );
        }
    }

    #[test]
    fn test_blank_text_is_rejected() {
        for raw in [r#"{"type":"text","data":""}"#, r#"{"type":"text","data":"  \n"}"#] {
            assert_eq!(
                decode_control(raw),
                Err(ProtocolError::InvalidControlMessage(
                    "`text` data is empty".to_string()
                ))
            );
        }
        assert_eq!(
            decode_control(r#"{"type":"text","data":" hi "}"#),
            Ok(Some(ControlMessage::Text(" hi ".to_string())))
        );
    }

    #[test]
    fn test_decode_binary_is_opaque_audio() {
        let frame = decode(WireMessage::Binary(Bytes::from_static(b"{\"type\":\"end\"}")))
            .unwrap()
            .unwrap();
        match frame {
            InboundFrame::Audio(audio) => assert_eq!(audio.sample_rate(), 16000),
            other => panic!("expected audio, got {other:?}"),
        }
    }

    #[test]
    fn test_encode_controls() {
        let text = |frame| match encode(OutboundFrame::Control(frame)) {
            WireMessage::Text(text) => serde_json::from_str::<serde_json::Value>(&text).unwrap(),
            other => panic!("expected text, got {other:?}"),
        };

        assert_eq!(text(ControlMessage::Ready), serde_json::json!({"type": "ready"}));
        assert_eq!(
            text(ControlMessage::TurnComplete),
            serde_json::json!({"type": "turn_complete"})
        );
        assert_eq!(
            text(ControlMessage::Interrupted("upstream_error".to_string())),
            serde_json::json!({"type": "interrupted", "data": "upstream_error"})
        );
    }

    #[test]
    fn test_encode_audio_verbatim() {
        let payload = Bytes::from_static(&[1, 2, 3, 4]);
        assert_eq!(
            encode(OutboundFrame::Audio(AudioFrame::outbound(payload.clone()))),
            WireMessage::Binary(payload)
        );
    }
}
