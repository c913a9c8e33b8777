//! JSON codec for the viewer protocol.
//!
//! Outbound: [`Frame`] → `{"type":"frame", ...}` text.
//! Inbound: raw message bytes → [`InputEvent`], validating every field
//! the variant needs. Anything unexpected is a [`DecodeError`]; callers
//! drop the message and keep the session.

use base64::Engine;
use base64::engine::general_purpose::STANDARD as BASE64;
use serde_json::{Map, Value};

use crate::error::{DecodeError, DeskError};
use crate::protocol::screen::{FRAME_ENCODING, InputEvent, MouseButton, ServerMessage};
use crate::stream::types::Frame;

/// Stateless encoder/decoder for the JSON wire format.
#[derive(Debug, Clone, Copy, Default)]
pub struct JsonCodec;

impl JsonCodec {
    pub fn new() -> Self {
        Self
    }

    /// Build the wire message for `frame`.
    pub fn frame_message(&self, frame: &Frame) -> ServerMessage {
        ServerMessage::Frame {
            timestamp: frame.timestamp(),
            encoding: FRAME_ENCODING.to_string(),
            width: frame.width(),
            height: frame.height(),
            quality: frame.quality(),
            data: BASE64.encode(frame.encoded_bytes()),
        }
    }

    /// Serialize `frame` to a JSON text message.
    pub fn encode_frame(&self, frame: &Frame) -> Result<String, DeskError> {
        serde_json::to_string(&self.frame_message(frame))
            .map_err(|e| DeskError::Other(format!("frame serialization failed: {e}")))
    }

    /// Decode one inbound message into an input event.
    pub fn decode_input(&self, raw: &[u8]) -> Result<InputEvent, DecodeError> {
        let value: Value = serde_json::from_slice(raw)?;
        let obj = value.as_object().ok_or(DecodeError::NotAnObject)?;

        let kind = required_str(obj, "type")?;
        match kind {
            "mouse" => decode_mouse(obj),
            "keyboard" => decode_keyboard(obj),
            other => Err(DecodeError::UnknownType(other.to_string())),
        }
    }
}

fn decode_mouse(obj: &Map<String, Value>) -> Result<InputEvent, DecodeError> {
    match required_str(obj, "action")? {
        "move" => Ok(InputEvent::MouseMove {
            x: required_coord(obj, "x")?,
            y: required_coord(obj, "y")?,
        }),
        "click" => Ok(InputEvent::MouseClick {
            button: required_str(obj, "button")?.parse::<MouseButton>()?,
        }),
        other => Err(DecodeError::UnknownAction {
            kind: "mouse",
            action: other.to_string(),
        }),
    }
}

fn decode_keyboard(obj: &Map<String, Value>) -> Result<InputEvent, DecodeError> {
    let action = required_str(obj, "action")?;
    let key = match action {
        "keydown" | "keyup" => required_key(obj)?,
        other => {
            return Err(DecodeError::UnknownAction {
                kind: "keyboard",
                action: other.to_string(),
            });
        }
    };
    if action == "keydown" {
        Ok(InputEvent::KeyDown { key })
    } else {
        Ok(InputEvent::KeyUp { key })
    }
}

// ── Field helpers ────────────────────────────────────────────────

fn required<'a>(obj: &'a Map<String, Value>, field: &'static str) -> Result<&'a Value, DecodeError> {
    match obj.get(field) {
        Some(Value::Null) | None => Err(DecodeError::MissingField(field)),
        Some(v) => Ok(v),
    }
}

fn required_str<'a>(obj: &'a Map<String, Value>, field: &'static str) -> Result<&'a str, DecodeError> {
    required(obj, field)?
        .as_str()
        .ok_or(DecodeError::InvalidField {
            field,
            expected: "a string",
        })
}

/// Integer or float (truncated toward zero) that fits an `i32`.
fn required_coord(obj: &Map<String, Value>, field: &'static str) -> Result<i32, DecodeError> {
    let invalid = DecodeError::InvalidField {
        field,
        expected: "a number within i32 range",
    };
    let value = required(obj, field)?;
    if let Some(i) = value.as_i64() {
        return i32::try_from(i).map_err(|_| invalid);
    }
    match value.as_f64() {
        Some(f) if f.is_finite() && f >= i32::MIN as f64 && f <= i32::MAX as f64 => {
            Ok(f.trunc() as i32)
        }
        _ => Err(invalid),
    }
}

fn required_key(obj: &Map<String, Value>) -> Result<String, DecodeError> {
    let key = required_str(obj, "key")?;
    if key.is_empty() {
        return Err(DecodeError::InvalidField {
            field: "key",
            expected: "a non-empty string",
        });
    }
    Ok(key.to_string())
}

// ── Tests ────────────────────────────────────────────────────────
