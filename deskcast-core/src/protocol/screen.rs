//! Remote desktop wire messages.
//!
//! # Wire Protocol
//!
//! One persistent WebSocket per viewer, JSON text messages.
//!
//! ## Frames (continuous)
//! ```text
//! Host   ──[frame]────────────────────────────► Viewer   (repeated)
//!   {"type":"frame","timestamp":1730.12,"encoding":"jpeg-base64",
//!    "width":1920,"height":1080,"quality":60,"data":"<base64>"}
//! ```
//!
//! ## Input
//! ```text
//! Viewer ──[mouse]────────────────────────────► Host
//!   {"type":"mouse","action":"move","x":100,"y":200}
//!   {"type":"mouse","action":"click","button":"left"}
//!
//! Viewer ──[keyboard]─────────────────────────► Host
//!   {"type":"keyboard","action":"keydown","key":"a"}
//!   {"type":"keyboard","action":"keyup","key":"a"}
//! ```

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::DecodeError;

/// The only frame encoding this host emits.
pub const FRAME_ENCODING: &str = "jpeg-base64";

// ── Outbound ──────────────────────────────────────────────────────

/// Messages sent from host to viewer.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum ServerMessage {
    /// One encoded screen capture.
    Frame {
        /// Capture time, seconds since the Unix epoch.
        timestamp: f64,
        /// Always [`FRAME_ENCODING`].
        encoding: String,
        width: u32,
        height: u32,
        quality: u8,
        /// Base64 of the compressed image.
        data: String,
    },
}

// ── Mouse Input ───────────────────────────────────────────────────

/// Mouse button named by a `click` message.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum MouseButton {
    Left,
    Right,
    Middle,
}

impl MouseButton {
    pub fn as_str(self) -> &'static str {
        match self {
            MouseButton::Left => "left",
            MouseButton::Right => "right",
            MouseButton::Middle => "middle",
        }
    }
}

impl fmt::Display for MouseButton {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for MouseButton {
    type Err = DecodeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "left" => Ok(MouseButton::Left),
            "right" => Ok(MouseButton::Right),
            "middle" => Ok(MouseButton::Middle),
            _ => Err(DecodeError::InvalidField {
                field: "button",
                expected: "\"left\", \"right\" or \"middle\"",
            }),
        }
    }
}

// ── InputEvent ────────────────────────────────────────────────────

/// A decoded viewer input event, ready for the input replayer.
///
/// Coordinates are already in capture resolution; the host applies no
/// transformation.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum InputEvent {
    MouseMove { x: i32, y: i32 },
    MouseClick { button: MouseButton },
    KeyDown { key: String },
    KeyUp { key: String },
}

impl InputEvent {
    /// Short name for logs.
    pub fn kind(&self) -> &'static str {
        match self {
            InputEvent::MouseMove { .. } => "mouse-move",
            InputEvent::MouseClick { .. } => "mouse-click",
            InputEvent::KeyDown { .. } => "key-down",
            InputEvent::KeyUp { .. } => "key-up",
        }
    }
}

impl fmt::Display for InputEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            InputEvent::MouseMove { x, y } => write!(f, "mouse move to ({x}, {y})"),
            InputEvent::MouseClick { button } => write!(f, "mouse click {button}"),
            InputEvent::KeyDown { key } => write!(f, "key down '{key}'"),
            InputEvent::KeyUp { key } => write!(f, "key up '{key}'"),
        }
    }
}

// ── Tests ─────────────────────────────────────────────────────────
