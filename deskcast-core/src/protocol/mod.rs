//! Wire payload definitions shared by the host and its viewers.
//!
//! Payloads are JSON objects carried in WebSocket text messages; the
//! [`JsonCodec`](crate::codec::JsonCodec) turns frames into them and
//! turns inbound messages into [`InputEvent`]s.

pub mod screen;

pub use screen::{FRAME_ENCODING, InputEvent, MouseButton, ServerMessage};
