//! # deskcast-core
//!
//! Frame streaming and input relay engine for the deskcast remote
//! desktop host.
//!
//! This crate contains:
//! - **Protocol**: `ServerMessage`, `InputEvent`, `MouseButton` wire types
//! - **Codec**: `JsonCodec` turning frames into JSON text and viewer
//!   messages into input events
//! - **Stream**: capture sources, the JPEG encoder, the periodic capture
//!   loop, per-session drop-oldest queues, input replayers
//! - **Session**: `SessionManager` with its capped registry and the
//!   serialized replay dispatcher
//! - **Network**: `StreamServer`, the WebSocket front end
//! - **Error**: `DeskError` / `DecodeError`, typed `thiserror` hierarchy

pub mod codec;
pub mod error;
pub mod network;
pub mod protocol;
pub mod session;
pub mod stream;

// ── Re-exports for ergonomic usage ───────────────────────────────

pub use codec::JsonCodec;
pub use error::{DecodeError, DeskError};
pub use network::{BUSY_REASON, HANDSHAKE_TIMEOUT, StreamServer};
pub use protocol::{FRAME_ENCODING, InputEvent, MouseButton, ServerMessage};
pub use session::{
    CLOSE_GOING_AWAY, ManagerConfig, ReplayDispatcher, Session, SessionId, SessionManager,
    SessionPhase,
};
pub use stream::{
    CaptureConfig, CaptureService, CaptureSource, Frame, FrameEncoder, FrameSink, InputReplayer,
    JpegFrameEncoder, OsInputReplayer, OutboundQueue, TestPatternSource, TracingReplayer,
};
