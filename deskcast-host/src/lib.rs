//! # deskcast-host: remote desktop streaming host
//!
//! Captures the local display, JPEG-encodes each frame and pushes it to
//! every connected WebSocket viewer. Mouse and keyboard events sent back
//! by viewers are replayed on the host.
//!
//! Configuration comes from a TOML file, `REMOTE_*` environment
//! variables and CLI flags; see [`config`].

pub mod config;
pub mod service;
