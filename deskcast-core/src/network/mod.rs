pub mod server;

pub use server::{BUSY_REASON, HANDSHAKE_TIMEOUT, StreamServer};
