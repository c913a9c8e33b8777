//! Viewer sessions and their registry.

pub mod manager;
pub mod phase;
pub mod replay;
pub mod state;

pub use manager::{CLOSE_GOING_AWAY, ManagerConfig, SessionManager};
pub use phase::SessionPhase;
pub use replay::{REPLAY_QUEUE_DEPTH, ReplayDispatcher, ReplayStats};
pub use state::{Session, SessionId, SessionSummary};
