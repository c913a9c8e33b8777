//! Serialized input replay shared by all sessions.
//!
//! Every session's decoded events go into one bounded FIFO drained by a
//! single dedicated thread, so the replayer is never called concurrently
//! and each session's events reach it in arrival order. Submitting never
//! waits: a full queue drops the event.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tracing::{debug, info, warn};

use crate::error::DeskError;
use crate::protocol::screen::InputEvent;
use crate::session::state::SessionId;
use crate::stream::input::InputReplayer;

/// Events waiting for the replay thread before new ones are dropped.
pub const REPLAY_QUEUE_DEPTH: usize = 1024;

#[derive(Debug)]
struct ReplayJob {
    session: SessionId,
    event: InputEvent,
}

/// Replay counters.
#[derive(Debug, Default)]
pub struct ReplayStats {
    submitted: AtomicU64,
    replayed: AtomicU64,
    failed: AtomicU64,
    dropped: AtomicU64,
}

impl ReplayStats {
    pub fn submitted(&self) -> u64 {
        self.submitted.load(Ordering::Relaxed)
    }

    pub fn replayed(&self) -> u64 {
        self.replayed.load(Ordering::Relaxed)
    }

    /// Events the replayer rejected.
    pub fn failed(&self) -> u64 {
        self.failed.load(Ordering::Relaxed)
    }

    /// Events discarded because the queue was full.
    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }
}

/// Front end of the replay thread.
#[derive(Debug)]
pub struct ReplayDispatcher {
    tx: mpsc::Sender<ReplayJob>,
    stats: Arc<ReplayStats>,
}

impl ReplayDispatcher {
    /// Start the replay thread. It exits once the dispatcher is dropped
    /// and the queue has drained.
    pub fn spawn(replayer: Box<dyn InputReplayer>) -> Result<Self, DeskError> {
        Self::with_depth(replayer, REPLAY_QUEUE_DEPTH)
    }

    pub fn with_depth(
        mut replayer: Box<dyn InputReplayer>,
        depth: usize,
    ) -> Result<Self, DeskError> {
        let (tx, mut rx) = mpsc::channel::<ReplayJob>(depth.max(1));
        let stats = Arc::new(ReplayStats::default());
        let worker_stats = Arc::clone(&stats);

        std::thread::Builder::new()
            .name("deskcast-replay".into())
            .spawn(move || {
                while let Some(job) = rx.blocking_recv() {
                    match replayer.replay(&job.event) {
                        Ok(()) => {
                            worker_stats.replayed.fetch_add(1, Ordering::Relaxed);
                            debug!(session = %job.session, "replayed {}", job.event);
                        }
                        Err(e) => {
                            worker_stats.failed.fetch_add(1, Ordering::Relaxed);
                            warn!(session = %job.session, error = %e, "input replay failed; event dropped");
                        }
                    }
                }
                info!("replay thread stopped");
            })
            .map_err(|e| DeskError::Other(format!("failed to start replay thread: {e}")))?;

        Ok(Self { tx, stats })
    }

    /// Queue `event` for replay on behalf of `session`.
    pub fn submit(&self, session: SessionId, event: InputEvent) -> Result<(), DeskError> {
        match self.tx.try_send(ReplayJob { session, event }) {
            Ok(()) => {
                self.stats.submitted.fetch_add(1, Ordering::Relaxed);
                Ok(())
            }
            Err(TrySendError::Full(job)) => {
                self.stats.dropped.fetch_add(1, Ordering::Relaxed);
                Err(DeskError::ReplayFailure(format!(
                    "replay queue full; dropped {}",
                    job.event
                )))
            }
            Err(TrySendError::Closed(_)) => Err(DeskError::ChannelClosed),
        }
    }

    pub fn stats(&self) -> Arc<ReplayStats> {
        Arc::clone(&self.stats)
    }
}
