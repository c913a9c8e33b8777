//! One viewer session: identity, phase, outbound queue, send stats.

use std::net::SocketAddr;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Duration, Instant};

use tokio_util::sync::CancellationToken;

use crate::error::DeskError;
use crate::session::phase::SessionPhase;
use crate::stream::bandwidth::BandwidthEstimator;
use crate::stream::queue::OutboundQueue;

// ── SessionId ────────────────────────────────────────────────────

/// Opaque session handle. Ids increase monotonically per manager and
/// are never reused.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SessionId(u64);

impl SessionId {
    pub const fn new(raw: u64) -> Self {
        Self(raw)
    }

    pub const fn get(self) -> u64 {
        self.0
    }
}

impl std::fmt::Display for SessionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "#{}", self.0)
    }
}

// ── SessionSummary ───────────────────────────────────────────────

/// Snapshot of a session's send statistics.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SessionSummary {
    pub frames_sent: u64,
    /// Frames discarded by drop-oldest backpressure.
    pub frames_dropped: u64,
    pub bytes_sent: u64,
    pub bytes_per_sec: u64,
    pub age: Duration,
}

// ── Session ──────────────────────────────────────────────────────

#[derive(Debug)]
struct Activity {
    last: Instant,
    frames_sent: u64,
    bandwidth: BandwidthEstimator,
}

/// A connected viewer.
///
/// Owned by the session registry; the send worker and reader loop hold
/// `Arc` clones while the connection is alive.
#[derive(Debug)]
pub struct Session {
    id: SessionId,
    peer: SocketAddr,
    created: Instant,
    phase: Mutex<SessionPhase>,
    queue: Arc<OutboundQueue>,
    activity: Mutex<Activity>,
    cancel: CancellationToken,
}

impl Session {
    pub fn new(id: SessionId, peer: SocketAddr, queue_capacity: usize) -> Self {
        let now = Instant::now();
        Self {
            id,
            peer,
            created: now,
            phase: Mutex::new(SessionPhase::Connecting),
            queue: Arc::new(OutboundQueue::new(queue_capacity)),
            activity: Mutex::new(Activity {
                last: now,
                frames_sent: 0,
                bandwidth: BandwidthEstimator::new(),
            }),
            cancel: CancellationToken::new(),
        }
    }

    pub fn id(&self) -> SessionId {
        self.id
    }

    pub fn peer(&self) -> SocketAddr {
        self.peer
    }

    pub fn queue(&self) -> &Arc<OutboundQueue> {
        &self.queue
    }

    // ── Phase ────────────────────────────────────────────────────

    pub fn phase(&self) -> SessionPhase {
        *lock(&self.phase)
    }

    pub fn is_active(&self) -> bool {
        self.phase().is_active()
    }

    pub fn activate(&self) -> Result<(), DeskError> {
        lock(&self.phase).activate()
    }

    pub fn begin_close(&self) -> Result<(), DeskError> {
        lock(&self.phase).begin_close()
    }

    /// Drive the phase to `Closed` from wherever it is.
    pub(crate) fn mark_closed(&self) {
        let mut phase = lock(&self.phase);
        let _ = phase.begin_close();
        let _ = phase.finish_close();
    }

    // ── Cancellation ─────────────────────────────────────────────

    /// Resolves once the session has been removed.
    pub async fn cancelled(&self) {
        self.cancel.cancelled().await
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    pub(crate) fn cancel(&self) {
        self.cancel.cancel();
    }

    // ── Activity ─────────────────────────────────────────────────

    /// Note inbound traffic.
    pub fn touch(&self) {
        lock(&self.activity).last = Instant::now();
    }

    /// Note one outbound frame of `bytes` written to the transport.
    pub fn record_sent(&self, bytes: usize) {
        let mut activity = lock(&self.activity);
        activity.last = Instant::now();
        activity.frames_sent += 1;
        activity.bandwidth.record(bytes as u64);
    }

    pub fn last_activity(&self) -> Instant {
        lock(&self.activity).last
    }

    pub fn summary(&self) -> SessionSummary {
        let activity = lock(&self.activity);
        SessionSummary {
            frames_sent: activity.frames_sent,
            frames_dropped: self.queue.dropped(),
            bytes_sent: activity.bandwidth.total_bytes(),
            bytes_per_sec: activity.bandwidth.bytes_per_sec(),
            age: self.created.elapsed(),
        }
    }
}

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stream::types::Frame;

    fn session() -> Session {
        Session::new(SessionId::new(7), "127.0.0.1:5000".parse().unwrap(), 1)
    }

    #[test]
    fn id_display() {
        assert_eq!(SessionId::new(42).to_string(), "#42");
        assert!(SessionId::new(1) < SessionId::new(2));
    }

    #[test]
    fn lifecycle_through_session() {
        let s = session();
        assert_eq!(s.phase(), SessionPhase::Connecting);
        assert!(!s.is_active());

        s.activate().unwrap();
        assert!(s.is_active());

        s.mark_closed();
        assert!(s.phase().is_closed());
    }

    #[test]
    fn summary_counts_sent_and_dropped() {
        let s = session();
        s.record_sent(1000);
        s.record_sent(500);

        let frame = Arc::new(Frame::new(1, 1, 60, 1.0, vec![0]));
        s.queue().push_frame(Arc::clone(&frame));
        s.queue().push_frame(frame);

        let summary = s.summary();
        assert_eq!(summary.frames_sent, 2);
        assert_eq!(summary.bytes_sent, 1500);
        assert_eq!(summary.frames_dropped, 1);
    }

    #[tokio::test]
    async fn cancel_resolves_waiters() {
        let s = Arc::new(session());
        let waiter = {
            let s = Arc::clone(&s);
            tokio::spawn(async move { s.cancelled().await })
        };
        s.cancel();
        waiter.await.unwrap();
        assert!(s.is_cancelled());
    }
}
