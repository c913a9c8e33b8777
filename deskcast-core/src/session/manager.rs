//! Session registry and the operations every task goes through.
//!
//! The registry is the only state shared by the accept loop, the
//! per-session tasks and the capture loop. Every mutation happens under
//! one lock; [`SessionManager::broadcast`] only holds it long enough to
//! snapshot the active sessions, then enqueues without it.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use tracing::{debug, info, warn};

use crate::codec::JsonCodec;
use crate::error::DeskError;
use crate::session::replay::ReplayDispatcher;
use crate::session::state::{Session, SessionId};
use crate::stream::queue::PushOutcome;
use crate::stream::service::FrameSink;
use crate::stream::types::Frame;

/// Close code sent to viewers when the host shuts down.
pub const CLOSE_GOING_AWAY: u16 = 1001;

// ── ManagerConfig ────────────────────────────────────────────────

#[derive(Debug, Clone, Copy)]
pub struct ManagerConfig {
    /// Registry size limit; at least 1.
    pub max_connections: usize,
    /// Per-session outbound queue bound.
    pub queue_capacity: usize,
}

impl Default for ManagerConfig {
    fn default() -> Self {
        Self {
            max_connections: 5,
            queue_capacity: 2,
        }
    }
}

// ── SessionRegistry ──────────────────────────────────────────────

/// Id → session map that never grows past `max`.
#[derive(Debug)]
struct SessionRegistry {
    sessions: HashMap<SessionId, Arc<Session>>,
    max: usize,
}

impl SessionRegistry {
    fn insert(&mut self, session: Arc<Session>) -> Result<(), DeskError> {
        if self.sessions.len() >= self.max {
            return Err(DeskError::ConnectionLimitExceeded { max: self.max });
        }
        self.sessions.insert(session.id(), session);
        Ok(())
    }
}

// ── SessionManager ───────────────────────────────────────────────

/// Owns the session registry and the shared replay dispatcher.
#[derive(Debug)]
pub struct SessionManager {
    registry: Mutex<SessionRegistry>,
    config: ManagerConfig,
    next_id: AtomicU64,
    codec: JsonCodec,
    replay: ReplayDispatcher,
}

impl SessionManager {
    pub fn new(config: ManagerConfig, replay: ReplayDispatcher) -> Self {
        let config = ManagerConfig {
            max_connections: config.max_connections.max(1),
            queue_capacity: config.queue_capacity.max(1),
        };
        Self {
            registry: Mutex::new(SessionRegistry {
                sessions: HashMap::new(),
                max: config.max_connections,
            }),
            config,
            next_id: AtomicU64::new(1),
            codec: JsonCodec::new(),
            replay,
        }
    }

    pub fn config(&self) -> &ManagerConfig {
        &self.config
    }

    pub fn replay(&self) -> &ReplayDispatcher {
        &self.replay
    }

    // ── Registry operations ──────────────────────────────────────

    /// Reserve a slot for a new connection, in `Connecting` state.
    ///
    /// Fails with [`DeskError::ConnectionLimitExceeded`] when the registry
    /// is full; the registry is left unchanged.
    pub fn accept(&self, peer: SocketAddr) -> Result<Arc<Session>, DeskError> {
        let mut registry = self.lock();
        // Checked before allocating an id so rejected peers leave no gaps.
        if registry.sessions.len() >= registry.max {
            return Err(DeskError::ConnectionLimitExceeded { max: registry.max });
        }
        let id = SessionId::new(self.next_id.fetch_add(1, Ordering::Relaxed));
        let session = Arc::new(Session::new(id, peer, self.config.queue_capacity));
        registry.insert(Arc::clone(&session))?;
        info!(session = %id, %peer, sessions = registry.sessions.len(), "session accepted");
        Ok(session)
    }

    /// Mark a session `Active` once its transport handshake is done.
    pub fn activate(&self, id: SessionId) -> Result<(), DeskError> {
        let session = self.get(id).ok_or(DeskError::UnknownSession(id))?;
        session.activate()?;
        debug!(session = %id, "session active");
        Ok(())
    }

    /// Close and evict a session. Returns `false` if it was already gone.
    ///
    /// Closes the outbound queue (ending the send worker) and cancels the
    /// session token (ending the reader).
    pub fn remove(&self, id: SessionId) -> bool {
        let (session, remaining) = {
            let mut registry = self.lock();
            match registry.sessions.remove(&id) {
                Some(s) => (s, registry.sessions.len()),
                None => return false,
            }
        };

        session.mark_closed();
        session.queue().close();
        session.cancel();

        let summary = session.summary();
        info!(
            session = %id,
            peer = %session.peer(),
            frames_sent = summary.frames_sent,
            frames_dropped = summary.frames_dropped,
            bytes_sent = summary.bytes_sent,
            bytes_per_sec = summary.bytes_per_sec,
            secs = summary.age.as_secs(),
            sessions = remaining,
            "session removed"
        );
        true
    }

    pub fn get(&self, id: SessionId) -> Option<Arc<Session>> {
        self.lock().sessions.get(&id).cloned()
    }

    pub fn len(&self) -> usize {
        self.lock().sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn session_ids(&self) -> Vec<SessionId> {
        let mut ids: Vec<_> = self.lock().sessions.keys().copied().collect();
        ids.sort();
        ids
    }

    // ── Broadcast ────────────────────────────────────────────────

    /// Enqueue `frame` on every active session. Never waits on a slow
    /// viewer. Returns the number of sessions it was queued for.
    pub fn broadcast(&self, frame: Arc<Frame>) -> usize {
        let targets: Vec<Arc<Session>> = self
            .lock()
            .sessions
            .values()
            .filter(|s| s.is_active())
            .cloned()
            .collect();

        let mut queued = 0;
        for session in &targets {
            match session.queue().push_frame(Arc::clone(&frame)) {
                PushOutcome::Enqueued => queued += 1,
                PushOutcome::DroppedOldest => {
                    queued += 1;
                    debug!(session = %session.id(), "viewer behind; dropped oldest frame");
                }
                PushOutcome::Closed => {}
            }
        }
        queued
    }

    /// Ask every session to close with `code`. Pending frames are still
    /// flushed ahead of the close frame.
    pub fn close_all(&self, code: u16, reason: &str) {
        let sessions: Vec<Arc<Session>> = self.lock().sessions.values().cloned().collect();
        for session in sessions {
            let _ = session.begin_close();
            session.queue().push_close(code, reason);
        }
    }

    // ── Inbound ──────────────────────────────────────────────────

    /// Decode one viewer message and hand the event to the replay queue.
    ///
    /// A malformed message is logged and dropped; the session stays open.
    pub fn on_inbound_message(&self, id: SessionId, raw: &[u8]) -> Result<(), DeskError> {
        let session = self.get(id).ok_or(DeskError::UnknownSession(id))?;
        session.touch();

        let event = match self.codec.decode_input(raw) {
            Ok(event) => event,
            Err(e) => {
                warn!(session = %id, error = %e, "dropping malformed message");
                return Err(e.into());
            }
        };

        self.replay.submit(id, event).inspect_err(|e| {
            warn!(session = %id, error = %e, "input event not queued");
        })
    }

    fn lock(&self) -> MutexGuard<'_, SessionRegistry> {
        self.registry
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl FrameSink for SessionManager {
    fn publish(&self, frame: Arc<Frame>) {
        self.broadcast(frame);
    }
}

// ── Tests ────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::DecodeError;
    use crate::protocol::screen::InputEvent;
    use crate::stream::input::InputReplayer;
    use crate::stream::queue::Outbound;
    use std::time::{Duration, Instant};

    #[derive(Clone, Default)]
    struct Recording(Arc<Mutex<Vec<InputEvent>>>);

    impl InputReplayer for Recording {
        fn replay(&mut self, event: &InputEvent) -> Result<(), DeskError> {
            self.0.lock().unwrap().push(event.clone());
            Ok(())
        }
    }

    fn manager(max: usize, queue: usize) -> (SessionManager, Recording) {
        let rec = Recording::default();
        let replay = ReplayDispatcher::spawn(Box::new(rec.clone())).unwrap();
        let mgr = SessionManager::new(
            ManagerConfig {
                max_connections: max,
                queue_capacity: queue,
            },
            replay,
        );
        (mgr, rec)
    }

    fn peer(port: u16) -> SocketAddr {
        SocketAddr::from(([127, 0, 0, 1], port))
    }

    fn connect(mgr: &SessionManager, port: u16) -> Result<Arc<Session>, DeskError> {
        let s = mgr.accept(peer(port))?;
        mgr.activate(s.id())?;
        Ok(s)
    }

    fn frame(ts: f64) -> Arc<Frame> {
        Arc::new(Frame::with_timestamp(ts, 2, 2, 60, 1.0, vec![1, 2, 3]))
    }

    #[test]
    fn connection_limit_scenario() {
        let (mgr, _) = manager(2, 2);
        let a = connect(&mgr, 1).unwrap();
        let b = connect(&mgr, 2).unwrap();
        assert!(a.is_active() && b.is_active());

        let err = connect(&mgr, 3).unwrap_err();
        assert!(matches!(err, DeskError::ConnectionLimitExceeded { max: 2 }));
        assert_eq!(mgr.len(), 2);

        assert!(mgr.remove(a.id()));
        let c = connect(&mgr, 3).unwrap();
        assert!(c.is_active());
        assert_eq!(mgr.session_ids(), vec![b.id(), c.id()]);
    }

    #[test]
    fn connecting_sessions_count_toward_limit() {
        let (mgr, _) = manager(1, 2);
        let pending = mgr.accept(peer(1)).unwrap();
        assert!(mgr.accept(peer(2)).is_err());
        mgr.remove(pending.id());
        assert!(mgr.accept(peer(2)).is_ok());
    }

    #[test]
    fn ids_are_monotonic() {
        let (mgr, _) = manager(3, 2);
        let a = mgr.accept(peer(1)).unwrap().id();
        mgr.remove(a);
        let b = mgr.accept(peer(2)).unwrap().id();
        assert!(b > a);
    }

    #[test]
    fn remove_is_idempotent_and_tears_down() {
        let (mgr, _) = manager(2, 2);
        let s = connect(&mgr, 1).unwrap();

        assert!(mgr.remove(s.id()));
        assert!(!mgr.remove(s.id()));
        assert!(s.phase().is_closed());
        assert!(s.queue().is_closed());
        assert!(s.is_cancelled());
        assert!(mgr.is_empty());
    }

    #[test]
    fn activate_unknown_session() {
        let (mgr, _) = manager(2, 2);
        let err = mgr.activate(SessionId::new(99)).unwrap_err();
        assert!(matches!(err, DeskError::UnknownSession(_)));
    }

    #[tokio::test]
    async fn broadcast_skips_non_active_sessions() {
        let (mgr, _) = manager(3, 2);
        let active = connect(&mgr, 1).unwrap();
        let pending = mgr.accept(peer(2)).unwrap();
        let closing = connect(&mgr, 3).unwrap();
        closing.begin_close().unwrap();

        assert_eq!(mgr.broadcast(frame(1.0)), 1);
        assert_eq!(active.queue().len(), 1);
        assert!(pending.queue().is_empty());
        assert!(closing.queue().is_empty());
    }

    #[tokio::test]
    async fn slow_session_keeps_only_newest_frame() {
        let (mgr, _) = manager(2, 1);
        let s = connect(&mgr, 1).unwrap();

        mgr.broadcast(frame(1.0));
        mgr.broadcast(frame(2.0));

        match s.queue().pop().await {
            Some(Outbound::Frame(f)) => assert_eq!(f.timestamp(), 2.0),
            other => panic!("expected frame, got {other:?}"),
        }
        assert_eq!(s.summary().frames_dropped, 1);
    }

    #[tokio::test]
    async fn frames_are_shared_not_copied() {
        let (mgr, _) = manager(2, 2);
        let a = connect(&mgr, 1).unwrap();
        let b = connect(&mgr, 2).unwrap();
        let f = frame(5.0);
        mgr.broadcast(Arc::clone(&f));

        for s in [&a, &b] {
            match s.queue().pop().await {
                Some(Outbound::Frame(got)) => assert!(Arc::ptr_eq(&got, &f)),
                other => panic!("expected frame, got {other:?}"),
            }
        }
    }

    #[tokio::test]
    async fn close_all_queues_close_after_frames() {
        let (mgr, _) = manager(2, 2);
        let s = connect(&mgr, 1).unwrap();
        mgr.broadcast(frame(1.0));
        mgr.close_all(CLOSE_GOING_AWAY, "shutting down");

        assert!(matches!(s.queue().pop().await, Some(Outbound::Frame(_))));
        assert!(matches!(
            s.queue().pop().await,
            Some(Outbound::Close { code: 1001, .. })
        ));
        assert_eq!(s.phase(), crate::session::phase::SessionPhase::Closing);
    }

    #[test]
    fn inbound_valid_message_is_replayed() {
        let (mgr, rec) = manager(2, 2);
        let s = connect(&mgr, 1).unwrap();

        mgr.on_inbound_message(s.id(), br#"{"type":"mouse","action":"move","x":100,"y":200}"#)
            .unwrap();

        let deadline = Instant::now() + Duration::from_secs(5);
        while rec.0.lock().unwrap().is_empty() {
            assert!(Instant::now() < deadline, "event never replayed");
            std::thread::sleep(Duration::from_millis(2));
        }
        assert_eq!(
            rec.0.lock().unwrap()[0],
            InputEvent::MouseMove { x: 100, y: 200 }
        );
    }

    #[test]
    fn inbound_malformed_message_keeps_session() {
        let (mgr, _) = manager(2, 2);
        let s = connect(&mgr, 1).unwrap();

        let err = mgr
            .on_inbound_message(s.id(), br#"{"type":"mouse","action":"move","y":200}"#)
            .unwrap_err();
        assert!(matches!(
            err,
            DeskError::Decode(DecodeError::MissingField("x"))
        ));
        assert!(s.is_active());
        assert_eq!(mgr.len(), 1);
        assert_eq!(mgr.replay().stats().submitted(), 0);
    }

    #[test]
    fn inbound_for_unknown_session() {
        let (mgr, _) = manager(2, 2);
        let err = mgr
            .on_inbound_message(SessionId::new(4), br#"{"type":"keyboard","action":"keyup","key":"a"}"#)
            .unwrap_err();
        assert!(matches!(err, DeskError::UnknownSession(_)));
    }
}
