//! Per-session outbound queue with drop-oldest overflow.
//!
//! The capture loop pushes shared frames into every active session's
//! queue without ever waiting. When a queue is full the oldest pending
//! item is discarded, so a slow viewer always catches up to the newest
//! screen contents instead of lagging further behind.
//!
//! The only consumer is the session's send worker, which awaits
//! [`OutboundQueue::pop`].

use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard};

use tokio::sync::Notify;

use crate::stream::types::Frame;

/// An item waiting to be written to one viewer.
#[derive(Debug, Clone)]
pub enum Outbound {
    Frame(Arc<Frame>),
    /// Send a close frame and stop the worker.
    Close { code: u16, reason: String },
}

/// What happened to a pushed item.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PushOutcome {
    Enqueued,
    /// The item was enqueued after discarding the oldest one.
    DroppedOldest,
    /// The queue is closed; the item was discarded.
    Closed,
}

#[derive(Debug)]
struct QueueState {
    items: VecDeque<Outbound>,
    closed: bool,
    dropped: u64,
}

/// Bounded FIFO shared by the broadcaster (producer) and one send worker.
#[derive(Debug)]
pub struct OutboundQueue {
    state: Mutex<QueueState>,
    notify: Notify,
    capacity: usize,
}

impl OutboundQueue {
    /// A capacity of 0 is treated as 1.
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            state: Mutex::new(QueueState {
                items: VecDeque::with_capacity(capacity),
                closed: false,
                dropped: 0,
            }),
            notify: Notify::new(),
            capacity,
        }
    }

    /// Enqueue a frame, discarding the oldest pending item when full.
    /// Never blocks.
    pub fn push_frame(&self, frame: Arc<Frame>) -> PushOutcome {
        self.push(Outbound::Frame(frame))
    }

    /// Enqueue a close request. Pending frames ahead of it are still sent.
    pub fn push_close(&self, code: u16, reason: impl Into<String>) -> PushOutcome {
        self.push(Outbound::Close {
            code,
            reason: reason.into(),
        })
    }

    fn push(&self, item: Outbound) -> PushOutcome {
        let outcome = {
            let mut state = self.lock();
            if state.closed {
                return PushOutcome::Closed;
            }
            let outcome = if state.items.len() >= self.capacity {
                state.items.pop_front();
                state.dropped += 1;
                PushOutcome::DroppedOldest
            } else {
                PushOutcome::Enqueued
            };
            state.items.push_back(item);
            outcome
        };
        self.notify.notify_one();
        outcome
    }

    /// Wait for the next item. Returns `None` once the queue is closed.
    pub async fn pop(&self) -> Option<Outbound> {
        loop {
            {
                let mut state = self.lock();
                if state.closed {
                    return None;
                }
                if let Some(item) = state.items.pop_front() {
                    return Some(item);
                }
            }
            // A push between unlock and here leaves a stored permit, so
            // the wakeup is not lost.
            self.notify.notified().await;
        }
    }

    /// Close the queue, discarding anything pending and waking the worker.
    pub fn close(&self) {
        {
            let mut state = self.lock();
            state.closed = true;
            state.items.clear();
        }
        self.notify.notify_one();
    }

    pub fn is_closed(&self) -> bool {
        self.lock().closed
    }

    pub fn len(&self) -> usize {
        self.lock().items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Items discarded by drop-oldest since creation.
    pub fn dropped(&self) -> u64 {
        self.lock().dropped
    }

    fn lock(&self) -> MutexGuard<'_, QueueState> {
        // The state stays consistent across a panic in another holder.
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio_test::{assert_pending, assert_ready, task};

    fn frame(ts: f64) -> Arc<Frame> {
        Arc::new(Frame::with_timestamp(ts, 4, 4, 60, 1.0, vec![ts as u8]))
    }

    fn frame_ts(item: Option<Outbound>) -> f64 {
        match item {
            Some(Outbound::Frame(f)) => f.timestamp(),
            other => panic!("expected frame, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn bound_one_keeps_newest() {
        let q = OutboundQueue::new(1);
        assert_eq!(q.push_frame(frame(1.0)), PushOutcome::Enqueued);
        assert_eq!(q.push_frame(frame(2.0)), PushOutcome::DroppedOldest);

        assert_eq!(frame_ts(q.pop().await), 2.0);
        assert_eq!(q.dropped(), 1);
        assert!(q.is_empty());
    }

    #[tokio::test]
    async fn delivered_frames_are_ordered_subsequence() {
        let q = OutboundQueue::new(2);
        for ts in 1..=5 {
            q.push_frame(frame(ts as f64));
        }
        assert_eq!(q.len(), 2);
        assert_eq!(frame_ts(q.pop().await), 4.0);
        assert_eq!(frame_ts(q.pop().await), 5.0);
        assert_eq!(q.dropped(), 3);
    }

    #[test]
    fn pop_waits_for_push() {
        let q = OutboundQueue::new(2);
        let mut pop = task::spawn(q.pop());
        assert_pending!(pop.poll());

        q.push_frame(frame(7.0));
        assert!(pop.is_woken());
        let item = assert_ready!(pop.poll());
        assert_eq!(frame_ts(item), 7.0);
    }

    #[test]
    fn close_wakes_waiting_worker() {
        let q = OutboundQueue::new(2);
        let mut pop = task::spawn(q.pop());
        assert_pending!(pop.poll());

        q.close();
        assert!(pop.is_woken());
        assert!(assert_ready!(pop.poll()).is_none());
        assert_eq!(q.push_frame(frame(1.0)), PushOutcome::Closed);
    }

    #[tokio::test]
    async fn close_request_follows_pending_frames() {
        let q = OutboundQueue::new(3);
        q.push_frame(frame(1.0));
        q.push_close(1001, "going away");

        assert_eq!(frame_ts(q.pop().await), 1.0);
        match q.pop().await {
            Some(Outbound::Close { code, reason }) => {
                assert_eq!(code, 1001);
                assert_eq!(reason, "going away");
            }
            other => panic!("expected close, got {other:?}"),
        }
    }

    #[test]
    fn zero_capacity_is_one() {
        assert_eq!(OutboundQueue::new(0).capacity(), 1);
    }
}
