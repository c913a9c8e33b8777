//! Per-session send-rate tracking.
//!
//! Each session's send worker records the size of every text message it
//! writes. The rolling window gives the current throughput; the lifetime
//! totals are reported when the session closes.

use std::collections::VecDeque;
use std::time::{Duration, Instant};

/// Rolling-window throughput estimator with lifetime totals.
#[derive(Debug)]
pub struct BandwidthEstimator {
    /// Samples: `(when, bytes)`.
    samples: VecDeque<(Instant, u64)>,
    window: Duration,
    /// Bytes currently inside the window.
    window_bytes: u64,
    lifetime_bytes: u64,
    lifetime_messages: u64,
}

impl BandwidthEstimator {
    /// Estimator with a 2-second window.
    pub fn new() -> Self {
        Self::with_window(Duration::from_secs(2))
    }

    pub fn with_window(window: Duration) -> Self {
        Self {
            samples: VecDeque::with_capacity(64),
            window,
            window_bytes: 0,
            lifetime_bytes: 0,
            lifetime_messages: 0,
        }
    }

    /// Record one message of `bytes` written now.
    pub fn record(&mut self, bytes: u64) {
        self.record_at(Instant::now(), bytes);
    }

    pub fn record_at(&mut self, when: Instant, bytes: u64) {
        self.samples.push_back((when, bytes));
        self.window_bytes += bytes;
        self.lifetime_bytes += bytes;
        self.lifetime_messages += 1;
        self.evict(when);
    }

    /// Throughput in bytes/second over the samples still in the window.
    pub fn bytes_per_sec(&self) -> u64 {
        let elapsed = match (self.samples.front(), self.samples.back()) {
            (Some((first, _)), Some((last, _))) => last.duration_since(*first),
            _ => return 0,
        };
        let secs = elapsed.max(Duration::from_millis(1)).as_secs_f64();
        (self.window_bytes as f64 / secs) as u64
    }

    pub fn total_bytes(&self) -> u64 {
        self.lifetime_bytes
    }

    pub fn total_messages(&self) -> u64 {
        self.lifetime_messages
    }

    fn evict(&mut self, now: Instant) {
        while let Some(&(ts, bytes)) = self.samples.front() {
            if now.duration_since(ts) > self.window {
                self.samples.pop_front();
                self.window_bytes = self.window_bytes.saturating_sub(bytes);
            } else {
                break;
            }
        }
    }
}

impl Default for BandwidthEstimator {
    fn default() -> Self {
        Self::new()
    }
}
