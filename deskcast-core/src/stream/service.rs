//! The capture loop.
//!
//! One periodic task pulls a raw frame from the [`CaptureSource`], runs
//! the [`FrameEncoder`], wraps the result in an immutable [`Frame`] and
//! hands it to a [`FrameSink`] (the session manager in production).
//!
//! Grab and encode may block, so each tick runs on the blocking pool.
//! Ticks never overlap: the loop awaits one tick before scheduling the
//! next, which also serializes every call into the source and encoder.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::error::DeskError;
use crate::stream::capture::CaptureSource;
use crate::stream::encoder::FrameEncoder;
use crate::stream::types::Frame;

/// Interval between effective-rate debug lines.
const RATE_REPORT_INTERVAL: Duration = Duration::from_secs(10);

// ── CaptureConfig ────────────────────────────────────────────────

/// Per-tick encode parameters and cadence.
#[derive(Debug, Clone, Copy)]
pub struct CaptureConfig {
    /// Soft target rate; a slow tick delays the next one instead of
    /// producing a burst.
    pub target_fps: u32,
    /// JPEG quality, 1..=95.
    pub quality: u8,
    /// Downscale factor in `(0, 1]`.
    pub scale: f32,
}

impl CaptureConfig {
    /// Time budget for one tick.
    pub fn period(&self) -> Duration {
        Duration::from_secs_f64(1.0 / self.target_fps.max(1) as f64)
    }
}

impl Default for CaptureConfig {
    fn default() -> Self {
        Self {
            target_fps: 12,
            quality: 60,
            scale: 1.0,
        }
    }
}

// ── FrameSink ────────────────────────────────────────────────────

/// Receives every frame the loop produces. Must not block.
pub trait FrameSink: Send + Sync {
    fn publish(&self, frame: Arc<Frame>);
}

// ── CaptureStats ─────────────────────────────────────────────────

/// Loop counters, readable while the loop runs.
#[derive(Debug, Default)]
pub struct CaptureStats {
    ticks: AtomicU64,
    published: AtomicU64,
    failures: AtomicU64,
}

impl CaptureStats {
    pub fn ticks(&self) -> u64 {
        self.ticks.load(Ordering::Relaxed)
    }

    pub fn published(&self) -> u64 {
        self.published.load(Ordering::Relaxed)
    }

    /// Ticks skipped because capture or encode failed.
    pub fn failures(&self) -> u64 {
        self.failures.load(Ordering::Relaxed)
    }
}

// ── CaptureService ───────────────────────────────────────────────

type SharedSource = Arc<Mutex<Box<dyn CaptureSource>>>;
type SharedEncoder = Arc<Mutex<Box<dyn FrameEncoder>>>;

/// Periodic capture → encode → publish driver.
pub struct CaptureService {
    source: SharedSource,
    encoder: SharedEncoder,
    sink: Arc<dyn FrameSink>,
    config: CaptureConfig,
    stats: Arc<CaptureStats>,
}

impl CaptureService {
    pub fn new(
        source: Box<dyn CaptureSource>,
        encoder: Box<dyn FrameEncoder>,
        sink: Arc<dyn FrameSink>,
        config: CaptureConfig,
    ) -> Self {
        Self {
            source: Arc::new(Mutex::new(source)),
            encoder: Arc::new(Mutex::new(encoder)),
            sink,
            config,
            stats: Arc::new(CaptureStats::default()),
        }
    }

    pub fn config(&self) -> &CaptureConfig {
        &self.config
    }

    pub fn stats(&self) -> Arc<CaptureStats> {
        Arc::clone(&self.stats)
    }

    /// Run until `shutdown` is cancelled.
    ///
    /// A failed tick is logged and skipped. Cancellation is observed
    /// between ticks, so an in-flight tick always completes.
    pub async fn run(&self, shutdown: CancellationToken) {
        let period = self.config.period();
        info!(
            fps = self.config.target_fps,
            quality = self.config.quality,
            scale = self.config.scale,
            "capture loop started"
        );

        let mut report_at = Instant::now();
        let mut report_published = 0;

        while !shutdown.is_cancelled() {
            let started = Instant::now();

            match self.tick().await {
                Ok(frame) => {
                    self.sink.publish(Arc::new(frame));
                    self.stats.published.fetch_add(1, Ordering::Relaxed);
                }
                Err(e) => {
                    self.stats.failures.fetch_add(1, Ordering::Relaxed);
                    warn!(error = %e, "capture tick skipped");
                }
            }
            self.stats.ticks.fetch_add(1, Ordering::Relaxed);

            if report_at.elapsed() >= RATE_REPORT_INTERVAL {
                let published = self.stats.published();
                let fps = (published - report_published) as f64 / report_at.elapsed().as_secs_f64();
                debug!(fps = format!("{fps:.1}"), target = self.config.target_fps, "capture rate");
                report_at = Instant::now();
                report_published = published;
            }

            let elapsed = started.elapsed();
            if elapsed < period {
                tokio::select! {
                    _ = shutdown.cancelled() => break,
                    _ = tokio::time::sleep(period - elapsed) => {}
                }
            } else {
                // Overran: start the next tick now, without catching up.
                debug!(elapsed_ms = elapsed.as_millis() as u64, "capture tick overran period");
                tokio::task::yield_now().await;
            }
        }

        info!(
            ticks = self.stats.ticks(),
            published = self.stats.published(),
            failures = self.stats.failures(),
            "capture loop stopped"
        );
    }

    /// One grab + encode on the blocking pool.
    pub async fn tick(&self) -> Result<Frame, DeskError> {
        let source = Arc::clone(&self.source);
        let encoder = Arc::clone(&self.encoder);
        let config = self.config;

        tokio::task::spawn_blocking(move || {
            let raw = {
                let mut source = source
                    .lock()
                    .map_err(|_| DeskError::CaptureFailure("capture source lock poisoned".into()))?;
                source.grab()?
            };
            let image = {
                let mut encoder = encoder
                    .lock()
                    .map_err(|_| DeskError::EncodeFailure("encoder lock poisoned".into()))?;
                encoder.encode(&raw, config.quality, config.scale)?
            };
            Ok(Frame::new(
                image.width,
                image.height,
                config.quality,
                config.scale,
                image.data,
            ))
        })
        .await
        .map_err(|e| DeskError::Other(format!("capture task failed: {e}")))?
    }
}

// ── Tests ────────────────────────────────────────────────────────
