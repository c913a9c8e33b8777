//! Screen capture sources.
//!
//! The capture loop only knows the [`CaptureSource`] trait: "hand me the
//! current full-frame pixel buffer". Two implementations ship here:
//!
//! - [`ScrapSource`] (feature `scrap-capture`): the primary display via
//!   `scrap`, driven from a dedicated thread.
//! - [`TestPatternSource`]: a synthetic moving gradient for headless
//!   hosts and tests.

use crate::error::DeskError;
use crate::stream::types::{PixelFormat, RawScreenFrame};

// ── CaptureSource ────────────────────────────────────────────────

/// Something that can produce a raw frame of the whole display on demand.
///
/// Calls may block (waiting on the OS compositor), so the capture loop
/// runs them off the async worker threads and never concurrently.
pub trait CaptureSource: Send {
    /// Grab the current display contents.
    fn grab(&mut self) -> Result<RawScreenFrame, DeskError>;

    /// Native capture resolution, if known.
    fn dimensions(&self) -> (u32, u32);
}

impl CaptureSource for Box<dyn CaptureSource> {
    fn grab(&mut self) -> Result<RawScreenFrame, DeskError> {
        (**self).grab()
    }

    fn dimensions(&self) -> (u32, u32) {
        (**self).dimensions()
    }
}

// ── TestPatternSource ────────────────────────────────────────────

/// Synthetic BGRA gradient that scrolls one step per grab.
pub struct TestPatternSource {
    width: u32,
    height: u32,
    phase: u32,
}

impl TestPatternSource {
    pub fn new(width: u32, height: u32) -> Self {
        Self {
            width: width.max(1),
            height: height.max(1),
            phase: 0,
        }
    }
}

impl CaptureSource for TestPatternSource {
    fn grab(&mut self) -> Result<RawScreenFrame, DeskError> {
        let (w, h) = (self.width, self.height);
        let mut data = Vec::with_capacity(w as usize * h as usize * 4);
        for y in 0..h {
            for x in 0..w {
                let shifted = x.wrapping_add(self.phase);
                data.extend_from_slice(&[
                    (y * 255 / h) as u8,
                    (shifted % 256) as u8,
                    ((shifted / 2) % 256) as u8,
                    0xFF,
                ]);
            }
        }
        self.phase = self.phase.wrapping_add(4);
        Ok(RawScreenFrame::packed(w, h, PixelFormat::Bgra8, data))
    }

    fn dimensions(&self) -> (u32, u32) {
        (self.width, self.height)
    }
}

// ── ScrapSource ──────────────────────────────────────────────────

#[cfg(feature = "scrap-capture")]
pub use native::ScrapSource;

#[cfg(feature = "scrap-capture")]
mod native {
    use std::io::ErrorKind;
    use std::sync::mpsc;
    use std::time::{Duration, Instant};

    use scrap::{Capturer, Display};
    use tracing::{debug, warn};

    use super::CaptureSource;
    use crate::error::DeskError;
    use crate::stream::types::{PixelFormat, RawScreenFrame};

    type Reply = mpsc::Sender<Result<RawScreenFrame, DeskError>>;

    /// Primary-display capture through `scrap`.
    ///
    /// `scrap::Capturer` is not `Send` on X11, so it lives on its own
    /// thread; [`grab`](CaptureSource::grab) sends a request and waits
    /// for the reply.
    pub struct ScrapSource {
        requests: mpsc::Sender<Reply>,
        width: u32,
        height: u32,
    }

    impl ScrapSource {
        /// Open the primary display. `frame_timeout` bounds how long a
        /// grab waits for the compositor to publish a new frame.
        pub fn primary(frame_timeout: Duration) -> Result<Self, DeskError> {
            let display = Display::primary()
                .map_err(|e| DeskError::CaptureFailure(format!("no display found: {e}")))?;
            let (width, height) = (display.width(), display.height());
            drop(display);

            let (req_tx, req_rx) = mpsc::channel::<Reply>();
            let (ready_tx, ready_rx) = mpsc::channel::<Result<(), DeskError>>();

            std::thread::Builder::new()
                .name("deskcast-capture".into())
                .spawn(move || {
                    let capturer = match Display::primary().and_then(Capturer::new) {
                        Ok(c) => {
                            let _ = ready_tx.send(Ok(()));
                            c
                        }
                        Err(e) => {
                            let _ = ready_tx.send(Err(DeskError::CaptureFailure(format!(
                                "failed to start capturer: {e}"
                            ))));
                            return;
                        }
                    };
                    capture_thread(capturer, width, height, frame_timeout, req_rx);
                })?;

            ready_rx.recv().map_err(|_| DeskError::ChannelClosed)??;
            debug!(width, height, "scrap capturer ready");

            Ok(Self {
                requests: req_tx,
                width: width as u32,
                height: height as u32,
            })
        }
    }

    impl CaptureSource for ScrapSource {
        fn grab(&mut self) -> Result<RawScreenFrame, DeskError> {
            let (reply_tx, reply_rx) = mpsc::channel();
            self.requests
                .send(reply_tx)
                .map_err(|_| DeskError::CaptureFailure("capture thread exited".into()))?;
            reply_rx
                .recv()
                .map_err(|_| DeskError::CaptureFailure("capture thread exited".into()))?
        }

        fn dimensions(&self) -> (u32, u32) {
            (self.width, self.height)
        }
    }

    fn capture_thread(
        mut capturer: Capturer,
        width: usize,
        height: usize,
        timeout: Duration,
        requests: mpsc::Receiver<Reply>,
    ) {
        // Some backends only publish a frame when the screen changes;
        // a static desktop re-sends the last one.
        let mut last: Option<RawScreenFrame> = None;

        while let Ok(reply) = requests.recv() {
            let result = grab_one(&mut capturer, width, height, timeout, &mut last);
            if let Err(e) = &result {
                warn!("scrap grab failed: {e}");
            }
            let _ = reply.send(result);
        }
    }

    fn grab_one(
        capturer: &mut Capturer,
        width: usize,
        height: usize,
        timeout: Duration,
        last: &mut Option<RawScreenFrame>,
    ) -> Result<RawScreenFrame, DeskError> {
        let deadline = Instant::now() + timeout;
        loop {
            match capturer.frame() {
                Ok(frame) => {
                    let stride = frame.len() / height.max(1);
                    let raw = RawScreenFrame {
                        width: width as u32,
                        height: height as u32,
                        stride: stride as u32,
                        format: PixelFormat::Bgra8,
                        data: frame.to_vec(),
                        timestamp: Instant::now(),
                    };
                    *last = Some(raw.clone());
                    return Ok(raw);
                }
                Err(e) if e.kind() == ErrorKind::WouldBlock => {
                    if Instant::now() >= deadline {
                        return last.clone().ok_or_else(|| {
                            DeskError::CaptureFailure("no frame within timeout".into())
                        });
                    }
                    std::thread::sleep(Duration::from_millis(5));
                }
                Err(e) => return Err(DeskError::CaptureFailure(e.to_string())),
            }
        }
    }
}

// ── Tests ────────────────────────────────────────────────────────
