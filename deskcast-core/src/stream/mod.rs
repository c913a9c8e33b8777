//! Frame production and delivery plumbing.
//!
//! - [`capture`]: capture sources (scrap, synthetic pattern)
//! - [`encoder`]: JPEG frame encoder
//! - [`service`]: the periodic capture loop
//! - [`queue`]: per-session drop-oldest outbound queue
//! - [`bandwidth`]: per-session send-rate tracking
//! - [`input`]: input replay backends

pub mod bandwidth;
pub mod capture;
pub mod encoder;
pub mod input;
pub mod queue;
pub mod service;
pub mod types;

pub use capture::{CaptureSource, TestPatternSource};
pub use encoder::{EncodedImage, FrameEncoder, JpegFrameEncoder};
pub use input::{InputReplayer, OsInputReplayer, TracingReplayer};
pub use queue::{Outbound, OutboundQueue, PushOutcome};
pub use service::{CaptureConfig, CaptureService, CaptureStats, FrameSink};
pub use types::{Frame, PixelFormat, RawScreenFrame};

#[cfg(feature = "scrap-capture")]
pub use capture::ScrapSource;
