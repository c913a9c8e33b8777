//! Shared frame types for the capture → encode → broadcast pipeline.
//!
//! [`RawScreenFrame`] is what a capture source hands to the encoder.
//! [`Frame`] is the immutable, encoded result that every session shares
//! for one tick; it is distinct from the JSON wire message built by
//! [`crate::codec::JsonCodec`].

use std::time::{Instant, SystemTime, UNIX_EPOCH};

// ── PixelFormat ──────────────────────────────────────────────────

/// Pixel layout for raw captured frames.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PixelFormat {
    /// 4 bytes per pixel: Blue, Green, Red, Alpha (X11 / DXGI default).
    Bgra8,
    /// 4 bytes per pixel: Red, Green, Blue, Alpha.
    Rgba8,
    /// 3 bytes per pixel: Red, Green, Blue.
    Rgb8,
}

impl PixelFormat {
    /// Bytes consumed by a single pixel in this format.
    pub const fn bytes_per_pixel(self) -> usize {
        match self {
            PixelFormat::Bgra8 | PixelFormat::Rgba8 => 4,
            PixelFormat::Rgb8 => 3,
        }
    }

    /// Byte offsets of the red, green and blue channels within a pixel.
    pub(crate) const fn rgb_offsets(self) -> [usize; 3] {
        match self {
            PixelFormat::Bgra8 => [2, 1, 0],
            PixelFormat::Rgba8 | PixelFormat::Rgb8 => [0, 1, 2],
        }
    }
}

// ── RawScreenFrame ───────────────────────────────────────────────

/// A raw, uncompressed screen capture obtained from a capture source.
///
/// The `data` buffer holds `height` rows of `stride` bytes each.
/// `stride` may be larger than `width * bytes_per_pixel` when the
/// capture backend pads rows.
#[derive(Debug, Clone)]
pub struct RawScreenFrame {
    /// Frame width in pixels.
    pub width: u32,
    /// Frame height in pixels.
    pub height: u32,
    /// Row pitch in **bytes** (may exceed `width * bpp`).
    pub stride: u32,
    /// Pixel layout.
    pub format: PixelFormat,
    /// Raw pixel data, `stride * height` bytes.
    pub data: Vec<u8>,
    /// Monotonic capture timestamp.
    pub timestamp: Instant,
}

impl RawScreenFrame {
    /// Build a tightly packed frame (`stride == width * bpp`).
    pub fn packed(width: u32, height: u32, format: PixelFormat, data: Vec<u8>) -> Self {
        Self {
            width,
            height,
            stride: width * format.bytes_per_pixel() as u32,
            format,
            data,
            timestamp: Instant::now(),
        }
    }

    /// Total byte size the raw bitmap occupies.
    pub fn byte_len(&self) -> usize {
        self.stride as usize * self.height as usize
    }

    /// Whether `data` is large enough for the declared geometry.
    pub fn is_complete(&self) -> bool {
        let min_stride = self.width as usize * self.format.bytes_per_pixel();
        self.width > 0
            && self.height > 0
            && self.stride as usize >= min_stride
            && self.data.len() >= self.byte_len()
    }

    /// Returns a row slice (including possible padding bytes).
    pub fn row(&self, y: u32) -> &[u8] {
        let start = y as usize * self.stride as usize;
        let end = start + self.stride as usize;
        &self.data[start..end]
    }

    /// Repack into tightly packed RGB rows, dropping alpha and padding.
    pub fn to_rgb(&self) -> Vec<u8> {
        let [r, g, b] = self.format.rgb_offsets();
        let mut rgb = Vec::with_capacity(self.width as usize * self.height as usize * 3);
        for y in 0..self.height {
            let row = self.row(y);
            for px in row
                .chunks_exact(self.format.bytes_per_pixel())
                .take(self.width as usize)
            {
                rgb.extend_from_slice(&[px[r], px[g], px[b]]);
            }
        }
        rgb
    }
}

// ── Frame ────────────────────────────────────────────────────────

/// One encoded screen capture, ready for every session in a tick.
///
/// Fields are private: once the capture loop has built a frame it is
/// only ever shared behind an `Arc` and read.
#[derive(Debug, Clone, PartialEq)]
pub struct Frame {
    timestamp: f64,
    width: u32,
    height: u32,
    quality: u8,
    scale: f32,
    encoded: Vec<u8>,
}

impl Frame {
    /// Build a frame stamped with the current wall-clock time.
    pub fn new(width: u32, height: u32, quality: u8, scale: f32, encoded: Vec<u8>) -> Self {
        Self::with_timestamp(unix_seconds(), width, height, quality, scale, encoded)
    }

    /// Build a frame with an explicit timestamp (seconds since the epoch).
    pub fn with_timestamp(
        timestamp: f64,
        width: u32,
        height: u32,
        quality: u8,
        scale: f32,
        encoded: Vec<u8>,
    ) -> Self {
        Self {
            timestamp,
            width,
            height,
            quality,
            scale,
            encoded,
        }
    }

    /// Capture time in seconds since the Unix epoch.
    pub fn timestamp(&self) -> f64 {
        self.timestamp
    }

    /// Encoded width in pixels (after scaling).
    pub fn width(&self) -> u32 {
        self.width
    }

    /// Encoded height in pixels (after scaling).
    pub fn height(&self) -> u32 {
        self.height
    }

    /// Encoder quality the frame was produced at.
    pub fn quality(&self) -> u8 {
        self.quality
    }

    /// Scale factor applied to the captured resolution.
    pub fn scale(&self) -> f32 {
        self.scale
    }

    /// Compressed image bytes.
    pub fn encoded_bytes(&self) -> &[u8] {
        &self.encoded
    }
}

/// Wall-clock seconds since the Unix epoch, with sub-second precision.
pub fn unix_seconds() -> f64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs_f64())
        .unwrap_or_default()
}

// ── Tests ────────────────────────────────────────────────────────
