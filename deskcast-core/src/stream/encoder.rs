//! JPEG frame encoder.
//!
//! Converts a [`RawScreenFrame`] to tightly packed RGB, optionally
//! downscales it (Lanczos3), and compresses it to JPEG at the requested
//! quality. The capture loop talks to this through the
//! [`FrameEncoder`] trait so tests can substitute a failing encoder.

use std::io::Cursor;

use image::codecs::jpeg::JpegEncoder;
use image::imageops::{self, FilterType};
use image::{ImageBuffer, RgbImage};

use crate::error::DeskError;
use crate::stream::types::RawScreenFrame;

// ── EncodedImage ─────────────────────────────────────────────────

/// Output of one encode call.
#[derive(Debug, Clone)]
pub struct EncodedImage {
    /// Width after scaling.
    pub width: u32,
    /// Height after scaling.
    pub height: u32,
    /// Compressed bytes.
    pub data: Vec<u8>,
}

// ── FrameEncoder ─────────────────────────────────────────────────

/// Compresses a raw pixel buffer at a given quality and scale.
pub trait FrameEncoder: Send {
    /// `quality` is JPEG-equivalent (1..=95); `scale` is in `(0, 1]`.
    fn encode(
        &mut self,
        raw: &RawScreenFrame,
        quality: u8,
        scale: f32,
    ) -> Result<EncodedImage, DeskError>;
}

impl FrameEncoder for Box<dyn FrameEncoder> {
    fn encode(
        &mut self,
        raw: &RawScreenFrame,
        quality: u8,
        scale: f32,
    ) -> Result<EncodedImage, DeskError> {
        (**self).encode(raw, quality, scale)
    }
}

// ── JpegFrameEncoder ─────────────────────────────────────────────

/// `image`-backed JPEG encoder.
#[derive(Debug, Default)]
pub struct JpegFrameEncoder {
    frame_count: u64,
}

impl JpegFrameEncoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of frames encoded so far.
    pub fn frame_count(&self) -> u64 {
        self.frame_count
    }
}

impl FrameEncoder for JpegFrameEncoder {
    fn encode(
        &mut self,
        raw: &RawScreenFrame,
        quality: u8,
        scale: f32,
    ) -> Result<EncodedImage, DeskError> {
        if !raw.is_complete() {
            return Err(DeskError::EncodeFailure(format!(
                "pixel buffer too short for {}x{} (stride {}, {} bytes)",
                raw.width,
                raw.height,
                raw.stride,
                raw.data.len()
            )));
        }

        let img: RgbImage = ImageBuffer::from_raw(raw.width, raw.height, raw.to_rgb())
            .ok_or_else(|| DeskError::EncodeFailure("invalid image dimensions".into()))?;

        let (out_w, out_h) = scaled_dimensions(raw.width, raw.height, scale);
        let img = if (out_w, out_h) != (raw.width, raw.height) {
            imageops::resize(&img, out_w, out_h, FilterType::Lanczos3)
        } else {
            img
        };

        let mut buf = Cursor::new(Vec::new());
        let encoder = JpegEncoder::new_with_quality(&mut buf, quality.clamp(1, 100));
        img.write_with_encoder(encoder)
            .map_err(|e| DeskError::EncodeFailure(format!("jpeg encode failed: {e}")))?;

        self.frame_count += 1;

        Ok(EncodedImage {
            width: out_w,
            height: out_h,
            data: buf.into_inner(),
        })
    }
}

/// Output dimensions for `scale`: `floor(dim * scale)`, never below 1.
///
/// Scales outside `(0, 1)` leave the size unchanged.
pub fn scaled_dimensions(width: u32, height: u32, scale: f32) -> (u32, u32) {
    if !(scale > 0.0 && scale < 1.0) {
        return (width, height);
    }
    let w = ((width as f64) * scale as f64).floor() as u32;
    let h = ((height as f64) * scale as f64).floor() as u32;
    (w.max(1), h.max(1))
}

// ── Tests ────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stream::types::PixelFormat;

    fn test_frame(w: u32, h: u32) -> RawScreenFrame {
        RawScreenFrame::packed(w, h, PixelFormat::Bgra8, vec![0x80; (w * h * 4) as usize])
    }

    #[test]
    fn encodes_jpeg() {
        let mut enc = JpegFrameEncoder::new();
        let out = enc.encode(&test_frame(64, 48), 60, 1.0).unwrap();

        assert_eq!((out.width, out.height), (64, 48));
        // JPEG SOI marker.
        assert_eq!(&out.data[..2], &[0xFF, 0xD8]);
        assert_eq!(enc.frame_count(), 1);
    }

    #[test]
    fn downscales_before_encoding() {
        let mut enc = JpegFrameEncoder::new();
        let out = enc.encode(&test_frame(101, 51), 60, 0.5).unwrap();
        assert_eq!((out.width, out.height), (50, 25));
    }

    #[test]
    fn rejects_truncated_buffer() {
        let mut enc = JpegFrameEncoder::new();
        let mut frame = test_frame(32, 32);
        frame.data.truncate(100);
        let err = enc.encode(&frame, 60, 1.0).unwrap_err();
        assert!(matches!(err, DeskError::EncodeFailure(_)));
        assert_eq!(enc.frame_count(), 0);
    }

    #[test]
    fn scaled_dimensions_bounds() {
        assert_eq!(scaled_dimensions(1920, 1080, 1.0), (1920, 1080));
        assert_eq!(scaled_dimensions(1920, 1080, 0.5), (960, 540));
        assert_eq!(scaled_dimensions(3, 3, 0.1), (1, 1));
        assert_eq!(scaled_dimensions(800, 600, 0.0), (800, 600));
    }

    #[test]
    fn lower_quality_is_smaller() {
        let mut enc = JpegFrameEncoder::new();
        let mut src = crate::stream::capture::TestPatternSource::new(128, 128);
        let raw = crate::stream::capture::CaptureSource::grab(&mut src).unwrap();
        let high = enc.encode(&raw, 95, 1.0).unwrap();
        let low = enc.encode(&raw, 10, 1.0).unwrap();
        assert!(low.data.len() < high.data.len());
    }
}
