//! # Video Sampling
//!
//! Periodic JPEG stills of the caller's live video source.
//!
//! ## Encoding Steps:
//! 1. **Wrap**: the raw RGB8 buffer becomes an `RgbImage` (size checked)
//! 2. **Fit**: frames larger than `max_width` x `max_height` are scaled down,
//!    keeping the aspect ratio; smaller frames are never upscaled
//! 3. **Compress**: JPEG at the configured quality (60 by default)
//!
//! ## Rust Concepts:
//! - **spawn_blocking**: JPEG encoding is CPU-bound, so the sampler runs it on
//!   tokio's blocking pool and the async workers keep serving audio
//! - **Copy for JpegSettings**: the settings are a few integers, so they are
//!   copied into the blocking closure instead of shared

pub mod sampler;

pub use sampler::{TickOutcome, VideoFrameSampler};

use crate::error::SessionError;
use crate::media::RawFrame;
use chrono::{DateTime, Utc};
use image::codecs::jpeg::JpegEncoder;
use image::imageops::FilterType;
use image::{ExtendedColorType, RgbImage};

/// One compressed still, ready for the Transport.
#[derive(Debug, Clone, PartialEq)]
pub struct VideoSnapshot {
    /// Sampler tick that produced the still
    pub sequence: u64,
    pub jpeg: Vec<u8>,
    pub width: u32,
    pub height: u32,
    pub captured_at: DateTime<Utc>,
}

/// JPEG settings for outbound stills.
#[derive(Debug, Clone, Copy)]
pub struct JpegSettings {
    pub quality: u8,
    pub max_width: u32,
    pub max_height: u32,
}

/// Scale `frame` down to fit the configured bounds and compress it.
///
/// ## Returns:
/// `(jpeg bytes, width, height)` of the encoded image.
///
/// ## Errors:
/// `SessionError::Encoding` when the pixel buffer does not match the
/// declared size or the encoder fails.
pub fn encode_jpeg(frame: RawFrame, settings: JpegSettings) -> Result<(Vec<u8>, u32, u32), SessionError> {
    let (width, height) = (frame.width, frame.height);
    let image = RgbImage::from_raw(width, height, frame.pixels).ok_or_else(|| {
        SessionError::Encoding(format!("frame buffer does not hold {}x{} RGB pixels", width, height))
    })?;

    let (target_width, target_height) = fit_within(width, height, settings.max_width, settings.max_height);
    let image = if (target_width, target_height) != (width, height) {
        image::imageops::resize(&image, target_width, target_height, FilterType::Triangle)
    } else {
        image
    };

    let mut jpeg = Vec::new();
    JpegEncoder::new_with_quality(&mut jpeg, settings.quality.clamp(1, 100))
        .encode(image.as_raw(), image.width(), image.height(), ExtendedColorType::Rgb8)
        .map_err(|e| SessionError::Encoding(format!("JPEG encoding failed: {}", e)))?;

    Ok((jpeg, image.width(), image.height()))
}

/// Largest size with the same aspect ratio that fits in `max_width` x `max_height`.
fn fit_within(width: u32, height: u32, max_width: u32, max_height: u32) -> (u32, u32) {
    if width <= max_width && height <= max_height {
        return (width, height);
    }
    let scale = f64::min(max_width as f64 / width as f64, max_height as f64 / height as f64);
    (
        ((width as f64 * scale).round() as u32).max(1),
        ((height as f64 * scale).round() as u32).max(1),
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    fn settings() -> JpegSettings {
        JpegSettings {
            quality: 60,
            max_width: 640,
            max_height: 480,
        }
    }

    #[test]
    fn test_fit_within_keeps_aspect() {
        assert_eq!(fit_within(320, 240, 640, 480), (320, 240));
        assert_eq!(fit_within(1280, 720, 640, 480), (640, 360));
        assert_eq!(fit_within(480, 960, 640, 480), (240, 480));
    }

    #[test]
    fn test_encode_produces_jpeg() {
        let frame = RawFrame {
            width: 1280,
            height: 720,
            pixels: vec![200; 1280 * 720 * 3],
        };
        let (jpeg, width, height) = encode_jpeg(frame, settings()).unwrap();
        assert_eq!((width, height), (640, 360));
        assert_eq!(&jpeg[..2], &[0xFF, 0xD8]);
    }

    #[test]
    fn test_short_buffer_is_encoding_fault() {
        let frame = RawFrame {
            width: 4,
            height: 4,
            pixels: vec![0; 10],
        };
        assert!(matches!(encode_jpeg(frame, settings()), Err(SessionError::Encoding(_))));
    }
}
