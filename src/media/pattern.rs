//! # Test Pattern Camera
//!
//! A synthetic `VideoSource` for running the server without a real camera.
//! Each grab renders a fresh RGB8 frame at the configured maximum size, so the
//! sampler's JPEG path sees realistic input and the agent sees motion.
//!
//! ## Pattern:
//! - **Red**: horizontal gradient, shifted 8 steps per grab
//! - **Green**: vertical gradient, shifted with the red channel
//! - **Blue**: static diagonal gradient
//!
//! ## Rust Concepts:
//! - **&self + AtomicU64**: `VideoSource::grab_frame` takes `&self` because the
//!   source is shared (`Arc<dyn VideoSource>`), so the frame counter is atomic
//!   instead of needing `&mut self` or a lock

use super::{RawFrame, VideoSource};
use crate::error::SessionError;
use async_trait::async_trait;
use std::sync::atomic::{AtomicU64, Ordering};

/// A camera stand-in that renders a diagonal gradient drifting one step per grab.
#[derive(Debug)]
pub struct TestPatternSource {
    width: u32,
    height: u32,
    frame: AtomicU64,
}

impl TestPatternSource {
    pub fn new(width: u32, height: u32) -> Self {
        Self {
            width: width.max(1),
            height: height.max(1),
            frame: AtomicU64::new(0),
        }
    }

    /// Render frame number `frame` as row-major RGB triples.
    fn render(&self, frame: u64) -> RawFrame {
        let shift = (frame * 8 % 256) as u32;
        let mut pixels = Vec::with_capacity((self.width * self.height * 3) as usize);
        for y in 0..self.height {
            for x in 0..self.width {
                pixels.push(((x * 255 / self.width + shift) % 256) as u8);
                pixels.push(((y * 255 / self.height + shift) % 256) as u8);
                pixels.push((((x + y) * 255 / (self.width + self.height)) % 256) as u8);
            }
        }
        RawFrame {
            width: self.width,
            height: self.height,
            pixels,
        }
    }
}

#[async_trait]
impl VideoSource for TestPatternSource {
    async fn grab_frame(&self) -> Result<RawFrame, SessionError> {
        let frame = self.frame.fetch_add(1, Ordering::Relaxed);
        Ok(self.render(frame))
    }
}
