//! # Volume Meter
//!
//! Derives a normalized loudness value from the raw microphone tap so a UI can
//! animate a level indicator while the Session is live.
//!
//! ## Data Flow:
//! 1. The capture loop hands every native-rate `AudioFrame` to `VolumeMeter::observe`
//! 2. Squared samples accumulate until one window (50 ms by default) is full
//! 3. The window's RMS is clamped to [0, 1] and stored in `VolumeLevel`
//! 4. The same value is published as a `SessionSignal::Volume` for subscribers
//!
//! ## Rust Concepts:
//! - **AtomicU32 + f32::to_bits**: there is no atomic float in std, so the
//!   level is stored as its bit pattern and converted back on read
//! - **Arc<AtomicU32>**: the writer (capture task) and every reader (HTTP
//!   handlers, the controller) share one cell without a lock
//! - **&AudioFrame**: the meter only borrows the frame; the encoder processes
//!   the same frame right after, in the same task
//!
//! ## Invariants:
//! - The meter never mutates or delays the audio the encoder sees
//! - Only one capture loop writes a given `VolumeLevel`

use crate::media::AudioFrame;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

/// Lock-free cell holding the latest loudness value in [0, 1].
///
/// ## Usage:
/// ```rust,ignore
/// let level = VolumeLevel::new();
/// level.set(1.7);            // clamped
/// assert_eq!(level.get(), 1.0);
/// ```
#[derive(Debug, Clone, Default)]
pub struct VolumeLevel {
    bits: Arc<AtomicU32>,
}

impl VolumeLevel {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self) -> f32 {
        f32::from_bits(self.bits.load(Ordering::Acquire))
    }

    pub fn set(&self, level: f32) {
        self.bits.store(level.clamp(0.0, 1.0).to_bits(), Ordering::Release);
    }

    pub fn reset(&self) {
        self.set(0.0);
    }
}

/// Computes RMS over fixed windows of the native-rate stream.
///
/// ## Scale:
/// A full-scale sine reads 1.0 (its RMS of 1/√2 is normalized by √2) and
/// silence reads 0.0. Interleaved channels are folded into the same window,
/// so a window always spans `window_ms` of wall-clock audio.
///
/// ## Fields:
/// - `level`: where completed windows are published
/// - `sum_squares` / `counted`: running totals for the open window
pub struct VolumeMeter {
    level: VolumeLevel,
    window_ms: u32,
    sum_squares: f64,
    counted: usize,
}

impl VolumeMeter {
    pub fn new(level: VolumeLevel, window_ms: u32) -> Self {
        Self {
            level,
            window_ms,
            sum_squares: 0.0,
            counted: 0,
        }
    }

    /// Fold one frame into the current window.
    ///
    /// Returns the new value each time a window completes. The frame is only
    /// read; the tap is shared with the capture encoder.
    pub fn observe(&mut self, frame: &AudioFrame) -> Option<f32> {
        let window = self.window_samples(frame);
        if window == 0 {
            return None;
        }

        let mut published = None;
        for &sample in &frame.samples {
            self.sum_squares += (sample as f64) * (sample as f64);
            self.counted += 1;

            if self.counted >= window {
                let rms = (self.sum_squares / self.counted as f64).sqrt() as f32;
                let normalized = (rms * std::f32::consts::SQRT_2).min(1.0);
                self.level.set(normalized);
                published = Some(normalized);
                self.sum_squares = 0.0;
                self.counted = 0;
            }
        }
        published
    }

    fn window_samples(&self, frame: &AudioFrame) -> usize {
        let frames = frame.sample_rate as usize * self.window_ms as usize / 1000;
        frames * frame.channels as usize
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sine(amplitude: f32, frames: usize, rate: u32) -> AudioFrame {
        let samples = (0..frames)
            .map(|i| amplitude * (2.0 * std::f32::consts::PI * 440.0 * i as f32 / rate as f32).sin())
            .collect();
        AudioFrame::new(samples, rate, 1)
    }

    #[test]
    fn test_silence_reads_zero() {
        let level = VolumeLevel::new();
        let mut meter = VolumeMeter::new(level.clone(), 50);
        let published = meter.observe(&AudioFrame::new(vec![0.0; 4800], 48000, 1));
        assert_eq!(published, Some(0.0));
        assert_eq!(level.get(), 0.0);
    }

    #[test]
    fn test_full_scale_sine_reads_near_one() {
        let level = VolumeLevel::new();
        let mut meter = VolumeMeter::new(level.clone(), 50);
        meter.observe(&sine(1.0, 4800, 48000));
        assert!(level.get() > 0.95, "got {}", level.get());
    }

    #[test]
    fn test_partial_window_does_not_publish() {
        let level = VolumeLevel::new();
        let mut meter = VolumeMeter::new(level.clone(), 50);
        // 20ms of a 50ms window
        assert_eq!(meter.observe(&sine(0.5, 960, 48000)), None);
        assert_eq!(level.get(), 0.0);
    }

    #[test]
    fn test_level_reset() {
        let level = VolumeLevel::new();
        level.set(3.0);
        assert_eq!(level.get(), 1.0);
        level.reset();
        assert_eq!(level.get(), 0.0);
    }
}
