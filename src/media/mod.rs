//! # Media Device Boundary
//!
//! The core never talks to hardware directly. It consumes three traits:
//!
//! - **AudioSource**: the live microphone tap, read by capture and the volume meter
//! - **VideoSource**: an already-live frame source owned by the caller
//! - **AudioOutput**: the playback device synthesized audio is written to
//!
//! `MediaDevices` opens the audio endpoints for each new session. The video
//! source is handed to `connect` by the caller because the core must never
//! start or stop the camera.
//!
//! ## Demo devices:
//! - **wav**: WAV-file microphone and WAV-file speaker
//! - **pattern**: a moving test pattern camera

pub mod pattern;
pub mod wav;

#[cfg(test)]
pub(crate) mod testing;

use crate::config::MediaConfig;
use crate::error::SessionError;
use async_trait::async_trait;
use std::time::Duration;
use tracing::info;

pub use pattern::TestPatternSource;
pub use wav::{NullOutput, SilenceSource, WavFileOutput, WavFileSource};

/// One block of raw microphone samples at the device's native format.
///
/// ## Layout:
/// `samples` is interleaved: for stereo, `[L0, R0, L1, R1, ...]`.
/// Values are normalized to [-1.0, 1.0].
#[derive(Debug, Clone, PartialEq)]
pub struct AudioFrame {
    pub samples: Vec<f32>,
    pub sample_rate: u32,
    pub channels: u16,
}

impl AudioFrame {
    pub fn new(samples: Vec<f32>, sample_rate: u32, channels: u16) -> Self {
        Self {
            samples,
            sample_rate,
            channels,
        }
    }

    /// Number of sample frames (samples per channel).
    pub fn frame_count(&self) -> usize {
        if self.channels == 0 {
            0
        } else {
            self.samples.len() / self.channels as usize
        }
    }

    pub fn duration(&self) -> Duration {
        if self.sample_rate == 0 {
            return Duration::ZERO;
        }
        Duration::from_secs_f64(self.frame_count() as f64 / self.sample_rate as f64)
    }

    /// Reject frames no encoder could interpret.
    pub fn validate(&self) -> Result<(), SessionError> {
        if self.sample_rate == 0 {
            return Err(SessionError::Encoding("audio frame has a zero sample rate".to_string()));
        }
        if self.channels == 0 {
            return Err(SessionError::Encoding("audio frame has no channels".to_string()));
        }
        if self.samples.is_empty() {
            return Err(SessionError::Encoding("audio frame is empty".to_string()));
        }
        if self.samples.len() % self.channels as usize != 0 {
            return Err(SessionError::Encoding(format!(
                "audio frame has {} samples, not a multiple of {} channels",
                self.samples.len(),
                self.channels
            )));
        }
        Ok(())
    }
}

/// An uncompressed RGB8 still grabbed from the video source.
#[derive(Debug, Clone, PartialEq)]
pub struct RawFrame {
    pub width: u32,
    pub height: u32,
    /// Row-major RGB triples, `width * height * 3` bytes
    pub pixels: Vec<u8>,
}

/// The live microphone tap.
///
/// `next_frame` suspends until the device delivers the next block.
/// `None` means the source ended; an error means one block was lost.
#[async_trait]
pub trait AudioSource: Send {
    async fn next_frame(&mut self) -> Option<Result<AudioFrame, SessionError>>;
}

/// A readable live video source (e.g. a running camera preview).
///
/// Shared by reference: the sampler only reads frames from it.
#[async_trait]
pub trait VideoSource: Send + Sync {
    async fn grab_frame(&self) -> Result<RawFrame, SessionError>;
}

/// The playback device.
///
/// ## Contract:
/// - `play` suspends until the device has accepted the samples
/// - `halt` stops output immediately and drops anything buffered
/// - `finish` is called once when the playback queue shuts down
#[async_trait]
pub trait AudioOutput: Send {
    async fn play(&mut self, samples: &[f32], sample_rate: u32) -> Result<(), SessionError>;

    fn halt(&mut self);

    fn finish(&mut self) -> Result<(), SessionError> {
        Ok(())
    }
}

/// Opens the audio endpoints for a new session.
pub trait MediaDevices: Send + Sync {
    fn open_microphone(&self) -> Result<Box<dyn AudioSource>, SessionError>;
    fn open_speaker(&self) -> Result<Box<dyn AudioOutput>, SessionError>;
}

/// File-backed devices driven by `MediaConfig`.
#[derive(Debug, Clone)]
pub struct DemoDevices {
    config: MediaConfig,
    output_sample_rate: u32,
}

impl DemoDevices {
    pub fn new(config: MediaConfig, output_sample_rate: u32) -> Self {
        Self {
            config,
            output_sample_rate,
        }
    }
}

impl MediaDevices for DemoDevices {
    fn open_microphone(&self) -> Result<Box<dyn AudioSource>, SessionError> {
        match &self.config.input_wav {
            Some(path) => {
                info!("Opening WAV microphone: {}", path);
                Ok(Box::new(WavFileSource::open(path, self.config.loop_input)?))
            }
            None => {
                info!("No input WAV configured, capturing silence");
                Ok(Box::new(SilenceSource::new(16000)))
            }
        }
    }

    fn open_speaker(&self) -> Result<Box<dyn AudioOutput>, SessionError> {
        match &self.config.output_wav {
            Some(path) => Ok(Box::new(WavFileOutput::create(path, self.output_sample_rate))),
            None => Ok(Box::new(NullOutput::default())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_frame_validation() {
        assert!(AudioFrame::new(vec![0.1, 0.2], 48000, 2).validate().is_ok());
        assert!(AudioFrame::new(vec![0.1, 0.2, 0.3], 48000, 2).validate().is_err());
        assert!(AudioFrame::new(vec![], 48000, 1).validate().is_err());
        assert!(AudioFrame::new(vec![0.0], 0, 1).validate().is_err());
    }

    #[test]
    fn test_frame_duration() {
        let frame = AudioFrame::new(vec![0.0; 960 * 2], 48000, 2);
        assert_eq!(frame.frame_count(), 960);
        assert_eq!(frame.duration(), Duration::from_millis(20));
    }
}
