//! WAV-file stand-ins for the microphone and speaker.
//!
//! Sources and outputs are paced in real time so the pipelines see the same
//! timing they would from hardware.

use super::{AudioFrame, AudioOutput, AudioSource};
use crate::error::SessionError;
use async_trait::async_trait;
use std::fs::File;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::time::{interval, Interval, MissedTickBehavior};
use tracing::{debug, info, warn};
use wav::{BitDepth, Header, WAV_FORMAT_PCM};

const FRAME_DURATION: Duration = Duration::from_millis(20);

fn frame_clock() -> Interval {
    let mut clock = interval(FRAME_DURATION);
    clock.set_missed_tick_behavior(MissedTickBehavior::Delay);
    clock
}

fn samples_per_frame(sample_rate: u32) -> usize {
    (sample_rate as usize * FRAME_DURATION.as_millis() as usize / 1000).max(1)
}

/// Normalize any supported WAV sample format to f32 in [-1.0, 1.0].
fn to_f32(data: BitDepth) -> Result<Vec<f32>, SessionError> {
    match data {
        BitDepth::Eight(samples) => Ok(samples.into_iter().map(|s| (s as f32 - 128.0) / 128.0).collect()),
        BitDepth::Sixteen(samples) => Ok(samples.into_iter().map(|s| s as f32 / 32768.0).collect()),
        BitDepth::TwentyFour(samples) => Ok(samples.into_iter().map(|s| s as f32 / 8_388_608.0).collect()),
        BitDepth::ThirtyTwoFloat(samples) => Ok(samples.into_iter().map(|s| s.clamp(-1.0, 1.0)).collect()),
        BitDepth::Empty => Err(SessionError::Config("WAV file has no audio data".to_string())),
    }
}

/// Plays a WAV file as if it were a live microphone.
pub struct WavFileSource {
    samples: Vec<f32>,
    sample_rate: u32,
    channels: u16,
    position: usize,
    loop_input: bool,
    clock: Interval,
}

impl WavFileSource {
    pub fn open(path: impl AsRef<Path>, loop_input: bool) -> Result<Self, SessionError> {
        let path = path.as_ref();
        let mut file = File::open(path)
            .map_err(|e| SessionError::Config(format!("cannot open {}: {}", path.display(), e)))?;
        let (header, data) = wav::read(&mut file)
            .map_err(|e| SessionError::Config(format!("cannot read {}: {}", path.display(), e)))?;

        if header.channel_count == 0 || header.sampling_rate == 0 {
            return Err(SessionError::Config(format!("{} has an invalid header", path.display())));
        }
        let samples = to_f32(data)?;
        // Drop a trailing partial sample frame.
        let whole = samples.len() - samples.len() % header.channel_count as usize;
        let mut samples = samples;
        samples.truncate(whole);
        if samples.is_empty() {
            return Err(SessionError::Config(format!("{} contains no samples", path.display())));
        }

        info!(
            "Loaded {}: {} Hz, {} channel(s), {:.2}s",
            path.display(),
            header.sampling_rate,
            header.channel_count,
            samples.len() as f64 / header.channel_count as f64 / header.sampling_rate as f64
        );

        Ok(Self {
            samples,
            sample_rate: header.sampling_rate,
            channels: header.channel_count,
            position: 0,
            loop_input,
            clock: frame_clock(),
        })
    }
}

#[async_trait]
impl AudioSource for WavFileSource {
    async fn next_frame(&mut self) -> Option<Result<AudioFrame, SessionError>> {
        if self.position >= self.samples.len() {
            if !self.loop_input {
                return None;
            }
            debug!("Input WAV ended, looping");
            self.position = 0;
        }

        self.clock.tick().await;

        let len = samples_per_frame(self.sample_rate) * self.channels as usize;
        let end = (self.position + len).min(self.samples.len());
        let frame = self.samples[self.position..end].to_vec();
        self.position = end;

        Some(Ok(AudioFrame::new(frame, self.sample_rate, self.channels)))
    }
}

/// A microphone that hears nothing.
pub struct SilenceSource {
    sample_rate: u32,
    clock: Interval,
}

impl SilenceSource {
    pub fn new(sample_rate: u32) -> Self {
        Self {
            sample_rate,
            clock: frame_clock(),
        }
    }
}

#[async_trait]
impl AudioSource for SilenceSource {
    async fn next_frame(&mut self) -> Option<Result<AudioFrame, SessionError>> {
        self.clock.tick().await;
        Some(Ok(AudioFrame::new(
            vec![0.0; samples_per_frame(self.sample_rate)],
            self.sample_rate,
            1,
        )))
    }
}

/// Collects synthesized audio and writes it as 16-bit mono WAV on `finish`.
pub struct WavFileOutput {
    path: PathBuf,
    sample_rate: u32,
    recorded: Vec<i16>,
}

impl WavFileOutput {
    /// The file is only created once the session ends.
    pub fn create(path: impl Into<PathBuf>, sample_rate: u32) -> Self {
        Self {
            path: path.into(),
            sample_rate,
            recorded: Vec::new(),
        }
    }
}

#[async_trait]
impl AudioOutput for WavFileOutput {
    async fn play(&mut self, samples: &[f32], sample_rate: u32) -> Result<(), SessionError> {
        if sample_rate != self.sample_rate {
            warn!(
                "Speaker opened at {} Hz but received {} Hz audio, recording at the latter",
                self.sample_rate, sample_rate
            );
            self.sample_rate = sample_rate;
        }
        self.recorded
            .extend(samples.iter().map(|s| (s.clamp(-1.0, 1.0) * i16::MAX as f32) as i16));
        tokio::time::sleep(playback_duration(samples.len(), sample_rate)).await;
        Ok(())
    }

    // Nothing is buffered past what `play` already accepted.
    fn halt(&mut self) {}

    fn finish(&mut self) -> Result<(), SessionError> {
        let header = Header::new(WAV_FORMAT_PCM, 1, self.sample_rate, 16);
        let data = BitDepth::Sixteen(std::mem::take(&mut self.recorded));
        let mut file = File::create(&self.path)
            .map_err(|e| SessionError::Config(format!("cannot create {}: {}", self.path.display(), e)))?;
        wav::write(header, &data, &mut file)
            .map_err(|e| SessionError::Config(format!("cannot write {}: {}", self.path.display(), e)))?;

        info!("Wrote synthesized audio to {}", self.path.display());
        Ok(())
    }
}

/// Discards audio at real-time speed.
#[derive(Debug, Default)]
pub struct NullOutput;

#[async_trait]
impl AudioOutput for NullOutput {
    async fn play(&mut self, samples: &[f32], sample_rate: u32) -> Result<(), SessionError> {
        tokio::time::sleep(playback_duration(samples.len(), sample_rate)).await;
        Ok(())
    }

    fn halt(&mut self) {}
}

fn playback_duration(samples: usize, sample_rate: u32) -> Duration {
    if sample_rate == 0 {
        return Duration::ZERO;
    }
    Duration::from_secs_f64(samples as f64 / sample_rate as f64)
}
