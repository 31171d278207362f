//! Scripted devices for pipeline and controller tests.

use super::{AudioFrame, AudioOutput, AudioSource, MediaDevices, RawFrame, VideoSource};
use crate::error::SessionError;
use async_trait::async_trait;
use std::collections::VecDeque;
use std::f32::consts::PI;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::watch;

/// A real-time paced sine source at the given amplitude.
pub struct ToneSource {
    sample_rate: u32,
    channels: u16,
    amplitude: f32,
    frame_len: usize,
    phase: usize,
    remaining: Option<usize>,
}

impl ToneSource {
    pub fn new(sample_rate: u32, channels: u16, amplitude: f32) -> Self {
        Self {
            sample_rate,
            channels,
            amplitude,
            frame_len: sample_rate as usize / 50,
            phase: 0,
            remaining: None,
        }
    }

    pub fn loud() -> Self {
        Self::new(48000, 2, 0.9)
    }

    /// Ends after `frames` frames.
    pub fn finite(mut self, frames: usize) -> Self {
        self.remaining = Some(frames);
        self
    }
}

#[async_trait]
impl AudioSource for ToneSource {
    async fn next_frame(&mut self) -> Option<Result<AudioFrame, SessionError>> {
        if let Some(remaining) = self.remaining.as_mut() {
            if *remaining == 0 {
                return None;
            }
            *remaining -= 1;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;

        let mut samples = Vec::with_capacity(self.frame_len * self.channels as usize);
        for _ in 0..self.frame_len {
            let t = self.phase as f32 / self.sample_rate as f32;
            let value = self.amplitude * (2.0 * PI * 440.0 * t).sin();
            for _ in 0..self.channels {
                samples.push(value);
            }
            self.phase += 1;
        }
        Some(Ok(AudioFrame::new(samples, self.sample_rate, self.channels)))
    }
}

/// Yields a fixed script, then blocks forever.
pub struct ScriptedSource {
    items: VecDeque<Option<Result<AudioFrame, SessionError>>>,
}

impl ScriptedSource {
    pub fn new(items: Vec<Option<Result<AudioFrame, SessionError>>>) -> Self {
        Self { items: items.into() }
    }
}

#[async_trait]
impl AudioSource for ScriptedSource {
    async fn next_frame(&mut self) -> Option<Result<AudioFrame, SessionError>> {
        match self.items.pop_front() {
            Some(item) => item,
            None => std::future::pending().await,
        }
    }
}

/// A camera whose grabs wait until the gate is opened.
pub struct GatedVideoSource {
    gate: watch::Receiver<bool>,
    grabs: AtomicUsize,
}

impl GatedVideoSource {
    pub fn new(open: bool) -> (Self, watch::Sender<bool>) {
        let (tx, rx) = watch::channel(open);
        (
            Self {
                gate: rx,
                grabs: AtomicUsize::new(0),
            },
            tx,
        )
    }

    pub fn grabs(&self) -> usize {
        self.grabs.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl VideoSource for GatedVideoSource {
    async fn grab_frame(&self) -> Result<RawFrame, SessionError> {
        self.grabs.fetch_add(1, Ordering::SeqCst);
        let mut gate = self.gate.clone();
        gate.wait_for(|open| *open)
            .await
            .map_err(|_| SessionError::Encoding("camera gate dropped".to_string()))?;
        Ok(RawFrame {
            width: 8,
            height: 8,
            pixels: vec![128; 8 * 8 * 3],
        })
    }
}

/// Everything a `RecordingOutput` has seen, shared with the test.
#[derive(Debug, Default)]
pub struct PlaybackLog {
    pub played: Mutex<Vec<f32>>,
    pub halts: AtomicUsize,
    pub finishes: AtomicUsize,
}

/// A speaker that records samples and takes real time to play them.
pub struct RecordingOutput {
    log: Arc<PlaybackLog>,
}

impl RecordingOutput {
    pub fn new() -> (Self, Arc<PlaybackLog>) {
        let log = Arc::new(PlaybackLog::default());
        (Self { log: log.clone() }, log)
    }
}

#[async_trait]
impl AudioOutput for RecordingOutput {
    async fn play(&mut self, samples: &[f32], sample_rate: u32) -> Result<(), SessionError> {
        self.log.played.lock().unwrap().extend_from_slice(samples);
        let seconds = samples.len() as f64 / sample_rate.max(1) as f64;
        tokio::time::sleep(Duration::from_secs_f64(seconds)).await;
        Ok(())
    }

    fn halt(&mut self) {
        self.log.halts.fetch_add(1, Ordering::SeqCst);
    }

    fn finish(&mut self) -> Result<(), SessionError> {
        self.log.finishes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

/// Devices handing out a loud tone microphone and a recording speaker.
pub struct TestDevices {
    pub playback: Arc<PlaybackLog>,
    pub fail_speaker: bool,
}

impl TestDevices {
    pub fn new() -> Self {
        Self {
            playback: Arc::new(PlaybackLog::default()),
            fail_speaker: false,
        }
    }
}

impl MediaDevices for TestDevices {
    fn open_microphone(&self) -> Result<Box<dyn AudioSource>, SessionError> {
        Ok(Box::new(ToneSource::loud()))
    }

    fn open_speaker(&self) -> Result<Box<dyn AudioOutput>, SessionError> {
        if self.fail_speaker {
            return Err(SessionError::Config("no playback device".to_string()));
        }
        Ok(Box::new(RecordingOutput {
            log: self.playback.clone(),
        }))
    }
}
