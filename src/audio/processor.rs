//! # Audio Format Conversion
//!
//! Turns raw microphone frames into the wire format and decodes synthesized
//! audio coming back from the agent.
//!
//! ## Outbound path:
//! 1. **Validate**: reject frames with no channels, no rate, or ragged length
//! 2. **Downmix**: average interleaved channels into mono
//! 3. **Resample**: linear interpolation from the native rate to the wire rate
//! 4. **Quantize**: scale [-1.0, 1.0] floats to 16-bit PCM
//!
//! Every step is a pure function of the input samples and the configured
//! target rate, so the same capture always produces the same chunks.
//!
//! ## Rust Concepts:
//! - **byteorder**: `WriteBytesExt::write_i16::<LittleEndian>` and
//!   `ReadBytesExt::read_i16` spell out the wire byte order explicitly
//! - **Option<LinearResampler>**: built lazily from the first frame, since the
//!   native rate is only known once the device delivers audio

use crate::error::SessionError;
use crate::media::AudioFrame;
use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use std::io::Cursor;

/// Converts native capture frames into mono PCM16 at the wire rate.
///
/// ## State:
/// Holds a resampler whose fractional position carries over between frames,
/// so chunk boundaries never introduce clicks or drift.
pub struct AudioProcessor {
    target_rate: u32,
    resampler: Option<LinearResampler>,
}

impl AudioProcessor {
    pub fn new(target_rate: u32) -> Self {
        Self {
            target_rate,
            resampler: None,
        }
    }

    /// Convert one native frame to wire samples.
    ///
    /// ## Errors:
    /// Returns `SessionError::Encoding` when the frame is malformed. The
    /// resampler state is untouched in that case.
    pub fn process(&mut self, frame: &AudioFrame) -> Result<Vec<i16>, SessionError> {
        frame.validate()?;

        let mono = downmix(&frame.samples, frame.channels);

        // Rebuild the resampler if the device switched rates under us.
        if self.resampler.as_ref().map(LinearResampler::source_rate) != Some(frame.sample_rate) {
            self.resampler = None;
        }
        let target_rate = self.target_rate;
        let resampler = self
            .resampler
            .get_or_insert_with(|| LinearResampler::new(frame.sample_rate, target_rate));

        let resampled = resampler.process(&mono);
        Ok(float_to_pcm(&resampled))
    }
}

/// Average interleaved channels into one mono channel.
pub fn downmix(samples: &[f32], channels: u16) -> Vec<f32> {
    match channels {
        0 => Vec::new(),
        1 => samples.to_vec(),
        n => samples
            .chunks_exact(n as usize)
            .map(|frame| frame.iter().sum::<f32>() / n as f32)
            .collect(),
    }
}

/// Streaming linear-interpolation resampler for mono audio.
///
/// ## How it works:
/// Output sample `k` is read at input position `pos + k * step` where
/// `step = source_rate / target_rate`. The last input sample and the leftover
/// fractional position are kept so the next call continues seamlessly.
#[derive(Debug, Clone)]
pub struct LinearResampler {
    source_rate: u32,
    target_rate: u32,
    step: f64,
    position: f64,
    last: Option<f32>,
}

impl LinearResampler {
    pub fn new(source_rate: u32, target_rate: u32) -> Self {
        Self {
            source_rate,
            target_rate,
            step: source_rate as f64 / target_rate as f64,
            position: 0.0,
            last: None,
        }
    }

    pub fn source_rate(&self) -> u32 {
        self.source_rate
    }

    pub fn process(&mut self, input: &[f32]) -> Vec<f32> {
        if input.is_empty() {
            return Vec::new();
        }
        if self.source_rate == self.target_rate {
            return input.to_vec();
        }

        let mut buffer = Vec::with_capacity(input.len() + 1);
        if let Some(last) = self.last {
            buffer.push(last);
        }
        buffer.extend_from_slice(input);

        let estimated = (input.len() as f64 / self.step).ceil() as usize + 1;
        let mut output = Vec::with_capacity(estimated);
        let end = (buffer.len() - 1) as f64;

        let mut t = self.position;
        while t < end {
            let index = t.floor() as usize;
            let frac = (t - index as f64) as f32;
            let a = buffer[index];
            let b = buffer[index + 1];
            output.push(a + (b - a) * frac);
            t += self.step;
        }

        // Position is now relative to the last sample, which becomes index 0.
        self.position = t - end;
        self.last = buffer.last().copied();
        output
    }
}

/// Convert 32-bit float samples to 16-bit PCM, clamping out-of-range values.
pub fn float_to_pcm(samples: &[f32]) -> Vec<i16> {
    samples
        .iter()
        .map(|&sample| {
            let scaled = sample * 32768.0;
            scaled.clamp(-32768.0, 32767.0) as i16
        })
        .collect()
}

/// Scale 16-bit PCM samples to the [-1.0, 1.0] float range.
pub fn pcm_to_float(samples: &[i16]) -> Vec<f32> {
    samples.iter().map(|&sample| sample as f32 / 32768.0).collect()
}

/// Serialize PCM16 samples as little-endian bytes.
pub fn encode_pcm16_le(samples: &[i16]) -> Vec<u8> {
    let mut bytes = Vec::with_capacity(samples.len() * 2);
    for &sample in samples {
        // Writing into a Vec cannot fail.
        let _ = bytes.write_i16::<LittleEndian>(sample);
    }
    bytes
}

/// Parse little-endian PCM16 bytes into normalized floats.
pub fn decode_pcm16_le(data: &[u8]) -> Result<Vec<f32>, SessionError> {
    if data.len() % 2 != 0 {
        return Err(SessionError::Encoding(
            "PCM16 payload length must be even".to_string(),
        ));
    }

    let mut cursor = Cursor::new(data);
    let mut samples = Vec::with_capacity(data.len() / 2);
    while let Ok(sample) = cursor.read_i16::<LittleEndian>() {
        samples.push(sample);
    }
    Ok(pcm_to_float(&samples))
}
