//! # Audio Pipelines
//!
//! Everything between the microphone tap and the transport, and between the
//! transport and the speaker.
//!
//! ## Key Components:
//! - **processor**: downmix, resample, float to PCM16 conversion
//! - **buffer**: cuts wire samples into fixed-duration, sequenced chunks
//! - **meter**: RMS volume meter for the live input level
//! - **encoder**: the capture task feeding chunks to the transport
//! - **playback**: reorders inbound audio and plays it in sequence
//!
//! ## Wire Format:
//! - **Outbound**: 16 kHz mono PCM16, little-endian
//! - **Inbound**: mono PCM16 at the rate the agent declares (24 kHz by default)

pub mod buffer;
pub mod encoder;
pub mod meter;
pub mod playback;
pub mod processor;

pub use buffer::AudioChunk;
