//! # Outbound Chunk Accumulation
//!
//! Collects wire-format samples and cuts them into fixed-duration chunks.
//! Each completed chunk gets the next sequence number, so the order chunks
//! leave the accumulator is the order they were captured.
//!
//! ## Key Features:
//! - **Fixed duration**: every chunk holds exactly `chunk_samples` samples
//! - **Monotonic sequencing**: sequence numbers start at 1 and never repeat
//! - **No partial chunks**: a trailing remainder is dropped when capture stops

use crate::audio::processor::encode_pcm16_le;
use std::collections::VecDeque;

/// A fixed-duration slice of mono PCM16 audio at the wire rate.
#[derive(Debug, Clone, PartialEq)]
pub struct AudioChunk {
    /// Capture-order sequence number, starting at 1 for each session
    pub sequence: u64,
    pub sample_rate: u32,
    pub samples: Vec<i16>,
}

impl AudioChunk {
    /// Little-endian PCM16 bytes, as sent on the wire.
    pub fn to_pcm_bytes(&self) -> Vec<u8> {
        encode_pcm16_le(&self.samples)
    }

    pub fn duration_ms(&self) -> u64 {
        if self.sample_rate == 0 {
            return 0;
        }
        self.samples.len() as u64 * 1000 / self.sample_rate as u64
    }
}

/// Configuration for chunking behavior.
#[derive(Debug, Clone)]
pub struct ChunkConfig {
    /// Wire sample rate (16000 by default)
    pub sample_rate: u32,
    /// Samples per completed chunk
    pub chunk_samples: usize,
}

/// FIFO of pending wire samples that emits full chunks.
pub struct ChunkAccumulator {
    pending: VecDeque<i16>,
    config: ChunkConfig,
    next_sequence: u64,
}

impl ChunkAccumulator {
    pub fn new(config: ChunkConfig) -> Self {
        Self {
            pending: VecDeque::with_capacity(config.chunk_samples * 2),
            config,
            next_sequence: 1,
        }
    }

    /// Append samples and return every chunk that is now complete, oldest first.
    pub fn push(&mut self, samples: &[i16]) -> Vec<AudioChunk> {
        self.pending.extend(samples.iter().copied());

        let size = self.config.chunk_samples.max(1);
        let mut completed = Vec::new();
        while self.pending.len() >= size {
            let samples: Vec<i16> = self.pending.drain(..size).collect();
            completed.push(AudioChunk {
                sequence: self.next_sequence,
                sample_rate: self.config.sample_rate,
                samples,
            });
            self.next_sequence += 1;
        }
        completed
    }

    /// Samples waiting for the next chunk.
    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }

    /// Sequence number the next completed chunk will carry.
    pub fn next_sequence(&self) -> u64 {
        self.next_sequence
    }

    /// Drop the trailing remainder (capture stopped mid-chunk).
    pub fn clear(&mut self) {
        self.pending.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn accumulator(chunk_samples: usize) -> ChunkAccumulator {
        ChunkAccumulator::new(ChunkConfig {
            sample_rate: 16000,
            chunk_samples,
        })
    }

    #[test]
    fn test_chunks_are_cut_at_fixed_size() {
        let mut acc = accumulator(4);
        assert!(acc.push(&[1, 2, 3]).is_empty());
        let chunks = acc.push(&[4, 5, 6, 7, 8, 9]);
        assert_eq!(chunks.len(), 2);
        assert_eq!(chunks[0].samples, vec![1, 2, 3, 4]);
        assert_eq!(chunks[1].samples, vec![5, 6, 7, 8]);
        assert_eq!(acc.pending_len(), 1);
    }

    #[test]
    fn test_sequence_numbers_increase() {
        let mut acc = accumulator(2);
        let mut seen = Vec::new();
        for block in [&[1i16, 2, 3][..], &[4], &[5, 6, 7, 8, 9]] {
            seen.extend(acc.push(block).into_iter().map(|c| c.sequence));
        }
        assert_eq!(seen, vec![1, 2, 3, 4]);
        assert_eq!(acc.next_sequence(), 5);
    }

    #[test]
    fn test_chunk_duration() {
        let mut acc = accumulator(1600);
        let chunks = acc.push(&vec![0i16; 1600]);
        assert_eq!(chunks[0].duration_ms(), 100);
        assert_eq!(chunks[0].to_pcm_bytes().len(), 3200);
    }

    #[test]
    fn test_clear_drops_remainder() {
        let mut acc = accumulator(4);
        acc.push(&[1, 2]);
        acc.clear();
        assert_eq!(acc.pending_len(), 0);
        assert_eq!(acc.next_sequence(), 1);
    }
}
