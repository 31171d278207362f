//! # Pipeline Metrics
//!
//! Counters exposed by `/api/v1/metrics` and summarized in `/api/v1/health`.
//! They accumulate over the process lifetime, across Sessions.
//!
//! ## Who bumps what:
//! - **chunks_sent / frames_sent**: the Transport writer, after a successful write
//! - **frames_skipped**: the video sampler, when a tick finds a frame in flight
//! - **segments_played**: the playback queue, after a segment fully plays
//! - **encoding_faults**: capture and sampler, once per dropped unit
//! - **sessions_started / sessions_failed**: the Session Controller
//!
//! ## Rust Concepts:
//! - **AtomicU64 with Ordering::Relaxed**: each counter is independent, so no
//!   ordering between counters is promised; a snapshot may mix values read a
//!   few nanoseconds apart
//! - **Arc<PipelineMetrics>**: one instance is shared by every pipeline task

use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};

/// Counters updated by the pipelines. Cheap to bump from any task.
#[derive(Debug, Default)]
pub struct PipelineMetrics {
    chunks_sent: AtomicU64,
    frames_sent: AtomicU64,
    frames_skipped: AtomicU64,
    segments_played: AtomicU64,
    encoding_faults: AtomicU64,
    sessions_started: AtomicU64,
    sessions_failed: AtomicU64,
}

/// Point-in-time copy of `PipelineMetrics`.
///
/// ## JSON Shape:
/// ```json
/// { "chunks_sent": 120, "frames_sent": 12, "frames_skipped": 0, ... }
/// ```
#[derive(Debug, Clone, Default, Serialize, PartialEq)]
pub struct MetricsSnapshot {
    pub chunks_sent: u64,
    pub frames_sent: u64,
    pub frames_skipped: u64,
    pub segments_played: u64,
    pub encoding_faults: u64,
    pub sessions_started: u64,
    pub sessions_failed: u64,
}

impl PipelineMetrics {
    pub fn chunk_sent(&self) {
        self.chunks_sent.fetch_add(1, Ordering::Relaxed);
    }

    pub fn frame_sent(&self) {
        self.frames_sent.fetch_add(1, Ordering::Relaxed);
    }

    pub fn frame_skipped(&self) {
        self.frames_skipped.fetch_add(1, Ordering::Relaxed);
    }

    pub fn segment_played(&self) {
        self.segments_played.fetch_add(1, Ordering::Relaxed);
    }

    pub fn encoding_fault(&self) {
        self.encoding_faults.fetch_add(1, Ordering::Relaxed);
    }

    pub fn session_started(&self) {
        self.sessions_started.fetch_add(1, Ordering::Relaxed);
    }

    pub fn session_failed(&self) {
        self.sessions_failed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            chunks_sent: self.chunks_sent.load(Ordering::Relaxed),
            frames_sent: self.frames_sent.load(Ordering::Relaxed),
            frames_skipped: self.frames_skipped.load(Ordering::Relaxed),
            segments_played: self.segments_played.load(Ordering::Relaxed),
            encoding_faults: self.encoding_faults.load(Ordering::Relaxed),
            sessions_started: self.sessions_started.load(Ordering::Relaxed),
            sessions_failed: self.sessions_failed.load(Ordering::Relaxed),
        }
    }
}
