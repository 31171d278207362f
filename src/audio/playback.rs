//! # Playback Queue
//!
//! Plays inbound segments back-to-back, strictly in arrival order.
//!
//! ## Ordering:
//! Segments are resequenced by their arrival sequence number before they
//! become playable, so a segment that finished decoding early waits for its
//! predecessors instead of overtaking them.
//!
//! ## Output:
//! Audio is written to the device in short slices. Between slices the queue
//! absorbs newly arrived segments and checks for `stop`, so stopping or an
//! `Interrupted` marker takes effect within one slice.
//!
//! ## Rust Concepts:
//! - **BTreeMap<u64, _>**: keyed by sequence number, so the smallest waiting
//!   segment is always first and gaps are easy to detect
//! - **select! with biased**: `stop` is polled before the device, so a stop
//!   request wins even when audio is ready to play

use crate::media::AudioOutput;
use crate::session::metrics::PipelineMetrics;
use crate::transport::{ControlSignal, InboundSegment, SegmentPayload};
use std::collections::{BTreeMap, VecDeque};
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info, trace, warn};

/// Playback slice length in milliseconds.
const SLICE_MS: usize = 20;

/// Restores arrival order for segments that may be handed over out of order.
#[derive(Debug)]
pub struct Resequencer {
    next_expected: u64,
    waiting: BTreeMap<u64, SegmentPayload>,
}

impl Resequencer {
    pub fn new() -> Self {
        Self {
            next_expected: 1,
            waiting: BTreeMap::new(),
        }
    }

    /// Accept one segment and return every payload that is now in order.
    pub fn insert(&mut self, segment: InboundSegment) -> Vec<SegmentPayload> {
        if segment.sequence < self.next_expected {
            debug!("Dropping duplicate segment #{}", segment.sequence);
            return Vec::new();
        }
        self.waiting.insert(segment.sequence, segment.payload);

        let mut ready = Vec::new();
        while let Some(payload) = self.waiting.remove(&self.next_expected) {
            ready.push(payload);
            self.next_expected += 1;
        }
        ready
    }

    pub fn waiting(&self) -> usize {
        self.waiting.len()
    }

    pub fn clear(&mut self) {
        self.waiting.clear();
    }
}

impl Default for Resequencer {
    fn default() -> Self {
        Self::new()
    }
}

struct QueuedAudio {
    sample_rate: u32,
    samples: Vec<f32>,
    offset: usize,
}

#[derive(Debug, Default)]
struct PlaybackStats {
    pending: AtomicUsize,
    played: AtomicU64,
}

pub struct PlaybackQueue {
    stop: watch::Sender<bool>,
    task: Option<JoinHandle<()>>,
    stats: Arc<PlaybackStats>,
}

impl PlaybackQueue {
    pub fn start(
        output: Box<dyn AudioOutput>,
        segments: mpsc::Receiver<InboundSegment>,
        metrics: Arc<PipelineMetrics>,
    ) -> Self {
        let (stop, stop_rx) = watch::channel(false);
        let stats = Arc::new(PlaybackStats::default());

        let worker = PlaybackWorker {
            output,
            segments,
            resequencer: Resequencer::new(),
            ready: VecDeque::new(),
            stats: stats.clone(),
            metrics,
        };
        info!("Starting playback queue");

        Self {
            stop,
            task: Some(tokio::spawn(worker.run(stop_rx))),
            stats,
        }
    }

    /// Halt output immediately and discard everything queued.
    pub fn stop(&self) {
        let _ = self.stop.send(true);
    }

    /// Segments received but not yet played.
    pub fn pending(&self) -> usize {
        self.stats.pending.load(Ordering::Acquire)
    }

    /// Audio segments played to completion.
    pub fn played(&self) -> u64 {
        self.stats.played.load(Ordering::Acquire)
    }

    pub fn is_running(&self) -> bool {
        self.task.as_ref().map(|t| !t.is_finished()).unwrap_or(false)
    }

    pub async fn join(&mut self) {
        if let Some(task) = self.task.take() {
            if let Err(e) = task.await {
                if !e.is_cancelled() {
                    warn!("Playback task failed: {}", e);
                }
            }
        }
    }
}

impl Drop for PlaybackQueue {
    fn drop(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}

struct PlaybackWorker {
    output: Box<dyn AudioOutput>,
    segments: mpsc::Receiver<InboundSegment>,
    resequencer: Resequencer,
    ready: VecDeque<QueuedAudio>,
    stats: Arc<PlaybackStats>,
    metrics: Arc<PipelineMetrics>,
}

impl PlaybackWorker {
    async fn run(mut self, mut stop: watch::Receiver<bool>) {
        loop {
            self.absorb_arrivals();

            if self.ready.is_empty() {
                let arrival = tokio::select! {
                    biased;
                    _ = stop.changed() => break,
                    segment = self.segments.recv() => segment,
                };
                match arrival {
                    Some(segment) => self.accept(segment),
                    None => {
                        debug!("Inbound segments closed, playback idle");
                        break;
                    }
                }
                continue;
            }

            let Some(current) = self.ready.front_mut() else {
                continue;
            };

            let slice_len = (current.sample_rate as usize * SLICE_MS / 1000).max(1);
            let end = (current.offset + slice_len).min(current.samples.len());
            let rate = current.sample_rate;
            let slice = &current.samples[current.offset..end];

            let result = tokio::select! {
                biased;
                _ = stop.changed() => break,
                result = self.output.play(slice, rate) => result,
            };

            match result {
                Ok(()) => {
                    current.offset = end;
                    if current.offset >= current.samples.len() {
                        self.ready.pop_front();
                        self.stats.played.fetch_add(1, Ordering::AcqRel);
                        self.metrics.segment_played();
                        self.publish_pending();
                    }
                }
                Err(e) => {
                    warn!("Dropping segment after playback error: {}", e);
                    self.ready.pop_front();
                    self.publish_pending();
                }
            }
        }

        self.output.halt();
        self.ready.clear();
        self.resequencer.clear();
        self.publish_pending();
        if let Err(e) = self.output.finish() {
            warn!("Failed to finalize playback output: {}", e);
        }
        debug!("Playback stopped after {} segments", self.stats.played.load(Ordering::Acquire));
    }

    fn absorb_arrivals(&mut self) {
        while let Ok(segment) = self.segments.try_recv() {
            self.accept(segment);
        }
    }

    fn accept(&mut self, segment: InboundSegment) {
        trace!("Received segment #{}", segment.sequence);
        for payload in self.resequencer.insert(segment) {
            match payload {
                SegmentPayload::Audio { sample_rate, samples } => {
                    if samples.is_empty() {
                        continue;
                    }
                    self.ready.push_back(QueuedAudio {
                        sample_rate,
                        samples,
                        offset: 0,
                    });
                }
                SegmentPayload::Control(ControlSignal::Interrupted) => {
                    debug!("Agent interrupted, discarding {} queued segments", self.ready.len());
                    self.output.halt();
                    self.ready.clear();
                }
                SegmentPayload::Control(_) => {}
            }
        }
        self.publish_pending();
    }

    fn publish_pending(&self) {
        self.stats
            .pending
            .store(self.ready.len() + self.resequencer.waiting(), Ordering::Release);
    }
}
