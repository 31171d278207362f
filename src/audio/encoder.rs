//! # Audio Capture Encoder
//!
//! One task per Session pulls frames from the microphone tap, feeds the
//! volume meter, converts each frame to the wire format and hands completed
//! chunks to the Transport in capture order.
//!
//! ## Fault handling:
//! A lost or malformed frame (or an ended source) is dropped and logged. The
//! third consecutive fault is promoted to a fatal channel fault and capture stops.

use super::buffer::{ChunkAccumulator, ChunkConfig};
use super::meter::{VolumeLevel, VolumeMeter};
use super::processor::AudioProcessor;
use crate::config::AudioConfig;
use crate::error::SessionError;
use crate::media::AudioSource;
use crate::session::metrics::PipelineMetrics;
use crate::session::signal::{FaultCounter, Pipeline, SignalSender};
use crate::transport::OutboundSender;
use std::sync::Arc;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info, trace, warn};

pub struct AudioCaptureEncoder {
    stop: watch::Sender<bool>,
    task: Option<JoinHandle<()>>,
}

struct CaptureLoop {
    source: Box<dyn AudioSource>,
    meter: VolumeMeter,
    processor: AudioProcessor,
    chunks: ChunkAccumulator,
    outbound: OutboundSender,
    signals: SignalSender,
    faults: FaultCounter,
    metrics: Arc<PipelineMetrics>,
}

impl AudioCaptureEncoder {
    /// Spawn the capture task. It runs until `stop` or a promoted fault.
    pub fn start(
        source: Box<dyn AudioSource>,
        config: &AudioConfig,
        level: VolumeLevel,
        outbound: OutboundSender,
        signals: SignalSender,
        metrics: Arc<PipelineMetrics>,
    ) -> Self {
        let (stop, stop_rx) = watch::channel(false);

        let capture = CaptureLoop {
            source,
            meter: VolumeMeter::new(level, config.meter_window_ms),
            processor: AudioProcessor::new(config.wire_sample_rate),
            chunks: ChunkAccumulator::new(ChunkConfig {
                sample_rate: config.wire_sample_rate,
                chunk_samples: config.chunk_samples(),
            }),
            outbound,
            signals,
            faults: FaultCounter::new(config.max_consecutive_faults),
            metrics,
        };

        info!(
            "Starting audio capture: {} Hz wire rate, {} ms chunks",
            config.wire_sample_rate, config.chunk_duration_ms
        );

        Self {
            stop,
            task: Some(tokio::spawn(capture.run(stop_rx))),
        }
    }

    /// End capture. Does not wait for a chunk that is already being handed off.
    pub fn stop(&self) {
        let _ = self.stop.send(true);
    }

    pub fn is_running(&self) -> bool {
        self.task.as_ref().map(|t| !t.is_finished()).unwrap_or(false)
    }

    pub async fn join(&mut self) {
        if let Some(task) = self.task.take() {
            if let Err(e) = task.await {
                if !e.is_cancelled() {
                    warn!("Audio capture task failed: {}", e);
                }
            }
        }
    }
}

impl Drop for AudioCaptureEncoder {
    fn drop(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}

impl CaptureLoop {
    async fn run(mut self, mut stop: watch::Receiver<bool>) {
        loop {
            let next = tokio::select! {
                biased;
                _ = stop.changed() => break,
                next = self.source.next_frame() => next,
            };

            let outcome = match next {
                Some(Ok(frame)) => {
                    if let Some(level) = self.meter.observe(&frame) {
                        self.signals.volume(level);
                    }
                    self.processor.process(&frame)
                }
                Some(Err(e)) => Err(e),
                None => Err(SessionError::Encoding("microphone source ended".to_string())),
            };

            match outcome {
                Ok(pcm) => {
                    self.faults.record_success();
                    for chunk in self.chunks.push(&pcm) {
                        trace!("Captured chunk #{} ({} ms)", chunk.sequence, chunk.duration_ms());
                        self.outbound.send_audio(chunk).await;
                    }
                }
                Err(e) => {
                    self.metrics.encoding_fault();
                    if self.faults.record_fault() {
                        self.signals.report_fatal(
                            Pipeline::Capture,
                            SessionError::ChannelFault(format!(
                                "{} consecutive capture faults, last: {}",
                                self.faults.consecutive(),
                                e
                            )),
                        );
                        break;
                    }
                    warn!("Dropped audio frame: {}", e);
                }
            }
        }

        self.chunks.clear();
        debug!("Audio capture stopped after {} chunks", self.chunks.next_sequence() - 1);
    }
}
