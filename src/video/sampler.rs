//! # Video Frame Sampler
//!
//! On a fixed period, grabs a still from the live video source, compresses it
//! and hands it to the Transport.
//!
//! ## Freshness over completeness:
//! At most one frame is in flight. A tick that fires while the previous frame
//! is still being grabbed, encoded or sent is skipped, never queued.

use super::{encode_jpeg, JpegSettings, VideoSnapshot};
use crate::config::VideoConfig;
use crate::error::SessionError;
use crate::media::VideoSource;
use crate::session::metrics::PipelineMetrics;
use crate::session::signal::{FaultCounter, Pipeline, SignalSender};
use crate::transport::OutboundSender;
use chrono::Utc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, trace, warn};

/// What a single tick did.
#[derive(Debug)]
pub enum TickOutcome {
    Started(JoinHandle<()>),
    Skipped,
}

pub struct VideoFrameSampler {
    stop: watch::Sender<bool>,
    ticker: Option<JoinHandle<()>>,
    shared: Arc<SamplerShared>,
}

struct SamplerShared {
    source: Arc<dyn VideoSource>,
    outbound: OutboundSender,
    settings: JpegSettings,
    in_flight: AtomicBool,
    ticks: AtomicU64,
    faults: FaultCounter,
    signals: SignalSender,
    metrics: Arc<PipelineMetrics>,
    last_frame: Mutex<Option<JoinHandle<()>>>,
}

impl VideoFrameSampler {
    /// Start ticking. The first tick fires immediately.
    pub fn start(
        source: Arc<dyn VideoSource>,
        config: &VideoConfig,
        max_consecutive_faults: u32,
        outbound: OutboundSender,
        signals: SignalSender,
        metrics: Arc<PipelineMetrics>,
    ) -> Self {
        let shared = Arc::new(SamplerShared {
            source,
            outbound,
            settings: JpegSettings {
                quality: config.jpeg_quality,
                max_width: config.max_width,
                max_height: config.max_height,
            },
            in_flight: AtomicBool::new(false),
            ticks: AtomicU64::new(0),
            faults: FaultCounter::new(max_consecutive_faults),
            signals,
            metrics,
            last_frame: Mutex::new(None),
        });

        let (stop, stop_rx) = watch::channel(false);
        let period = config.frame_interval();
        info!("Starting video sampler every {:?}", period);
        let ticker = tokio::spawn(tick_loop(shared.clone(), period, stop_rx));

        Self {
            stop,
            ticker: Some(ticker),
            shared,
        }
    }

    /// Halt future ticks. A frame already in flight is allowed to finish.
    pub fn stop(&self) {
        let _ = self.stop.send(true);
    }

    pub fn is_running(&self) -> bool {
        let ticking = self.ticker.as_ref().map(|t| !t.is_finished()).unwrap_or(false);
        ticking || self.shared.in_flight.load(Ordering::Acquire)
    }

    pub fn ticks(&self) -> u64 {
        self.shared.ticks.load(Ordering::Acquire)
    }

    /// Wait for the tick loop and the last in-flight frame to end.
    ///
    /// ## Bounded wait:
    /// A camera grab may suspend indefinitely, so the in-flight frame gets at
    /// most `grace` to finish. After that it is aborted and its snapshot is lost.
    pub async fn join(&mut self, grace: Duration) {
        if let Some(ticker) = self.ticker.take() {
            let _ = ticker.await;
        }
        let last = self.shared.last_frame.lock().ok().and_then(|mut slot| slot.take());
        if let Some(mut frame) = last {
            if tokio::time::timeout(grace, &mut frame).await.is_err() {
                warn!("Video frame still in flight after {:?}, abandoning it", grace);
                frame.abort();
                let _ = frame.await;
                self.shared.in_flight.store(false, Ordering::Release);
            }
        }
    }
}

impl Drop for VideoFrameSampler {
    fn drop(&mut self) {
        if let Some(ticker) = self.ticker.take() {
            ticker.abort();
        }
        if let Some(frame) = self.shared.last_frame.lock().ok().and_then(|mut slot| slot.take()) {
            frame.abort();
        }
    }
}

async fn tick_loop(shared: Arc<SamplerShared>, period: Duration, mut stop: watch::Receiver<bool>) {
    let mut interval = tokio::time::interval(period);
    interval.set_missed_tick_behavior(MissedTickBehavior::Skip);

    loop {
        tokio::select! {
            biased;
            _ = stop.changed() => break,
            _ = interval.tick() => {}
        }

        if let TickOutcome::Started(handle) = shared.on_tick() {
            if let Ok(mut slot) = shared.last_frame.lock() {
                *slot = Some(handle);
            }
        }
    }
    debug!("Video sampler stopped after {} ticks", shared.ticks.load(Ordering::Acquire));
}

impl SamplerShared {
    fn on_tick(self: &Arc<Self>) -> TickOutcome {
        let sequence = self.ticks.fetch_add(1, Ordering::AcqRel) + 1;

        if self
            .in_flight
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            trace!("Skipping video tick {}: previous frame still in flight", sequence);
            self.metrics.frame_skipped();
            return TickOutcome::Skipped;
        }

        let shared = self.clone();
        TickOutcome::Started(tokio::spawn(async move {
            match shared.capture(sequence).await {
                Ok(snapshot) => {
                    shared.faults.record_success();
                    shared.outbound.send_video_frame(snapshot).await;
                }
                Err(e) => shared.fault(e),
            }
            shared.in_flight.store(false, Ordering::Release);
        }))
    }

    async fn capture(&self, sequence: u64) -> Result<VideoSnapshot, SessionError> {
        let frame = self.source.grab_frame().await?;
        let captured_at = Utc::now();
        let settings = self.settings;

        let (jpeg, width, height) = tokio::task::spawn_blocking(move || encode_jpeg(frame, settings))
            .await
            .map_err(|e| SessionError::Encoding(format!("JPEG worker failed: {}", e)))??;

        trace!("Encoded video frame {} ({}x{}, {} bytes)", sequence, width, height, jpeg.len());
        Ok(VideoSnapshot {
            sequence,
            jpeg,
            width,
            height,
            captured_at,
        })
    }

    fn fault(&self, error: SessionError) {
        self.metrics.encoding_fault();
        if self.faults.record_fault() {
            self.signals.report_fatal(
                Pipeline::Sampler,
                SessionError::ChannelFault(format!(
                    "{} consecutive video faults, last: {}",
                    self.faults.consecutive(),
                    error
                )),
            );
        } else {
            warn!("Dropped video frame: {}", error);
        }
    }
}
