//! # Transport / Session Connection
//!
//! Owns the single bidirectional channel to the remote agent for one Session.
//!
//! ## Tasks:
//! - **writer**: drains the bounded outbound queue into the link sink, in
//!   enqueue order, so audio chunks reach the agent in capture order
//! - **reader**: decodes inbound messages, tags audio with an arrival
//!   sequence number and hands it to the Playback Queue; text and control
//!   signals go to the Session Controller
//!
//! ## Failure semantics:
//! Any fault after `open` succeeded is reported once through the session's
//! `SignalSender` as a fatal event. `close` disarms the sender first, so the
//! faults a deliberate shutdown causes are never reported.
//!
//! ## Rust Concepts:
//! - **Bounded mpsc**: the outbound queue (64 by default) applies backpressure;
//!   a producer that outruns the link waits in `send` instead of growing memory
//! - **Arc<AtomicBool>**: the open flag is shared by the Transport and every
//!   `OutboundSender` clone, so sends after `close` are dropped without locking
//! - **JoinHandle**: both tasks are owned here; `close` awaits the writer and
//!   `Drop` aborts whatever is left

pub mod connector;
pub mod protocol;

#[cfg(test)]
pub(crate) mod memory;

pub use connector::{AgentLink, Connector, LinkSink, LinkStream, WebSocketConnector};
pub use protocol::{ControlSignal, InboundEvent, InboundSegment, OutboundMessage, SegmentPayload};

use crate::audio::AudioChunk;
use crate::config::TransportConfig;
use crate::error::{ConnectionError, SessionError};
use crate::session::metrics::PipelineMetrics;
use crate::session::signal::{Pipeline, SignalSender};
use crate::video::VideoSnapshot;
use futures_util::{SinkExt, StreamExt};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info, trace, warn};

/// Cloneable enqueue handle given to the capture pipelines.
///
/// Sends suspend while the outbound queue is full (backpressure) and are
/// dropped silently once the channel is no longer open.
#[derive(Debug, Clone)]
pub struct OutboundSender {
    tx: mpsc::Sender<OutboundMessage>,
    open: Arc<AtomicBool>,
}

impl OutboundSender {
    pub(crate) fn new(tx: mpsc::Sender<OutboundMessage>, open: Arc<AtomicBool>) -> Self {
        Self { tx, open }
    }

    pub fn is_open(&self) -> bool {
        self.open.load(Ordering::Acquire)
    }

    pub async fn send_audio(&self, chunk: AudioChunk) {
        self.enqueue(OutboundMessage::Audio(chunk)).await;
    }

    pub async fn send_video_frame(&self, snapshot: VideoSnapshot) {
        self.enqueue(OutboundMessage::Video(snapshot)).await;
    }

    async fn enqueue(&self, message: OutboundMessage) {
        if !self.is_open() {
            trace!("Channel closed, dropping outbound message");
            return;
        }
        if self.tx.send(message).await.is_err() {
            trace!("Writer gone, dropping outbound message");
        }
    }
}

/// The live channel of one Session.
pub struct Transport {
    session_id: String,
    open: Arc<AtomicBool>,
    outbound: OutboundSender,
    shutdown: watch::Sender<bool>,
    writer: Option<JoinHandle<()>>,
    reader: Option<JoinHandle<()>>,
    signals: SignalSender,
    close_timeout: Duration,
}

impl Transport {
    /// Connect, handshake and start the writer and reader tasks.
    ///
    /// ## Parameters:
    /// - `segments`: bounded queue feeding the Playback Queue
    /// - `signals`: the session's signal channel (fatal faults, text, control)
    ///
    /// ## Errors:
    /// Returns the connector's `ConnectionError` unchanged; no retry is attempted.
    pub async fn open(
        connector: &dyn Connector,
        config: &TransportConfig,
        session_id: &str,
        segments: mpsc::Sender<InboundSegment>,
        signals: SignalSender,
        metrics: Arc<PipelineMetrics>,
    ) -> Result<Self, ConnectionError> {
        let link = connector.connect().await?;
        info!(session_id, "Transport opened");

        let open = Arc::new(AtomicBool::new(true));
        let (tx, rx) = mpsc::channel(config.outbound_capacity.max(1));
        let (shutdown, shutdown_rx) = watch::channel(false);

        let writer = tokio::spawn(write_loop(
            link.sink,
            rx,
            shutdown_rx,
            signals.clone(),
            metrics,
        ));
        let reader = tokio::spawn(read_loop(link.stream, segments, signals.clone()));

        Ok(Self {
            session_id: session_id.to_string(),
            outbound: OutboundSender::new(tx, open.clone()),
            open,
            shutdown,
            writer: Some(writer),
            reader: Some(reader),
            signals,
            close_timeout: config.close_timeout(),
        })
    }

    pub fn sender(&self) -> OutboundSender {
        self.outbound.clone()
    }

    pub fn is_open(&self) -> bool {
        self.open.load(Ordering::Acquire)
    }

    /// Flush what is already queued (bounded by the close timeout) and release the channel.
    ///
    /// Never fails; problems are logged. Calling it again is a no-op.
    pub async fn close(&mut self) {
        if !self.open.swap(false, Ordering::AcqRel) && self.writer.is_none() {
            return;
        }
        self.signals.disarm();
        let _ = self.shutdown.send(true);

        if let Some(mut writer) = self.writer.take() {
            match tokio::time::timeout(self.close_timeout, &mut writer).await {
                Ok(Ok(())) => debug!(session_id = %self.session_id, "Outbound queue flushed"),
                Ok(Err(e)) => warn!(session_id = %self.session_id, "Writer task failed during close: {}", e),
                Err(_) => {
                    warn!(
                        session_id = %self.session_id,
                        "Outbound flush exceeded {:?}, dropping remaining messages",
                        self.close_timeout
                    );
                    writer.abort();
                }
            }
        }

        if let Some(reader) = self.reader.take() {
            reader.abort();
        }

        info!(session_id = %self.session_id, "Transport closed");
    }
}

impl Drop for Transport {
    fn drop(&mut self) {
        self.open.store(false, Ordering::Release);
        if let Some(writer) = self.writer.take() {
            writer.abort();
        }
        if let Some(reader) = self.reader.take() {
            reader.abort();
        }
    }
}

async fn write_loop(
    mut sink: LinkSink,
    mut rx: mpsc::Receiver<OutboundMessage>,
    mut shutdown: watch::Receiver<bool>,
    signals: SignalSender,
    metrics: Arc<PipelineMetrics>,
) {
    loop {
        let message = tokio::select! {
            biased;
            _ = shutdown.changed() => break,
            message = rx.recv() => match message {
                Some(message) => message,
                None => break,
            },
        };

        if let Err(e) = write_one(&mut sink, message, &metrics).await {
            signals.report_fatal(Pipeline::Transport, e);
            return;
        }
    }

    // Best-effort flush of whatever was enqueued before shutdown.
    rx.close();
    while let Some(message) = rx.recv().await {
        if let Err(e) = write_one(&mut sink, message, &metrics).await {
            debug!("Dropping remaining outbound messages: {}", e);
            return;
        }
    }
    if let Err(e) = sink.close().await {
        debug!("Error closing agent channel: {}", e);
    }
}

async fn write_one(
    sink: &mut LinkSink,
    message: OutboundMessage,
    metrics: &PipelineMetrics,
) -> Result<(), SessionError> {
    match &message {
        OutboundMessage::Audio(chunk) => {
            trace!("Sending audio chunk #{} ({} samples)", chunk.sequence, chunk.samples.len());
            sink.send(message).await?;
            metrics.chunk_sent();
        }
        OutboundMessage::Video(snapshot) => {
            trace!("Sending video frame #{} ({} bytes)", snapshot.sequence, snapshot.jpeg.len());
            sink.send(message).await?;
            metrics.frame_sent();
        }
    }
    Ok(())
}

async fn read_loop(mut stream: LinkStream, segments: mpsc::Sender<InboundSegment>, signals: SignalSender) {
    let mut next_sequence: u64 = 1;

    while let Some(item) = stream.next().await {
        let events = match item {
            Ok(events) => events,
            Err(e) if !e.is_fatal() => {
                warn!("Dropping unreadable agent message: {}", e);
                continue;
            }
            Err(e) => {
                signals.report_fatal(Pipeline::Transport, e);
                return;
            }
        };

        for event in events {
            let payload = match event {
                InboundEvent::SetupComplete => continue,
                InboundEvent::Audio { sample_rate, samples } => SegmentPayload::Audio { sample_rate, samples },
                InboundEvent::Text(text) => {
                    signals.model_text(text);
                    continue;
                }
                InboundEvent::Control(ControlSignal::Interrupted) => {
                    // Playback must see the barge-in in line with the audio it invalidates.
                    signals.control(ControlSignal::Interrupted);
                    SegmentPayload::Control(ControlSignal::Interrupted)
                }
                InboundEvent::Control(signal) => {
                    signals.control(signal);
                    continue;
                }
            };

            let segment = InboundSegment {
                sequence: next_sequence,
                payload,
            };
            next_sequence += 1;

            if segments.send(segment).await.is_err() {
                debug!("Playback queue gone, stopping reader");
                return;
            }
        }
    }

    signals.report_fatal(
        Pipeline::Transport,
        SessionError::ChannelFault("agent closed the channel".to_string()),
    );
}

#[cfg(test)]
mod tests {
    use super::memory::{MemoryConnector, OpenScript};
    use super::*;
    use crate::config::AppConfig;
    use crate::session::signal::SessionSignal;

    fn chunk(sequence: u64) -> AudioChunk {
        AudioChunk {
            sequence,
            sample_rate: 16000,
            samples: vec![0; 4],
        }
    }

    async fn open_transport(
        connector: &MemoryConnector,
    ) -> (
        Transport,
        mpsc::Receiver<InboundSegment>,
        mpsc::UnboundedReceiver<SessionSignal>,
    ) {
        let config = AppConfig::default().transport;
        let (segments_tx, segments_rx) = mpsc::channel(16);
        let (signals, signal_rx) = SignalSender::channel();
        let transport = Transport::open(
            connector,
            &config,
            "test-session",
            segments_tx,
            signals,
            Arc::new(PipelineMetrics::default()),
        )
        .await
        .unwrap();
        (transport, segments_rx, signal_rx)
    }

    #[tokio::test]
    async fn test_audio_reaches_agent_in_order() {
        let (connector, mut links) = MemoryConnector::new();
        let (mut transport, _segments, _signals) = open_transport(&connector).await;
        let mut link = links.recv().await.unwrap();

        for sequence in 1..=20 {
            transport.sender().send_audio(chunk(sequence)).await;
        }
        transport.close().await;

        let mut seen = Vec::new();
        while let Ok(OutboundMessage::Audio(chunk)) = link.outbound.try_recv() {
            seen.push(chunk.sequence);
        }
        assert_eq!(seen, (1..=20).collect::<Vec<_>>());
    }

    #[tokio::test]
    async fn test_open_failure_is_returned() {
        let (connector, _links) = MemoryConnector::new();
        connector.script(OpenScript::Reject(ConnectionError::AuthRejected("HTTP 401".into())));
        let config = AppConfig::default().transport;
        let (segments_tx, _segments_rx) = mpsc::channel(4);
        let (signals, _signal_rx) = SignalSender::channel();

        let result = Transport::open(
            &connector,
            &config,
            "test-session",
            segments_tx,
            signals,
            Arc::new(PipelineMetrics::default()),
        )
        .await;
        assert!(matches!(result, Err(ConnectionError::AuthRejected(_))));
    }

    #[tokio::test]
    async fn test_sends_after_close_are_dropped() {
        let (connector, mut links) = MemoryConnector::new();
        let (mut transport, _segments, _signals) = open_transport(&connector).await;
        let mut link = links.recv().await.unwrap();
        let sender = transport.sender();

        transport.close().await;
        transport.close().await;
        sender.send_audio(chunk(1)).await;

        assert!(!transport.is_open());
        assert!(link.outbound.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_inbound_dispatch() {
        let (connector, mut links) = MemoryConnector::new();
        let (mut transport, mut segments, mut signals) = open_transport(&connector).await;
        let link = links.recv().await.unwrap();

        link.inbound
            .send(Ok(vec![
                InboundEvent::Audio {
                    sample_rate: 24000,
                    samples: vec![0.1],
                },
                InboundEvent::Text("hi".into()),
                InboundEvent::Audio {
                    sample_rate: 24000,
                    samples: vec![0.2],
                },
                InboundEvent::Control(ControlSignal::TurnComplete),
            ]))
            .unwrap();

        let first = segments.recv().await.unwrap();
        let second = segments.recv().await.unwrap();
        assert_eq!((first.sequence, second.sequence), (1, 2));
        assert!(matches!(second.payload, SegmentPayload::Audio { ref samples, .. } if samples == &vec![0.2]));

        assert!(matches!(signals.recv().await, Some(SessionSignal::ModelText(ref t)) if t == "hi"));
        assert!(matches!(
            signals.recv().await,
            Some(SessionSignal::Control(ControlSignal::TurnComplete))
        ));
        transport.close().await;
    }

    #[tokio::test]
    async fn test_unreadable_message_is_skipped() {
        let (connector, mut links) = MemoryConnector::new();
        let (mut transport, mut segments, mut signals) = open_transport(&connector).await;
        let link = links.recv().await.unwrap();

        link.inbound.send(Err(SessionError::Encoding("garbage".into()))).unwrap();
        link.inbound
            .send(Ok(vec![InboundEvent::Audio {
                sample_rate: 24000,
                samples: vec![0.5],
            }]))
            .unwrap();

        assert_eq!(segments.recv().await.unwrap().sequence, 1);
        assert!(signals.try_recv().is_err());
        transport.close().await;
    }

    #[tokio::test]
    async fn test_channel_drop_reported_once() {
        let (connector, mut links) = MemoryConnector::new();
        let (mut transport, _segments, mut signals) = open_transport(&connector).await;
        let link = links.recv().await.unwrap();

        drop(link);
        assert!(matches!(
            signals.recv().await,
            Some(SessionSignal::Fatal { origin: Pipeline::Transport, .. })
        ));

        // The writer notices the dead sink too, but the latch already tripped.
        transport.sender().send_audio(chunk(1)).await;
        transport.close().await;
        assert!(signals.try_recv().is_err());
    }
}
