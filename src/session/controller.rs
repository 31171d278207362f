//! # Session Controller
//!
//! The state machine the UI drives. It owns at most one live Session and
//! wires the Transport, capture, sampler and playback pipelines together.
//!
//! ## State machine:
//! ```text
//! DISCONNECTED --connect--> CONNECTING --opened--> CONNECTED
//! CONNECTING --open failed--> ERROR
//! CONNECTED --fatal channel event--> ERROR
//! {CONNECTING, CONNECTED, ERROR} --disconnect--> DISCONNECTED
//! ```
//! There is no automatic reconnection: ERROR waits for a fresh `connect`.
//!
//! ## Locking:
//! Every lifecycle change happens under one async mutex. Each `connect`
//! starts a new generation; an open attempt or supervisor that finds a newer
//! generation when it takes the lock knows it was superseded and backs off.
//!
//! ## Teardown order:
//! stop producers (capture, sampler) → close transport → stop playback
//!
//! ## Rust Concepts:
//! - **Arc<Inner>**: `SessionController` is a cheap handle; every clone (HTTP
//!   handlers, WebSocket actors, background tasks) drives the same Session
//! - **tokio::sync::Mutex**: the lifecycle lock is held across `.await`
//!   (closing the transport, joining tasks), which a std `Mutex` guard cannot be
//! - **watch vs broadcast**: `watch` keeps only the latest state for readers
//!   that poll; `broadcast` delivers every event to live subscribers
//! - **tokio::spawn for disconnect**: a spawned task keeps running when the
//!   awaiting future is dropped, so teardown always finishes

use super::metrics::{MetricsSnapshot, PipelineMetrics};
use super::signal::{Pipeline, SessionSignal, SignalSender};
use super::{ConnectionState, MessageLog, Role, SessionEvent};
use crate::audio::encoder::AudioCaptureEncoder;
use crate::audio::meter::VolumeLevel;
use crate::audio::playback::PlaybackQueue;
use crate::config::AppConfig;
use crate::error::SessionError;
use crate::media::{MediaDevices, VideoSource};
use crate::transport::{ControlSignal, Connector, Transport, WebSocketConnector};
use crate::video::VideoFrameSampler;
use std::sync::{Arc, Mutex, PoisonError, RwLock};
use std::time::Duration;
use tokio::sync::{broadcast, mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, info_span, warn, Instrument};
use uuid::Uuid;

/// Capacity of the event broadcast; slow subscribers lose the oldest events.
const EVENT_CAPACITY: usize = 256;

/// What `connect` did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectOutcome {
    /// A new Session is being opened
    Started,
    /// A Session is already live; nothing changed
    Ignored(ConnectionState),
}

#[derive(Clone)]
pub struct SessionController {
    inner: Arc<Inner>,
}

struct Inner {
    config: Arc<RwLock<AppConfig>>,
    /// Fixed connector; `None` builds a WebSocket connector from the config at connect time
    connector: Option<Arc<dyn Connector>>,
    devices: Arc<dyn MediaDevices>,
    state: watch::Sender<ConnectionState>,
    events: broadcast::Sender<SessionEvent>,
    lifecycle: tokio::sync::Mutex<Lifecycle>,
    volume: VolumeLevel,
    messages: Mutex<Vec<MessageLog>>,
    session_id: RwLock<Option<String>>,
    metrics: Arc<PipelineMetrics>,
}

struct Lifecycle {
    generation: u64,
    phase: Phase,
}

enum Phase {
    Idle,
    Connecting { attempt: JoinHandle<()> },
    Live(LiveSession),
}

struct LiveSession {
    session_id: String,
    transport: Transport,
    encoder: AudioCaptureEncoder,
    sampler: VideoFrameSampler,
    playback: PlaybackQueue,
    supervisor: Option<JoinHandle<()>>,
    /// Upper bound on waiting for a stalled video grab during teardown
    grace: Duration,
}

impl SessionController {
    /// Controller that talks to the agent configured in `config`.
    pub fn new(config: Arc<RwLock<AppConfig>>, devices: Arc<dyn MediaDevices>) -> Self {
        Self::build(config, None, devices)
    }

    /// Controller with a fixed connector.
    pub fn with_connector(
        config: Arc<RwLock<AppConfig>>,
        connector: Arc<dyn Connector>,
        devices: Arc<dyn MediaDevices>,
    ) -> Self {
        Self::build(config, Some(connector), devices)
    }

    fn build(
        config: Arc<RwLock<AppConfig>>,
        connector: Option<Arc<dyn Connector>>,
        devices: Arc<dyn MediaDevices>,
    ) -> Self {
        let (state, _) = watch::channel(ConnectionState::Disconnected);
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        Self {
            inner: Arc::new(Inner {
                config,
                connector,
                devices,
                state,
                events,
                lifecycle: tokio::sync::Mutex::new(Lifecycle {
                    generation: 0,
                    phase: Phase::Idle,
                }),
                volume: VolumeLevel::new(),
                messages: Mutex::new(Vec::new()),
                session_id: RwLock::new(None),
                metrics: Arc::new(PipelineMetrics::default()),
            }),
        }
    }

    /// Start a new Session streaming from `video`.
    ///
    /// Only accepted from DISCONNECTED or ERROR; otherwise a no-op. Returns as
    /// soon as CONNECTING is committed; the open attempt runs in the background
    /// and ends in CONNECTED or ERROR.
    pub async fn connect(&self, video: Arc<dyn VideoSource>) -> ConnectOutcome {
        let mut lifecycle = self.inner.lifecycle.lock().await;

        let current = self.connection_state();
        if !current.accepts_connect() {
            debug!("Ignoring connect while {}", current);
            return ConnectOutcome::Ignored(current);
        }

        lifecycle.generation += 1;
        let generation = lifecycle.generation;
        let session_id = Uuid::new_v4().to_string();
        *self.inner.session_id.write().unwrap_or_else(PoisonError::into_inner) = Some(session_id.clone());
        self.clear_messages();

        self.commit(ConnectionState::Connecting);
        self.log_message(Role::System, "Connecting to agent");

        let span = info_span!("session", session_id = %session_id);
        let controller = self.clone();
        let attempt = tokio::spawn(
            async move { controller.open_session(generation, session_id, video).await }.instrument(span),
        );
        lifecycle.phase = Phase::Connecting { attempt };

        ConnectOutcome::Started
    }

    /// End the current Session, if any, and commit DISCONNECTED.
    ///
    /// Safe from any state; a second call in a row changes nothing.
    ///
    /// ## Cancellation:
    /// The teardown runs on its own task. Dropping this future (a client that
    /// went away, a caller-side timeout) does not stop it, so the controller
    /// always ends in DISCONNECTED.
    pub async fn disconnect(&self) {
        let controller = self.clone();
        let span = tracing::Span::current();
        let task = tokio::spawn(async move { controller.disconnect_now().await }.instrument(span));
        if let Err(e) = task.await {
            error!("Disconnect task failed: {}", e);
        }
    }

    async fn disconnect_now(&self) {
        let mut lifecycle = self.inner.lifecycle.lock().await;
        lifecycle.generation += 1;

        match std::mem::replace(&mut lifecycle.phase, Phase::Idle) {
            Phase::Idle => {}
            Phase::Connecting { attempt } => {
                info!("Cancelling connection attempt");
                attempt.abort();
            }
            Phase::Live(session) => {
                let span = info_span!("session", session_id = %session.session_id);
                self.teardown(session).instrument(span).await;
            }
        }

        if self.connection_state() != ConnectionState::Disconnected {
            self.commit(ConnectionState::Disconnected);
            self.log_message(Role::System, "Disconnected");
        }
    }

    /// Latest committed state.
    pub fn connection_state(&self) -> ConnectionState {
        *self.inner.state.borrow()
    }

    /// Latest microphone loudness while a Session is live, otherwise 0.
    pub fn volume(&self) -> f32 {
        if self.connection_state() == ConnectionState::Connected {
            self.inner.volume.get()
        } else {
            0.0
        }
    }

    /// Subscribe to state, volume and message events.
    pub fn subscribe(&self) -> broadcast::Receiver<SessionEvent> {
        self.inner.events.subscribe()
    }

    /// Watch the committed state directly.
    pub fn subscribe_state(&self) -> watch::Receiver<ConnectionState> {
        self.inner.state.subscribe()
    }

    pub fn messages(&self) -> Vec<MessageLog> {
        self.inner
            .messages
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Id of the current (or most recent) Session.
    pub fn session_id(&self) -> Option<String> {
        self.inner
            .session_id
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn metrics(&self) -> MetricsSnapshot {
        self.inner.metrics.snapshot()
    }

    fn commit(&self, state: ConnectionState) {
        self.inner.state.send_replace(state);
        info!("Session state -> {}", state);
        let _ = self.inner.events.send(SessionEvent::StateChanged(state));
    }

    fn log_message(&self, role: Role, text: impl Into<String>) {
        let entry = MessageLog::new(role, text);
        self.inner
            .messages
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(entry.clone());
        let _ = self.inner.events.send(SessionEvent::Message(entry));
    }

    fn clear_messages(&self) {
        self.inner
            .messages
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clear();
    }

    fn config_snapshot(&self) -> AppConfig {
        self.inner
            .config
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    fn connector_for(&self, config: &AppConfig) -> Arc<dyn Connector> {
        match &self.inner.connector {
            Some(connector) => connector.clone(),
            None => Arc::new(WebSocketConnector::new(
                config.agent.clone(),
                config.audio.output_sample_rate,
            )),
        }
    }

    /// Body of the background open attempt.
    async fn open_session(&self, generation: u64, session_id: String, video: Arc<dyn VideoSource>) {
        let config = self.config_snapshot();
        let connector = self.connector_for(&config);
        let metrics = self.inner.metrics.clone();

        let (segments_tx, segments_rx) = mpsc::channel(config.transport.inbound_capacity.max(1));
        let (signals, signal_rx) = SignalSender::channel();

        let opened = Transport::open(
            connector.as_ref(),
            &config.transport,
            &session_id,
            segments_tx,
            signals.clone(),
            metrics.clone(),
        )
        .await;

        let mut lifecycle = self.inner.lifecycle.lock().await;
        if lifecycle.generation != generation || !matches!(lifecycle.phase, Phase::Connecting { .. }) {
            debug!("Open attempt superseded, discarding result");
            if let Ok(mut transport) = opened {
                transport.close().await;
            }
            return;
        }

        let mut transport = match opened {
            Ok(transport) => transport,
            Err(e) => {
                error!("Failed to open agent channel: {}", e);
                metrics.session_failed();
                lifecycle.phase = Phase::Idle;
                self.commit(ConnectionState::Error);
                self.log_message(Role::System, format!("Connection failed: {}", e));
                return;
            }
        };

        let devices = self
            .inner
            .devices
            .open_speaker()
            .and_then(|speaker| Ok((speaker, self.inner.devices.open_microphone()?)));
        let (speaker, microphone) = match devices {
            Ok(devices) => devices,
            Err(e) => {
                error!("Failed to open audio devices: {}", e);
                transport.close().await;
                metrics.session_failed();
                lifecycle.phase = Phase::Idle;
                self.commit(ConnectionState::Error);
                self.log_message(Role::System, format!("Audio devices unavailable: {}", e));
                return;
            }
        };

        let playback = PlaybackQueue::start(speaker, segments_rx, metrics.clone());
        let encoder = AudioCaptureEncoder::start(
            microphone,
            &config.audio,
            self.inner.volume.clone(),
            transport.sender(),
            signals.clone(),
            metrics.clone(),
        );
        let sampler = VideoFrameSampler::start(
            video,
            &config.video,
            config.audio.max_consecutive_faults,
            transport.sender(),
            signals,
            metrics.clone(),
        );
        let supervisor = tokio::spawn(
            self.clone()
                .supervise(generation, signal_rx)
                .instrument(tracing::Span::current()),
        );

        lifecycle.phase = Phase::Live(LiveSession {
            session_id,
            transport,
            encoder,
            sampler,
            playback,
            supervisor: Some(supervisor),
            grace: config.transport.close_timeout(),
        });
        metrics.session_started();
        self.commit(ConnectionState::Connected);
        self.log_message(Role::System, "Connected");
    }

    /// Consume the Session's signals until it ends.
    async fn supervise(self, generation: u64, mut signals: mpsc::UnboundedReceiver<SessionSignal>) {
        while let Some(signal) = signals.recv().await {
            match signal {
                SessionSignal::Fatal { origin, error } => {
                    // Detached: aborting the supervisor must not interrupt teardown.
                    let controller = self.clone();
                    let span = tracing::Span::current();
                    let task = tokio::spawn(
                        async move { controller.fail_session(generation, origin, error).await }.instrument(span),
                    );
                    if let Err(e) = task.await {
                        error!("Session failure handling did not complete: {}", e);
                    }
                    return;
                }
                SessionSignal::Volume(level) => {
                    let _ = self.inner.events.send(SessionEvent::Volume(level));
                }
                SessionSignal::ModelText(text) => self.log_message(Role::Model, text),
                SessionSignal::Control(ControlSignal::GoAway) => {
                    warn!("Agent announced it will close the channel");
                    self.log_message(Role::System, "Agent is closing the session");
                }
                SessionSignal::Control(signal) => debug!("Agent control signal: {:?}", signal),
            }
        }
    }

    async fn fail_session(&self, generation: u64, origin: Pipeline, cause: SessionError) {
        let mut lifecycle = self.inner.lifecycle.lock().await;
        if lifecycle.generation != generation {
            debug!("Ignoring {} fault from a finished session", origin);
            return;
        }

        if let Phase::Live(mut session) = std::mem::replace(&mut lifecycle.phase, Phase::Idle) {
            // Teardown must not abort the supervisor that is awaiting this task.
            session.supervisor.take();
            self.teardown(session).await;
            self.inner.metrics.session_failed();
            self.commit(ConnectionState::Error);
            self.log_message(Role::System, format!("Session ended: {} {}", origin, cause));
        }
    }

    async fn teardown(&self, mut session: LiveSession) {
        info!("Tearing down session");

        session.encoder.stop();
        session.sampler.stop();

        session.transport.close().await;

        session.playback.stop();

        session.encoder.join().await;
        session.sampler.join(session.grace).await;
        session.playback.join().await;

        if let Some(supervisor) = session.supervisor.take() {
            supervisor.abort();
        }
        self.inner.volume.reset();
        debug!("Session torn down");
    }

    #[cfg(test)]
    async fn pipelines_running(&self) -> bool {
        let lifecycle = self.inner.lifecycle.lock().await;
        match &lifecycle.phase {
            Phase::Live(session) => {
                session.encoder.is_running() || session.sampler.is_running() || session.playback.is_running()
            }
            _ => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ConnectionError;
    use crate::media::testing::{GatedVideoSource, TestDevices};
    use crate::transport::memory::{MemoryConnector, MemoryLink, OpenScript};
    use crate::transport::{InboundEvent, OutboundMessage};
    use std::time::Duration;

    struct Harness {
        controller: SessionController,
        connector: Arc<MemoryConnector>,
        links: mpsc::UnboundedReceiver<MemoryLink>,
        states: broadcast::Receiver<SessionEvent>,
        devices: Arc<TestDevices>,
    }

    fn harness_with(devices: TestDevices) -> Harness {
        let (connector, links) = MemoryConnector::new();
        let connector = Arc::new(connector);
        let devices = Arc::new(devices);
        let controller = SessionController::with_connector(
            Arc::new(RwLock::new(AppConfig::default())),
            connector.clone(),
            devices.clone(),
        );
        let states = controller.subscribe();
        Harness {
            controller,
            connector,
            links,
            states,
            devices,
        }
    }

    fn harness() -> Harness {
        harness_with(TestDevices::new())
    }

    fn camera() -> Arc<dyn VideoSource> {
        Arc::new(GatedVideoSource::new(true).0)
    }

    /// State changes seen so far, skipping volume and message events.
    fn drain_states(events: &mut broadcast::Receiver<SessionEvent>) -> Vec<ConnectionState> {
        let mut states = Vec::new();
        while let Ok(event) = events.try_recv() {
            if let SessionEvent::StateChanged(state) = event {
                states.push(state);
            }
        }
        states
    }

    async fn wait_for(controller: &SessionController, target: ConnectionState) {
        let mut watch = controller.subscribe_state();
        tokio::time::timeout(Duration::from_secs(30), watch.wait_for(|state| *state == target))
            .await
            .expect("state not reached in time")
            .unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_successful_connect_observes_connecting_then_connected() {
        let mut h = harness();
        h.connector.script(OpenScript::AcceptAfter(Duration::from_millis(50)));

        assert_eq!(h.controller.connect(camera()).await, ConnectOutcome::Started);
        assert_eq!(h.controller.connection_state(), ConnectionState::Connecting);
        wait_for(&h.controller, ConnectionState::Connected).await;

        assert_eq!(
            drain_states(&mut h.states),
            vec![ConnectionState::Connecting, ConnectionState::Connected]
        );
        assert!(h.controller.session_id().is_some());

        // The loud microphone shows up on the meter.
        tokio::time::sleep(Duration::from_millis(200)).await;
        assert!(h.controller.volume() > 0.1);

        // And its chunks reach the agent in order.
        let mut link = h.links.recv().await.unwrap();
        let mut last = 0;
        while let Ok(message) = link.outbound.try_recv() {
            if let OutboundMessage::Audio(chunk) = message {
                assert!(chunk.sequence > last);
                last = chunk.sequence;
            }
        }
        assert!(last > 0);

        h.controller.disconnect().await;
        assert_eq!(h.controller.volume(), 0.0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_failed_open_goes_to_error_and_allows_reconnect() {
        let mut h = harness();
        h.connector
            .script(OpenScript::Reject(ConnectionError::NetworkUnreachable("refused".into())));

        h.controller.connect(camera()).await;
        wait_for(&h.controller, ConnectionState::Error).await;
        assert_eq!(
            drain_states(&mut h.states),
            vec![ConnectionState::Connecting, ConnectionState::Error]
        );
        assert!(!h.controller.pipelines_running().await);
        assert_eq!(h.controller.volume(), 0.0);
        assert_eq!(h.controller.metrics().sessions_failed, 1);

        assert_eq!(h.controller.connect(camera()).await, ConnectOutcome::Started);
        wait_for(&h.controller, ConnectionState::Connected).await;
        assert_eq!(
            drain_states(&mut h.states),
            vec![ConnectionState::Connecting, ConnectionState::Connected]
        );
        h.controller.disconnect().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_connect_while_live_is_ignored() {
        let mut h = harness();
        h.connector.script(OpenScript::AcceptAfter(Duration::from_millis(50)));

        h.controller.connect(camera()).await;
        assert_eq!(
            h.controller.connect(camera()).await,
            ConnectOutcome::Ignored(ConnectionState::Connecting)
        );
        wait_for(&h.controller, ConnectionState::Connected).await;
        let session = h.controller.session_id();

        assert_eq!(
            h.controller.connect(camera()).await,
            ConnectOutcome::Ignored(ConnectionState::Connected)
        );
        assert_eq!(h.controller.session_id(), session);
        assert_eq!(
            drain_states(&mut h.states),
            vec![ConnectionState::Connecting, ConnectionState::Connected]
        );

        // Only one link was ever opened.
        assert!(h.links.recv().await.is_some());
        assert!(h.links.try_recv().is_err());
        h.controller.disconnect().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_disconnect_twice_is_idempotent() {
        let mut h = harness();
        h.controller.connect(camera()).await;
        wait_for(&h.controller, ConnectionState::Connected).await;

        h.controller.disconnect().await;
        let after_first = (h.controller.connection_state(), drain_states(&mut h.states));
        h.controller.disconnect().await;

        assert_eq!(after_first.0, ConnectionState::Disconnected);
        assert_eq!(after_first.1.last(), Some(&ConnectionState::Disconnected));
        assert_eq!(h.controller.connection_state(), ConnectionState::Disconnected);
        assert!(drain_states(&mut h.states).is_empty());
        assert!(!h.controller.pipelines_running().await);
    }

    #[tokio::test(start_paused = true)]
    async fn test_disconnect_while_connecting_cancels_attempt() {
        let mut h = harness();
        h.connector.script(OpenScript::AcceptAfter(Duration::from_secs(5)));

        h.controller.connect(camera()).await;
        h.controller.disconnect().await;
        tokio::time::sleep(Duration::from_secs(10)).await;

        assert_eq!(h.controller.connection_state(), ConnectionState::Disconnected);
        assert_eq!(
            drain_states(&mut h.states),
            vec![ConnectionState::Connecting, ConnectionState::Disconnected]
        );
        assert!(h.links.try_recv().is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn test_channel_drop_surfaces_single_error() {
        let mut h = harness();
        h.controller.connect(camera()).await;
        wait_for(&h.controller, ConnectionState::Connected).await;

        let link = h.links.recv().await.unwrap();
        link.inbound
            .send(Ok(vec![InboundEvent::Text("hello there".into())]))
            .unwrap();
        tokio::time::sleep(Duration::from_millis(50)).await;
        drop(link);

        wait_for(&h.controller, ConnectionState::Error).await;
        tokio::time::sleep(Duration::from_secs(2)).await;

        assert_eq!(
            drain_states(&mut h.states),
            vec![
                ConnectionState::Connecting,
                ConnectionState::Connected,
                ConnectionState::Error
            ]
        );
        assert!(!h.controller.pipelines_running().await);
        assert_eq!(h.controller.volume(), 0.0);
        assert!(h
            .controller
            .messages()
            .iter()
            .any(|m| m.role == Role::Model && m.text == "hello there"));

        h.controller.disconnect().await;
        assert_eq!(h.controller.connection_state(), ConnectionState::Disconnected);
    }

    #[tokio::test(start_paused = true)]
    async fn test_device_failure_closes_channel() {
        let mut devices = TestDevices::new();
        devices.fail_speaker = true;
        let mut h = harness_with(devices);

        h.controller.connect(camera()).await;
        wait_for(&h.controller, ConnectionState::Error).await;

        assert_eq!(
            drain_states(&mut h.states),
            vec![ConnectionState::Connecting, ConnectionState::Error]
        );
        let mut link = h.links.recv().await.unwrap();
        assert!(link.outbound.recv().await.is_none());
        assert_eq!(h.devices.playback.finishes.load(std::sync::atomic::Ordering::SeqCst), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_inbound_audio_is_played() {
        let h = harness();
        h.controller.connect(camera()).await;
        wait_for(&h.controller, ConnectionState::Connected).await;

        let mut links = h.links;
        let link = links.recv().await.unwrap();
        link.inbound
            .send(Ok(vec![InboundEvent::Audio {
                sample_rate: 24000,
                samples: vec![0.25; 2400],
            }]))
            .unwrap();
        tokio::time::sleep(Duration::from_millis(500)).await;

        assert_eq!(h.devices.playback.played.lock().unwrap().len(), 2400);
        h.controller.disconnect().await;
        assert_eq!(h.devices.playback.finishes.load(std::sync::atomic::Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_disconnect_returns_while_camera_grab_is_stuck() {
        let mut h = harness();
        let (stuck, _gate) = GatedVideoSource::new(false);
        h.controller.connect(Arc::new(stuck)).await;
        wait_for(&h.controller, ConnectionState::Connected).await;
        tokio::time::sleep(Duration::from_millis(100)).await;

        tokio::time::timeout(Duration::from_secs(60), h.controller.disconnect())
            .await
            .expect("disconnect must not wait on the camera");

        assert_eq!(h.controller.connection_state(), ConnectionState::Disconnected);
        assert_eq!(drain_states(&mut h.states).last(), Some(&ConnectionState::Disconnected));
        assert!(!h.controller.pipelines_running().await);
    }

    #[tokio::test(start_paused = true)]
    async fn test_abandoned_disconnect_still_completes() {
        let h = harness();
        let (stuck, _gate) = GatedVideoSource::new(false);
        h.controller.connect(Arc::new(stuck)).await;
        wait_for(&h.controller, ConnectionState::Connected).await;
        tokio::time::sleep(Duration::from_millis(100)).await;

        // Give up on the call while teardown is still waiting on the camera.
        let abandoned = tokio::time::timeout(Duration::from_millis(1), h.controller.disconnect()).await;
        assert!(abandoned.is_err());

        wait_for(&h.controller, ConnectionState::Disconnected).await;
        assert_eq!(h.controller.connect(camera()).await, ConnectOutcome::Started);
        wait_for(&h.controller, ConnectionState::Connected).await;
        h.controller.disconnect().await;
    }
}
