//! Per-session signal plumbing between the pipelines and the controller.
//!
//! Every session gets its own unbounded signal channel. Pipelines report
//! volume updates, agent text, control signals and fatal faults through a
//! cloned `SignalSender`; the controller's supervisor consumes them. Dropping
//! the session drops the channel, so nothing from a dead session can leak into
//! the next one.

use crate::error::SessionError;
use crate::transport::ControlSignal;
use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, error};

/// Which pipeline raised a signal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Pipeline {
    Capture,
    Sampler,
    Transport,
}

impl fmt::Display for Pipeline {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Pipeline::Capture => "audio capture",
            Pipeline::Sampler => "video sampler",
            Pipeline::Transport => "transport",
        };
        f.write_str(name)
    }
}

#[derive(Debug)]
pub enum SessionSignal {
    Fatal { origin: Pipeline, error: SessionError },
    Volume(f32),
    ModelText(String),
    Control(ControlSignal),
}

/// Cloneable handle the pipelines report through.
///
/// ## Fatal latch:
/// The first `report_fatal` wins; every later one (from any clone) is logged
/// and dropped, so the controller sees at most one fatal event per session.
#[derive(Debug, Clone)]
pub struct SignalSender {
    tx: mpsc::UnboundedSender<SessionSignal>,
    tripped: Arc<AtomicBool>,
}

impl SignalSender {
    pub fn channel() -> (Self, mpsc::UnboundedReceiver<SessionSignal>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (
            Self {
                tx,
                tripped: Arc::new(AtomicBool::new(false)),
            },
            rx,
        )
    }

    /// Report a session-ending fault. Returns whether this report was the one delivered.
    pub fn report_fatal(&self, origin: Pipeline, error: SessionError) -> bool {
        if self.tripped.swap(true, Ordering::AcqRel) {
            debug!("Ignoring {} fault after session already failed: {}", origin, error);
            return false;
        }
        error!("Fatal {} fault: {}", origin, error);
        self.tx.send(SessionSignal::Fatal { origin, error }).is_ok()
    }

    /// The session is ending on purpose; later faults are expected and ignored.
    pub fn disarm(&self) {
        self.tripped.store(true, Ordering::Release);
    }

    pub fn volume(&self, level: f32) {
        let _ = self.tx.send(SessionSignal::Volume(level));
    }

    pub fn model_text(&self, text: String) {
        let _ = self.tx.send(SessionSignal::ModelText(text));
    }

    pub fn control(&self, signal: ControlSignal) {
        let _ = self.tx.send(SessionSignal::Control(signal));
    }
}

/// Counts consecutive per-unit faults of one pipeline.
///
/// A success resets the run. Reaching `limit` consecutive faults promotes
/// the run to a channel-fault equivalent.
#[derive(Debug)]
pub struct FaultCounter {
    consecutive: AtomicU32,
    limit: u32,
}

impl FaultCounter {
    pub fn new(limit: u32) -> Self {
        Self {
            consecutive: AtomicU32::new(0),
            limit: limit.max(1),
        }
    }

    /// Record one dropped unit; true once the limit is reached.
    pub fn record_fault(&self) -> bool {
        self.consecutive.fetch_add(1, Ordering::AcqRel) + 1 >= self.limit
    }

    pub fn record_success(&self) {
        self.consecutive.store(0, Ordering::Release);
    }

    pub fn consecutive(&self) -> u32 {
        self.consecutive.load(Ordering::Acquire)
    }
}
