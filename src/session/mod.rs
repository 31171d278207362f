//! # Realtime Session
//!
//! The Session Controller and the types it publishes to the UI.
//!
//! ## Observable contract:
//! The controller commits `ConnectionState` through a `watch` channel, so a
//! reader always sees the latest committed value, and broadcasts every
//! change as a `SessionEvent` for subscribers (the WebSocket surface).

pub mod controller;
pub mod metrics;
pub mod signal;

pub use controller::{ConnectOutcome, SessionController};
pub use metrics::{MetricsSnapshot, PipelineMetrics};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Connection state exposed to the UI.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
    Error,
}

impl ConnectionState {
    /// Whether `connect` may start a new Session from this state.
    pub fn accepts_connect(self) -> bool {
        matches!(self, ConnectionState::Disconnected | ConnectionState::Error)
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ConnectionState::Disconnected => "disconnected",
            ConnectionState::Connecting => "connecting",
            ConnectionState::Connected => "connected",
            ConnectionState::Error => "error",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Model,
    System,
}

/// One entry of the live Session's conversation log.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MessageLog {
    pub role: Role,
    pub text: String,
    pub timestamp: DateTime<Utc>,
}

impl MessageLog {
    pub fn new(role: Role, text: impl Into<String>) -> Self {
        Self {
            role,
            text: text.into(),
            timestamp: Utc::now(),
        }
    }
}

/// Events published to subscribers.
#[derive(Debug, Clone, PartialEq)]
pub enum SessionEvent {
    StateChanged(ConnectionState),
    Volume(f32),
    Message(MessageLog),
}
