//! # Error Handling
//!
//! Two layers of errors live here:
//!
//! - **SessionError / ConnectionError**: faults raised inside the realtime core
//!   (transport, capture, sampler, playback). They never reach the UI directly;
//!   the Session Controller collapses fatal ones into a single `ERROR` state.
//! - **AppError**: errors returned by the HTTP control surface, converted into
//!   JSON responses with a consistent envelope.
//!
//! ## Error Taxonomy (core):
//! - **ConnectionError**: the channel to the remote agent failed to open
//! - **ChannelFault**: the channel dropped or rejected data after it was open
//! - **Encoding**: one capture/sampler unit could not be produced
//! - **Config**: the session could not be built from the current configuration

use actix_web::{HttpResponse, ResponseError};
use serde_json::json;
use std::fmt;
use tokio_tungstenite::tungstenite;

/// Why the channel to the remote agent could not be opened.
///
/// ## Variants:
/// - **NetworkUnreachable**: DNS, TCP or TLS failure before any handshake
/// - **HandshakeRejected**: the agent refused the upgrade or the setup message
/// - **AuthRejected**: the agent answered 401/403 (bad or missing API key)
#[derive(Debug, Clone, PartialEq)]
pub enum ConnectionError {
    NetworkUnreachable(String),
    HandshakeRejected(String),
    AuthRejected(String),
}

impl fmt::Display for ConnectionError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConnectionError::NetworkUnreachable(msg) => write!(f, "network unreachable: {}", msg),
            ConnectionError::HandshakeRejected(msg) => write!(f, "handshake rejected: {}", msg),
            ConnectionError::AuthRejected(msg) => write!(f, "authentication rejected: {}", msg),
        }
    }
}

impl std::error::Error for ConnectionError {}

/// Map WebSocket client errors raised while opening the channel.
///
/// ## HTTP upgrade responses:
/// The agent answers a bad API key with a plain HTTP status instead of
/// upgrading, so 401/403 become `AuthRejected` and every other status is a
/// rejected handshake.
impl From<tungstenite::Error> for ConnectionError {
    fn from(err: tungstenite::Error) -> Self {
        match err {
            tungstenite::Error::Io(io) => ConnectionError::NetworkUnreachable(io.to_string()),
            tungstenite::Error::Http(response) => {
                let status = response.status().as_u16();
                if status == 401 || status == 403 {
                    ConnectionError::AuthRejected(format!("HTTP {}", status))
                } else {
                    ConnectionError::HandshakeRejected(format!("HTTP {}", status))
                }
            }
            other => ConnectionError::HandshakeRejected(other.to_string()),
        }
    }
}

/// Faults raised by the realtime core.
#[derive(Debug, Clone, PartialEq)]
pub enum SessionError {
    /// Channel failed to open
    Connection(ConnectionError),

    /// Channel dropped or rejected data after it was open
    ChannelFault(String),

    /// A single chunk or frame could not be produced
    Encoding(String),

    /// Session resources could not be built
    Config(String),
}

impl SessionError {
    /// Whether this fault ends the session on its own.
    ///
    /// Encoding faults are only fatal once promoted by the producing pipeline.
    pub fn is_fatal(&self) -> bool {
        !matches!(self, SessionError::Encoding(_))
    }
}

impl fmt::Display for SessionError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SessionError::Connection(err) => write!(f, "Connection error: {}", err),
            SessionError::ChannelFault(msg) => write!(f, "Channel fault: {}", msg),
            SessionError::Encoding(msg) => write!(f, "Encoding fault: {}", msg),
            SessionError::Config(msg) => write!(f, "Session configuration error: {}", msg),
        }
    }
}

impl std::error::Error for SessionError {}

impl From<ConnectionError> for SessionError {
    fn from(err: ConnectionError) -> Self {
        SessionError::Connection(err)
    }
}

/// Errors on an already-open channel are channel faults, never connection errors.
impl From<tungstenite::Error> for SessionError {
    fn from(err: tungstenite::Error) -> Self {
        SessionError::ChannelFault(err.to_string())
    }
}

/// Custom error types for the HTTP control surface.
///
/// ## Error Categories:
/// - **Internal**: Server-side problems (500 errors)
/// - **BadRequest**: Client sent invalid data (400 errors)
/// - **NotFound**: Requested resource doesn't exist (404 errors)
/// - **ConfigError**: Configuration problems (500 errors)
/// - **ValidationError**: Data validation failed (400 errors)
/// - **Conflict**: The request does not fit the current session state (409 errors)
/// - **Timeout**: A caller-side wait expired (504 errors)
#[derive(Debug)]
pub enum AppError {
    Internal(String),
    BadRequest(String),
    NotFound(String),
    ConfigError(String),
    ValidationError(String),
    Conflict(String),
    Timeout(String),
}

impl fmt::Display for AppError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AppError::Internal(msg) => write!(f, "Internal error: {}", msg),
            AppError::BadRequest(msg) => write!(f, "Bad request: {}", msg),
            AppError::NotFound(msg) => write!(f, "Not found: {}", msg),
            AppError::ConfigError(msg) => write!(f, "Configuration error: {}", msg),
            AppError::ValidationError(msg) => write!(f, "Validation error: {}", msg),
            AppError::Conflict(msg) => write!(f, "Conflict: {}", msg),
            AppError::Timeout(msg) => write!(f, "Timeout: {}", msg),
        }
    }
}

/// Converts errors into JSON responses.
///
/// ## JSON Response Format:
/// ```json
/// {
///   "error": {
///     "type": "conflict",
///     "message": "A session is already live",
///     "timestamp": "2025-01-01T12:00:00Z"
///   }
/// }
/// ```
impl ResponseError for AppError {
    fn error_response(&self) -> HttpResponse {
        use actix_web::http::StatusCode;

        let (status, error_type, message) = match self {
            AppError::Internal(msg) => (StatusCode::INTERNAL_SERVER_ERROR, "internal_error", msg),
            AppError::BadRequest(msg) => (StatusCode::BAD_REQUEST, "bad_request", msg),
            AppError::NotFound(msg) => (StatusCode::NOT_FOUND, "not_found", msg),
            AppError::ConfigError(msg) => (StatusCode::INTERNAL_SERVER_ERROR, "config_error", msg),
            AppError::ValidationError(msg) => (StatusCode::BAD_REQUEST, "validation_error", msg),
            AppError::Conflict(msg) => (StatusCode::CONFLICT, "conflict", msg),
            AppError::Timeout(msg) => (StatusCode::GATEWAY_TIMEOUT, "timeout", msg),
        };

        HttpResponse::build(status).json(json!({
            "error": {
                "type": error_type,
                "message": message,
                "timestamp": chrono::Utc::now().to_rfc3339()
            }
        }))
    }
}

impl From<anyhow::Error> for AppError {
    fn from(err: anyhow::Error) -> Self {
        AppError::Internal(err.to_string())
    }
}

/// JSON parsing errors are almost always the client's fault, so they map to 400.
impl From<serde_json::Error> for AppError {
    fn from(err: serde_json::Error) -> Self {
        AppError::BadRequest(format!("JSON parsing error: {}", err))
    }
}

impl From<config::ConfigError> for AppError {
    fn from(err: config::ConfigError) -> Self {
        AppError::ConfigError(err.to_string())
    }
}

impl From<SessionError> for AppError {
    fn from(err: SessionError) -> Self {
        match err {
            SessionError::Config(msg) => AppError::ConfigError(msg),
            other => AppError::Internal(other.to_string()),
        }
    }
}

/// Shorthand for handler results.
pub type AppResult<T> = Result<T, AppError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_encoding_faults_are_not_fatal_on_their_own() {
        assert!(!SessionError::Encoding("source ended".to_string()).is_fatal());
        assert!(SessionError::ChannelFault("reset".to_string()).is_fatal());
        assert!(SessionError::Connection(ConnectionError::AuthRejected("401".to_string())).is_fatal());
    }

    #[test]
    fn test_io_error_maps_to_network_unreachable() {
        let io = std::io::Error::new(std::io::ErrorKind::ConnectionRefused, "refused");
        let err = ConnectionError::from(tungstenite::Error::Io(io));
        assert!(matches!(err, ConnectionError::NetworkUnreachable(_)));
    }

    #[test]
    fn test_conflict_response_status() {
        let response = AppError::Conflict("busy".to_string()).error_response();
        assert_eq!(response.status(), actix_web::http::StatusCode::CONFLICT);
    }
}
