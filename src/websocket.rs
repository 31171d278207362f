//! # Session Event WebSocket
//!
//! `/ws/session` lets a UI subscribe to the Session Controller instead of
//! polling it, and drive connect/disconnect over the same socket.
//!
//! ## Protocol:
//! 1. **On connect**: the server sends a `state` snapshot
//! 2. **Events**: every state change, volume sample and log entry is pushed
//! 3. **Commands**: `{"type":"connect"}`, `{"type":"disconnect"}`,
//!    `{"type":"ping","timestamp":n}`
//! 4. **Heartbeat**: the server pings every 30s and drops clients silent for 60s
//!
//! ## Message Format:
//! - **Server → Client**: `{"type":"state","state":"connected"}`,
//!   `{"type":"volume","volume":0.42}`, `{"type":"message","role":"model",...}`
//! - **Client → Server**: JSON commands as above

use crate::media::VideoSource;
use crate::session::{ConnectOutcome, ConnectionState, MessageLog, Role, SessionController, SessionEvent};
use crate::state::AppState;

use actix::prelude::*;
use actix_web::{web, HttpRequest, HttpResponse, Result as ActixResult};
use actix_web_actors::ws;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio_stream::wrappers::errors::BroadcastStreamRecvError;
use tokio_stream::wrappers::BroadcastStream;
use tracing::{debug, error, info, warn};

const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(30);
const CLIENT_TIMEOUT: Duration = Duration::from_secs(60);

/// Messages pushed to the client.
#[derive(Debug, Serialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerMessage {
    State {
        state: ConnectionState,
    },
    Volume {
        volume: f32,
    },
    Message {
        role: Role,
        text: String,
        timestamp: DateTime<Utc>,
    },
    ConnectResult {
        started: bool,
        state: ConnectionState,
    },
    Ping {
        timestamp: u64,
    },
    Pong {
        timestamp: u64,
    },
    Error {
        code: String,
        message: String,
    },
}

impl From<SessionEvent> for ServerMessage {
    fn from(event: SessionEvent) -> Self {
        match event {
            SessionEvent::StateChanged(state) => ServerMessage::State { state },
            SessionEvent::Volume(volume) => ServerMessage::Volume { volume },
            SessionEvent::Message(MessageLog { role, text, timestamp }) => {
                ServerMessage::Message { role, text, timestamp }
            }
        }
    }
}

/// Commands accepted from the client.
#[derive(Debug, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientMessage {
    Connect,
    Disconnect,
    Ping { timestamp: u64 },
    Pong { timestamp: u64 },
}

/// Pre-serialized text frame from a background task.
#[derive(Message)]
#[rtype(result = "()")]
struct SendText(String);

pub struct SessionSocket {
    controller: SessionController,
    video_source: Arc<dyn VideoSource>,
    last_heartbeat: Instant,
}

impl SessionSocket {
    pub fn new(controller: SessionController, video_source: Arc<dyn VideoSource>) -> Self {
        Self {
            controller,
            video_source,
            last_heartbeat: Instant::now(),
        }
    }

    fn send(&self, ctx: &mut ws::WebsocketContext<Self>, message: &ServerMessage) {
        match serde_json::to_string(message) {
            Ok(json) => ctx.text(json),
            Err(e) => error!("Failed to serialize WebSocket message: {}", e),
        }
    }

    fn send_error(&self, ctx: &mut ws::WebsocketContext<Self>, code: &str, message: &str) {
        self.send(
            ctx,
            &ServerMessage::Error {
                code: code.to_string(),
                message: message.to_string(),
            },
        );
    }

    fn handle_command(&mut self, command: ClientMessage, ctx: &mut ws::WebsocketContext<Self>) {
        match command {
            ClientMessage::Connect => {
                let controller = self.controller.clone();
                let video = self.video_source.clone();
                let addr = ctx.address();

                tokio::spawn(async move {
                    let reply = match controller.connect(video).await {
                        ConnectOutcome::Started => ServerMessage::ConnectResult {
                            started: true,
                            state: controller.connection_state(),
                        },
                        ConnectOutcome::Ignored(state) => ServerMessage::ConnectResult { started: false, state },
                    };
                    if let Ok(json) = serde_json::to_string(&reply) {
                        addr.do_send(SendText(json));
                    }
                });
            }
            ClientMessage::Disconnect => {
                let controller = self.controller.clone();
                tokio::spawn(async move { controller.disconnect().await });
            }
            ClientMessage::Ping { timestamp } => {
                self.last_heartbeat = Instant::now();
                self.send(ctx, &ServerMessage::Pong { timestamp });
            }
            ClientMessage::Pong { .. } => {
                self.last_heartbeat = Instant::now();
            }
        }
    }
}

impl Actor for SessionSocket {
    type Context = ws::WebsocketContext<Self>;

    fn started(&mut self, ctx: &mut Self::Context) {
        info!("Session WebSocket connected");

        ctx.add_stream(BroadcastStream::new(self.controller.subscribe()));
        self.send(
            ctx,
            &ServerMessage::State {
                state: self.controller.connection_state(),
            },
        );

        ctx.run_interval(HEARTBEAT_INTERVAL, |act, ctx| {
            if Instant::now().duration_since(act.last_heartbeat) > CLIENT_TIMEOUT {
                warn!("WebSocket heartbeat timeout, closing connection");
                ctx.stop();
                return;
            }
            let timestamp = Utc::now().timestamp_millis().max(0) as u64;
            act.send(ctx, &ServerMessage::Ping { timestamp });
        });
    }

    fn stopped(&mut self, _ctx: &mut Self::Context) {
        // The Session outlives its observers; closing the socket does not disconnect.
        info!("Session WebSocket closed");
    }
}

impl StreamHandler<Result<SessionEvent, BroadcastStreamRecvError>> for SessionSocket {
    fn handle(&mut self, event: Result<SessionEvent, BroadcastStreamRecvError>, ctx: &mut Self::Context) {
        match event {
            Ok(event) => self.send(ctx, &ServerMessage::from(event)),
            Err(BroadcastStreamRecvError::Lagged(missed)) => {
                debug!("WebSocket subscriber lagged, {} events dropped", missed);
                // Resync so the client never shows a stale state.
                self.send(
                    ctx,
                    &ServerMessage::State {
                        state: self.controller.connection_state(),
                    },
                );
            }
        }
    }
}

impl StreamHandler<Result<ws::Message, ws::ProtocolError>> for SessionSocket {
    fn handle(&mut self, msg: Result<ws::Message, ws::ProtocolError>, ctx: &mut Self::Context) {
        match msg {
            Ok(ws::Message::Text(text)) => match serde_json::from_str::<ClientMessage>(&text) {
                Ok(command) => self.handle_command(command, ctx),
                Err(err) => self.send_error(ctx, "invalid_json", &format!("Invalid JSON: {}", err)),
            },
            Ok(ws::Message::Binary(_)) => {
                self.send_error(ctx, "unsupported", "Binary frames are not accepted");
            }
            Ok(ws::Message::Ping(data)) => {
                ctx.pong(&data);
                self.last_heartbeat = Instant::now();
            }
            Ok(ws::Message::Pong(_)) => {
                self.last_heartbeat = Instant::now();
            }
            Ok(ws::Message::Close(reason)) => {
                info!("WebSocket closed: {:?}", reason);
                ctx.close(reason);
                ctx.stop();
            }
            Ok(ws::Message::Continuation(_)) => {
                warn!("Received unexpected continuation frame");
            }
            Ok(ws::Message::Nop) => {}
            Err(err) => {
                error!("WebSocket protocol error: {}", err);
                ctx.stop();
            }
        }
    }
}

impl Handler<SendText> for SessionSocket {
    type Result = ();

    fn handle(&mut self, msg: SendText, ctx: &mut Self::Context) {
        ctx.text(msg.0);
    }
}

/// Upgrade `/ws/session` requests to a `SessionSocket`.
pub async fn session_websocket(
    req: HttpRequest,
    stream: web::Payload,
    app_state: web::Data<AppState>,
) -> ActixResult<HttpResponse> {
    info!("New WebSocket connection request from: {:?}", req.connection_info().peer_addr());

    let socket = SessionSocket::new(app_state.controller.clone(), app_state.video_source.clone());
    ws::start(socket, &req, stream)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_state_event_serialization() {
        let json = serde_json::to_value(ServerMessage::from(SessionEvent::StateChanged(
            ConnectionState::Connected,
        )))
        .unwrap();
        assert_eq!(json, serde_json::json!({"type": "state", "state": "connected"}));
    }

    #[test]
    fn test_message_event_serialization() {
        let entry = MessageLog::new(Role::Model, "hello");
        let json = serde_json::to_value(ServerMessage::from(SessionEvent::Message(entry))).unwrap();
        assert_eq!(json["type"], "message");
        assert_eq!(json["role"], "model");
        assert_eq!(json["text"], "hello");
    }

    #[test]
    fn test_client_commands_parse() {
        assert_eq!(
            serde_json::from_str::<ClientMessage>(r#"{"type":"connect"}"#).unwrap(),
            ClientMessage::Connect
        );
        assert_eq!(
            serde_json::from_str::<ClientMessage>(r#"{"type":"ping","timestamp":7}"#).unwrap(),
            ClientMessage::Ping { timestamp: 7 }
        );
        assert!(serde_json::from_str::<ClientMessage>(r#"{"type":"launch"}"#).is_err());
    }
}
