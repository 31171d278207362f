//! # Agent Connectors
//!
//! A `Connector` performs the connection and handshake and hands back an
//! `AgentLink`: a message sink for outbound media and a stream of decoded
//! inbound events. The Transport never sees sockets, only the link, which
//! lets tests swap in an in-memory agent.

use super::protocol::{decode_server_message, encode_outbound, encode_setup, InboundEvent, OutboundMessage};
use crate::config::AgentConfig;
use crate::error::{ConnectionError, SessionError};
use async_trait::async_trait;
use futures_util::{Sink, SinkExt, Stream, StreamExt};
use std::pin::Pin;
use tokio_tungstenite::{connect_async, tungstenite::Message};
use tracing::{debug, info, warn};

/// Outbound half of an open link.
pub type LinkSink = Pin<Box<dyn Sink<OutboundMessage, Error = SessionError> + Send>>;

/// Inbound half of an open link. Each item is one whole agent message.
pub type LinkStream = Pin<Box<dyn Stream<Item = Result<Vec<InboundEvent>, SessionError>> + Send>>;

/// An open, handshaken channel to the remote agent.
pub struct AgentLink {
    pub sink: LinkSink,
    pub stream: LinkStream,
}

/// Opens links to the remote agent.
///
/// Implementations never retry: one call is one attempt.
#[async_trait]
pub trait Connector: Send + Sync {
    async fn connect(&self) -> Result<AgentLink, ConnectionError>;
}

/// Connects to the agent over a WebSocket and performs the setup handshake.
#[derive(Debug, Clone)]
pub struct WebSocketConnector {
    agent: AgentConfig,
    output_sample_rate: u32,
}

impl WebSocketConnector {
    pub fn new(agent: AgentConfig, output_sample_rate: u32) -> Self {
        Self {
            agent,
            output_sample_rate,
        }
    }

    fn url(&self) -> String {
        let separator = if self.agent.endpoint.contains('?') { '&' } else { '?' };
        format!("{}{}key={}", self.agent.endpoint, separator, self.agent.api_key)
    }
}

#[async_trait]
impl Connector for WebSocketConnector {
    async fn connect(&self) -> Result<AgentLink, ConnectionError> {
        info!("Connecting to agent at {} (model {})", self.agent.endpoint, self.agent.model);

        let (socket, response) = connect_async(self.url()).await?;
        debug!("WebSocket upgrade accepted with status {}", response.status());

        let (mut write, mut read) = socket.split();

        let setup = encode_setup(&self.agent).map_err(|e| ConnectionError::HandshakeRejected(e.to_string()))?;
        write.send(Message::Text(setup)).await?;

        let rate = self.output_sample_rate;

        // Nothing but setupComplete is expected before the session starts.
        loop {
            let text = match read.next().await {
                Some(Ok(Message::Text(text))) => text,
                Some(Ok(Message::Binary(bytes))) => String::from_utf8(bytes).map_err(|_| {
                    ConnectionError::HandshakeRejected("setup reply is not UTF-8".to_string())
                })?,
                Some(Ok(Message::Close(frame))) => {
                    let reason = frame
                        .map(|f| format!("{} {}", f.code, f.reason))
                        .unwrap_or_else(|| "no reason given".to_string());
                    return Err(ConnectionError::HandshakeRejected(format!(
                        "agent closed the channel during setup: {}",
                        reason
                    )));
                }
                Some(Ok(_)) => continue,
                Some(Err(e)) => return Err(e.into()),
                None => {
                    return Err(ConnectionError::HandshakeRejected(
                        "agent closed the channel during setup".to_string(),
                    ))
                }
            };

            match decode_server_message(&text, rate) {
                Ok(events) if events.contains(&InboundEvent::SetupComplete) => break,
                Ok(_) => debug!("Ignoring agent message received before setupComplete"),
                Err(e) => warn!("Unreadable message during setup: {}", e),
            }
        }

        info!("Agent accepted session setup");

        let sink = write
            .sink_map_err(SessionError::from)
            .with(|message: OutboundMessage| async move { encode_outbound(&message).map(Message::Text) });

        let stream = read.filter_map(move |frame| async move {
            match frame {
                Ok(Message::Text(text)) => Some(decode_server_message(&text, rate)),
                Ok(Message::Binary(bytes)) => Some(
                    std::str::from_utf8(&bytes)
                        .map_err(|_| SessionError::Encoding("binary agent message is not UTF-8".to_string()))
                        .and_then(|text| decode_server_message(text, rate)),
                ),
                Ok(Message::Close(frame)) => {
                    let reason = frame
                        .map(|f| format!("{} {}", f.code, f.reason))
                        .unwrap_or_else(|| "no reason given".to_string());
                    Some(Err(SessionError::ChannelFault(format!("agent closed the channel: {}", reason))))
                }
                Ok(_) => None,
                Err(e) => Some(Err(SessionError::from(e))),
            }
        });

        Ok(AgentLink {
            sink: Box::pin(sink),
            stream: Box::pin(stream),
        })
    }
}
