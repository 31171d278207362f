//! In-memory agent used by tests in place of a WebSocket.

use super::connector::{AgentLink, Connector};
use super::protocol::{InboundEvent, OutboundMessage};
use crate::error::{ConnectionError, SessionError};
use async_trait::async_trait;
use std::collections::VecDeque;
use std::sync::Mutex;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_stream::wrappers::UnboundedReceiverStream;

/// How the next `connect` call behaves.
#[derive(Debug, Clone)]
pub enum OpenScript {
    Accept,
    AcceptAfter(Duration),
    Reject(ConnectionError),
}

/// The agent's side of an accepted link.
///
/// Dropping `inbound` ends the client's stream, which the Transport treats
/// as the agent closing the channel.
pub struct MemoryLink {
    pub outbound: mpsc::UnboundedReceiver<OutboundMessage>,
    pub inbound: mpsc::UnboundedSender<Result<Vec<InboundEvent>, SessionError>>,
}

pub struct MemoryConnector {
    scripts: Mutex<VecDeque<OpenScript>>,
    links: mpsc::UnboundedSender<MemoryLink>,
}

impl MemoryConnector {
    /// Unscripted attempts are accepted immediately.
    pub fn new() -> (Self, mpsc::UnboundedReceiver<MemoryLink>) {
        let (links, rx) = mpsc::unbounded_channel();
        (
            Self {
                scripts: Mutex::new(VecDeque::new()),
                links,
            },
            rx,
        )
    }

    pub fn script(&self, script: OpenScript) {
        self.scripts.lock().unwrap().push_back(script);
    }
}

#[async_trait]
impl Connector for MemoryConnector {
    async fn connect(&self) -> Result<AgentLink, ConnectionError> {
        let script = self.scripts.lock().unwrap().pop_front().unwrap_or(OpenScript::Accept);
        match script {
            OpenScript::Accept => {}
            OpenScript::AcceptAfter(delay) => tokio::time::sleep(delay).await,
            OpenScript::Reject(err) => return Err(err),
        }

        let (outbound_tx, outbound_rx) = mpsc::unbounded_channel::<OutboundMessage>();
        let (inbound_tx, inbound_rx) = mpsc::unbounded_channel();

        let sink = futures_util::sink::unfold(outbound_tx, |tx, message: OutboundMessage| async move {
            tx.send(message)
                .map_err(|_| SessionError::ChannelFault("agent stopped reading".to_string()))?;
            Ok::<_, SessionError>(tx)
        });

        let _ = self.links.send(MemoryLink {
            outbound: outbound_rx,
            inbound: inbound_tx,
        });

        Ok(AgentLink {
            sink: Box::pin(sink),
            stream: Box::pin(UnboundedReceiverStream::new(inbound_rx)),
        })
    }
}
