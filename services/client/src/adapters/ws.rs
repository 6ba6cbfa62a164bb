//! services/client/src/adapters/ws.rs
//!
//! This module contains the websocket adapter for the realtime channel.
//! It implements the `RealtimeTransport` and `RealtimeConnection` ports
//! from the `mcq_core` crate.

use async_trait::async_trait;
use futures::{SinkExt, StreamExt};
use mcq_core::domain::RealtimeMessage;
use mcq_core::ports::{PortError, PortResult, RealtimeConnection, RealtimeTransport, TokenProvider};
use std::sync::Arc;
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tracing::{debug, warn};

/// Dials the backend's `/ws/mcq` endpoint. A token, when available, is
/// passed as a query parameter since websocket handshakes cannot carry
/// custom headers from every client environment.
pub struct WsTransport {
    url: String,
    token: Arc<dyn TokenProvider>,
}

impl WsTransport {
    pub fn new(url: impl Into<String>, token: Arc<dyn TokenProvider>) -> Self {
        Self {
            url: url.into(),
            token,
        }
    }

    fn dial_url(&self) -> String {
        match self.token.bearer_token() {
            Some(token) => {
                let sep = if self.url.contains('?') { '&' } else { '?' };
                format!("{}{sep}token={token}", self.url)
            }
            None => self.url.clone(),
        }
    }
}

#[async_trait]
impl RealtimeTransport for WsTransport {
    async fn connect(&self) -> PortResult<Box<dyn RealtimeConnection>> {
        let (stream, _response) = connect_async(self.dial_url())
            .await
            .map_err(|e| PortError::Unexpected(format!("websocket handshake failed: {e}")))?;
        debug!("websocket connected to {}", self.url);
        Ok(Box::new(WsConnection { stream }))
    }
}

pub struct WsConnection {
    stream: WebSocketStream<MaybeTlsStream<TcpStream>>,
}

#[async_trait]
impl RealtimeConnection for WsConnection {
    /// Yields the next protocol message. Malformed JSON is surfaced as an
    /// error item so the channel can skip it; a closed or failed socket
    /// ends the stream.
    async fn recv(&mut self) -> Option<PortResult<RealtimeMessage>> {
        loop {
            match self.stream.next().await? {
                Ok(Message::Text(raw)) => {
                    return Some(
                        serde_json::from_str::<RealtimeMessage>(&raw).map_err(|e| {
                            PortError::Unexpected(format!("malformed realtime message: {e}"))
                        }),
                    );
                }
                // Control frames and non-text payloads carry no protocol
                // messages; keep reading.
                Ok(Message::Ping(_) | Message::Pong(_) | Message::Binary(_) | Message::Frame(_)) => {}
                Ok(Message::Close(_)) => return None,
                Err(e) => {
                    warn!("websocket read failed: {e}");
                    return None;
                }
            }
        }
    }

    async fn send(&mut self, message: &RealtimeMessage) -> PortResult<()> {
        let raw = serde_json::to_string(message)
            .map_err(|e| PortError::Unexpected(format!("failed to encode message: {e}")))?;
        self.stream
            .send(Message::Text(raw))
            .await
            .map_err(|e| PortError::Unexpected(format!("websocket send failed: {e}")))
    }
}
