//! Realtime peer transport
//!
//! [`RealtimeTransport`] is the seam between the session state machine
//! and the network; the production implementation speaks JSON over a
//! WebSocket, tests substitute scripted fakes.

use std::time::Duration;

use async_trait::async_trait;
use futures::{SinkExt as _, StreamExt as _};
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::client::IntoClientRequest as _;
use tokio_tungstenite::tungstenite::handshake::client::Request;
use tokio_tungstenite::tungstenite::http::HeaderValue;
use tokio_tungstenite::tungstenite::{self, Message};
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async};

use crate::config::RealtimeConfig;
use crate::{Error, Result};

use super::protocol::{ClientEvent, ServerEvent};

/// Bidirectional event stream with the realtime peer.
#[async_trait]
pub trait RealtimeTransport: Send {
    /// Send one event.
    ///
    /// # Errors
    ///
    /// Returns `Error::Connection` when the link is gone.
    async fn send(&mut self, event: ClientEvent) -> Result<()>;

    /// Receive the next event; `None` means the peer closed.
    ///
    /// # Errors
    ///
    /// Returns `Error::Connection` on transport failure and
    /// `Error::Protocol` on a frame that does not parse.
    async fn next_event(&mut self) -> Result<Option<ServerEvent>>;

    /// Close the connection. Idempotent.
    ///
    /// # Errors
    ///
    /// Returns `Error::Connection` if the close handshake fails.
    async fn close(&mut self) -> Result<()>;
}

/// WebSocket transport to the realtime service.
pub struct WsTransport {
    stream: WebSocketStream<MaybeTlsStream<TcpStream>>,
}

impl WsTransport {
    /// Connect and authenticate within the configured timeout.
    ///
    /// # Errors
    ///
    /// Returns `Error::Connection` on handshake failure or timeout.
    pub async fn connect(realtime: &RealtimeConfig, api_key: &str) -> Result<Self> {
        let request = build_request(realtime, api_key)?;
        let timeout = Duration::from_secs(realtime.connect_timeout_secs);
        let (stream, response) = tokio::time::timeout(timeout, connect_async(request))
            .await
            .map_err(|_| {
                Error::Connection(format!(
                    "handshake timed out after {}s",
                    realtime.connect_timeout_secs
                ))
            })?
            .map_err(|e| Error::Connection(e.to_string()))?;
        tracing::info!(status = %response.status(), model = %realtime.model, "realtime peer connected");
        Ok(Self { stream })
    }
}

/// Assemble the handshake request with auth headers and model parameter.
fn build_request(realtime: &RealtimeConfig, api_key: &str) -> Result<Request> {
    let url = format!("{}?model={}", realtime.url, realtime.model);
    let mut request = url
        .into_client_request()
        .map_err(|e| Error::Connection(format!("invalid realtime url: {e}")))?;
    let auth = HeaderValue::from_str(&format!("Bearer {api_key}"))
        .map_err(|e| Error::Connection(format!("invalid api key: {e}")))?;
    request.headers_mut().insert("Authorization", auth);
    request
        .headers_mut()
        .insert("OpenAI-Beta", HeaderValue::from_static("realtime=v1"));
    Ok(request)
}

#[async_trait]
impl RealtimeTransport for WsTransport {
    async fn send(&mut self, event: ClientEvent) -> Result<()> {
        let json = serde_json::to_string(&event)?;
        self.stream
            .send(Message::Text(json))
            .await
            .map_err(|e| Error::Connection(e.to_string()))
    }

    async fn next_event(&mut self) -> Result<Option<ServerEvent>> {
        loop {
            let Some(message) = self.stream.next().await else {
                return Ok(None);
            };
            match message.map_err(|e| Error::Connection(e.to_string()))? {
                Message::Text(text) => {
                    return serde_json::from_str::<ServerEvent>(&text)
                        .map(Some)
                        .map_err(|e| Error::Protocol(format!("malformed event: {e}")));
                }
                Message::Close(_) => return Ok(None),
                // Keepalive frames are answered by the library
                Message::Ping(_) | Message::Pong(_) | Message::Frame(_) => {}
                Message::Binary(_) => {
                    tracing::debug!("ignoring unexpected binary frame");
                }
            }
        }
    }

    async fn close(&mut self) -> Result<()> {
        match self.stream.close(None).await {
            Ok(())
            | Err(tungstenite::Error::ConnectionClosed | tungstenite::Error::AlreadyClosed) => {
                Ok(())
            }
            Err(e) => Err(Error::Connection(e.to_string())),
        }
    }
}
