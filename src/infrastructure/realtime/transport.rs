//! Realtime transport abstraction and the websocket implementation.

use async_trait::async_trait;
use futures::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use url::Url;

use crate::shared::error::SessionError;

use super::messages::{ClientMessage, ServerEvent};

/// Why a connection attempt failed.
#[derive(Debug, thiserror::Error)]
pub enum ConnectError {
    /// The handshake was rejected as unauthenticated.
    #[error("realtime handshake rejected: {0}")]
    AuthRejected(String),
    #[error("realtime transport error: {0}")]
    Transport(String),
}

/// One live, authenticated connection.
#[async_trait]
pub trait RealtimeConnection: Send {
    /// Whether the protocol accepts an `auth` frame mid-stream, avoiding a
    /// reconnect on credential rotation.
    fn supports_reauth(&self) -> bool;

    async fn send(&mut self, message: ClientMessage) -> Result<(), SessionError>;

    /// Next inbound event. `None` means the peer closed; `Some(Err(_))`
    /// means the connection is broken. Unparseable frames are skipped.
    async fn recv(&mut self) -> Option<Result<ServerEvent, SessionError>>;

    async fn close(&mut self);
}

/// Connection factory.
#[async_trait]
pub trait RealtimeTransport: Send + Sync {
    async fn connect(&self, token: &str) -> Result<Box<dyn RealtimeConnection>, ConnectError>;
}

/// Websocket transport; authenticates via the `auth.token` handshake query
/// parameter.
pub struct WebsocketTransport {
    endpoint: Url,
}

impl WebsocketTransport {
    pub fn new(endpoint: &str) -> Result<Self, SessionError> {
        let endpoint = Url::parse(endpoint)
            .map_err(|e| SessionError::Internal(format!("invalid realtime url: {}", e)))?;
        Ok(Self { endpoint })
    }
}

#[async_trait]
impl RealtimeTransport for WebsocketTransport {
    async fn connect(&self, token: &str) -> Result<Box<dyn RealtimeConnection>, ConnectError> {
        let mut url = self.endpoint.clone();
        url.query_pairs_mut().append_pair("auth.token", token);

        match connect_async(url.as_str()).await {
            Ok((stream, _response)) => Ok(Box::new(WebsocketConnection { stream })),
            Err(tokio_tungstenite::tungstenite::Error::Http(response))
                if response.status().as_u16() == 401 || response.status().as_u16() == 403 =>
            {
                Err(ConnectError::AuthRejected(response.status().to_string()))
            }
            Err(e) => Err(ConnectError::Transport(e.to_string())),
        }
    }
}

struct WebsocketConnection {
    stream: WebSocketStream<MaybeTlsStream<TcpStream>>,
}

#[async_trait]
impl RealtimeConnection for WebsocketConnection {
    fn supports_reauth(&self) -> bool {
        true
    }

    async fn send(&mut self, message: ClientMessage) -> Result<(), SessionError> {
        let text = serde_json::to_string(&message)
            .map_err(|e| SessionError::Internal(e.to_string()))?;
        self.stream
            .send(Message::text(text))
            .await
            .map_err(|e| SessionError::Transport(e.to_string()))
    }

    async fn recv(&mut self) -> Option<Result<ServerEvent, SessionError>> {
        loop {
            match self.stream.next().await? {
                Ok(Message::Text(text)) => match serde_json::from_str(text.as_str()) {
                    Ok(event) => return Some(Ok(event)),
                    Err(e) => {
                        tracing::warn!(error = %e, "skipping unparseable realtime frame");
                        continue;
                    }
                },
                Ok(Message::Close(_)) => return None,
                // Pings are answered by the library on flush; everything
                // else is ignored.
                Ok(_) => continue,
                Err(e) => return Some(Err(SessionError::Transport(e.to_string()))),
            }
        }
    }

    async fn close(&mut self) {
        let _ = self.stream.close(None).await;
    }
}
