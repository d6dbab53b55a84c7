use crate::core::errors::ChannelError;
use crate::core::types::Endpoint;
use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use std::time::Duration;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::HeaderValue;
use tokio_tungstenite::{connect_async, tungstenite::protocol::Message};
use tracing::{instrument, warn};

type WsStream =
    tokio_tungstenite::WebSocketStream<tokio_tungstenite::MaybeTlsStream<tokio::net::TcpStream>>;

/// Transport connection settings
#[derive(Debug, Clone)]
pub struct WsConfig {
    /// Connection timeout in milliseconds
    pub connect_timeout_ms: u64,
    /// Send the `ws-client: true` header during the handshake
    pub announce_client: bool,
}

impl Default for WsConfig {
    fn default() -> Self {
        Self {
            connect_timeout_ms: 10_000, // 10 seconds
            announce_client: false,
        }
    }
}

/// Duplex message transport - pure transport layer, no frame semantics
///
/// One instance is one connection attempt: the session never reconnects a transport,
/// it asks its [`TransportFactory`] for a fresh one.
#[async_trait]
pub trait Transport: Send {
    /// Open the connection
    async fn connect(&mut self) -> Result<(), ChannelError>;

    /// Send a raw message
    async fn send_raw(&mut self, msg: Message) -> Result<(), ChannelError>;

    /// Receive the next data message; `None` once the connection is gone
    async fn next_raw(&mut self) -> Option<Result<Message, ChannelError>>;

    /// Close the connection
    async fn close(&mut self) -> Result<(), ChannelError>;
}

/// Creates transports for an endpoint
pub trait TransportFactory: Send + Sync + 'static {
    fn create(&self, endpoint: &Endpoint) -> Box<dyn Transport>;
}

/// Tungstenite-based WebSocket transport
pub struct TungsteniteTransport {
    endpoint: Endpoint,
    write: Option<futures_util::stream::SplitSink<WsStream, Message>>,
    read: Option<futures_util::stream::SplitStream<WsStream>>,
    connected: bool,
    config: WsConfig,
}

impl TungsteniteTransport {
    pub fn new(endpoint: Endpoint) -> Self {
        Self {
            endpoint,
            write: None,
            read: None,
            connected: false,
            config: WsConfig::default(),
        }
    }

    /// Set custom transport configuration
    pub fn with_config(mut self, config: WsConfig) -> Self {
        self.config = config;
        self
    }
}

#[async_trait]
impl Transport for TungsteniteTransport {
    #[instrument(skip(self), fields(endpoint = %self.endpoint))]
    async fn connect(&mut self) -> Result<(), ChannelError> {
        let mut request = self.endpoint.url().into_client_request().map_err(|e| {
            ChannelError::InvalidEndpoint(format!("{}: {}", self.endpoint, e))
        })?;
        if self.config.announce_client {
            request
                .headers_mut()
                .insert("ws-client", HeaderValue::from_static("true"));
        }

        let connect_timeout = Duration::from_millis(self.config.connect_timeout_ms);
        let (ws_stream, _) = tokio::time::timeout(connect_timeout, connect_async(request))
            .await
            .map_err(|_| {
                ChannelError::ConnectionTimeout("WebSocket connection timeout".to_string())
            })?
            .map_err(|e| {
                ChannelError::NetworkError(format!("WebSocket connection failed: {}", e))
            })?;

        let (write, read) = ws_stream.split();
        self.write = Some(write);
        self.read = Some(read);
        self.connected = true;

        Ok(())
    }

    #[instrument(skip(self, msg), fields(endpoint = %self.endpoint))]
    async fn send_raw(&mut self, msg: Message) -> Result<(), ChannelError> {
        if !self.connected {
            return Err(ChannelError::NetworkError(
                "WebSocket not connected".to_string(),
            ));
        }

        let write = self.write.as_mut().ok_or_else(|| {
            ChannelError::NetworkError("WebSocket write stream not available".to_string())
        })?;

        write.send(msg).await.map_err(|e| {
            self.connected = false;
            ChannelError::NetworkError(format!("Failed to send WebSocket message: {}", e))
        })
    }

    #[instrument(skip(self), fields(endpoint = %self.endpoint))]
    async fn next_raw(&mut self) -> Option<Result<Message, ChannelError>> {
        loop {
            if !self.connected {
                return None;
            }
            let read = self.read.as_mut()?;

            match read.next().await {
                Some(Ok(message)) => match message {
                    Message::Close(_) => {
                        self.connected = false;
                        return None;
                    }
                    Message::Ping(data) => {
                        // Auto-respond to pings at transport level
                        if let Err(e) = self.send_raw(Message::Pong(data)).await {
                            warn!("Failed to send pong response: {}", e);
                        }
                    }
                    Message::Pong(_) | Message::Frame(_) => {}
                    data => return Some(Ok(data)),
                },
                Some(Err(e)) => {
                    self.connected = false;
                    return Some(Err(ChannelError::NetworkError(format!(
                        "WebSocket error: {}",
                        e
                    ))));
                }
                None => {
                    self.connected = false;
                    return None;
                }
            }
        }
    }

    #[instrument(skip(self), fields(endpoint = %self.endpoint))]
    async fn close(&mut self) -> Result<(), ChannelError> {
        if let Some(write) = self.write.as_mut() {
            let _ = write.send(Message::Close(None)).await;
        }
        self.connected = false;
        self.write = None;
        self.read = None;
        Ok(())
    }
}

/// Factory producing [`TungsteniteTransport`]s
#[derive(Debug, Clone, Default)]
pub struct TungsteniteFactory {
    config: WsConfig,
}

impl TungsteniteFactory {
    pub fn new(config: WsConfig) -> Self {
        Self { config }
    }
}

impl TransportFactory for TungsteniteFactory {
    fn create(&self, endpoint: &Endpoint) -> Box<dyn Transport> {
        Box::new(TungsteniteTransport::new(endpoint.clone()).with_config(self.config.clone()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_send_before_connect_fails() {
        let mut transport = TungsteniteTransport::new(Endpoint::new("localhost:1", "/ws"));

        let result = transport.send_raw(Message::Text("0:x:null".to_string())).await;
        assert!(matches!(result, Err(ChannelError::NetworkError(_))));
        assert!(transport.next_raw().await.is_none());
    }

    #[tokio::test]
    async fn test_connect_refused() {
        // port 1 is reserved and never listening in test environments
        let mut transport = TungsteniteTransport::new(Endpoint::new("127.0.0.1:1", "/ws"))
            .with_config(WsConfig {
                connect_timeout_ms: 2_000,
                announce_client: true,
            });

        assert!(transport.connect().await.is_err());
        let result = transport.send_raw(Message::Text("0:x:null".to_string())).await;
        assert!(matches!(result, Err(ChannelError::NetworkError(_))));
    }
}
