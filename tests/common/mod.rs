#![allow(dead_code)]

use async_trait::async_trait;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::timeout;
use tokio_tungstenite::tungstenite::Message;
use wsline::core::kernel::{Transport, TransportFactory};
use wsline::{ChannelConfig, ChannelError, Endpoint, FrameEncoding};

pub const STEP: Duration = Duration::from_secs(2);

/// Test configuration: readable frames, quick reconnects
pub fn test_config() -> ChannelConfig {
    ChannelConfig::default()
        .with_encoding(FrameEncoding::Text)
        .with_reconnect_delay(Duration::from_millis(20))
}

/// Server end of one in-memory connection. Dropping it closes the connection.
pub struct ServerConn {
    inbound: mpsc::UnboundedReceiver<Message>,
    outbound: mpsc::UnboundedSender<Message>,
}

impl ServerConn {
    pub fn push(&self, text: &str) {
        let _ = self.outbound.send(Message::Text(text.to_string()));
    }

    pub fn push_binary(&self, bytes: &[u8]) {
        let _ = self.outbound.send(Message::Binary(bytes.to_vec()));
    }

    /// Next raw message written by the client
    pub async fn next_message(&mut self) -> Message {
        timeout(STEP, self.inbound.recv())
            .await
            .expect("timed out waiting for a client frame")
            .expect("client closed the connection")
    }

    /// Next client frame as text, whatever the message kind
    pub async fn next_text(&mut self) -> String {
        match self.next_message().await {
            Message::Text(text) => text,
            Message::Binary(bytes) => String::from_utf8(bytes).expect("utf-8 frame"),
            other => panic!("Unexpected message: {:?}", other),
        }
    }

    /// Assert the client writes nothing more for a while
    pub async fn expect_silence(&mut self, window: Duration) {
        if let Ok(Some(message)) = timeout(window, self.inbound.recv()).await {
            panic!("Unexpected client frame: {:?}", message);
        }
    }

    /// Text of every frame the client writes before it drops this connection
    pub async fn drain_until_closed(&mut self) -> Vec<String> {
        let mut frames = Vec::new();
        loop {
            match timeout(STEP, self.inbound.recv()).await {
                Ok(Some(Message::Text(text))) => frames.push(text),
                Ok(Some(Message::Binary(bytes))) => {
                    frames.push(String::from_utf8(bytes).expect("utf-8 frame"));
                }
                Ok(Some(_)) => {}
                Ok(None) => return frames,
                Err(_) => panic!("connection was not closed"),
            }
        }
    }

    /// Wait until the client drops this connection
    pub async fn closed(&mut self) {
        loop {
            match timeout(STEP, self.inbound.recv()).await {
                Ok(Some(_)) => {}
                Ok(None) => return,
                Err(_) => panic!("connection was not closed"),
            }
        }
    }
}

/// Hands every new client connection to the test
pub struct MockFactory {
    conns: mpsc::UnboundedSender<ServerConn>,
    refuse: AtomicUsize,
    attempts: AtomicUsize,
}

impl MockFactory {
    pub fn new() -> (Arc<Self>, Server) {
        let (tx, rx) = mpsc::unbounded_channel();
        let factory = Arc::new(Self {
            conns: tx,
            refuse: AtomicUsize::new(0),
            attempts: AtomicUsize::new(0),
        });
        (factory, Server { conns: rx })
    }

    /// Fail the next `n` connect attempts
    pub fn refuse_next(&self, n: usize) {
        self.refuse.store(n, Ordering::SeqCst);
    }

    pub fn attempts(&self) -> usize {
        self.attempts.load(Ordering::SeqCst)
    }
}

pub struct Server {
    conns: mpsc::UnboundedReceiver<ServerConn>,
}

impl Server {
    pub async fn accept(&mut self) -> ServerConn {
        timeout(STEP, self.conns.recv())
            .await
            .expect("timed out waiting for a connection")
            .expect("factory dropped")
    }
}

struct MockTransport {
    factory: Arc<MockFactory>,
    to_server: Option<mpsc::UnboundedSender<Message>>,
    from_server: Option<mpsc::UnboundedReceiver<Message>>,
}

#[async_trait]
impl Transport for MockTransport {
    async fn connect(&mut self) -> Result<(), ChannelError> {
        self.factory.attempts.fetch_add(1, Ordering::SeqCst);
        let refused = self
            .factory
            .refuse
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if refused {
            return Err(ChannelError::NetworkError("connection refused".to_string()));
        }

        let (client_tx, server_rx) = mpsc::unbounded_channel();
        let (server_tx, client_rx) = mpsc::unbounded_channel();
        self.factory
            .conns
            .send(ServerConn {
                inbound: server_rx,
                outbound: server_tx,
            })
            .map_err(|_| ChannelError::NetworkError("server gone".to_string()))?;

        self.to_server = Some(client_tx);
        self.from_server = Some(client_rx);
        Ok(())
    }

    async fn send_raw(&mut self, msg: Message) -> Result<(), ChannelError> {
        let tx = self
            .to_server
            .as_ref()
            .ok_or_else(|| ChannelError::NetworkError("not connected".to_string()))?;
        tx.send(msg)
            .map_err(|_| ChannelError::NetworkError("server closed".to_string()))
    }

    async fn next_raw(&mut self) -> Option<Result<Message, ChannelError>> {
        let rx = self.from_server.as_mut()?;
        match rx.recv().await {
            Some(message) => Some(Ok(message)),
            None => {
                self.to_server = None;
                self.from_server = None;
                None
            }
        }
    }

    async fn close(&mut self) -> Result<(), ChannelError> {
        self.to_server = None;
        self.from_server = None;
        Ok(())
    }
}

/// Factory handle usable as `Arc<dyn TransportFactory>` while the test keeps its own
pub struct SharedFactory(pub Arc<MockFactory>);

impl TransportFactory for SharedFactory {
    fn create(&self, _endpoint: &Endpoint) -> Box<dyn Transport> {
        Box::new(MockTransport {
            factory: Arc::clone(&self.0),
            to_server: None,
            from_server: None,
        })
    }
}

/// Factory plus server side, ready to plug into a session or registry
pub fn mock() -> (Arc<MockFactory>, Arc<dyn TransportFactory>, Server) {
    let (factory, server) = MockFactory::new();
    let shared: Arc<dyn TransportFactory> = Arc::new(SharedFactory(Arc::clone(&factory)));
    (factory, shared, server)
}
