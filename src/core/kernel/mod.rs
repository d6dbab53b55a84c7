/// `wsline` Kernel - transport, framing and event plumbing
///
/// The kernel knows nothing about requests, subscriptions or readiness; those live in
/// [`crate::session`]. It provides three pieces:
///
/// ## Transport Layer
/// - `Transport`: one duplex WebSocket connection attempt
/// - `TransportFactory`: creates a fresh transport for every (re)connect
/// - `TungsteniteTransport` / `TungsteniteFactory`: tokio-tungstenite implementation
///
/// ## Framing
/// - `FrameCodec`: converts `(requestID, command, payload)` triples to and from messages
/// - `LineCodec`: the `requestID:command:json` line format, text or binary
///
/// ## Event Bus
/// - `EventBus`: string-keyed publish/subscribe with persistent and one-shot listeners
///
/// # Example
/// ```rust,no_run
/// use wsline::core::kernel::*;
/// use wsline::core::types::{Endpoint, FrameEncoding};
/// use serde_json::json;
///
/// # async fn example() -> Result<(), Box<dyn std::error::Error>> {
/// let codec = LineCodec::new(FrameEncoding::Text);
/// let mut transport = TungsteniteTransport::new(Endpoint::parse("ws://localhost:8080/ws")?);
///
/// transport.connect().await?;
/// transport.send_raw(codec.encode(0, "subscribe", &json!("news"))?).await?;
/// while let Some(Ok(message)) = transport.next_raw().await {
///     if let Some(frame) = codec.decode(message)? {
///         println!("{} -> {}", frame.command, frame.data);
///     }
/// }
/// # Ok(())
/// # }
/// ```
pub mod bus;
pub mod codec;
pub mod ws;

// Re-export key types for convenience
pub use bus::{EventBus, ListenerId};
pub use codec::{sanitize_command, FrameCodec, LineCodec};
pub use ws::{Transport, TransportFactory, TungsteniteFactory, TungsteniteTransport, WsConfig};
