//! Multiplexed request/response, push and subscription client over a single
//! reconnecting WebSocket connection.
//!
//! ```rust,no_run
//! use wsline::{ChannelConfig, ChannelRegistry};
//! use serde_json::json;
//!
//! # async fn example() -> Result<(), wsline::ChannelError> {
//! let registry = ChannelRegistry::new(ChannelConfig::default());
//! let chat = registry.get_channel("ws://localhost:8080/ws")?;
//!
//! chat.read("message", |data, _reply| println!("message: {}", data));
//! chat.subscribe("message")?;
//!
//! let history = chat.request_async("history", &json!({"limit": 20}), None).await?;
//! println!("{}", history);
//! # Ok(())
//! # }
//! ```

pub mod core;
pub mod registry;
pub mod session;

pub use crate::core::{
    config::ChannelConfig,
    errors::ChannelError,
    types::{Endpoint, FrameEncoding, InboundFrame, RequestId},
};
pub use registry::ChannelRegistry;
pub use session::{gate::ReadinessGate, Reply, Session};
