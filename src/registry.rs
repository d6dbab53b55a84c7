use crate::core::config::ChannelConfig;
use crate::core::errors::ChannelError;
use crate::core::kernel::ws::{TransportFactory, TungsteniteFactory, WsConfig};
use crate::core::types::Endpoint;
use crate::session::{saturating_millis, Session};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::info;

/// Owns at most one [`Session`] per endpoint.
///
/// Sessions are created lazily on first lookup and live as long as the registry.
pub struct ChannelRegistry {
    config: ChannelConfig,
    factory: Arc<dyn TransportFactory>,
    channels: Mutex<HashMap<Endpoint, Session>>,
}

impl ChannelRegistry {
    /// Registry whose sessions connect over real WebSockets
    pub fn new(config: ChannelConfig) -> Self {
        let factory = TungsteniteFactory::new(WsConfig {
            connect_timeout_ms: saturating_millis(config.connect_timeout),
            announce_client: config.compact_replies,
        });
        Self::with_factory(config, Arc::new(factory))
    }

    /// Registry with a custom transport
    pub fn with_factory(config: ChannelConfig, factory: Arc<dyn TransportFactory>) -> Self {
        Self {
            config,
            factory,
            channels: Mutex::new(HashMap::new()),
        }
    }

    pub fn config(&self) -> &ChannelConfig {
        &self.config
    }

    /// Session for a `ws://` / `wss://` URL, created on first use
    pub fn get_channel(&self, url: &str) -> Result<Session, ChannelError> {
        self.get_endpoint(Endpoint::parse(url)?)
    }

    pub fn get_endpoint(&self, endpoint: Endpoint) -> Result<Session, ChannelError> {
        let mut channels = self.channels.lock();
        if let Some(session) = channels.get(&endpoint) {
            return Ok(session.clone());
        }

        info!(endpoint = %endpoint, "Creating session");
        let session = Session::new(endpoint.clone(), &self.config, Arc::clone(&self.factory))?;
        channels.insert(endpoint, session.clone());
        Ok(session)
    }

    pub fn contains(&self, endpoint: &Endpoint) -> bool {
        self.channels.lock().contains_key(endpoint)
    }

    pub fn len(&self) -> usize {
        self.channels.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.channels.lock().is_empty()
    }

    /// Close every session; the registry keeps no entries afterwards
    pub fn close_all(&self) {
        let channels: Vec<Session> = self.channels.lock().drain().map(|(_, s)| s).collect();
        for session in channels {
            session.close();
        }
    }
}

impl Default for ChannelRegistry {
    fn default() -> Self {
        Self::new(ChannelConfig::default())
    }
}
