use crate::core::types::FrameEncoding;
use serde::{Deserialize, Serialize};
use std::env;
use std::time::Duration;

/// Session configuration shared by every channel a registry creates
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ChannelConfig {
    /// Default request timeout; zero disables request timeouts
    #[serde(with = "millis")]
    pub request_timeout: Duration,
    /// Fixed delay between a close and the next connect attempt
    #[serde(with = "millis")]
    pub reconnect_delay: Duration,
    /// Upper bound on a single connect handshake
    #[serde(with = "millis")]
    pub connect_timeout: Duration,
    pub encoding: FrameEncoding,
    /// Ask the server to answer in the delimited line format (`ws-client` handshake header)
    pub compact_replies: bool,
}

impl Default for ChannelConfig {
    fn default() -> Self {
        Self {
            request_timeout: Duration::from_millis(30_000), // 30 seconds
            reconnect_delay: Duration::from_millis(300),
            connect_timeout: Duration::from_millis(10_000), // 10 seconds
            encoding: FrameEncoding::Binary,
            compact_replies: false,
        }
    }
}

impl ChannelConfig {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Development preset: frames go out as readable text
    #[must_use]
    pub fn debug() -> Self {
        Self {
            encoding: FrameEncoding::Text,
            ..Self::default()
        }
    }

    #[must_use]
    pub const fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    /// Set the reconnect delay. Reconnection never gives up and never backs off,
    /// this delay is the whole policy.
    #[must_use]
    pub const fn with_reconnect_delay(mut self, delay: Duration) -> Self {
        self.reconnect_delay = delay;
        self
    }

    #[must_use]
    pub const fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    #[must_use]
    pub const fn with_encoding(mut self, encoding: FrameEncoding) -> Self {
        self.encoding = encoding;
        self
    }

    #[must_use]
    pub const fn with_compact_replies(mut self, compact: bool) -> Self {
        self.compact_replies = compact;
        self
    }

    /// Create configuration from environment variables
    ///
    /// Recognised variables (all optional):
    /// - `{PREFIX}_REQUEST_TIMEOUT_MS`
    /// - `{PREFIX}_RECONNECT_DELAY_MS`
    /// - `{PREFIX}_CONNECT_TIMEOUT_MS`
    /// - `{PREFIX}_DEBUG` (`true` selects text encoding)
    /// - `{PREFIX}_COMPACT_REPLIES`
    pub fn from_env(prefix: &str) -> Result<Self, ConfigError> {
        let prefix = prefix.to_uppercase();
        let mut config = Self::default();

        if let Some(ms) = read_var::<u64>(&format!("{}_REQUEST_TIMEOUT_MS", prefix))? {
            config.request_timeout = Duration::from_millis(ms);
        }
        if let Some(ms) = read_var::<u64>(&format!("{}_RECONNECT_DELAY_MS", prefix))? {
            config.reconnect_delay = Duration::from_millis(ms);
        }
        if let Some(ms) = read_var::<u64>(&format!("{}_CONNECT_TIMEOUT_MS", prefix))? {
            config.connect_timeout = Duration::from_millis(ms);
        }
        if let Some(debug) = read_var::<bool>(&format!("{}_DEBUG", prefix))? {
            config.encoding = if debug {
                FrameEncoding::Text
            } else {
                FrameEncoding::Binary
            };
        }
        if let Some(compact) = read_var::<bool>(&format!("{}_COMPACT_REPLIES", prefix))? {
            config.compact_replies = compact;
        }

        Ok(config)
    }

    /// Load `.env` (if present) and then read the environment
    ///
    /// **Security Warning**: Never commit .env files to version control!
    #[cfg(feature = "env-file")]
    pub fn from_env_file(prefix: &str) -> Result<Self, ConfigError> {
        Self::from_env_file_with_path(prefix, ".env")
    }

    #[cfg(feature = "env-file")]
    pub fn from_env_file_with_path(prefix: &str, env_file_path: &str) -> Result<Self, ConfigError> {
        match dotenv::from_path(env_file_path) {
            Ok(()) => {}
            Err(dotenv::Error::Io(io_err)) if io_err.kind() == std::io::ErrorKind::NotFound => {
                // no .env file, plain environment only
            }
            Err(e) => {
                return Err(ConfigError::InvalidConfiguration(format!(
                    "Failed to load .env file '{}': {}",
                    env_file_path, e
                )));
            }
        }

        Self::from_env(prefix)
    }
}

fn read_var<T: std::str::FromStr>(name: &str) -> Result<Option<T>, ConfigError> {
    match env::var(name) {
        Ok(raw) => raw.trim().parse::<T>().map(Some).map_err(|_| {
            ConfigError::InvalidConfiguration(format!("{} has invalid value '{}'", name, raw))
        }),
        Err(_) => Ok(None),
    }
}

mod millis {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(value.as_millis() as u64)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        u64::deserialize(deserializer).map(Duration::from_millis)
    }
}

#[derive(Debug, Clone, thiserror::Error)]
pub enum ConfigError {
    #[error("Invalid configuration: {0}")]
    InvalidConfiguration(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = ChannelConfig::default();
        assert_eq!(config.request_timeout, Duration::from_secs(30));
        assert_eq!(config.reconnect_delay, Duration::from_millis(300));
        assert_eq!(config.encoding, FrameEncoding::Binary);
        assert!(!config.compact_replies);
    }

    #[test]
    fn test_debug_preset_uses_text() {
        assert_eq!(ChannelConfig::debug().encoding, FrameEncoding::Text);
    }

    #[test]
    fn test_from_env() {
        env::set_var("WSLINE_CFG_TEST_REQUEST_TIMEOUT_MS", "1500");
        env::set_var("WSLINE_CFG_TEST_DEBUG", "true");
        let config = ChannelConfig::from_env("wsline_cfg_test").unwrap();
        assert_eq!(config.request_timeout, Duration::from_millis(1500));
        assert_eq!(config.encoding, FrameEncoding::Text);
        assert_eq!(config.reconnect_delay, Duration::from_millis(300));
    }

    #[test]
    fn test_from_env_rejects_garbage() {
        env::set_var("WSLINE_CFG_BAD_RECONNECT_DELAY_MS", "soon");
        let result = ChannelConfig::from_env("wsline_cfg_bad");
        assert!(matches!(result, Err(ConfigError::InvalidConfiguration(_))));
    }

    #[test]
    fn test_serde_uses_milliseconds() {
        let config = ChannelConfig::default().with_reconnect_delay(Duration::from_millis(50));
        let json = serde_json::to_value(&config).unwrap();
        assert_eq!(json["reconnect_delay"], 50);

        let back: ChannelConfig = serde_json::from_value(json).unwrap();
        assert_eq!(back, config);
    }
}
