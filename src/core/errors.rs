use thiserror::Error;

#[derive(Error, Debug, Clone)]
pub enum ChannelError {
    #[error("JSON error: {0}")]
    Json(String),

    #[error("Decode error: {0}")]
    Decode(String),

    #[error("\"{command}\" request timeout")]
    RequestTimeout { command: String },

    #[error("Network error: {0}")]
    NetworkError(String),

    #[error("Connection timeout: {0}")]
    ConnectionTimeout(String),

    #[error("Invalid endpoint: {0}")]
    InvalidEndpoint(String),

    #[error("No async runtime: {0}")]
    Runtime(String),

    #[error("Channel is closed")]
    Closed,

    #[error("Configuration error: {0}")]
    ConfigError(#[from] crate::core::config::ConfigError),
}

// Errors travel through cloned bus events, so the serde error is flattened to its message.
impl From<serde_json::Error> for ChannelError {
    fn from(err: serde_json::Error) -> Self {
        Self::Json(err.to_string())
    }
}

impl ChannelError {
    /// True for the error a request receives when no answer arrived in time
    pub fn is_timeout(&self) -> bool {
        matches!(self, Self::RequestTimeout { .. })
    }
}
