use crate::core::errors::ChannelError;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use tokio_tungstenite::tungstenite::http::Uri;

/// Wire request identifier.
///
/// Client-assigned IDs are positive and strictly increasing per session. Zero marks
/// both one-way sends and server pushes. Negative IDs are issued by the server for
/// its own requests and only appear as `srvRequestID` on inbound pushes.
pub type RequestId = i64;

/// How outbound frames are packed into WebSocket messages
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FrameEncoding {
    /// Delimiter-joined text frame, readable in browser devtools and proxies
    Text,
    /// Same bytes as `Text`, sent as a binary message
    #[default]
    Binary,
}

/// Connection target; identity key of the channel registry
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Endpoint {
    secure: bool,
    host: String,
    path: String,
}

impl Endpoint {
    pub fn new(host: impl Into<String>, path: impl Into<String>) -> Self {
        let path = path.into();
        Self {
            secure: false,
            host: host.into(),
            path: if path.starts_with('/') {
                path
            } else {
                format!("/{}", path)
            },
        }
    }

    /// Use `wss://` instead of `ws://`
    #[must_use]
    pub fn secure(mut self, secure: bool) -> Self {
        self.secure = secure;
        self
    }

    /// Parse a `ws://` or `wss://` URL
    pub fn parse(url: &str) -> Result<Self, ChannelError> {
        let uri: Uri = url
            .parse()
            .map_err(|e| ChannelError::InvalidEndpoint(format!("{}: {}", url, e)))?;

        let secure = match uri.scheme_str() {
            Some("ws") => false,
            Some("wss") => true,
            other => {
                return Err(ChannelError::InvalidEndpoint(format!(
                    "{}: unsupported scheme {:?}",
                    url, other
                )))
            }
        };
        let host = uri
            .authority()
            .map(|a| a.as_str().to_string())
            .filter(|a| !a.is_empty())
            .ok_or_else(|| ChannelError::InvalidEndpoint(format!("{}: missing host", url)))?;
        let path = uri
            .path_and_query()
            .map_or_else(|| "/".to_string(), |p| p.as_str().to_string());

        Ok(Self::new(host, path).secure(secure))
    }

    pub fn is_secure(&self) -> bool {
        self.secure
    }

    pub fn host(&self) -> &str {
        &self.host
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    pub fn url(&self) -> String {
        self.to_string()
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let scheme = if self.secure { "wss" } else { "ws" };
        write!(f, "{}://{}{}", scheme, self.host, self.path)
    }
}

/// Decoded inbound frame
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InboundFrame {
    #[serde(rename = "requestID", default)]
    pub request_id: RequestId,
    pub command: String,
    #[serde(default)]
    pub data: Value,
    /// Set when the server expects an answer to this push
    #[serde(rename = "srvRequestID", default)]
    pub srv_request_id: RequestId,
}

impl InboundFrame {
    /// Answer to one of our own requests
    pub fn is_response(&self) -> bool {
        self.request_id > 0
    }
}
