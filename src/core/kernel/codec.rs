use crate::core::errors::ChannelError;
use crate::core::types::{FrameEncoding, InboundFrame, RequestId};
use serde_json::Value;
use tokio_tungstenite::tungstenite::Message;

/// Separates request ID, command and payload on the wire
pub const FRAME_DELIMITER: char = ':';

/// Stands in for the delimiter inside command names
pub const COMMAND_DELIMITER_REPLACEMENT: char = '_';

/// Codec trait for converting frames to and from WebSocket messages
///
/// Implementations are pure and stateless: the same input always produces the same
/// output, so a single codec instance is shared by a session for its whole lifetime.
pub trait FrameCodec: Send + Sync + 'static {
    /// Encode an outbound `(requestID, command, payload)` triple
    fn encode(
        &self,
        request_id: RequestId,
        command: &str,
        payload: &Value,
    ) -> Result<Message, ChannelError>;

    /// Decode a raw WebSocket message
    ///
    /// # Returns
    /// - `Ok(Some(frame))` - a frame carrying a command
    /// - `Ok(None)` - control message, or a frame with no command (ignored)
    /// - `Err(error)` - malformed payload
    fn decode(&self, message: Message) -> Result<Option<InboundFrame>, ChannelError>;
}

/// Replace the frame delimiter inside a command name
pub fn sanitize_command(command: &str) -> String {
    command.replace(FRAME_DELIMITER, &COMMAND_DELIMITER_REPLACEMENT.to_string())
}

/// `requestID:command:json` line codec.
///
/// Outbound frames always use the delimited line. Inbound frames may be either a JSON
/// object (`{"command", "requestID", "srvRequestID", "data"}`) or the same delimited line,
/// which is what the server sends to clients that announced themselves with `ws-client`.
#[derive(Debug, Clone, Copy, Default)]
pub struct LineCodec {
    encoding: FrameEncoding,
}

impl LineCodec {
    pub fn new(encoding: FrameEncoding) -> Self {
        Self { encoding }
    }

    pub fn encoding(&self) -> FrameEncoding {
        self.encoding
    }

    fn decode_text(text: &str) -> Result<Option<InboundFrame>, ChannelError> {
        if text.trim_start().starts_with('{') {
            return Self::decode_object(text);
        }
        Self::decode_line(text)
    }

    fn decode_object(text: &str) -> Result<Option<InboundFrame>, ChannelError> {
        let value: Value = serde_json::from_str(text)
            .map_err(|e| ChannelError::Decode(format!("Failed to parse JSON: {}", e)))?;

        match value.get("command").and_then(Value::as_str) {
            Some(command) if !command.is_empty() => {}
            _ => return Ok(None),
        }

        serde_json::from_value(value)
            .map(Some)
            .map_err(|e| ChannelError::Decode(format!("Malformed frame: {}", e)))
    }

    fn decode_line(text: &str) -> Result<Option<InboundFrame>, ChannelError> {
        let mut parts = text.splitn(3, FRAME_DELIMITER);
        let (Some(id), Some(command), Some(payload)) = (parts.next(), parts.next(), parts.next())
        else {
            return Err(ChannelError::Decode(
                "Frame is neither a JSON object nor a delimited line".to_string(),
            ));
        };

        let id: RequestId = id
            .trim()
            .parse()
            .map_err(|_| ChannelError::Decode(format!("Invalid request ID '{}'", id)))?;
        if command.is_empty() {
            return Ok(None);
        }
        let data: Value = serde_json::from_str(payload)
            .map_err(|e| ChannelError::Decode(format!("Failed to parse payload: {}", e)))?;

        // negative IDs are the server's own requests awaiting our answer
        let (request_id, srv_request_id) = if id < 0 { (0, id) } else { (id, 0) };

        Ok(Some(InboundFrame {
            request_id,
            command: command.to_string(),
            data,
            srv_request_id,
        }))
    }
}

impl FrameCodec for LineCodec {
    fn encode(
        &self,
        request_id: RequestId,
        command: &str,
        payload: &Value,
    ) -> Result<Message, ChannelError> {
        let line = format!(
            "{}{}{}{}{}",
            request_id,
            FRAME_DELIMITER,
            sanitize_command(command),
            FRAME_DELIMITER,
            serde_json::to_string(payload)?
        );

        Ok(match self.encoding {
            FrameEncoding::Text => Message::Text(line),
            FrameEncoding::Binary => Message::Binary(line.into_bytes()),
        })
    }

    fn decode(&self, message: Message) -> Result<Option<InboundFrame>, ChannelError> {
        match message {
            Message::Text(text) => Self::decode_text(&text),
            Message::Binary(data) => {
                let text = String::from_utf8(data).map_err(|e| {
                    ChannelError::Decode(format!("Invalid UTF-8 in binary message: {}", e))
                })?;
                Self::decode_text(&text)
            }
            _ => Ok(None), // control frames belong to the transport
        }
    }
}
