use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::ids::SessionId;

/// Message type codes carried in `msg_type`.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum MessageType {
    /// Client publishes a message into the pipeline.
    Publish,
    /// Server delivers a pipeline reply to the client.
    Deliver,
}

impl MessageType {
    pub fn code(self) -> u64 {
        match self {
            Self::Publish => 1,
            Self::Deliver => 2,
        }
    }

    pub fn from_code(code: u64) -> Option<Self> {
        match code {
            1 => Some(Self::Publish),
            2 => Some(Self::Deliver),
            _ => None,
        }
    }
}

/// Outcome block of every response.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Status {
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cause: Option<String>,
}

/// Response envelope shared by HTTP responses and WebSocket frames:
/// `{status: {success, cause?}, payload?}`.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ApiResponse<T = Value> {
    pub status: Status,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub payload: Option<T>,
}

impl<T> ApiResponse<T> {
    pub fn success(payload: T) -> Self {
        Self {
            status: Status {
                success: true,
                cause: None,
            },
            payload: Some(payload),
        }
    }

    pub fn failure(cause: impl Into<String>) -> Self {
        Self {
            status: Status {
                success: false,
                cause: Some(cause.into()),
            },
            payload: None,
        }
    }

    pub fn is_success(&self) -> bool {
        self.status.success
    }
}

/// Payload of a server-to-client frame.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct FramePayload {
    pub msg_type: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub msg: Option<Value>,
}

/// Outbound frame sent over a WebSocket.
pub type OutboundFrame = ApiResponse<FramePayload>;

impl OutboundFrame {
    /// Acknowledges a client publish: `{msg_type: 1}`.
    pub fn publish_ack() -> Self {
        Self::success(FramePayload {
            msg_type: MessageType::Publish.code(),
            msg: None,
        })
    }

    /// Delivers a reply: `{msg_type: 2, msg}`.
    pub fn deliver(msg: Value) -> Self {
        Self::success(FramePayload {
            msg_type: MessageType::Deliver.code(),
            msg: Some(msg),
        })
    }

    pub fn to_text(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
}

#[derive(Debug, thiserror::Error)]
pub enum FrameError {
    #[error("invalid JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("missing field: {0}")]
    MissingField(&'static str),

    #[error("invalid field: {0}")]
    InvalidField(&'static str),
}

/// Inbound client frame: `{id, msg_type, msg}`.
///
/// Only `id` is validated up front so the session can be resolved before the
/// rest of the frame is inspected.
#[derive(Clone, Debug)]
pub struct InboundFrame {
    pub session_id: SessionId,
    raw: serde_json::Map<String, Value>,
}

impl InboundFrame {
    pub fn parse(text: &str) -> Result<Self, FrameError> {
        let value: Value = serde_json::from_str(text)?;
        let Value::Object(raw) = value else {
            return Err(FrameError::InvalidField("frame"));
        };
        let session_id = match raw.get("id") {
            None | Some(Value::Null) => return Err(FrameError::MissingField("id")),
            Some(Value::String(id)) => SessionId::from_raw(id.clone()),
            Some(_) => return Err(FrameError::InvalidField("id")),
        };
        Ok(Self { session_id, raw })
    }

    /// `Ok(None)` for well-formed but unknown message types.
    pub fn message_type(&self) -> Result<Option<MessageType>, FrameError> {
        match self.raw.get("msg_type") {
            None | Some(Value::Null) => Err(FrameError::MissingField("msg_type")),
            Some(v) => v
                .as_u64()
                .map(MessageType::from_code)
                .ok_or(FrameError::InvalidField("msg_type")),
        }
    }

    pub fn take_body(&mut self) -> Result<Value, FrameError> {
        self.raw.remove("msg").ok_or(FrameError::MissingField("msg"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn success_envelope_shape() {
        let resp = ApiResponse::success("pong");
        assert_eq!(
            serde_json::to_value(&resp).unwrap(),
            json!({"status": {"success": true}, "payload": "pong"})
        );
    }

    #[test]
    fn failure_envelope_has_no_payload() {
        let resp: ApiResponse = ApiResponse::failure("ko");
        assert_eq!(
            serde_json::to_value(&resp).unwrap(),
            json!({"status": {"success": false, "cause": "ko"}})
        );
    }

    #[test]
    fn publish_ack_shape() {
        let text = OutboundFrame::publish_ack().to_text().unwrap();
        let value: Value = serde_json::from_str(&text).unwrap();
        assert_eq!(value, json!({"status": {"success": true}, "payload": {"msg_type": 1}}));
    }

    #[test]
    fn deliver_shape() {
        let value = serde_json::to_value(OutboundFrame::deliver(json!("hi"))).unwrap();
        assert_eq!(
            value,
            json!({"status": {"success": true}, "payload": {"msg_type": 2, "msg": "hi"}})
        );
    }

    #[test]
    fn parse_publish_frame() {
        let mut frame = InboundFrame::parse(r#"{"id":"s1","msg_type":1,"msg":"hi"}"#).unwrap();
        assert_eq!(frame.session_id.as_str(), "s1");
        assert_eq!(frame.message_type().unwrap(), Some(MessageType::Publish));
        assert_eq!(frame.take_body().unwrap(), json!("hi"));
    }

    #[test]
    fn parse_requires_id() {
        assert!(matches!(
            InboundFrame::parse(r#"{"msg_type":1}"#),
            Err(FrameError::MissingField("id"))
        ));
        assert!(matches!(
            InboundFrame::parse(r#"{"id":7}"#),
            Err(FrameError::InvalidField("id"))
        ));
        assert!(matches!(InboundFrame::parse("[1,2]"), Err(FrameError::InvalidField(_))));
        assert!(matches!(InboundFrame::parse("{oops"), Err(FrameError::Json(_))));
    }

    #[test]
    fn unknown_message_type_is_not_an_error() {
        let frame = InboundFrame::parse(r#"{"id":"s1","msg_type":9}"#).unwrap();
        assert_eq!(frame.message_type().unwrap(), None);
    }

    #[test]
    fn missing_message_type_is_an_error() {
        let frame = InboundFrame::parse(r#"{"id":"s1"}"#).unwrap();
        assert!(matches!(frame.message_type(), Err(FrameError::MissingField("msg_type"))));
        let frame = InboundFrame::parse(r#"{"id":"s1","msg_type":"one"}"#).unwrap();
        assert!(matches!(frame.message_type(), Err(FrameError::InvalidField("msg_type"))));
    }

    #[test]
    fn missing_body_is_an_error() {
        let mut frame = InboundFrame::parse(r#"{"id":"s1","msg_type":1}"#).unwrap();
        assert!(matches!(frame.take_body(), Err(FrameError::MissingField("msg"))));
    }

    #[test]
    fn message_type_codes() {
        assert_eq!(MessageType::from_code(1), Some(MessageType::Publish));
        assert_eq!(MessageType::from_code(2), Some(MessageType::Deliver));
        assert_eq!(MessageType::from_code(0), None);
        assert_eq!(MessageType::Deliver.code(), 2);
    }
}
