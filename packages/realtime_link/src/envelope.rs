//! Wire format: the JSON envelope exchanged over the link, the ping frame
//! the client sends, and the decoded view of an inbound frame.

use chrono::{SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};

/// Literal text frame some servers send instead of a structured pong.
pub const PONG_SENTINEL: &str = "pong";

/// Message type tags carried in the envelope's `type` field.
pub mod message_type {
    pub const PING: &str = "ping";
    pub const PONG: &str = "pong";
    pub const ERROR: &str = "error";
    pub const AUTH: &str = "auth";

    pub const NOTICE: &str = "notification";
    pub const CHAT: &str = "chat";
    pub const DATA_UPDATE: &str = "data";
    pub const CUSTOMER_SERVICE: &str = "cs";
}

/// The structured message carried by every JSON frame.
///
/// Every field has a default so partially-formed frames still decode; the
/// dispatcher never rejects a frame for missing fields.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Envelope {
    #[serde(default)]
    pub code: i64,
    #[serde(default)]
    pub msg: Option<String>,
    #[serde(rename = "type", default)]
    pub message_type: String,
    #[serde(default)]
    pub payload: Value,
    #[serde(default)]
    pub exclude_client_ids: Option<Vec<String>>,
}

impl Envelope {
    pub fn is_success(&self) -> bool {
        self.code == 0
    }
}

/// A frame received from the socket, parsed once and shared by every handler.
#[derive(Debug, Clone, PartialEq)]
pub struct InboundFrame {
    raw: String,
    binary: Option<Vec<u8>>,
    parsed: Option<Value>,
}

impl InboundFrame {
    /// A text frame. JSON parse failures are tolerated: `parsed` stays `None`
    /// and the raw text is still delivered.
    pub fn text(raw: impl Into<String>) -> Self {
        let raw = raw.into();
        let parsed = serde_json::from_str::<Value>(&raw).ok();
        Self {
            raw,
            binary: None,
            parsed,
        }
    }

    pub fn binary(bytes: Vec<u8>) -> Self {
        Self {
            raw: String::new(),
            binary: Some(bytes),
            parsed: None,
        }
    }

    pub fn raw(&self) -> &str {
        &self.raw
    }

    pub fn bytes(&self) -> Option<&[u8]> {
        self.binary.as_deref()
    }

    pub fn is_text(&self) -> bool {
        self.binary.is_none()
    }

    pub fn parsed(&self) -> Option<&Value> {
        self.parsed.as_ref()
    }

    /// The parsed value as an envelope, if it is a JSON object.
    pub fn envelope(&self) -> Option<Envelope> {
        match &self.parsed {
            Some(value @ Value::Object(_)) => serde_json::from_value(value.clone()).ok(),
            _ => None,
        }
    }

    pub fn message_type(&self) -> Option<&str> {
        self.parsed.as_ref()?.get("type")?.as_str()
    }

    /// Either the bare sentinel or a structured `{"type":"pong"}` frame.
    pub fn is_pong(&self) -> bool {
        self.raw == PONG_SENTINEL || self.message_type() == Some(message_type::PONG)
    }
}

/// Payload accepted by `send_message`: text goes out verbatim, anything
/// else is serialized to JSON first.
#[derive(Debug, Clone, PartialEq)]
pub enum OutgoingMessage {
    Text(String),
    Json(Value),
}

impl OutgoingMessage {
    pub fn into_text(self) -> Result<String, serde_json::Error> {
        match self {
            OutgoingMessage::Text(text) => Ok(text),
            OutgoingMessage::Json(value) => serde_json::to_string(&value),
        }
    }
}

impl From<String> for OutgoingMessage {
    fn from(text: String) -> Self {
        OutgoingMessage::Text(text)
    }
}

impl From<&str> for OutgoingMessage {
    fn from(text: &str) -> Self {
        OutgoingMessage::Text(text.to_string())
    }
}

impl From<Value> for OutgoingMessage {
    fn from(value: Value) -> Self {
        OutgoingMessage::Json(value)
    }
}

/// `{"type":"ping","payload":{"client_timestamp":"…"}}` stamped with the
/// current time in millisecond-precision RFC 3339.
pub fn ping_frame() -> Value {
    json!({
        "type": message_type::PING,
        "payload": {
            "client_timestamp": Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true),
        },
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_text_frame_parses_json() {
        let frame = InboundFrame::text(r#"{"code":0,"type":"chat","payload":{"message":"hi"}}"#);
        assert!(frame.parsed().is_some());
        assert_eq!(frame.message_type(), Some("chat"));

        let envelope = frame.envelope().unwrap();
        assert!(envelope.is_success());
        assert_eq!(envelope.payload["message"], "hi");
        assert!(envelope.msg.is_none());
        assert!(envelope.exclude_client_ids.is_none());
    }

    #[test]
    fn test_non_json_frame_keeps_raw_text() {
        let frame = InboundFrame::text("pong");
        assert!(frame.parsed().is_none());
        assert!(frame.envelope().is_none());
        assert_eq!(frame.raw(), "pong");
        assert!(frame.is_pong());
    }

    #[test]
    fn test_structured_pong() {
        let frame = InboundFrame::text(
            r#"{"type":"pong","payload":{"client_timestamp":"a","server_timestamp":"b"}}"#,
        );
        assert!(frame.is_pong());
        // No code field: decodes as a success.
        assert!(frame.envelope().unwrap().is_success());
    }

    #[test]
    fn test_json_scalar_is_not_an_envelope() {
        let frame = InboundFrame::text("42");
        assert!(frame.parsed().is_some());
        assert!(frame.envelope().is_none());
        assert!(frame.message_type().is_none());
    }

    #[test]
    fn test_binary_frame() {
        let frame = InboundFrame::binary(vec![1, 2, 3]);
        assert!(!frame.is_text());
        assert_eq!(frame.bytes(), Some(&[1u8, 2, 3][..]));
        assert!(!frame.is_pong());
    }

    #[test]
    fn test_ping_frame_shape() {
        let ping = ping_frame();
        assert_eq!(ping["type"], "ping");
        let ts = ping["payload"]["client_timestamp"].as_str().unwrap();
        assert!(chrono::DateTime::parse_from_rfc3339(ts).is_ok());
        assert!(ts.ends_with('Z'));
    }

    #[test]
    fn test_outgoing_text_is_verbatim() {
        let text = OutgoingMessage::from("hello").into_text().unwrap();
        assert_eq!(text, "hello");
        let json = OutgoingMessage::from(json!({"type": "chat"})).into_text().unwrap();
        assert_eq!(json, r#"{"type":"chat"}"#);
    }
}
