//! Typed payloads carried by the business message types.
//!
//! Unknown fields are kept in `extra` so newer servers do not break older
//! clients.

use anyhow::Context;
use realtime_link::InboundFrame;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Reply type of the on-demand server monitor query.
pub const SERVER_MONITOR_RESPONSE: &str = "get_server_monitor_data_response";
/// `payload.entity` of data updates that carry server monitor samples.
pub const SERVER_MONITOR_ENTITY: &str = "server_monitor";
/// `payload.event` of a freshly published notice.
pub const NEW_NOTICE_EVENT: &str = "new_notice";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NoticePayload {
    #[serde(default)]
    pub event: String,
    #[serde(default)]
    pub notice: Option<Notice>,
    #[serde(default)]
    pub sender_id: Option<String>,
    #[serde(default)]
    pub target_client_ids: Option<Vec<String>>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Notice {
    #[serde(default)]
    pub id: Option<i64>,
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub content: String,
    #[serde(default)]
    pub create_time: Option<String>,
    #[serde(default)]
    pub status: Option<i32>,
    #[serde(rename = "type", default)]
    pub notice_type: Option<i32>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatPayload {
    pub message: String,
    #[serde(default)]
    pub from_user_id: Option<i64>,
    #[serde(default)]
    pub to_user_id: Option<i64>,
    #[serde(default)]
    pub message_id: Option<String>,
    #[serde(default)]
    pub timestamp: Option<String>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DataAction {
    Create,
    Update,
    Delete,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DataUpdatePayload {
    pub entity: String,
    #[serde(default)]
    pub action: Option<DataAction>,
    #[serde(default)]
    pub data: Value,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CsParty {
    Customer,
    Service,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CustomerServicePayload {
    pub message: String,
    pub session_id: String,
    #[serde(default)]
    pub from_type: Option<CsParty>,
    #[serde(default)]
    pub timestamp: Option<String>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// The frame's object payload when its `type` equals `message_type`.
pub fn payload_of<'a>(frame: &'a InboundFrame, message_type: &str) -> Option<&'a Value> {
    if frame.message_type() != Some(message_type) {
        return None;
    }
    frame
        .parsed()?
        .get("payload")
        .filter(|payload| payload.is_object())
}

/// Decode the payload of a frame of the given type. `Ok(None)` for frames of
/// other types; `Err` when the type matches but the payload does not.
pub fn decode_payload<T: DeserializeOwned>(
    frame: &InboundFrame,
    message_type: &str,
) -> anyhow::Result<Option<T>> {
    let Some(payload) = payload_of(frame, message_type) else {
        return Ok(None);
    };
    let decoded = serde_json::from_value(payload.clone())
        .with_context(|| format!("malformed '{message_type}' payload"))?;
    Ok(Some(decoded))
}
