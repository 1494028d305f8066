use realtime_link::{InboundFrame, MessageHandler, message_type};
use serde_json::Value;
use tokio::sync::broadcast;
use tracing::trace;

use crate::payloads::{SERVER_MONITOR_ENTITY, SERVER_MONITOR_RESPONSE, payload_of};

/// Feeds the server monitor dashboard.
///
/// Samples arrive two ways: pushed as `data` frames whose entity is
/// `server_monitor` (the sample is `payload.data`), or as the reply to an
/// explicit query (the sample is the whole payload).
pub struct ServerMonitorHandler {
    tx: broadcast::Sender<Value>,
}

impl ServerMonitorHandler {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity.max(1));
        Self { tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<Value> {
        self.tx.subscribe()
    }

    fn sample(frame: &InboundFrame) -> Option<Value> {
        if let Some(payload) = payload_of(frame, message_type::DATA_UPDATE) {
            if payload.get("entity").and_then(Value::as_str) != Some(SERVER_MONITOR_ENTITY) {
                return None;
            }
            return payload.get("data").cloned();
        }
        payload_of(frame, SERVER_MONITOR_RESPONSE).cloned()
    }
}

impl MessageHandler for ServerMonitorHandler {
    fn handle(&self, frame: &InboundFrame) -> anyhow::Result<()> {
        if let Some(sample) = Self::sample(frame) {
            trace!("server monitor sample");
            let _ = self.tx.send(sample);
        }
        Ok(())
    }

    fn name(&self) -> &str {
        "server_monitor"
    }
}
