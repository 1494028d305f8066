use realtime_link::{InboundFrame, MessageHandler, message_type};
use tokio::sync::broadcast;
use tracing::debug;

use crate::payloads::{DataUpdatePayload, decode_payload};

/// Republishes entity change notifications so open views can refresh.
pub struct DataUpdateHandler {
    tx: broadcast::Sender<DataUpdatePayload>,
}

impl DataUpdateHandler {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity.max(1));
        Self { tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<DataUpdatePayload> {
        self.tx.subscribe()
    }
}

impl MessageHandler for DataUpdateHandler {
    fn handle(&self, frame: &InboundFrame) -> anyhow::Result<()> {
        if let Some(update) = decode_payload::<DataUpdatePayload>(frame, message_type::DATA_UPDATE)? {
            debug!(entity = %update.entity, action = ?update.action, "data update");
            let _ = self.tx.send(update);
        }
        Ok(())
    }

    fn name(&self) -> &str {
        "data_update"
    }
}
