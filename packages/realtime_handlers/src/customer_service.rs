use realtime_link::{InboundFrame, MessageHandler, message_type};
use tokio::sync::broadcast;
use tracing::debug;

use crate::payloads::{CustomerServicePayload, decode_payload};

/// Republishes customer-service session traffic.
pub struct CustomerServiceHandler {
    tx: broadcast::Sender<CustomerServicePayload>,
}

impl CustomerServiceHandler {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity.max(1));
        Self { tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<CustomerServicePayload> {
        self.tx.subscribe()
    }
}

impl MessageHandler for CustomerServiceHandler {
    fn handle(&self, frame: &InboundFrame) -> anyhow::Result<()> {
        let Some(message) =
            decode_payload::<CustomerServicePayload>(frame, message_type::CUSTOMER_SERVICE)?
        else {
            return Ok(());
        };
        debug!(session_id = %message.session_id, from = ?message.from_type, "customer service message");
        let _ = self.tx.send(message);
        Ok(())
    }

    fn name(&self) -> &str {
        "customer_service"
    }
}
