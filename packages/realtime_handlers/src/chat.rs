use realtime_link::{InboundFrame, MessageHandler, message_type};
use tokio::sync::broadcast;
use tracing::debug;

use crate::payloads::{ChatPayload, decode_payload};

/// Republishes chat messages to interested views.
pub struct ChatHandler {
    tx: broadcast::Sender<ChatPayload>,
}

impl ChatHandler {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity.max(1));
        Self { tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ChatPayload> {
        self.tx.subscribe()
    }
}

impl MessageHandler for ChatHandler {
    fn handle(&self, frame: &InboundFrame) -> anyhow::Result<()> {
        if let Some(chat) = decode_payload::<ChatPayload>(frame, message_type::CHAT)? {
            debug!(from = ?chat.from_user_id, message_id = ?chat.message_id, "chat message");
            // No subscribers is fine
            let _ = self.tx.send(chat);
        }
        Ok(())
    }

    fn name(&self) -> &str {
        "chat"
    }
}
