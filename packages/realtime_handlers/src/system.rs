use std::sync::atomic::{AtomicU64, Ordering};

use realtime_link::{InboundFrame, MessageHandler, envelope::PONG_SENTINEL};
use tracing::trace;

/// Observes heartbeat replies. Liveness itself is tracked by the manager;
/// this only counts the bare `"pong"` sentinel for diagnostics.
#[derive(Debug, Default)]
pub struct SystemHandler {
    pongs: AtomicU64,
}

impl SystemHandler {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn pong_count(&self) -> u64 {
        self.pongs.load(Ordering::Relaxed)
    }
}

impl MessageHandler for SystemHandler {
    fn handle(&self, frame: &InboundFrame) -> anyhow::Result<()> {
        if frame.raw() == PONG_SENTINEL {
            let total = self.pongs.fetch_add(1, Ordering::Relaxed) + 1;
            trace!(total, "heartbeat reply");
        }
        Ok(())
    }

    fn name(&self) -> &str {
        "system"
    }
}
