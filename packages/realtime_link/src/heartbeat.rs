//! Liveness detection: a repeating ping tick plus a one-shot pong watcher.
//!
//! The monitor only owns the timers. Sending the ping and force-closing the
//! socket on a missed pong are done by the manager when the corresponding
//! events come back through its queue.

use std::time::Duration;

use tokio::sync::mpsc::WeakUnboundedSender;

use crate::manager::LinkEvent;
use crate::timer::TimerSlot;

pub(crate) struct HeartbeatMonitor {
    interval: Duration,
    pong_timeout: Duration,
    ticker: TimerSlot,
    pong_watch: TimerSlot,
}

impl HeartbeatMonitor {
    pub(crate) fn new(interval: Duration, pong_timeout: Duration) -> Self {
        Self {
            interval,
            pong_timeout,
            ticker: TimerSlot::new(),
            pong_watch: TimerSlot::new(),
        }
    }

    /// (Re)arm the repeating tick. Any previous tick is cancelled first.
    pub(crate) fn start(&mut self, events: &WeakUnboundedSender<LinkEvent>) {
        self.ticker
            .arm_repeating(self.interval, events, |generation| LinkEvent::HeartbeatTick {
                generation,
            });
    }

    /// Clear the tick and any pending pong watcher. Safe when idle.
    pub(crate) fn stop(&mut self) {
        self.ticker.clear();
        self.pong_watch.clear();
    }

    /// Start waiting for a pong, replacing any earlier watcher.
    pub(crate) fn arm_pong_watch(&mut self, events: &WeakUnboundedSender<LinkEvent>) {
        self.pong_watch
            .arm_once(self.pong_timeout, events, |generation| LinkEvent::PongTimeout {
                generation,
            });
    }

    /// A pong arrived. Returns whether a watcher was pending.
    pub(crate) fn pong_received(&mut self) -> bool {
        let pending = self.pong_watch.is_armed();
        self.pong_watch.clear();
        pending
    }

    pub(crate) fn is_tick(&self, generation: u64) -> bool {
        self.ticker.is_current(generation)
    }

    /// Consume a pong-timeout expiry; `false` when it is stale.
    pub(crate) fn take_pong_timeout(&mut self, generation: u64) -> bool {
        self.pong_watch.fire(generation)
    }

    pub(crate) fn is_running(&self) -> bool {
        self.ticker.is_armed()
    }

    pub(crate) fn is_awaiting_pong(&self) -> bool {
        self.pong_watch.is_armed()
    }
}
