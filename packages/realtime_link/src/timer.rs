use std::time::Duration;

use tokio::sync::mpsc::WeakUnboundedSender;
use tokio::task::JoinHandle;

/// Owner of one kind of timer.
///
/// Arming always cancels the previous timer of the slot first, and every
/// expiry is tagged with the slot's generation so an expiry that was
/// already queued when the timer was cleared can be recognised as stale.
/// Timer tasks hold only a weak sender and never keep the receiver alive.
pub(crate) struct TimerSlot {
    handle: Option<JoinHandle<()>>,
    generation: u64,
}

impl TimerSlot {
    pub(crate) fn new() -> Self {
        Self {
            handle: None,
            generation: 0,
        }
    }

    pub(crate) fn arm_once<E, F>(&mut self, delay: Duration, events: &WeakUnboundedSender<E>, make: F)
    where
        E: Send + 'static,
        F: FnOnce(u64) -> E + Send + 'static,
    {
        self.clear();
        let generation = self.generation;
        let events = events.clone();
        self.handle = Some(tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            if let Some(tx) = events.upgrade() {
                let _ = tx.send(make(generation));
            }
        }));
    }

    pub(crate) fn arm_repeating<E, F>(
        &mut self,
        period: Duration,
        events: &WeakUnboundedSender<E>,
        make: F,
    ) where
        E: Send + 'static,
        F: Fn(u64) -> E + Send + 'static,
    {
        self.clear();
        let generation = self.generation;
        let events = events.clone();
        self.handle = Some(tokio::spawn(async move {
            let start = tokio::time::Instant::now() + period;
            let mut ticker = tokio::time::interval_at(start, period);
            loop {
                ticker.tick().await;
                let Some(tx) = events.upgrade() else { break };
                if tx.send(make(generation)).is_err() {
                    break;
                }
            }
        }));
    }

    /// Cancel the pending timer, if any. Safe to call when idle.
    pub(crate) fn clear(&mut self) {
        if let Some(handle) = self.handle.take() {
            handle.abort();
        }
        self.generation = self.generation.wrapping_add(1);
    }

    pub(crate) fn is_armed(&self) -> bool {
        self.handle.is_some()
    }

    /// Whether an expiry belongs to the currently armed timer.
    pub(crate) fn is_current(&self, generation: u64) -> bool {
        self.handle.is_some() && self.generation == generation
    }

    /// Consume a one-shot expiry. Returns `false` for stale expiries.
    pub(crate) fn fire(&mut self, generation: u64) -> bool {
        if !self.is_current(generation) {
            return false;
        }
        self.handle = None;
        true
    }
}

impl Drop for TimerSlot {
    fn drop(&mut self) {
        if let Some(handle) = self.handle.take() {
            handle.abort();
        }
    }
}
