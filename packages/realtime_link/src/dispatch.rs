//! Fan-out of inbound frames to every registered handler.
//!
//! Error surfacing and business dispatch are independent: a frame with a
//! nonzero `code` is shown to the user and still reaches every handler, and
//! a handler that fails (by `Err` or by panicking) never stops the ones
//! after it.

use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::Arc;

use tracing::debug;

use crate::envelope::InboundFrame;
use crate::registry::{HandlerRegistry, SharedHandler};
use crate::session::ErrorSurface;

/// Outcome counts for one dispatched frame.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DispatchReport {
    pub delivered: usize,
    pub failed: usize,
    pub surfaced_error: bool,
}

pub struct Dispatcher {
    registry: HandlerRegistry,
    surface: Arc<dyn ErrorSurface>,
}

impl Dispatcher {
    pub fn new(surface: Arc<dyn ErrorSurface>) -> Self {
        Self {
            registry: HandlerRegistry::new(),
            surface,
        }
    }

    pub fn add_handler(&mut self, handler: SharedHandler) -> bool {
        self.registry.add(handler)
    }

    pub fn remove_handler(&mut self, handler: &SharedHandler) -> bool {
        self.registry.remove(handler)
    }

    pub fn handler_count(&self) -> usize {
        self.registry.len()
    }

    pub fn dispatch(&self, frame: &InboundFrame) -> DispatchReport {
        let mut report = DispatchReport {
            surfaced_error: self.surface_error(frame),
            ..Default::default()
        };

        for handler in self.registry.iter() {
            let result = catch_unwind(AssertUnwindSafe(|| handler.handle(frame)));
            match result {
                Ok(Ok(())) => report.delivered += 1,
                Ok(Err(e)) => {
                    report.failed += 1;
                    debug!(handler = handler.name(), error = %e, "message handler failed");
                }
                Err(_) => {
                    report.failed += 1;
                    debug!(handler = handler.name(), "message handler panicked");
                }
            }
        }

        report
    }

    /// Show a nonzero envelope code to the user. Frames without a code
    /// (pongs, scalars, raw text) are not errors.
    fn surface_error(&self, frame: &InboundFrame) -> bool {
        let Some(envelope) = frame.envelope() else {
            return false;
        };
        if envelope.is_success() {
            return false;
        }
        match envelope.msg.as_deref().filter(|msg| !msg.is_empty()) {
            Some(msg) => self.surface.error(msg),
            None => self
                .surface
                .error(&format!("websocket error: code {}", envelope.code)),
        }
        true
    }
}
