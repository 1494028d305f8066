use std::sync::Arc;

use crate::envelope::InboundFrame;

/// Observer of every inbound frame. Implementations filter on the message
/// type themselves; the registry does no routing.
pub trait MessageHandler: Send + Sync {
    fn handle(&self, frame: &InboundFrame) -> anyhow::Result<()>;

    /// Label used in logs when the handler fails.
    fn name(&self) -> &str {
        "anonymous"
    }
}

impl<F> MessageHandler for F
where
    F: Fn(&InboundFrame) -> anyhow::Result<()> + Send + Sync,
{
    fn handle(&self, frame: &InboundFrame) -> anyhow::Result<()> {
        self(frame)
    }
}

pub type SharedHandler = Arc<dyn MessageHandler>;

/// Set of handlers keyed by `Arc` identity.
#[derive(Default)]
pub struct HandlerRegistry {
    handlers: Vec<SharedHandler>,
}

impl HandlerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns `false` when this exact handler is already registered.
    pub fn add(&mut self, handler: SharedHandler) -> bool {
        if self.contains(&handler) {
            return false;
        }
        self.handlers.push(handler);
        true
    }

    /// Returns `false` when the handler was not registered.
    pub fn remove(&mut self, handler: &SharedHandler) -> bool {
        let before = self.handlers.len();
        self.handlers.retain(|h| !same_handler(h, handler));
        self.handlers.len() != before
    }

    pub fn contains(&self, handler: &SharedHandler) -> bool {
        self.handlers.iter().any(|h| same_handler(h, handler))
    }

    pub fn len(&self) -> usize {
        self.handlers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &SharedHandler> {
        self.handlers.iter()
    }
}

// Compare data pointers only; vtable pointers for the same type can differ
// across codegen units.
fn same_handler(a: &SharedHandler, b: &SharedHandler) -> bool {
    std::ptr::addr_eq(Arc::as_ptr(a), Arc::as_ptr(b))
}
