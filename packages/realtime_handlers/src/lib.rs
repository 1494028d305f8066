//! Business handlers for the admin console realtime link.
//!
//! Each handler looks at every inbound frame and acts only on the message
//! types it owns; none of them know about each other. [`init_handlers`]
//! builds the full set and registers it on a [`LinkHandle`].

pub mod chat;
pub mod customer_service;
pub mod data_update;
pub mod diagnostic;
pub mod notification;
pub mod payloads;
pub mod server_monitor;
pub mod system;

use std::sync::Arc;

use realtime_link::{LinkHandle, SharedHandler};
use tracing::{debug, warn};

pub use chat::ChatHandler;
pub use customer_service::CustomerServiceHandler;
pub use data_update::DataUpdateHandler;
pub use diagnostic::{DiagnosticHandler, LogEntry, LogKind, MediaInfo, MediaKind, format_bytes};
pub use notification::{
    NotificationHandler, NotificationStore, Notifier, UnreadCountSource, DEFAULT_NOTICE_TITLE,
};
pub use server_monitor::ServerMonitorHandler;
pub use system::SystemHandler;

/// Everything the handlers need from the embedding application.
#[derive(Clone)]
pub struct HandlerContext {
    pub notifier: Arc<dyn Notifier>,
    pub unread: Arc<dyn UnreadCountSource>,
    pub notifications: Arc<NotificationStore>,
    /// Queue depth of each broadcast channel; slow subscribers lag past it.
    pub broadcast_capacity: usize,
    /// Entries kept per diagnostic log.
    pub diagnostic_capacity: usize,
}

impl HandlerContext {
    pub const DEFAULT_BROADCAST_CAPACITY: usize = 64;
    pub const DEFAULT_DIAGNOSTIC_CAPACITY: usize = 500;

    pub fn new(notifier: Arc<dyn Notifier>, unread: Arc<dyn UnreadCountSource>) -> Self {
        Self {
            notifier,
            unread,
            notifications: Arc::new(NotificationStore::new()),
            broadcast_capacity: Self::DEFAULT_BROADCAST_CAPACITY,
            diagnostic_capacity: Self::DEFAULT_DIAGNOSTIC_CAPACITY,
        }
    }
}

/// The registered handler set. Keep it around to subscribe to the
/// broadcast channels or read the diagnostic logs.
#[derive(Clone)]
pub struct RegisteredHandlers {
    pub system: Arc<SystemHandler>,
    pub notification: Arc<NotificationHandler>,
    pub chat: Arc<ChatHandler>,
    pub data_update: Arc<DataUpdateHandler>,
    pub customer_service: Arc<CustomerServiceHandler>,
    pub server_monitor: Arc<ServerMonitorHandler>,
    pub diagnostic: Arc<DiagnosticHandler>,
    pub notifications: Arc<NotificationStore>,
}

impl RegisteredHandlers {
    pub fn build(ctx: HandlerContext) -> Self {
        let capacity = ctx.broadcast_capacity;
        Self {
            system: Arc::new(SystemHandler::new()),
            notification: Arc::new(NotificationHandler::new(
                ctx.notifier,
                ctx.unread,
                ctx.notifications.clone(),
            )),
            chat: Arc::new(ChatHandler::new(capacity)),
            data_update: Arc::new(DataUpdateHandler::new(capacity)),
            customer_service: Arc::new(CustomerServiceHandler::new(capacity)),
            server_monitor: Arc::new(ServerMonitorHandler::new(capacity)),
            diagnostic: Arc::new(DiagnosticHandler::new(ctx.diagnostic_capacity)),
            notifications: ctx.notifications,
        }
    }

    /// Handlers in registration order.
    pub fn handles(&self) -> Vec<SharedHandler> {
        vec![
            self.system.clone(),
            self.notification.clone(),
            self.chat.clone(),
            self.data_update.clone(),
            self.customer_service.clone(),
            self.server_monitor.clone(),
            self.diagnostic.clone(),
        ]
    }

    pub async fn unregister(&self, link: &LinkHandle) {
        for handler in self.handles() {
            link.remove_message_handler(&handler).await;
        }
    }
}

/// Build every handler and register it on `link`.
pub async fn init_handlers(link: &LinkHandle, ctx: HandlerContext) -> RegisteredHandlers {
    let handlers = RegisteredHandlers::build(ctx);
    for handler in handlers.handles() {
        if !link.add_message_handler(handler.clone()).await {
            warn!(handler = handler.name(), "handler already registered");
        }
    }
    debug!("message handlers registered");
    handlers
}
