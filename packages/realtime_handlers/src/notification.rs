//! Announcement delivery: show new notices to the user and keep the unread
//! badge current.

use std::sync::Arc;

use async_trait::async_trait;
use realtime_link::{InboundFrame, MessageHandler, message_type};
use tokio::sync::watch;
use tracing::{debug, info};

use crate::payloads::{NEW_NOTICE_EVENT, NoticePayload, decode_payload};

/// Title used when a notice arrives without one.
pub const DEFAULT_NOTICE_TITLE: &str = "System notice";

/// Renders a notice to the user. Notices stay until dismissed.
pub trait Notifier: Send + Sync {
    fn notify(&self, title: &str, content: &str);
}

/// Source of the authoritative unread count, usually a REST endpoint.
#[async_trait]
pub trait UnreadCountSource: Send + Sync {
    async fn unread_count(&self) -> anyhow::Result<u64>;
}

/// Unread notice count shared with whatever renders the badge.
pub struct NotificationStore {
    unread: watch::Sender<u64>,
}

impl NotificationStore {
    pub fn new() -> Self {
        let (unread, _) = watch::channel(0);
        Self { unread }
    }

    pub fn unread_count(&self) -> u64 {
        *self.unread.borrow()
    }

    pub fn set_unread_count(&self, count: u64) {
        self.unread.send_replace(count);
    }

    pub fn subscribe(&self) -> watch::Receiver<u64> {
        self.unread.subscribe()
    }
}

impl Default for NotificationStore {
    fn default() -> Self {
        Self::new()
    }
}

pub struct NotificationHandler {
    notifier: Arc<dyn Notifier>,
    unread: Arc<dyn UnreadCountSource>,
    store: Arc<NotificationStore>,
}

impl NotificationHandler {
    pub fn new(
        notifier: Arc<dyn Notifier>,
        unread: Arc<dyn UnreadCountSource>,
        store: Arc<NotificationStore>,
    ) -> Self {
        Self {
            notifier,
            unread,
            store,
        }
    }

    /// Fetch the unread count in the background; failures leave the old
    /// value in place.
    fn refresh_unread_count(&self) {
        let source = self.unread.clone();
        let store = self.store.clone();
        tokio::spawn(async move {
            match source.unread_count().await {
                Ok(count) => store.set_unread_count(count),
                Err(e) => debug!(error = %e, "unread count refresh failed"),
            }
        });
    }
}

impl MessageHandler for NotificationHandler {
    fn handle(&self, frame: &InboundFrame) -> anyhow::Result<()> {
        let Some(payload) = decode_payload::<NoticePayload>(frame, message_type::NOTICE)? else {
            return Ok(());
        };
        if payload.event != NEW_NOTICE_EVENT {
            return Ok(());
        }
        let Some(notice) = payload.notice else {
            return Ok(());
        };

        let title = notice
            .title
            .as_deref()
            .filter(|t| !t.is_empty())
            .unwrap_or(DEFAULT_NOTICE_TITLE);
        info!(notice_id = ?notice.id, title, "new notice");
        self.notifier.notify(title, &notice.content);
        self.refresh_unread_count();
        Ok(())
    }

    fn name(&self) -> &str {
        "notification"
    }
}
