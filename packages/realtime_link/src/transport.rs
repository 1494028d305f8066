//! The seam between the connection manager and a concrete WebSocket client.
//!
//! A [`Connector`] builds a socket synchronously and hands it an
//! [`EventSink`]; everything that happens to the socket afterwards (handshake
//! completion, frames, errors, close) comes back as a [`SocketEvent`] through
//! that sink, tagged with the socket's id.

use tokio::sync::mpsc::WeakUnboundedSender;

use crate::error::LinkError;
use crate::manager::LinkEvent;
use crate::state::ReadyState;

/// Identifies one socket object for the lifetime of the manager.
pub type SocketId = u64;

/// A frame as it came off the wire.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WireFrame {
    Text(String),
    Binary(Vec<u8>),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SocketEvent {
    Open,
    Message(WireFrame),
    Error(String),
    Close { code: u16, reason: String },
}

/// Close code and reason passed to [`Socket::close`].
pub type CloseRequest = (u16, String);

/// A live socket owned by the manager.
pub trait Socket: Send {
    fn ready_state(&self) -> ReadyState;

    fn send_text(&mut self, text: String) -> Result<(), LinkError>;

    /// Begin the closing handshake. `None` closes without a status code.
    fn close(&mut self, request: Option<CloseRequest>) -> Result<(), LinkError>;
}

/// Builds sockets. Returning `Err` means construction itself failed
/// (malformed URL and the like); network failures arrive later as events.
pub trait Connector: Send + Sync {
    fn open(&self, url: &str, events: EventSink) -> Result<Box<dyn Socket>, LinkError>;
}

/// Where a socket reports its events. Cheap to clone; holds no strong
/// reference to the manager, so a stray socket task never keeps it alive.
#[derive(Clone)]
pub struct EventSink {
    id: SocketId,
    tx: WeakUnboundedSender<LinkEvent>,
}

impl EventSink {
    pub(crate) fn new(id: SocketId, tx: WeakUnboundedSender<LinkEvent>) -> Self {
        Self { id, tx }
    }

    pub fn id(&self) -> SocketId {
        self.id
    }

    /// Deliver an event. Returns `false` once the manager is gone.
    pub fn emit(&self, event: SocketEvent) -> bool {
        match self.tx.upgrade() {
            Some(tx) => tx.send(LinkEvent::Socket { id: self.id, event }).is_ok(),
            None => false,
        }
    }
}

impl std::fmt::Debug for EventSink {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventSink").field("id", &self.id).finish()
    }
}
