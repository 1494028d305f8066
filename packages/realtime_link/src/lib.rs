//! Authenticated realtime link for the admin console.
//!
//! A single long-lived WebSocket per user session, owned by a
//! [`ConnectionManager`] actor and driven through a cloneable [`LinkHandle`].
//! The manager keeps the connection alive with an application-level
//! ping/pong heartbeat, recovers from transient network loss with jittered
//! exponential backoff, retries rejected credentials through a
//! [`TokenRefresher`] before giving up on the session, and fans every
//! inbound frame out to independently registered [`MessageHandler`]s.

pub mod auto_connect;
pub mod config;
pub mod dispatch;
pub mod envelope;
pub mod error;
mod heartbeat;
pub mod manager;
pub mod policy;
pub mod registry;
pub mod session;
pub mod state;
mod timer;
pub mod transport;
pub mod tungstenite;

#[cfg(any(test, feature = "test-util"))]
pub mod test_helpers;

pub use auto_connect::spawn_auto_connect;
pub use config::{WebSocketConfig, WebSocketConfigOverrides};
pub use dispatch::{DispatchReport, Dispatcher};
pub use envelope::{Envelope, InboundFrame, OutgoingMessage, message_type};
pub use error::LinkError;
pub use manager::{Collaborators, ConnectionManager, LinkHandle};
pub use registry::{HandlerRegistry, MessageHandler, SharedHandler};
pub use session::{
    ErrorSurface, SessionProvider, SessionSnapshot, SessionState, SessionStore, SessionTerminator,
    TokenRefresher, TracingSurface,
};
pub use state::{ConnectionState, LinkSnapshot, NetworkSignal};
pub use transport::{Connector, EventSink, Socket, SocketEvent};
pub use crate::tungstenite::TungsteniteConnector;
