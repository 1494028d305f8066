//! The connection lifecycle manager.
//!
//! One actor task owns the socket, the timers, the retry counters and the
//! handler registry. Everything that can change that state (commands from a
//! [`LinkHandle`], socket events, timer expiries, finished token refreshes)
//! arrives through a single ordered queue, so there is never more than one
//! piece of code touching the state at a time.
//!
//! The actor only holds a weak sender to its own queue. Once the last
//! `LinkHandle` is dropped the queue closes and the actor tears down.

use std::sync::Arc;
use std::time::Duration;

use serde_json::json;
use tokio::sync::mpsc::{self, WeakUnboundedSender};
use tokio::sync::{oneshot, watch};
use tracing::{debug, info, trace, warn};

use crate::config::WebSocketConfig;
use crate::dispatch::Dispatcher;
use crate::envelope::{InboundFrame, OutgoingMessage, ping_frame};
use crate::error::LinkError;
use crate::heartbeat::HeartbeatMonitor;
use crate::policy::{CloseAction, ReconnectPolicy};
use crate::registry::SharedHandler;
use crate::session::{
    ErrorSurface, SessionProvider, SessionTerminator, TokenRefresher, build_connect_url,
};
use crate::state::{
    CLOSE_NORMAL, CloseOutcome, ConnectionState, LinkSnapshot, NetworkSignal, ReadyState,
};
use crate::timer::TimerSlot;
use crate::transport::{Connector, EventSink, Socket, SocketEvent, SocketId, WireFrame};

/// Warning shown when a send is attempted without an open socket.
pub const NOT_CONNECTED_WARNING: &str = "WebSocket is not connected";

/// Everything the actor reacts to, in arrival order.
pub(crate) enum LinkEvent {
    Command(LinkCommand),
    Socket { id: SocketId, event: SocketEvent },
    HeartbeatTick { generation: u64 },
    PongTimeout { generation: u64 },
    ReconnectDue { generation: u64 },
    RefreshFinished { succeeded: bool },
}

pub(crate) enum LinkCommand {
    Connect {
        respond_to: oneshot::Sender<()>,
    },
    Disconnect {
        respond_to: oneshot::Sender<()>,
    },
    IsConnected {
        respond_to: oneshot::Sender<bool>,
    },
    SendMessage {
        message: OutgoingMessage,
        respond_to: oneshot::Sender<bool>,
    },
    SendPing {
        respond_to: oneshot::Sender<bool>,
    },
    AddHandler {
        handler: SharedHandler,
        respond_to: oneshot::Sender<bool>,
    },
    RemoveHandler {
        handler: SharedHandler,
        respond_to: oneshot::Sender<bool>,
    },
    Network(NetworkSignal),
    Snapshot {
        respond_to: oneshot::Sender<LinkSnapshot>,
    },
    Shutdown {
        respond_to: oneshot::Sender<()>,
    },
}

/// External services the manager calls out to.
#[derive(Clone)]
pub struct Collaborators {
    pub session: Arc<dyn SessionProvider>,
    pub refresher: Arc<dyn TokenRefresher>,
    pub terminator: Arc<dyn SessionTerminator>,
    pub surface: Arc<dyn ErrorSurface>,
}

/// Handle to the connection manager. Cheap to clone; every clone talks to
/// the same single connection.
#[derive(Clone)]
pub struct LinkHandle {
    sender: mpsc::UnboundedSender<LinkEvent>,
    status: watch::Receiver<ConnectionState>,
}

impl LinkHandle {
    async fn request<T>(
        &self,
        make: impl FnOnce(oneshot::Sender<T>) -> LinkCommand,
    ) -> Result<T, LinkError> {
        let (tx, rx) = oneshot::channel();
        self.sender
            .send(LinkEvent::Command(make(tx)))
            .map_err(|_| LinkError::ManagerGone)?;
        rx.await.map_err(|_| LinkError::ManagerGone)
    }

    /// Open a connection unless one is already open or being opened.
    /// Returns once the attempt has been started, not when it is open.
    pub async fn connect(&self) -> Result<(), LinkError> {
        self.request(|respond_to| LinkCommand::Connect { respond_to })
            .await
    }

    /// Close the connection with code 1000. Always leaves the link `Closed`.
    pub async fn disconnect(&self) -> Result<(), LinkError> {
        self.request(|respond_to| LinkCommand::Disconnect { respond_to })
            .await
    }

    pub async fn is_connected(&self) -> bool {
        self.request(|respond_to| LinkCommand::IsConnected { respond_to })
            .await
            .unwrap_or(false)
    }

    /// Send a frame. `false` when there is no open socket or the transport
    /// refused it.
    pub async fn send_message(&self, message: impl Into<OutgoingMessage>) -> bool {
        let message = message.into();
        self.request(|respond_to| LinkCommand::SendMessage {
            message,
            respond_to,
        })
        .await
        .unwrap_or(false)
    }

    pub async fn send_ping(&self) -> bool {
        self.request(|respond_to| LinkCommand::SendPing { respond_to })
            .await
            .unwrap_or(false)
    }

    pub fn status(&self) -> ConnectionState {
        *self.status.borrow()
    }

    pub fn watch_status(&self) -> watch::Receiver<ConnectionState> {
        self.status.clone()
    }

    /// Returns `false` when this exact handler was already registered.
    pub async fn add_message_handler(&self, handler: SharedHandler) -> bool {
        self.request(|respond_to| LinkCommand::AddHandler {
            handler,
            respond_to,
        })
        .await
        .unwrap_or(false)
    }

    pub async fn remove_message_handler(&self, handler: &SharedHandler) -> bool {
        let handler = handler.clone();
        self.request(|respond_to| LinkCommand::RemoveHandler {
            handler,
            respond_to,
        })
        .await
        .unwrap_or(false)
    }

    /// Report a connectivity or visibility change. Fire-and-forget, like the
    /// environment events it stands for.
    pub fn notify_network(&self, signal: NetworkSignal) -> Result<(), LinkError> {
        self.sender
            .send(LinkEvent::Command(LinkCommand::Network(signal)))
            .map_err(|_| LinkError::ManagerGone)
    }

    pub async fn snapshot(&self) -> Result<LinkSnapshot, LinkError> {
        self.request(|respond_to| LinkCommand::Snapshot { respond_to })
            .await
    }

    /// Disconnect and stop the manager. Other handles see `ManagerGone`
    /// afterwards.
    pub async fn shutdown(&self) {
        let _ = self
            .request(|respond_to| LinkCommand::Shutdown { respond_to })
            .await;
    }
}

struct ActiveSocket {
    id: SocketId,
    socket: Box<dyn Socket>,
}

pub struct ConnectionManager {
    config: WebSocketConfig,
    connector: Arc<dyn Connector>,
    collaborators: Collaborators,
    receiver: mpsc::UnboundedReceiver<LinkEvent>,
    events: WeakUnboundedSender<LinkEvent>,
    status: watch::Sender<ConnectionState>,
    socket: Option<ActiveSocket>,
    next_socket_id: SocketId,
    connecting: bool,
    network_online: bool,
    policy: ReconnectPolicy,
    heartbeat: HeartbeatMonitor,
    reconnect: TimerSlot,
    dispatcher: Dispatcher,
}

impl ConnectionManager {
    /// Start the manager task and return the handle to it. Must be called
    /// from within a tokio runtime.
    pub fn spawn(
        config: WebSocketConfig,
        connector: Arc<dyn Connector>,
        collaborators: Collaborators,
    ) -> LinkHandle {
        let (sender, receiver) = mpsc::unbounded_channel();
        let (status_tx, status_rx) = watch::channel(ConnectionState::Closed);

        let manager = ConnectionManager {
            policy: ReconnectPolicy::new(config.reconnect_interval, config.max_reconnect_attempts),
            heartbeat: HeartbeatMonitor::new(config.heartbeat_interval, config.pong_timeout()),
            dispatcher: Dispatcher::new(collaborators.surface.clone()),
            config,
            connector,
            collaborators,
            receiver,
            events: sender.downgrade(),
            status: status_tx,
            socket: None,
            next_socket_id: 0,
            connecting: false,
            network_online: true,
            reconnect: TimerSlot::new(),
        };

        tokio::spawn(manager.run());

        LinkHandle {
            sender,
            status: status_rx,
        }
    }

    async fn run(mut self) {
        debug!(url = %self.config.base_url, "connection manager started");

        while let Some(event) = self.receiver.recv().await {
            if !self.handle_event(event) {
                break;
            }
        }

        self.disconnect();
        self.reconnect.clear();
        debug!("connection manager stopped");
    }

    /// Returns `false` when the actor should stop.
    fn handle_event(&mut self, event: LinkEvent) -> bool {
        match event {
            LinkEvent::Command(command) => return self.handle_command(command),
            LinkEvent::Socket { id, event } => self.handle_socket_event(id, event),
            LinkEvent::HeartbeatTick { generation } => {
                if self.heartbeat.is_tick(generation) {
                    self.heartbeat_tick();
                }
            }
            LinkEvent::PongTimeout { generation } => {
                if self.heartbeat.take_pong_timeout(generation) {
                    self.pong_timed_out();
                }
            }
            LinkEvent::ReconnectDue { generation } => {
                if self.reconnect.fire(generation) {
                    debug!("reconnect timer fired");
                    self.connect();
                }
            }
            LinkEvent::RefreshFinished { succeeded } => self.refresh_finished(succeeded),
        }
        true
    }

    fn handle_command(&mut self, command: LinkCommand) -> bool {
        match command {
            LinkCommand::Connect { respond_to } => {
                self.connect();
                let _ = respond_to.send(());
            }
            LinkCommand::Disconnect { respond_to } => {
                self.disconnect();
                let _ = respond_to.send(());
            }
            LinkCommand::IsConnected { respond_to } => {
                let _ = respond_to.send(self.is_connected());
            }
            LinkCommand::SendMessage {
                message,
                respond_to,
            } => {
                let _ = respond_to.send(self.send_message(message));
            }
            LinkCommand::SendPing { respond_to } => {
                let _ = respond_to.send(self.send_ping());
            }
            LinkCommand::AddHandler {
                handler,
                respond_to,
            } => {
                let _ = respond_to.send(self.dispatcher.add_handler(handler));
            }
            LinkCommand::RemoveHandler {
                handler,
                respond_to,
            } => {
                let _ = respond_to.send(self.dispatcher.remove_handler(&handler));
            }
            LinkCommand::Network(signal) => self.network_changed(signal),
            LinkCommand::Snapshot { respond_to } => {
                let _ = respond_to.send(self.snapshot());
            }
            LinkCommand::Shutdown { respond_to } => {
                self.disconnect();
                self.reconnect.clear();
                let _ = respond_to.send(());
                return false;
            }
        }
        true
    }

    fn connect(&mut self) {
        if self.connecting {
            trace!("connect skipped: attempt already in flight");
            return;
        }
        if let Some(active) = &self.socket {
            if matches!(
                active.socket.ready_state(),
                ReadyState::Open | ReadyState::Connecting
            ) {
                trace!("connect skipped: socket already live");
                return;
            }
        }

        let session = self.collaborators.session.snapshot();
        let Some(url) = build_connect_url(&self.config.base_url, &session) else {
            debug!("connect skipped: no access token");
            return;
        };

        self.set_state(ConnectionState::Connecting);
        self.connecting = true;

        let id = self.next_socket_id;
        self.next_socket_id += 1;
        let sink = EventSink::new(id, self.events.clone());

        match self.connector.open(&url, sink) {
            Ok(socket) => {
                info!(
                    socket_id = id,
                    url = %self.config.base_url,
                    tenant_id = ?session.tenant_id,
                    "websocket connecting"
                );
                self.socket = Some(ActiveSocket { id, socket });
            }
            Err(e) => {
                // A construction failure is a configuration defect; no retry.
                warn!(error = %e, "failed to create websocket");
                self.socket = None;
                self.connecting = false;
                self.set_state(ConnectionState::Error);
            }
        }
    }

    fn disconnect(&mut self) {
        // Taking the socket detaches it: its late events no longer match.
        if let Some(mut active) = self.socket.take() {
            let reason = json!({ "message": "client disconnect" }).to_string();
            match active.socket.close(Some((CLOSE_NORMAL, reason))) {
                Ok(()) => info!(socket_id = active.id, "websocket disconnected"),
                Err(e) => debug!(socket_id = active.id, error = %e, "close failed during disconnect"),
            }
        }
        self.set_state(ConnectionState::Closed);
        self.heartbeat.stop();
        self.connecting = false;
    }

    fn is_connected(&self) -> bool {
        self.socket
            .as_ref()
            .is_some_and(|active| active.socket.ready_state() == ReadyState::Open)
    }

    fn send_message(&mut self, message: OutgoingMessage) -> bool {
        let Some(active) = self
            .socket
            .as_mut()
            .filter(|active| active.socket.ready_state() == ReadyState::Open)
        else {
            self.collaborators.surface.warning(NOT_CONNECTED_WARNING);
            return false;
        };

        let text = match message.into_text() {
            Ok(text) => text,
            Err(e) => {
                warn!(error = %e, "failed to encode outgoing message");
                return false;
            }
        };
        if self.config.debug {
            debug!(socket_id = active.id, frame = %text, "sending frame");
        }

        match active.socket.send_text(text) {
            Ok(()) => true,
            Err(e) => {
                debug!(socket_id = active.id, error = %e, "send failed");
                false
            }
        }
    }

    fn send_ping(&mut self) -> bool {
        self.heartbeat.arm_pong_watch(&self.events);
        self.send_message(OutgoingMessage::Json(ping_frame()))
    }

    fn heartbeat_tick(&mut self) {
        if !self.is_connected() {
            return;
        }
        // Keep the deadline of the oldest unanswered ping; re-arming on every
        // tick would push it out forever when the interval is shorter than
        // the timeout.
        if self.heartbeat.is_awaiting_pong() {
            self.send_message(OutgoingMessage::Json(ping_frame()));
        } else {
            self.send_ping();
        }
    }

    fn pong_timed_out(&mut self) {
        let Some(active) = self.socket.as_mut() else {
            return;
        };
        if active.socket.ready_state() != ReadyState::Open {
            return;
        }
        warn!(
            socket_id = active.id,
            timeout_ms = self.config.pong_timeout().as_millis() as u64,
            "no pong received, closing socket"
        );
        // The close event that follows takes the regular close path.
        if let Err(e) = active.socket.close(None) {
            debug!(socket_id = active.id, error = %e, "forced close failed");
        }
    }

    fn handle_socket_event(&mut self, id: SocketId, event: SocketEvent) {
        if self.socket.as_ref().map(|active| active.id) != Some(id) {
            trace!(socket_id = id, "dropping event from detached socket");
            return;
        }
        match event {
            SocketEvent::Open => self.opened(),
            SocketEvent::Message(frame) => self.message_received(frame),
            SocketEvent::Error(detail) => {
                warn!(socket_id = id, error = %detail, "websocket error");
                self.set_state(ConnectionState::Error);
                self.connecting = false;
            }
            SocketEvent::Close { code, reason } => self.closed(code, &reason),
        }
    }

    fn opened(&mut self) {
        self.set_state(ConnectionState::Open);
        self.policy.on_open();
        self.connecting = false;
        self.heartbeat.start(&self.events);
        info!("websocket connected");
    }

    fn message_received(&mut self, frame: WireFrame) {
        let frame = match frame {
            WireFrame::Text(text) => InboundFrame::text(text),
            WireFrame::Binary(bytes) => InboundFrame::binary(bytes),
        };
        if self.config.debug {
            debug!(frame = frame.raw(), "received frame");
        }

        if frame.is_pong() && self.heartbeat.pong_received() {
            trace!("pong received");
        }

        let report = self.dispatcher.dispatch(&frame);
        if report.failed > 0 {
            debug!(
                delivered = report.delivered,
                failed = report.failed,
                "message handlers failed"
            );
        }
    }

    fn closed(&mut self, code: u16, reason: &str) {
        self.socket = None;
        self.set_state(ConnectionState::Closed);
        self.heartbeat.stop();
        self.connecting = false;

        let outcome = CloseOutcome::from_code(code);
        info!(code, reason, ?outcome, "websocket closed");

        let action = self.policy.on_close(outcome);
        self.apply(action);
    }

    fn refresh_finished(&mut self, succeeded: bool) {
        // The link came back while the refresh ran; its open already reset
        // both retry tracks.
        if self.is_connected() {
            debug!(succeeded, "token refresh finished after the link reopened");
            return;
        }
        let action = if succeeded {
            info!("token refreshed, reconnecting");
            self.policy.on_refresh_succeeded()
        } else {
            self.policy.on_refresh_failed()
        };
        self.apply(action);
    }

    fn apply(&mut self, action: CloseAction) {
        match action {
            CloseAction::RefreshToken => self.start_refresh(),
            CloseAction::Terminate => self.start_terminate(),
            CloseAction::Reconnect(delay) => self.schedule_reconnect(delay),
            CloseAction::Idle => {
                debug!(
                    attempts = self.policy.reconnect_attempts(),
                    "not reconnecting until an external trigger"
                );
            }
        }
    }

    fn start_refresh(&self) {
        info!(
            attempt = self.policy.auth_retry_count(),
            "credential rejected, refreshing token"
        );
        let refresher = self.collaborators.refresher.clone();
        let events = self.events.clone();
        tokio::spawn(async move {
            let succeeded = match refresher.refresh().await {
                Ok(()) => true,
                Err(e) => {
                    warn!(error = %e, "token refresh failed");
                    false
                }
            };
            if let Some(tx) = events.upgrade() {
                let _ = tx.send(LinkEvent::RefreshFinished { succeeded });
            }
        });
    }

    fn start_terminate(&self) {
        warn!("credential rejected after refresh budget was spent, ending session");
        let terminator = self.collaborators.terminator.clone();
        tokio::spawn(async move {
            terminator.terminate().await;
        });
    }

    fn schedule_reconnect(&mut self, delay: Duration) {
        info!(
            attempt = self.policy.reconnect_attempts(),
            delay_ms = delay.as_millis() as u64,
            "scheduling reconnect"
        );
        self.reconnect
            .arm_once(delay, &self.events, |generation| LinkEvent::ReconnectDue {
                generation,
            });
    }

    fn network_changed(&mut self, signal: NetworkSignal) {
        debug!(?signal, "network signal");
        match signal {
            NetworkSignal::Offline => {
                self.network_online = false;
                self.heartbeat.stop();
            }
            NetworkSignal::Online => {
                self.network_online = true;
                if !self.is_connected() {
                    self.connect();
                }
            }
            NetworkSignal::Visibility { visible } => {
                if visible && !self.is_connected() && self.network_online {
                    self.connect();
                }
            }
        }
    }

    fn set_state(&self, state: ConnectionState) {
        self.status.send_if_modified(|current| {
            if *current == state {
                return false;
            }
            trace!(from = %current, to = %state, "state change");
            *current = state;
            true
        });
    }

    fn snapshot(&self) -> LinkSnapshot {
        LinkSnapshot {
            state: *self.status.borrow(),
            socket_present: self.socket.is_some(),
            connecting: self.connecting,
            reconnect_attempts: self.policy.reconnect_attempts(),
            auth_retry_count: self.policy.auth_retry_count(),
            heartbeat_armed: self.heartbeat.is_running(),
            pong_timeout_armed: self.heartbeat.is_awaiting_pong(),
            reconnect_scheduled: self.reconnect.is_armed(),
            handler_count: self.dispatcher.handler_count(),
            network_online: self.network_online,
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use serde_json::Value;

    use super::*;
    use crate::session::{SessionState, SessionStore};
    use crate::test_helpers::{
        CountingTerminator, MockConnector, MockRefresher, RecordingSurface, settle,
    };

    struct Harness {
        link: LinkHandle,
        connector: Arc<MockConnector>,
        session: Arc<SessionStore>,
        refresher: Arc<MockRefresher>,
        terminator: Arc<CountingTerminator>,
        surface: Arc<RecordingSurface>,
    }

    fn harness(refresh_succeeds: bool) -> Harness {
        harness_with(MockRefresher::new(refresh_succeeds))
    }

    fn harness_with(refresher: MockRefresher) -> Harness {
        let connector = Arc::new(MockConnector::default());
        let session = Arc::new(SessionStore::with_state(SessionState {
            access_token: Some("tok".into()),
            tenant_id: Some(1),
            ..Default::default()
        }));
        let refresher = Arc::new(refresher);
        let terminator = Arc::new(CountingTerminator::default());
        let surface = Arc::new(RecordingSurface::default());

        let link = ConnectionManager::spawn(
            WebSocketConfig::from_http_base("http://localhost:48080"),
            connector.clone(),
            Collaborators {
                session: session.clone(),
                refresher: refresher.clone(),
                terminator: terminator.clone(),
                surface: surface.clone(),
            },
        );

        Harness {
            link,
            connector,
            session,
            refresher,
            terminator,
            surface,
        }
    }

    async fn wait(ms: u64) {
        tokio::time::sleep(Duration::from_millis(ms)).await;
        settle().await;
    }

    async fn snapshot(h: &Harness) -> LinkSnapshot {
        settle().await;
        h.link.snapshot().await.unwrap()
    }

    /// Connect and complete the handshake of the newest socket.
    async fn connect_open(h: &Harness) {
        h.link.connect().await.unwrap();
        h.connector.last_socket().open();
        settle().await;
    }

    fn counting_handler(counter: Arc<AtomicUsize>) -> SharedHandler {
        Arc::new(move |_: &InboundFrame| {
            counter.fetch_add(1, Ordering::SeqCst);
            Ok::<(), anyhow::Error>(())
        })
    }

    #[tokio::test(start_paused = true)]
    async fn test_connect_builds_url_and_opens() {
        let h = harness(true);
        h.link.connect().await.unwrap();
        assert_eq!(
            h.connector.urls(),
            vec!["ws://localhost:48080/infra/ws?token=tok&tenant_id=1".to_string()]
        );
        assert_eq!(h.link.status(), ConnectionState::Connecting);
        assert!(snapshot(&h).await.connecting);

        h.connector.last_socket().open();
        let snap = snapshot(&h).await;
        assert_eq!(snap.state, ConnectionState::Open);
        assert!(!snap.connecting);
        assert!(snap.heartbeat_armed);
        assert!(h.link.is_connected().await);
    }

    #[tokio::test(start_paused = true)]
    async fn test_connect_without_token_is_silent() {
        let h = harness(true);
        h.session.clear_tokens();
        h.link.connect().await.unwrap();
        assert_eq!(h.connector.open_count(), 0);
        assert_eq!(h.link.status(), ConnectionState::Closed);
        assert!(h.surface.warnings().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_overlapping_connects_build_one_socket() {
        let h = harness(true);
        for _ in 0..3 {
            h.link.connect().await.unwrap();
        }
        assert_eq!(h.connector.open_count(), 1);

        h.connector.last_socket().open();
        settle().await;
        h.link.connect().await.unwrap();
        h.link
            .notify_network(NetworkSignal::Visibility { visible: true })
            .unwrap();
        h.link.notify_network(NetworkSignal::Online).unwrap();
        settle().await;
        assert_eq!(h.connector.open_count(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_construction_failure_sets_error_without_retry() {
        let h = harness(true);
        h.connector.set_fail(true);
        h.link.connect().await.unwrap();

        let snap = snapshot(&h).await;
        assert_eq!(snap.state, ConnectionState::Error);
        assert!(!snap.socket_present);
        assert!(!snap.connecting);
        assert!(!snap.reconnect_scheduled);

        wait(120_000).await;
        assert_eq!(h.connector.urls().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_disconnect_is_idempotent() {
        let h = harness(true);
        h.link.disconnect().await.unwrap();
        assert_eq!(h.link.status(), ConnectionState::Closed);

        connect_open(&h).await;
        let socket = h.connector.last_socket();
        h.link.disconnect().await.unwrap();
        h.link.disconnect().await.unwrap();

        assert_eq!(
            socket.closes(),
            vec![Some((1000, r#"{"message":"client disconnect"}"#.to_string()))]
        );
        let snap = snapshot(&h).await;
        assert_eq!(snap.state, ConnectionState::Closed);
        assert!(!snap.socket_present);
        assert!(!snap.heartbeat_armed);
    }

    #[tokio::test(start_paused = true)]
    async fn test_disconnect_survives_close_failure() {
        let h = harness(true);
        connect_open(&h).await;
        h.connector.last_socket().set_fail_close(true);
        h.link.disconnect().await.unwrap();

        let snap = snapshot(&h).await;
        assert_eq!(snap.state, ConnectionState::Closed);
        assert!(!snap.socket_present);
        assert!(!snap.heartbeat_armed);
        assert!(!snap.connecting);
    }

    #[tokio::test(start_paused = true)]
    async fn test_detached_socket_events_are_ignored() {
        let h = harness(true);
        let seen = Arc::new(AtomicUsize::new(0));
        h.link.add_message_handler(counting_handler(seen.clone())).await;

        h.link.connect().await.unwrap();
        let socket = h.connector.last_socket();
        h.link.disconnect().await.unwrap();

        socket.open();
        socket.message(r#"{"code":0,"type":"chat"}"#);
        socket.close(1006);
        let snap = snapshot(&h).await;
        assert_eq!(snap.state, ConnectionState::Closed);
        assert!(!snap.reconnect_scheduled);
        assert_eq!(seen.load(Ordering::SeqCst), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_send_message_requires_open_socket() {
        let h = harness(true);
        assert!(!h.link.send_message("hello").await);
        assert_eq!(h.surface.warnings(), vec![NOT_CONNECTED_WARNING.to_string()]);

        connect_open(&h).await;
        let socket = h.connector.last_socket();
        assert!(h.link.send_message("hello").await);
        assert!(
            h.link
                .send_message(json!({"type": "chat", "payload": {"text": "hi"}}))
                .await
        );
        let sent = socket.sent();
        assert_eq!(sent[0], "hello");
        let value: Value = serde_json::from_str(&sent[1]).unwrap();
        assert_eq!(value["payload"]["text"], "hi");

        // Transport failure: false, no toast.
        socket.set_fail_send(true);
        assert!(!h.link.send_message("lost").await);
        assert_eq!(h.surface.warnings().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_heartbeat_pings_and_pong_clears_watch() {
        let h = harness(true);
        connect_open(&h).await;
        let socket = h.connector.last_socket();

        wait(30_001).await;
        let sent = socket.sent();
        assert_eq!(sent.len(), 1);
        let ping: Value = serde_json::from_str(&sent[0]).unwrap();
        assert_eq!(ping["type"], "ping");
        assert!(ping["payload"]["client_timestamp"].is_string());
        assert!(snapshot(&h).await.pong_timeout_armed);

        socket.message("pong");
        assert!(!snapshot(&h).await.pong_timeout_armed);

        wait(30_000).await;
        assert_eq!(socket.sent().len(), 2);
        socket.message(r#"{"type":"pong","payload":{"client_timestamp":"a","server_timestamp":"b"}}"#);
        assert!(!snapshot(&h).await.pong_timeout_armed);

        // Well past the pong deadline: nothing was force-closed.
        wait(20_000).await;
        assert!(socket.closes().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_missed_pong_forces_generic_reconnect() {
        let h = harness(false);
        connect_open(&h).await;
        let socket = h.connector.last_socket();

        // Pings at 30s and 60s, neither answered; deadline is 30s + 45s.
        wait(74_000).await;
        assert_eq!(socket.sent().len(), 2);
        assert!(socket.closes().is_empty());

        wait(1_100).await;
        assert_eq!(socket.closes(), vec![None]);

        socket.close(1005);
        let snap = snapshot(&h).await;
        assert_eq!(snap.state, ConnectionState::Closed);
        assert_eq!(snap.reconnect_attempts, 1);
        assert_eq!(snap.auth_retry_count, 0);
        assert!(snap.reconnect_scheduled);
        assert_eq!(h.refresher.calls(), 0);

        wait(3_751).await;
        assert_eq!(h.connector.open_count(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_generic_backoff_grows_then_stops() {
        let h = harness(true);
        h.link.connect().await.unwrap();

        for attempt in 1..=5u32 {
            h.connector.last_socket().close(1006);
            let snap = snapshot(&h).await;
            assert_eq!(snap.reconnect_attempts, attempt);
            assert!(snap.reconnect_scheduled);

            let midpoint = 3000u64 << (attempt - 1);
            let opened = h.connector.open_count();
            wait(midpoint * 3 / 4 - 1).await;
            assert_eq!(h.connector.open_count(), opened, "attempt {attempt} fired early");
            wait(midpoint / 2 + 2).await;
            assert_eq!(h.connector.open_count(), opened + 1, "attempt {attempt} never fired");
        }

        h.connector.last_socket().close(1006);
        let snap = snapshot(&h).await;
        assert_eq!(snap.reconnect_attempts, 5);
        assert!(!snap.reconnect_scheduled);
        wait(300_000).await;
        assert_eq!(h.connector.open_count(), 6);

        // An external signal brings it back and the open resets the track.
        h.link.notify_network(NetworkSignal::Online).unwrap();
        settle().await;
        assert_eq!(h.connector.open_count(), 7);
        h.connector.last_socket().open();
        assert_eq!(snapshot(&h).await.reconnect_attempts, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_auth_rejection_budget_then_terminate() {
        let h = harness(false);
        h.link.connect().await.unwrap();

        for attempt in 1..=3u32 {
            h.connector.last_socket().close(4001);
            let snap = snapshot(&h).await;
            assert_eq!(h.refresher.calls(), attempt as usize);
            assert_eq!(snap.auth_retry_count, attempt);
            // Refresh failed: generic backoff took over.
            assert_eq!(snap.reconnect_attempts, attempt);
            assert!(snap.reconnect_scheduled);
            assert_eq!(h.terminator.calls(), 0);

            wait(16_000).await;
            assert_eq!(h.connector.open_count(), attempt as usize + 1);
        }

        h.connector.last_socket().close(4001);
        let snap = snapshot(&h).await;
        assert_eq!(h.terminator.calls(), 1);
        assert_eq!(h.refresher.calls(), 3);
        assert_eq!(snap.auth_retry_count, 0);
        assert!(!snap.reconnect_scheduled);
    }

    #[tokio::test(start_paused = true)]
    async fn test_auth_retry_resets_after_refresh_and_open() {
        let h = harness(true);
        connect_open(&h).await;

        h.connector.last_socket().close(4001);
        let snap = snapshot(&h).await;
        assert_eq!(snap.auth_retry_count, 1);
        assert_eq!(h.refresher.calls(), 1);
        assert_eq!(snap.reconnect_attempts, 0);

        wait(499).await;
        assert_eq!(h.connector.open_count(), 1);
        wait(2).await;
        assert_eq!(h.connector.open_count(), 2);

        h.connector.last_socket().open();
        assert_eq!(snapshot(&h).await.auth_retry_count, 0);

        // Fresh budget: the next rejection refreshes again.
        h.refresher.set_succeed(false);
        h.connector.last_socket().close(4001);
        let snap = snapshot(&h).await;
        assert_eq!(snap.auth_retry_count, 1);
        assert_eq!(h.refresher.calls(), 2);
        assert_eq!(h.terminator.calls(), 0);
    }

    /// Reject the credential, then bring the link back through a network
    /// signal while the refresh is still pending.
    async fn reopen_during_refresh(h: &Harness) {
        connect_open(h).await;
        h.connector.last_socket().close(4001);
        let snap = snapshot(h).await;
        assert_eq!(h.refresher.calls(), 1);
        assert_eq!(snap.auth_retry_count, 1);
        assert!(!snap.reconnect_scheduled);

        h.link.notify_network(NetworkSignal::Online).unwrap();
        settle().await;
        assert_eq!(h.connector.open_count(), 2);
        h.connector.last_socket().open();
        assert_eq!(snapshot(h).await.auth_retry_count, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_refresh_success_after_reopen_keeps_the_live_socket() {
        let h = harness_with(MockRefresher::gated(true));
        reopen_during_refresh(&h).await;

        h.refresher.release();
        let snap = snapshot(&h).await;
        assert!(!snap.reconnect_scheduled);

        wait(1_000).await;
        assert_eq!(h.connector.open_count(), 2);
        let snap = snapshot(&h).await;
        assert_eq!(snap.state, ConnectionState::Open);
        assert_eq!(snap.auth_retry_count, 0);
        assert_eq!(snap.reconnect_attempts, 0);
        assert!(h.connector.last_socket().closes().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_refresh_failure_after_reopen_is_ignored() {
        let h = harness_with(MockRefresher::gated(false));
        reopen_during_refresh(&h).await;

        h.refresher.release();
        let snap = snapshot(&h).await;
        assert!(!snap.reconnect_scheduled);
        assert_eq!(snap.reconnect_attempts, 0);

        wait(5_000).await;
        assert_eq!(h.connector.open_count(), 2);
        assert_eq!(h.terminator.calls(), 0);
        assert_eq!(snapshot(&h).await.state, ConnectionState::Open);
    }

    #[tokio::test(start_paused = true)]
    async fn test_refresh_success_while_closed_reconnects() {
        let h = harness_with(MockRefresher::gated(true));
        connect_open(&h).await;
        h.connector.last_socket().close(4001);
        settle().await;
        // A manual connect/disconnect pair while the refresh is pending.
        h.link.connect().await.unwrap();
        h.link.disconnect().await.unwrap();
        assert_eq!(h.connector.open_count(), 2);

        h.refresher.release();
        assert!(snapshot(&h).await.reconnect_scheduled);
        wait(501).await;
        assert_eq!(h.connector.open_count(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_server_normal_close_does_not_reconnect() {
        let h = harness(true);
        connect_open(&h).await;
        h.connector.last_socket().close(1000);

        let snap = snapshot(&h).await;
        assert_eq!(snap.state, ConnectionState::Closed);
        assert!(!snap.reconnect_scheduled);
        assert_eq!(snap.reconnect_attempts, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_error_event_collapses_into_close() {
        let h = harness(true);
        h.link.connect().await.unwrap();
        let socket = h.connector.last_socket();

        socket.error();
        let snap = snapshot(&h).await;
        assert_eq!(snap.state, ConnectionState::Error);
        assert!(!snap.connecting);
        assert!(!snap.reconnect_scheduled);

        socket.close(1006);
        let snap = snapshot(&h).await;
        assert_eq!(snap.state, ConnectionState::Closed);
        assert!(snap.reconnect_scheduled);
    }

    #[tokio::test(start_paused = true)]
    async fn test_manual_disconnect_keeps_pending_reconnect() {
        let h = harness(true);
        connect_open(&h).await;
        h.connector.last_socket().close(1006);
        h.link.disconnect().await.unwrap();
        assert!(snapshot(&h).await.reconnect_scheduled);

        wait(3_751).await;
        assert_eq!(h.connector.open_count(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_network_signals() {
        let h = harness(true);
        connect_open(&h).await;

        h.link.notify_network(NetworkSignal::Offline).unwrap();
        let snap = snapshot(&h).await;
        assert!(!snap.network_online);
        assert!(!snap.heartbeat_armed);

        h.connector.last_socket().close(1000);
        h.link
            .notify_network(NetworkSignal::Visibility { visible: true })
            .unwrap();
        settle().await;
        assert_eq!(h.connector.open_count(), 1, "offline: visibility must not connect");

        h.link.notify_network(NetworkSignal::Online).unwrap();
        settle().await;
        assert_eq!(h.connector.open_count(), 2);

        h.connector.last_socket().close(1000);
        h.link
            .notify_network(NetworkSignal::Visibility { visible: false })
            .unwrap();
        settle().await;
        assert_eq!(h.connector.open_count(), 2);
        h.link
            .notify_network(NetworkSignal::Visibility { visible: true })
            .unwrap();
        settle().await;
        assert_eq!(h.connector.open_count(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_dispatch_isolation_and_error_surfacing() {
        let h = harness(true);
        let first = Arc::new(AtomicUsize::new(0));
        let third = Arc::new(AtomicUsize::new(0));
        let failing: SharedHandler = Arc::new(|_: &InboundFrame| -> anyhow::Result<()> {
            anyhow::bail!("bad payload")
        });
        assert!(h.link.add_message_handler(counting_handler(first.clone())).await);
        assert!(h.link.add_message_handler(failing.clone()).await);
        assert!(!h.link.add_message_handler(failing.clone()).await);
        assert!(h.link.add_message_handler(counting_handler(third.clone())).await);
        assert_eq!(snapshot(&h).await.handler_count, 3);

        connect_open(&h).await;
        let socket = h.connector.last_socket();
        socket.message(r#"{"code":7,"msg":"quota exceeded","type":"chat","payload":{}}"#);
        socket.message("not json");
        settle().await;

        assert_eq!(h.surface.errors(), vec!["quota exceeded".to_string()]);
        assert_eq!(first.load(Ordering::SeqCst), 2);
        assert_eq!(third.load(Ordering::SeqCst), 2);

        assert!(h.link.remove_message_handler(&failing).await);
        assert!(!h.link.remove_message_handler(&failing).await);
        assert_eq!(snapshot(&h).await.handler_count, 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_status_is_observable() {
        let h = harness(true);
        let mut status = h.link.watch_status();
        h.link.connect().await.unwrap();
        status.changed().await.unwrap();
        assert_eq!(*status.borrow_and_update(), ConnectionState::Connecting);

        h.connector.last_socket().open();
        status.changed().await.unwrap();
        assert_eq!(*status.borrow_and_update(), ConnectionState::Open);
    }

    #[tokio::test(start_paused = true)]
    async fn test_shutdown_stops_manager() {
        let h = harness(true);
        connect_open(&h).await;
        let socket = h.connector.last_socket();

        h.link.shutdown().await;
        assert_eq!(socket.closes().len(), 1);
        assert_eq!(h.link.snapshot().await, Err(LinkError::ManagerGone));
        assert!(!h.link.send_message("late").await);
    }

    #[tokio::test(start_paused = true)]
    async fn test_dropping_all_handles_stops_manager() {
        let h = harness(true);
        connect_open(&h).await;
        let mut status = h.link.watch_status();
        let socket = h.connector.last_socket();

        drop(h.link);
        assert!(status.changed().await.is_ok());
        assert_eq!(*status.borrow(), ConnectionState::Closed);
        assert_eq!(socket.closes().len(), 1);
    }
}
