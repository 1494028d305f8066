//! Shared mocks for the link's unit tests.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use tokio::sync::Notify;

use crate::error::LinkError;
use crate::session::{ErrorSurface, SessionTerminator, TokenRefresher};
use crate::state::ReadyState;
use crate::transport::{CloseRequest, Connector, EventSink, Socket, SocketEvent, WireFrame};

#[derive(Default)]
pub struct RecordingSurface {
    errors: Mutex<Vec<String>>,
    warnings: Mutex<Vec<String>>,
}

impl RecordingSurface {
    pub fn errors(&self) -> Vec<String> {
        self.errors.lock().unwrap().clone()
    }

    pub fn warnings(&self) -> Vec<String> {
        self.warnings.lock().unwrap().clone()
    }
}

impl ErrorSurface for RecordingSurface {
    fn error(&self, message: &str) {
        self.errors.lock().unwrap().push(message.to_string());
    }

    fn warning(&self, message: &str) {
        self.warnings.lock().unwrap().push(message.to_string());
    }
}

#[derive(Default)]
struct MockSocketState {
    ready: Option<ReadyState>,
    sent: Vec<String>,
    closes: Vec<Option<CloseRequest>>,
    fail_send: bool,
    fail_close: bool,
}

/// Test-side view of a socket the manager owns.
#[derive(Clone)]
pub struct MockSocketHandle {
    state: Arc<Mutex<MockSocketState>>,
    sink: EventSink,
}

impl MockSocketHandle {
    pub fn sent(&self) -> Vec<String> {
        self.state.lock().unwrap().sent.clone()
    }

    pub fn closes(&self) -> Vec<Option<CloseRequest>> {
        self.state.lock().unwrap().closes.clone()
    }

    pub fn ready_state(&self) -> ReadyState {
        self.state
            .lock()
            .unwrap()
            .ready
            .unwrap_or(ReadyState::Connecting)
    }

    pub fn set_fail_send(&self, fail: bool) {
        self.state.lock().unwrap().fail_send = fail;
    }

    pub fn set_fail_close(&self, fail: bool) {
        self.state.lock().unwrap().fail_close = fail;
    }

    /// Complete the handshake.
    pub fn open(&self) {
        self.state.lock().unwrap().ready = Some(ReadyState::Open);
        self.sink.emit(SocketEvent::Open);
    }

    pub fn message(&self, text: &str) {
        self.sink
            .emit(SocketEvent::Message(WireFrame::Text(text.to_string())));
    }

    pub fn error(&self) {
        self.sink.emit(SocketEvent::Error("mock failure".into()));
    }

    /// Report a close with the given code, as the browser would after the
    /// server or the network ended the connection.
    pub fn close(&self, code: u16) {
        self.state.lock().unwrap().ready = Some(ReadyState::Closed);
        self.sink.emit(SocketEvent::Close {
            code,
            reason: String::new(),
        });
    }
}

struct MockSocket {
    state: Arc<Mutex<MockSocketState>>,
}

impl Socket for MockSocket {
    fn ready_state(&self) -> ReadyState {
        self.state
            .lock()
            .unwrap()
            .ready
            .unwrap_or(ReadyState::Connecting)
    }

    fn send_text(&mut self, text: String) -> Result<(), LinkError> {
        let mut state = self.state.lock().unwrap();
        if state.fail_send {
            return Err(LinkError::SendFailed("mock send failure".into()));
        }
        state.sent.push(text);
        Ok(())
    }

    fn close(&mut self, request: Option<CloseRequest>) -> Result<(), LinkError> {
        let mut state = self.state.lock().unwrap();
        state.closes.push(request);
        if state.fail_close {
            return Err(LinkError::CloseFailed("mock close failure".into()));
        }
        state.ready = Some(ReadyState::Closing);
        Ok(())
    }
}

#[derive(Default)]
struct MockConnectorState {
    urls: Vec<String>,
    sockets: Vec<MockSocketHandle>,
}

/// Connector that records every socket it builds.
#[derive(Default)]
pub struct MockConnector {
    state: Mutex<MockConnectorState>,
    fail: AtomicBool,
}

impl MockConnector {
    pub fn set_fail(&self, fail: bool) {
        self.fail.store(fail, Ordering::SeqCst);
    }

    pub fn open_count(&self) -> usize {
        self.state.lock().unwrap().sockets.len()
    }

    pub fn urls(&self) -> Vec<String> {
        self.state.lock().unwrap().urls.clone()
    }

    pub fn socket(&self, index: usize) -> MockSocketHandle {
        self.state.lock().unwrap().sockets[index].clone()
    }

    pub fn last_socket(&self) -> MockSocketHandle {
        let state = self.state.lock().unwrap();
        state.sockets.last().cloned().expect("no socket opened")
    }
}

impl Connector for MockConnector {
    fn open(&self, url: &str, events: EventSink) -> Result<Box<dyn Socket>, LinkError> {
        let mut connector = self.state.lock().unwrap();
        connector.urls.push(url.to_string());
        if self.fail.load(Ordering::SeqCst) {
            return Err(LinkError::InvalidUrl(url.to_string()));
        }
        let state = Arc::new(Mutex::new(MockSocketState::default()));
        connector.sockets.push(MockSocketHandle {
            state: state.clone(),
            sink: events,
        });
        Ok(Box::new(MockSocket { state }))
    }
}

/// Refresher with a fixed outcome that counts its calls. A gated one holds
/// each refresh until [`release`](Self::release).
pub struct MockRefresher {
    succeed: AtomicBool,
    calls: AtomicUsize,
    gate: Option<Notify>,
}

impl MockRefresher {
    pub fn new(succeed: bool) -> Self {
        Self {
            succeed: AtomicBool::new(succeed),
            calls: AtomicUsize::new(0),
            gate: None,
        }
    }

    pub fn gated(succeed: bool) -> Self {
        Self {
            gate: Some(Notify::new()),
            ..Self::new(succeed)
        }
    }

    pub fn release(&self) {
        if let Some(gate) = &self.gate {
            gate.notify_one();
        }
    }

    pub fn set_succeed(&self, succeed: bool) {
        self.succeed.store(succeed, Ordering::SeqCst);
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl TokenRefresher for MockRefresher {
    async fn refresh(&self) -> anyhow::Result<()> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if let Some(gate) = &self.gate {
            gate.notified().await;
        }
        if self.succeed.load(Ordering::SeqCst) {
            Ok(())
        } else {
            anyhow::bail!("refresh token expired")
        }
    }
}

#[derive(Default)]
pub struct CountingTerminator {
    calls: AtomicUsize,
}

impl CountingTerminator {
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl SessionTerminator for CountingTerminator {
    async fn terminate(&self) {
        self.calls.fetch_add(1, Ordering::SeqCst);
    }
}

/// Let spawned tasks (socket events, collaborator calls) run to completion
/// without advancing the paused clock.
pub async fn settle() {
    for _ in 0..64 {
        tokio::task::yield_now().await;
    }
}
