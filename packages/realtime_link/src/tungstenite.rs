//! Production connector on top of `tokio-tungstenite`.
//!
//! Each socket is a spawned pump task that owns the stream. The manager-side
//! [`TungsteniteSocket`] only holds the shared ready state and a queue into
//! the pump, so `send_text` and `close` never block.
//!
//! Both handshakes are bounded. A peer that never answers the upgrade, or
//! never answers (or acknowledges) a close, still ends in a `Close` event
//! with code 1006.

use std::sync::Arc;
use std::sync::atomic::{AtomicU8, Ordering};
use std::time::Duration;

use futures::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tokio::time::{Instant, sleep_until, timeout};
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::tungstenite::{self, Message};
use tracing::{debug, warn};

use crate::error::LinkError;
use crate::state::{CLOSE_ABNORMAL, CLOSE_NO_STATUS, ReadyState};
use crate::transport::{CloseRequest, Connector, EventSink, Socket, SocketEvent, WireFrame};

/// Upper bound for the opening handshake.
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(10);
/// How long a requested close may wait for the peer before the stream is
/// dropped.
pub const DEFAULT_CLOSE_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Debug, Clone, Copy)]
pub struct TungsteniteConnector {
    connect_timeout: Duration,
    close_timeout: Duration,
}

impl Default for TungsteniteConnector {
    fn default() -> Self {
        Self {
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
            close_timeout: DEFAULT_CLOSE_TIMEOUT,
        }
    }
}

impl TungsteniteConnector {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_timeouts(connect_timeout: Duration, close_timeout: Duration) -> Self {
        Self {
            connect_timeout,
            close_timeout,
        }
    }
}

impl Connector for TungsteniteConnector {
    fn open(&self, url: &str, events: EventSink) -> Result<Box<dyn Socket>, LinkError> {
        let parsed = url::Url::parse(url).map_err(|e| LinkError::InvalidUrl(e.to_string()))?;
        if !matches!(parsed.scheme(), "ws" | "wss") {
            return Err(LinkError::InvalidUrl(format!(
                "unsupported scheme '{}'",
                parsed.scheme()
            )));
        }
        let request = url
            .into_client_request()
            .map_err(|e| LinkError::InvalidUrl(e.to_string()))?;

        let state = Arc::new(AtomicU8::new(ReadyState::Connecting.as_u8()));
        let (outbound_tx, outbound_rx) = mpsc::unbounded_channel();
        tokio::spawn(pump(request, *self, events, state.clone(), outbound_rx));

        Ok(Box::new(TungsteniteSocket {
            state,
            outbound: outbound_tx,
        }))
    }
}

enum Outbound {
    Text(String),
    Close(Option<CloseRequest>),
}

pub struct TungsteniteSocket {
    state: Arc<AtomicU8>,
    outbound: mpsc::UnboundedSender<Outbound>,
}

impl Socket for TungsteniteSocket {
    fn ready_state(&self) -> ReadyState {
        ReadyState::from_u8(self.state.load(Ordering::SeqCst))
    }

    fn send_text(&mut self, text: String) -> Result<(), LinkError> {
        if self.ready_state() != ReadyState::Open {
            return Err(LinkError::NotOpen);
        }
        self.outbound
            .send(Outbound::Text(text))
            .map_err(|_| LinkError::SendFailed("socket task has exited".into()))
    }

    fn close(&mut self, request: Option<CloseRequest>) -> Result<(), LinkError> {
        match self.ready_state() {
            ReadyState::Closing | ReadyState::Closed => return Ok(()),
            ReadyState::Connecting | ReadyState::Open => {}
        }
        self.state
            .store(ReadyState::Closing.as_u8(), Ordering::SeqCst);
        self.outbound
            .send(Outbound::Close(request))
            .map_err(|_| LinkError::CloseFailed("socket task has exited".into()))
    }
}

async fn pump(
    request: tungstenite::handshake::client::Request,
    limits: TungsteniteConnector,
    events: EventSink,
    state: Arc<AtomicU8>,
    mut outbound: mpsc::UnboundedReceiver<Outbound>,
) {
    let socket_id = events.id();
    let handshake = timeout(
        limits.connect_timeout,
        tokio_tungstenite::connect_async(request),
    )
    .await
    .unwrap_or_else(|_| Err(tungstenite::Error::Io(std::io::ErrorKind::TimedOut.into())));
    let ws = match handshake {
        Ok((ws, _)) => ws,
        Err(e) => {
            debug!(socket_id, error = %e, "websocket handshake failed");
            state.store(ReadyState::Closed.as_u8(), Ordering::SeqCst);
            events.emit(SocketEvent::Error(e.to_string()));
            events.emit(SocketEvent::Close {
                code: CLOSE_ABNORMAL,
                reason: String::new(),
            });
            return;
        }
    };

    // A close requested while connecting wins over the open.
    let opened = state
        .compare_exchange(
            ReadyState::Connecting.as_u8(),
            ReadyState::Open.as_u8(),
            Ordering::SeqCst,
            Ordering::SeqCst,
        )
        .is_ok();
    if opened {
        events.emit(SocketEvent::Open);
    }

    let (mut ws_write, mut ws_read) = ws.split();
    let mut close_frame: Option<CloseFrame> = None;
    let mut failed = false;
    let mut outbound_open = true;
    // Set once either side starts closing.
    let mut close_deadline: Option<Instant> = None;

    loop {
        tokio::select! {
            cmd = outbound.recv(), if outbound_open => match cmd {
                Some(Outbound::Text(text)) => {
                    if let Err(e) = ws_write.send(Message::Text(text.into())).await {
                        warn!(socket_id, error = %e, "websocket send failed");
                        events.emit(SocketEvent::Error(e.to_string()));
                    }
                }
                Some(Outbound::Close(request)) => {
                    close_deadline.get_or_insert_with(|| Instant::now() + limits.close_timeout);
                    let frame = request.map(|(code, reason)| CloseFrame {
                        code: CloseCode::from(code),
                        reason: reason.into(),
                    });
                    let _ = timeout(limits.close_timeout, ws_write.send(Message::Close(frame))).await;
                }
                None => {
                    // Manager dropped the socket; finish the handshake quietly.
                    outbound_open = false;
                    close_deadline.get_or_insert_with(|| Instant::now() + limits.close_timeout);
                    let _ = timeout(limits.close_timeout, ws_write.close()).await;
                }
            },
            _ = sleep_until(close_deadline.unwrap_or_else(Instant::now)), if close_deadline.is_some() => {
                debug!(socket_id, "closing handshake timed out, dropping stream");
                failed = true;
                break;
            }
            msg = ws_read.next() => match msg {
                Some(Ok(Message::Text(text))) => {
                    events.emit(SocketEvent::Message(WireFrame::Text(text.to_string())));
                }
                Some(Ok(Message::Binary(bytes))) => {
                    events.emit(SocketEvent::Message(WireFrame::Binary(bytes.to_vec())));
                }
                Some(Ok(Message::Close(frame))) => {
                    state.store(ReadyState::Closing.as_u8(), Ordering::SeqCst);
                    close_deadline.get_or_insert_with(|| Instant::now() + limits.close_timeout);
                    close_frame = frame;
                }
                // Protocol-level ping/pong is answered by tungstenite itself.
                Some(Ok(_)) => {}
                Some(Err(e)) => {
                    debug!(socket_id, error = %e, "websocket read failed");
                    failed = true;
                    events.emit(SocketEvent::Error(e.to_string()));
                    break;
                }
                None => break,
            },
        }
    }

    state.store(ReadyState::Closed.as_u8(), Ordering::SeqCst);
    let (code, reason) = match close_frame {
        Some(frame) => (u16::from(frame.code), frame.reason.to_string()),
        None if failed => (CLOSE_ABNORMAL, String::new()),
        None => (CLOSE_NO_STATUS, String::new()),
    };
    debug!(socket_id, code, "websocket closed");
    events.emit(SocketEvent::Close { code, reason });
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use tokio::net::TcpListener;

    use super::*;
    use crate::manager::LinkEvent;

    async fn next_event(rx: &mut mpsc::UnboundedReceiver<LinkEvent>) -> SocketEvent {
        let event = tokio::time::timeout(Duration::from_secs(5), rx.recv())
            .await
            .expect("timed out waiting for socket event")
            .expect("event channel closed");
        match event {
            LinkEvent::Socket { event, .. } => event,
            _ => panic!("expected a socket event"),
        }
    }

    /// Echo server that rejects the session with 4001 when it sees "bye".
    async fn spawn_echo_server() -> String {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            let (stream, _) = listener.accept().await.unwrap();
            let ws = tokio_tungstenite::accept_async(stream).await.unwrap();
            let (mut write, mut read) = ws.split();
            while let Some(Ok(msg)) = read.next().await {
                match msg {
                    Message::Text(text) if text.as_str() == "bye" => {
                        let frame = CloseFrame {
                            code: CloseCode::from(4001),
                            reason: "token expired".into(),
                        };
                        let _ = write.send(Message::Close(Some(frame))).await;
                    }
                    Message::Text(text) => {
                        let _ = write.send(Message::Text(text)).await;
                    }
                    _ => {}
                }
            }
        });
        format!("ws://{addr}/infra/ws?token=abc")
    }

    #[test]
    fn test_rejects_non_websocket_urls() {
        let (tx, _rx) = mpsc::unbounded_channel::<LinkEvent>();
        let connector = TungsteniteConnector::new();
        let err = connector
            .open("not a url", EventSink::new(1, tx.downgrade()))
            .err()
            .unwrap();
        assert_eq!(err.error_code(), "invalid_url");

        let err = connector
            .open("http://example.com/infra/ws", EventSink::new(2, tx.downgrade()))
            .err()
            .unwrap();
        assert_eq!(err.error_code(), "invalid_url");
    }

    #[tokio::test]
    async fn test_open_echo_and_server_close_code() {
        let url = spawn_echo_server().await;
        let (tx, mut rx) = mpsc::unbounded_channel::<LinkEvent>();
        let mut socket = TungsteniteConnector::new()
            .open(&url, EventSink::new(1, tx.downgrade()))
            .unwrap();
        assert_eq!(socket.send_text("early".into()), Err(LinkError::NotOpen));

        assert_eq!(next_event(&mut rx).await, SocketEvent::Open);
        assert_eq!(socket.ready_state(), ReadyState::Open);

        socket.send_text("hello".into()).unwrap();
        assert_eq!(
            next_event(&mut rx).await,
            SocketEvent::Message(WireFrame::Text("hello".into()))
        );

        socket.send_text("bye".into()).unwrap();
        assert_eq!(
            next_event(&mut rx).await,
            SocketEvent::Close {
                code: 4001,
                reason: "token expired".into()
            }
        );
        assert_eq!(socket.ready_state(), ReadyState::Closed);
    }

    #[tokio::test]
    async fn test_client_close_with_code() {
        let url = spawn_echo_server().await;
        let (tx, mut rx) = mpsc::unbounded_channel::<LinkEvent>();
        let mut socket = TungsteniteConnector::new()
            .open(&url, EventSink::new(1, tx.downgrade()))
            .unwrap();
        assert_eq!(next_event(&mut rx).await, SocketEvent::Open);

        socket.close(Some((1000, "done".into()))).unwrap();
        assert_eq!(socket.ready_state(), ReadyState::Closing);
        match next_event(&mut rx).await {
            SocketEvent::Close { code, .. } => assert_eq!(code, 1000),
            other => panic!("expected close, got {other:?}"),
        }
        // Closing twice is harmless.
        assert!(socket.close(None).is_ok());
    }

    #[tokio::test]
    async fn test_close_to_silent_peer_times_out_as_abnormal() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        // Completes the upgrade, then neither reads nor writes.
        let server = tokio::spawn(async move {
            let (stream, _) = listener.accept().await.unwrap();
            let ws = tokio_tungstenite::accept_async(stream).await.unwrap();
            tokio::time::sleep(Duration::from_secs(30)).await;
            drop(ws);
        });

        let (tx, mut rx) = mpsc::unbounded_channel::<LinkEvent>();
        let connector =
            TungsteniteConnector::with_timeouts(Duration::from_secs(5), Duration::from_millis(200));
        let mut socket = connector
            .open(&format!("ws://{addr}/infra/ws"), EventSink::new(1, tx.downgrade()))
            .unwrap();
        assert_eq!(next_event(&mut rx).await, SocketEvent::Open);

        socket.close(None).unwrap();
        assert_eq!(
            next_event(&mut rx).await,
            SocketEvent::Close {
                code: 1006,
                reason: String::new()
            }
        );
        assert_eq!(socket.ready_state(), ReadyState::Closed);
        server.abort();
    }

    #[tokio::test]
    async fn test_unanswered_upgrade_times_out() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        // Accepts the TCP connection but never answers the upgrade request.
        let server = tokio::spawn(async move {
            let (stream, _) = listener.accept().await.unwrap();
            tokio::time::sleep(Duration::from_secs(30)).await;
            drop(stream);
        });

        let (tx, mut rx) = mpsc::unbounded_channel::<LinkEvent>();
        let connector =
            TungsteniteConnector::with_timeouts(Duration::from_millis(200), Duration::from_secs(5));
        let socket = connector
            .open(&format!("ws://{addr}/infra/ws"), EventSink::new(1, tx.downgrade()))
            .unwrap();

        assert!(matches!(next_event(&mut rx).await, SocketEvent::Error(_)));
        assert_eq!(
            next_event(&mut rx).await,
            SocketEvent::Close {
                code: 1006,
                reason: String::new()
            }
        );
        assert_eq!(socket.ready_state(), ReadyState::Closed);
        server.abort();
    }

    #[tokio::test]
    async fn test_refused_connection_reports_error_then_abnormal_close() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let (tx, mut rx) = mpsc::unbounded_channel::<LinkEvent>();
        let socket = TungsteniteConnector::new()
            .open(&format!("ws://{addr}/infra/ws"), EventSink::new(1, tx.downgrade()))
            .unwrap();

        assert!(matches!(next_event(&mut rx).await, SocketEvent::Error(_)));
        assert_eq!(
            next_event(&mut rx).await,
            SocketEvent::Close {
                code: 1006,
                reason: String::new()
            }
        );
        assert_eq!(socket.ready_state(), ReadyState::Closed);
    }
}
