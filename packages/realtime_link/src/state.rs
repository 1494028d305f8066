use serde::Serialize;

/// Close code for a normal, self-initiated shutdown.
pub const CLOSE_NORMAL: u16 = 1000;
/// Close code reported when the peer closed without a status code.
pub const CLOSE_NO_STATUS: u16 = 1005;
/// Close code reported when the connection dropped without a close frame.
pub const CLOSE_ABNORMAL: u16 = 1006;
/// Close code the server uses to reject the presented credential.
pub const CLOSE_AUTH_REJECTED: u16 = 4001;

/// Lifecycle state of the link as seen by callers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ConnectionState {
    Closed,
    Connecting,
    Open,
    Error,
}

impl std::fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            ConnectionState::Closed => "CLOSED",
            ConnectionState::Connecting => "CONNECTING",
            ConnectionState::Open => "OPEN",
            ConnectionState::Error => "ERROR",
        };
        f.write_str(s)
    }
}

/// Readiness of a single socket object, mirroring the WebSocket API.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReadyState {
    Connecting,
    Open,
    Closing,
    Closed,
}

impl ReadyState {
    pub fn as_u8(self) -> u8 {
        match self {
            ReadyState::Connecting => 0,
            ReadyState::Open => 1,
            ReadyState::Closing => 2,
            ReadyState::Closed => 3,
        }
    }

    pub fn from_u8(value: u8) -> Self {
        match value {
            0 => ReadyState::Connecting,
            1 => ReadyState::Open,
            2 => ReadyState::Closing,
            _ => ReadyState::Closed,
        }
    }
}

/// Why a socket closed, classified once from the close code.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CloseOutcome {
    /// Code 1000: orderly close, no reconnection.
    Normal { code: u16 },
    /// Code 4001: the server refused the credential.
    AuthRejected,
    /// Anything else: treat as transient network loss.
    Abnormal { code: u16 },
}

impl CloseOutcome {
    pub fn from_code(code: u16) -> Self {
        match code {
            CLOSE_NORMAL => CloseOutcome::Normal { code },
            CLOSE_AUTH_REJECTED => CloseOutcome::AuthRejected,
            code => CloseOutcome::Abnormal { code },
        }
    }

    pub fn code(&self) -> u16 {
        match self {
            CloseOutcome::Normal { code } | CloseOutcome::Abnormal { code } => *code,
            CloseOutcome::AuthRejected => CLOSE_AUTH_REJECTED,
        }
    }
}

/// Environment signals that can re-trigger a connection attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NetworkSignal {
    Online,
    Offline,
    Visibility { visible: bool },
}

/// Point-in-time view of the manager's internals.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LinkSnapshot {
    pub state: ConnectionState,
    pub socket_present: bool,
    pub connecting: bool,
    pub reconnect_attempts: u32,
    pub auth_retry_count: u32,
    pub heartbeat_armed: bool,
    pub pong_timeout_armed: bool,
    pub reconnect_scheduled: bool,
    pub handler_count: usize,
    pub network_online: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_close_outcome_classification() {
        assert_eq!(CloseOutcome::from_code(1000), CloseOutcome::Normal { code: 1000 });
        assert_eq!(CloseOutcome::from_code(4001), CloseOutcome::AuthRejected);
        assert_eq!(
            CloseOutcome::from_code(1006),
            CloseOutcome::Abnormal { code: 1006 }
        );
        assert_eq!(
            CloseOutcome::from_code(4002),
            CloseOutcome::Abnormal { code: 4002 }
        );
        assert_eq!(CloseOutcome::AuthRejected.code(), 4001);
    }

    #[test]
    fn test_unknown_ready_state_reads_as_closed() {
        assert_eq!(ReadyState::from_u8(9), ReadyState::Closed);
    }

    #[test]
    fn test_state_display() {
        assert_eq!(ConnectionState::Connecting.to_string(), "CONNECTING");
        assert_eq!(
            serde_json::to_string(&ConnectionState::Open).unwrap(),
            "\"OPEN\""
        );
    }
}
