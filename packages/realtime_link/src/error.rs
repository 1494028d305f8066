//! Error types for the realtime link.

/// Failures surfaced by the link's transport boundary.
///
/// Most of these never escape the connection manager: construction failures
/// collapse into `ConnectionState::Error`, send failures into a `false`
/// return. They exist as values so connectors and tests can report them.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum LinkError {
    #[error("invalid websocket url: {0}")]
    InvalidUrl(String),

    #[error("socket is not open")]
    NotOpen,

    #[error("send failed: {0}")]
    SendFailed(String),

    #[error("close failed: {0}")]
    CloseFailed(String),

    #[error("connection manager is no longer running")]
    ManagerGone,
}

impl LinkError {
    pub fn error_code(&self) -> &str {
        match self {
            Self::InvalidUrl(_) => "invalid_url",
            Self::NotOpen => "not_open",
            Self::SendFailed(_) => "send_failed",
            Self::CloseFailed(_) => "close_failed",
            Self::ManagerGone => "manager_gone",
        }
    }
}
