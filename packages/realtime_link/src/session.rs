//! Session collaborators consumed by the link: where the credential comes
//! from, how it gets refreshed, how the session ends, and where
//! user-facing errors go.

use async_trait::async_trait;
use tokio::sync::watch;
use tracing::{error, warn};

/// Route of the login page, used when a terminated session redirects.
pub const LOGIN_PATH: &str = "/auth/login";

/// Read-only view of the credential taken at connect time.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SessionSnapshot {
    pub access_token: Option<String>,
    pub tenant_id: Option<i64>,
    pub visit_tenant_id: Option<i64>,
}

/// Supplies the credential for each connection attempt.
pub trait SessionProvider: Send + Sync {
    fn snapshot(&self) -> SessionSnapshot;
}

/// One-shot credential refresh, invoked when the server rejects the token.
#[async_trait]
pub trait TokenRefresher: Send + Sync {
    async fn refresh(&self) -> anyhow::Result<()>;
}

/// Ends the user session: clears stored credentials and sends the user to
/// the login page.
#[async_trait]
pub trait SessionTerminator: Send + Sync {
    async fn terminate(&self);
}

/// Toast surface for messages the user should see.
pub trait ErrorSurface: Send + Sync {
    fn error(&self, message: &str);
    fn warning(&self, message: &str);
}

/// Surface that only logs. Useful headless and as a default.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingSurface;

impl ErrorSurface for TracingSurface {
    fn error(&self, message: &str) {
        error!(message, "realtime error");
    }

    fn warning(&self, message: &str) {
        warn!(message, "realtime warning");
    }
}

/// Full credential state held in memory.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SessionState {
    pub access_token: Option<String>,
    pub refresh_token: Option<String>,
    pub tenant_id: Option<i64>,
    pub visit_tenant_id: Option<i64>,
}

impl SessionState {
    /// The fields whose change requires a new connection.
    pub fn identity(&self) -> SessionSnapshot {
        SessionSnapshot {
            access_token: self.access_token.clone(),
            tenant_id: self.tenant_id,
            visit_tenant_id: self.visit_tenant_id,
        }
    }
}

/// In-memory session store; observers learn about changes through a watch
/// channel.
pub struct SessionStore {
    tx: watch::Sender<SessionState>,
}

impl SessionStore {
    pub fn new() -> Self {
        Self::with_state(SessionState::default())
    }

    pub fn with_state(state: SessionState) -> Self {
        let (tx, _) = watch::channel(state);
        Self { tx }
    }

    pub fn state(&self) -> SessionState {
        self.tx.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<SessionState> {
        self.tx.subscribe()
    }

    pub fn set_access_token(&self, token: Option<String>) {
        self.tx.send_modify(|s| s.access_token = token);
    }

    /// Store a refreshed pair. A missing refresh token keeps the old one.
    pub fn set_tokens(&self, access_token: String, refresh_token: Option<String>) {
        self.tx.send_modify(|s| {
            s.access_token = Some(access_token);
            if refresh_token.is_some() {
                s.refresh_token = refresh_token;
            }
        });
    }

    pub fn set_refresh_token(&self, token: Option<String>) {
        self.tx.send_modify(|s| s.refresh_token = token);
    }

    pub fn set_tenant(&self, tenant_id: Option<i64>) {
        self.tx.send_modify(|s| s.tenant_id = tenant_id);
    }

    pub fn set_visit_tenant(&self, visit_tenant_id: Option<i64>) {
        self.tx.send_modify(|s| s.visit_tenant_id = visit_tenant_id);
    }

    /// Drop both tokens, keeping tenant selection.
    pub fn clear_tokens(&self) {
        self.tx.send_modify(|s| {
            s.access_token = None;
            s.refresh_token = None;
        });
    }
}

impl Default for SessionStore {
    fn default() -> Self {
        Self::new()
    }
}

impl SessionProvider for SessionStore {
    fn snapshot(&self) -> SessionSnapshot {
        self.tx.borrow().identity()
    }
}

/// `base?token=…[&tenant_id=…][&visit_tenant_id=…]`, or `None` without a
/// token. Values are appended as-is; tokens are URL-safe already.
pub fn build_connect_url(base_url: &str, session: &SessionSnapshot) -> Option<String> {
    let token = session.access_token.as_deref().filter(|t| !t.is_empty())?;
    let mut url = format!("{base_url}?token={token}");
    if let Some(tenant_id) = session.tenant_id {
        url.push_str(&format!("&tenant_id={tenant_id}"));
    }
    if let Some(visit_tenant_id) = session.visit_tenant_id {
        url.push_str(&format!("&visit_tenant_id={visit_tenant_id}"));
    }
    Some(url)
}

/// Login route carrying the current route so it can be restored after login.
pub fn login_redirect(current_route: &str) -> String {
    let encoded: String = url::form_urlencoded::byte_serialize(current_route.as_bytes()).collect();
    format!("{LOGIN_PATH}?redirect={encoded}")
}
