//! Terminal renditions of the user-facing collaborators: toasts and notices
//! go to stderr, a terminated session clears the stored credentials.

use std::sync::Arc;

use async_trait::async_trait;
use realtime_handlers::Notifier;
use realtime_link::session::login_redirect;
use realtime_link::{ErrorSurface, SessionStore, SessionTerminator};
use tracing::{error, warn};

pub struct ConsoleSurface;

impl ErrorSurface for ConsoleSurface {
    fn error(&self, message: &str) {
        error!(message, "realtime error");
        eprintln!("[error] {message}");
    }

    fn warning(&self, message: &str) {
        warn!(message, "realtime warning");
        eprintln!("[warning] {message}");
    }
}

pub struct ConsoleNotifier;

impl Notifier for ConsoleNotifier {
    fn notify(&self, title: &str, content: &str) {
        eprintln!();
        eprintln!("  ┌ {title}");
        for line in content.lines() {
            eprintln!("  │ {line}");
        }
        eprintln!("  └");
    }
}

/// Ends the session the way a browser would send the user back to login:
/// credentials are dropped and the login route (with the current route to
/// restore) is printed.
pub struct ConsoleTerminator {
    session: Arc<SessionStore>,
    route: String,
}

impl ConsoleTerminator {
    pub fn new(session: Arc<SessionStore>, route: impl Into<String>) -> Self {
        Self {
            session,
            route: route.into(),
        }
    }

    pub fn redirect(&self) -> String {
        login_redirect(&self.route)
    }
}

#[async_trait]
impl SessionTerminator for ConsoleTerminator {
    async fn terminate(&self) {
        self.session.clear_tokens();
        let redirect = self.redirect();
        warn!(%redirect, "session ended");
        eprintln!("Session ended. Sign in again at {redirect} (use `token <access> [refresh]`).");
    }
}
