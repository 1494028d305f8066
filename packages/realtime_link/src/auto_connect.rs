//! Keep the link in step with the session: every change of credential or
//! tenant drops the old connection and, when a token is present, opens a
//! new one under the new identity.

use std::future::Future;

use tokio::task::JoinHandle;
use tracing::debug;

use crate::manager::LinkHandle;
use crate::session::{SessionSnapshot, SessionStore};

/// Watch `store` and reconnect `link` on identity changes. `init` runs once,
/// the first time a token is present, before that first connect.
///
/// The task ends when the store is dropped or the manager stops.
pub fn spawn_auto_connect<F, Fut>(store: &SessionStore, link: LinkHandle, init: F) -> JoinHandle<()>
where
    F: FnOnce(LinkHandle) -> Fut + Send + 'static,
    Fut: Future<Output = ()> + Send + 'static,
{
    let mut session = store.subscribe();

    tokio::spawn(async move {
        let mut init = Some(init);
        let mut last: Option<SessionSnapshot> = None;

        loop {
            let identity = session.borrow_and_update().identity();
            // Refresh-token-only changes keep the current connection.
            if last.as_ref() != Some(&identity) {
                last = Some(identity.clone());

                // Drop the old identity's connection before anything else.
                if link.disconnect().await.is_err() {
                    break;
                }

                let has_token = identity
                    .access_token
                    .as_deref()
                    .is_some_and(|token| !token.is_empty());
                if has_token {
                    if let Some(init) = init.take() {
                        debug!("initialising message handlers");
                        init(link.clone()).await;
                    }
                    if link.connect().await.is_err() {
                        break;
                    }
                }
            }

            if session.changed().await.is_err() {
                break;
            }
        }
        debug!("auto-connect stopped");
    })
}
