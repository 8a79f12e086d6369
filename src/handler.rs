//! Session middleware for Salvo

use async_trait::async_trait;
use salvo_core::{Depot, FlowCtrl, Handler, Request, Response};
use std::sync::Arc;

use crate::manager::Manager;
use crate::session::Session;

pub(crate) const SESSION_KEY: &str = "salvo.session.manager";

/// Session middleware for Salvo
///
/// Opens the session before the downstream handlers run and stores it in the
/// depot. Afterwards it destroys or regenerates the session when the handler
/// asked for it, otherwise releases it with
/// [`release_if_present`](Session::release_if_present) so a logout racing
/// with this request is never undone.
pub struct SessionHandler {
    manager: Arc<Manager>,
}

impl SessionHandler {
    /// Create a new session handler
    pub fn new(manager: Arc<Manager>) -> Self {
        Self { manager }
    }

    /// The manager behind this handler
    pub fn manager(&self) -> &Arc<Manager> {
        &self.manager
    }

    async fn finish(&self, session: &Session, res: &mut Response) {
        if session.should_destroy() {
            if let Err(e) = self.manager.session_destroy_id(session.id(), res).await {
                tracing::error!("Failed to destroy session: {}", e);
            }
            return;
        }

        if session.should_regenerate() {
            match self.manager.regenerate_session(session, res).await {
                Ok(renewed) => {
                    if let Err(e) = renewed.release_if_present(res).await {
                        tracing::error!("Failed to save regenerated session: {}", e);
                    }
                }
                Err(e) => tracing::error!("Failed to regenerate session: {}", e),
            }
            return;
        }

        if let Err(e) = session.release_if_present(res).await {
            tracing::error!("Failed to save session: {}", e);
        }
    }
}

impl Clone for SessionHandler {
    fn clone(&self) -> Self {
        Self {
            manager: Arc::clone(&self.manager),
        }
    }
}

#[async_trait]
impl Handler for SessionHandler {
    async fn handle(&self, req: &mut Request, depot: &mut Depot, res: &mut Response, ctrl: &mut FlowCtrl) {
        let candidate = self.manager.read_credential(&*req);

        let session = match self.manager.session_start_with(candidate, res).await {
            Ok(session) => session,
            Err(e) => {
                // carry on without session state
                tracing::error!("Failed to start session: {}", e);
                ctrl.call_next(req, depot, res).await;
                return;
            }
        };

        depot.insert(SESSION_KEY, session.clone());
        ctrl.call_next(req, depot, res).await;
        self.finish(&session, res).await;
    }
}
