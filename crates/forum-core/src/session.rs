//! Process-scoped auth state.
//!
//! Holds the current [`Session`] in a watch channel so views and the runtime's
//! identity follower see sign-in, sign-out and user switches as they happen.

use std::sync::Arc;

use tokio::sync::watch;
use tracing::info;

use crate::gateway::{AuthGateway, GatewayResult, IdentityProvider};
use crate::models::{Identity, Session};

#[derive(Clone)]
pub struct SessionState {
    tx: Arc<watch::Sender<Option<Session>>>,
}

impl SessionState {
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(None);
        Self { tx: Arc::new(tx) }
    }

    pub fn current(&self) -> Option<Session> {
        self.tx.borrow().clone()
    }

    pub fn access_token(&self) -> Option<String> {
        self.tx.borrow().as_ref().map(|s| s.access_token.clone())
    }

    pub fn subscribe(&self) -> watch::Receiver<Option<Session>> {
        self.tx.subscribe()
    }

    /// Install a session obtained elsewhere (e.g. read back from disk).
    pub fn restore(&self, session: Session) {
        self.tx.send_replace(Some(session));
    }

    pub fn clear(&self) {
        self.tx.send_replace(None);
    }

    pub async fn sign_in(
        &self,
        auth: &dyn AuthGateway,
        email: &str,
        password: &str,
    ) -> GatewayResult<Session> {
        let session = auth.sign_in(email, password).await?;
        info!(user_id = %session.user.id, "session established");
        self.restore(session.clone());
        Ok(session)
    }

    pub async fn sign_up(
        &self,
        auth: &dyn AuthGateway,
        email: &str,
        password: &str,
    ) -> GatewayResult<Option<Session>> {
        let session = auth.sign_up(email, password).await?;
        match &session {
            Some(session) => {
                info!(user_id = %session.user.id, "account created");
                self.restore(session.clone());
            }
            None => info!("account created, email confirmation pending"),
        }
        Ok(session)
    }

    /// Ends the session with the backend. On failure the local session is kept.
    pub async fn sign_out(&self, auth: &dyn AuthGateway) -> GatewayResult<()> {
        let Some(session) = self.current() else {
            return Ok(());
        };
        auth.sign_out(&session).await?;
        info!(user_id = %session.user.id, "signed out");
        self.clear();
        Ok(())
    }
}

impl Default for SessionState {
    fn default() -> Self {
        Self::new()
    }
}

impl IdentityProvider for SessionState {
    fn current_identity(&self) -> Option<Identity> {
        self.tx.borrow().as_ref().map(Session::identity)
    }
}
