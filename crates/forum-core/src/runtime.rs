use std::sync::Arc;

use anyhow::Result;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::config::CoreConfig;
use crate::gateway::{AuthGateway, EngagementGateway, ForumGateway, GatewayResult, RestGateway};
use crate::models::{Identity, Session};
use crate::session::SessionState;
use crate::store::{EngagementSync, ForumStore, SyncError};

/// Wires session, gateway, like mirror and forum store together.
pub struct CoreRuntime {
    config: CoreConfig,
    session: SessionState,
    auth: Arc<dyn AuthGateway>,
    engagement: Arc<EngagementSync>,
    forum: Arc<ForumStore>,
    follower_handle: Option<JoinHandle<()>>,
}

/// Reload likes whenever the signed-in identity changes, starting with the current one.
async fn follow_identity(
    mut session_rx: watch::Receiver<Option<Session>>,
    engagement: Arc<EngagementSync>,
) {
    let mut current: Option<Identity> = session_rx.borrow_and_update().as_ref().map(Session::identity);
    if let Err(e) = engagement.hydrate(current.as_ref()).await {
        warn!(error = %e, "initial like load failed");
    }

    while session_rx.changed().await.is_ok() {
        let next = session_rx.borrow_and_update().as_ref().map(Session::identity);
        if next == current {
            continue;
        }
        debug!(from = ?current, to = ?next, "identity changed");
        current = next;
        if let Err(e) = engagement.hydrate(current.as_ref()).await {
            warn!(error = %e, "like load after identity change failed");
        }
    }
}

impl CoreRuntime {
    /// Runtime against the hosted backend described by `config`.
    pub fn new(config: CoreConfig) -> Result<Self> {
        let session = SessionState::new();
        let gateway = Arc::new(RestGateway::new(&config, session.clone())?);
        Ok(Self::with_gateway(config, session, gateway))
    }

    pub fn with_gateway<G>(config: CoreConfig, session: SessionState, gateway: Arc<G>) -> Self
    where
        G: EngagementGateway + ForumGateway + AuthGateway + 'static,
    {
        let identity = Arc::new(session.clone());
        let engagement = Arc::new(EngagementSync::new(
            gateway.clone(),
            identity.clone(),
            config.update_capacity,
        ));
        let forum = Arc::new(ForumStore::new(
            gateway.clone(),
            engagement.clone(),
            identity,
            config.load_timeout,
        ));
        Self {
            config,
            session,
            auth: gateway,
            engagement,
            forum,
            follower_handle: None,
        }
    }

    /// Spawn the identity follower. Needs a running tokio runtime.
    pub fn start_identity_follower(&mut self) {
        if self.follower_handle.is_some() {
            return;
        }
        let session_rx = self.session.subscribe();
        let engagement = self.engagement.clone();
        self.follower_handle = Some(tokio::spawn(follow_identity(session_rx, engagement)));
    }

    pub fn config(&self) -> &CoreConfig {
        &self.config
    }

    pub fn session(&self) -> &SessionState {
        &self.session
    }

    pub fn engagement(&self) -> Arc<EngagementSync> {
        self.engagement.clone()
    }

    pub fn forum(&self) -> Arc<ForumStore> {
        self.forum.clone()
    }

    pub async fn sign_in(&self, email: &str, password: &str) -> GatewayResult<Session> {
        self.session.sign_in(self.auth.as_ref(), email, password).await
    }

    pub async fn sign_up(&self, email: &str, password: &str) -> GatewayResult<Option<Session>> {
        self.session.sign_up(self.auth.as_ref(), email, password).await
    }

    pub async fn sign_out(&self) -> GatewayResult<()> {
        self.session.sign_out(self.auth.as_ref()).await
    }

    /// Load likes for whoever is signed in right now, without the follower.
    pub async fn hydrate_current(&self) -> Result<(), SyncError> {
        let identity = self.session.current().map(|s| s.identity());
        self.engagement.hydrate(identity.as_ref()).await
    }

    pub fn shutdown(&mut self) {
        if let Some(handle) = self.follower_handle.take() {
            handle.abort();
        }
    }
}
