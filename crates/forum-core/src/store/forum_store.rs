use std::sync::Arc;
use std::time::Duration;

use parking_lot::RwLock;
use serde::Serialize;
use thiserror::Error;
use tracing::{debug, info};

use super::engagement::{EngagementSync, SyncError};
use crate::events::LikeState;
use crate::gateway::{ForumGateway, GatewayError, IdentityProvider};
use crate::models::{Identity, NewReply, NewThread, Reply, Thread, ThreadStatus};
use crate::search;

#[derive(Debug, Error)]
pub enum ForumError {
    #[error("please sign in first")]
    NotSignedIn,
    #[error("admin rights required")]
    NotAdmin,
    #[error("thread is {status}, new replies are closed")]
    ThreadClosed { status: ThreadStatus },
    #[error("{0} must not be empty")]
    EmptyField(&'static str),
    #[error("thread {0} is not loaded")]
    UnknownThread(String),
    #[error("loading timed out after {0:?}, please try again later")]
    Timeout(Duration),
    #[error(transparent)]
    Gateway(#[from] GatewayError),
    #[error(transparent)]
    Engagement(#[from] SyncError),
}

/// A thread as the presentation layer shows it: the row with the mirrored
/// like counter folded in, plus the current user's membership.
#[derive(Debug, Clone, Serialize)]
pub struct ThreadView {
    #[serde(flatten)]
    pub thread: Thread,
    pub liked: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct ThreadDetails {
    pub thread: ThreadView,
    pub replies: Vec<Reply>,
}

/// Thread list, details, posting and moderation.
///
/// Like counters are never written here; likes go through [`EngagementSync`].
pub struct ForumStore {
    gateway: Arc<dyn ForumGateway>,
    engagement: Arc<EngagementSync>,
    identity: Arc<dyn IdentityProvider>,
    load_timeout: Duration,
    /// Last loaded list, newest first
    threads: RwLock<Vec<Thread>>,
}

impl ForumStore {
    pub fn new(
        gateway: Arc<dyn ForumGateway>,
        engagement: Arc<EngagementSync>,
        identity: Arc<dyn IdentityProvider>,
        load_timeout: Duration,
    ) -> Self {
        Self {
            gateway,
            engagement,
            identity,
            load_timeout,
            threads: RwLock::new(Vec::new()),
        }
    }

    pub fn engagement(&self) -> &Arc<EngagementSync> {
        &self.engagement
    }

    fn require_identity(&self) -> Result<Identity, ForumError> {
        self.identity.current_identity().ok_or(ForumError::NotSignedIn)
    }

    async fn require_admin(&self) -> Result<Identity, ForumError> {
        let identity = self.require_identity()?;
        if !self.gateway.is_admin(&identity).await? {
            return Err(ForumError::NotAdmin);
        }
        Ok(identity)
    }

    fn view(&self, thread: &Thread) -> ThreadView {
        let state = self.engagement.view(thread);
        let mut thread = thread.clone();
        thread.likes = i64::try_from(state.like_count).unwrap_or(i64::MAX);
        ThreadView {
            thread,
            liked: state.liked,
        }
    }

    fn upsert_cached(&self, thread: &Thread) {
        let mut threads = self.threads.write();
        match threads.iter_mut().find(|t| t.id == thread.id) {
            Some(existing) => *existing = thread.clone(),
            None => threads.insert(0, thread.clone()),
        }
    }

    // ===== Reading =====

    /// Reload the thread list, giving up after the configured loading timeout.
    pub async fn refresh(&self) -> Result<Vec<ThreadView>, ForumError> {
        let threads = tokio::time::timeout(self.load_timeout, self.gateway.list_threads())
            .await
            .map_err(|_| ForumError::Timeout(self.load_timeout))??;
        debug!(count = threads.len(), "threads loaded");
        self.engagement.observe_threads(&threads);
        *self.threads.write() = threads;
        Ok(self.threads())
    }

    pub fn threads(&self) -> Vec<ThreadView> {
        self.threads.read().iter().map(|t| self.view(t)).collect()
    }

    pub fn search(&self, query: &str) -> Vec<ThreadView> {
        let threads = self.threads.read();
        search::filter_threads(&threads, query)
            .into_iter()
            .map(|t| self.view(t))
            .collect()
    }

    pub fn cached_thread(&self, thread_id: &str) -> Option<ThreadView> {
        self.threads
            .read()
            .iter()
            .find(|t| t.id == thread_id)
            .map(|t| self.view(t))
    }

    pub async fn details(&self, thread_id: &str) -> Result<ThreadDetails, ForumError> {
        let thread = self.gateway.get_thread(thread_id).await?;
        let replies = self.gateway.list_replies(thread_id).await?;
        self.engagement.observe(&thread.id, thread.like_count());
        self.upsert_cached(&thread);
        Ok(ThreadDetails {
            thread: self.view(&thread),
            replies,
        })
    }

    // ===== Posting =====

    pub async fn create_thread(
        &self,
        title: &str,
        description: &str,
        tags: Vec<String>,
    ) -> Result<ThreadView, ForumError> {
        let identity = self.require_identity()?;
        let title = title.trim();
        let description = description.trim();
        if title.is_empty() {
            return Err(ForumError::EmptyField("title"));
        }
        if description.is_empty() {
            return Err(ForumError::EmptyField("description"));
        }

        let thread = self
            .gateway
            .create_thread(&NewThread {
                title: title.to_string(),
                description: description.to_string(),
                tags,
                user_id: identity.as_str().to_string(),
            })
            .await?;
        info!(thread_id = %thread.id, "thread created");
        self.engagement.observe(&thread.id, thread.like_count());
        self.upsert_cached(&thread);
        Ok(self.view(&thread))
    }

    /// Post a reply and return the thread's replies afterwards.
    /// Closed and solved threads take no new replies.
    pub async fn post_reply(&self, thread_id: &str, content: &str) -> Result<Vec<Reply>, ForumError> {
        let identity = self.require_identity()?;
        let content = content.trim();
        if content.is_empty() {
            return Err(ForumError::EmptyField("reply"));
        }

        let thread = self.gateway.get_thread(thread_id).await?;
        self.upsert_cached(&thread);
        if !thread.accepts_replies() {
            return Err(ForumError::ThreadClosed {
                status: thread.status,
            });
        }

        self.gateway
            .create_reply(&NewReply {
                content: content.to_string(),
                forum_id: thread_id.to_string(),
                user_id: identity.as_str().to_string(),
            })
            .await?;
        info!(thread_id, "reply posted");
        Ok(self.gateway.list_replies(thread_id).await?)
    }

    // ===== Likes =====

    /// Toggle the current user's like using the last counter this store saw.
    pub async fn toggle_like(&self, thread_id: &str) -> Result<LikeState, ForumError> {
        let known = match self.engagement.like_count(thread_id) {
            Some(count) => count,
            None => self
                .cached_thread(thread_id)
                .map(|view| view.thread.like_count())
                .ok_or_else(|| ForumError::UnknownThread(thread_id.to_string()))?,
        };
        Ok(self.engagement.toggle(thread_id, known).await?)
    }

    // ===== Moderation =====

    pub async fn is_admin(&self) -> Result<bool, ForumError> {
        match self.identity.current_identity() {
            Some(identity) => Ok(self.gateway.is_admin(&identity).await?),
            None => Ok(false),
        }
    }

    pub async fn set_status(&self, thread_id: &str, status: ThreadStatus) -> Result<(), ForumError> {
        let admin = self.require_admin().await?;
        self.gateway.set_thread_status(thread_id, status).await?;
        if let Some(thread) = self.threads.write().iter_mut().find(|t| t.id == thread_id) {
            thread.status = status;
        }
        info!(thread_id, %status, admin = %admin, "thread status updated");
        Ok(())
    }

    pub async fn delete_thread(&self, thread_id: &str) -> Result<(), ForumError> {
        let admin = self.require_admin().await?;
        self.gateway.delete_thread(thread_id).await?;
        self.threads.write().retain(|t| t.id != thread_id);
        self.engagement.forget(thread_id);
        info!(thread_id, admin = %admin, "thread deleted");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gateway::{GatewayOp, MemoryGateway};
    use crate::models::{Session, SessionUser};
    use crate::session::SessionState;

    fn sign_in(session: &SessionState, user_id: &str) {
        session.restore(Session {
            access_token: format!("token-{user_id}"),
            refresh_token: None,
            user: SessionUser {
                id: user_id.to_string(),
                email: Some(format!("{user_id}@example.com")),
            },
        });
    }

    fn setup() -> (Arc<MemoryGateway>, SessionState, ForumStore) {
        let gateway = Arc::new(MemoryGateway::new());
        let session = SessionState::new();
        let identity: Arc<dyn IdentityProvider> = Arc::new(session.clone());
        let engagement = Arc::new(EngagementSync::new(gateway.clone(), identity.clone(), 16));
        let store = ForumStore::new(
            gateway.clone(),
            engagement,
            identity,
            Duration::from_secs(5),
        );
        (gateway, session, store)
    }

    #[tokio::test]
    async fn test_refresh_and_search() {
        let (gateway, _session, store) = setup();
        gateway.seed_thread("t1", 2);
        gateway.add_thread(Thread {
            id: "t3".to_string(),
            title: "Pinning".to_string(),
            tags: vec!["async".to_string()],
            ..gateway.thread("t1").unwrap()
        });
        gateway.seed_thread("t2", 0);

        let threads = store.refresh().await.unwrap();
        assert_eq!(threads.len(), 3);
        assert_eq!(threads[0].thread.id, "t2");
        assert_eq!(store.search("ASYNC").len(), 1);
        assert_eq!(store.search("").len(), 3);
    }

    #[tokio::test]
    async fn test_refresh_times_out() {
        let (gateway, session, _) = setup();
        gateway.set_latency(Duration::from_millis(200));
        let identity: Arc<dyn IdentityProvider> = Arc::new(session);
        let engagement = Arc::new(EngagementSync::new(gateway.clone(), identity.clone(), 16));
        let store = ForumStore::new(gateway, engagement, identity, Duration::from_millis(20));

        let err = store.refresh().await.unwrap_err();
        assert!(matches!(err, ForumError::Timeout(_)));
    }

    #[tokio::test]
    async fn test_toggle_like_updates_view() {
        let (gateway, session, store) = setup();
        gateway.seed_thread("t1", 3);
        sign_in(&session, "u1");
        store.refresh().await.unwrap();

        let state = store.toggle_like("t1").await.unwrap();
        assert_eq!(state, LikeState { liked: true, like_count: 4 });

        let view = store.cached_thread("t1").unwrap();
        assert!(view.liked);
        assert_eq!(view.thread.like_count(), 4);

        let state = store.toggle_like("t1").await.unwrap();
        assert_eq!(state, LikeState { liked: false, like_count: 3 });
    }

    #[tokio::test]
    async fn test_toggle_like_needs_loaded_thread() {
        let (_gateway, session, store) = setup();
        sign_in(&session, "u1");
        let err = store.toggle_like("ghost").await.unwrap_err();
        assert!(matches!(err, ForumError::UnknownThread(_)));
    }

    #[tokio::test]
    async fn test_reply_rules() {
        let (gateway, session, store) = setup();
        gateway.seed_thread("open", 0);
        gateway.seed_thread("done", 0);
        gateway.set_thread_status("done", ThreadStatus::Solved).await.unwrap();

        let err = store.post_reply("open", "hello").await.unwrap_err();
        assert!(matches!(err, ForumError::NotSignedIn));

        sign_in(&session, "u1");
        let err = store.post_reply("open", "   ").await.unwrap_err();
        assert!(matches!(err, ForumError::EmptyField(_)));

        let err = store.post_reply("done", "too late").await.unwrap_err();
        assert!(matches!(err, ForumError::ThreadClosed { status: ThreadStatus::Solved }));
        assert!(gateway.replies_for("done").is_empty());

        let replies = store.post_reply("open", "  first!  ").await.unwrap();
        assert_eq!(replies.len(), 1);
        assert_eq!(replies[0].content, "first!");
        assert_eq!(replies[0].user_id, "u1");
    }

    #[tokio::test]
    async fn test_create_thread() {
        let (gateway, session, store) = setup();
        gateway.seed_thread("older", 0);
        store.refresh().await.unwrap();

        let err = store
            .create_thread("Title", "Body", Vec::new())
            .await
            .unwrap_err();
        assert!(matches!(err, ForumError::NotSignedIn));

        sign_in(&session, "u1");
        let err = store.create_thread(" ", "Body", Vec::new()).await.unwrap_err();
        assert!(matches!(err, ForumError::EmptyField("title")));

        let created = store
            .create_thread("Pinning futures", "When do I need Pin?", vec!["async".to_string()])
            .await
            .unwrap();
        assert_eq!(created.thread.user_id, "u1");
        assert_eq!(created.thread.status, ThreadStatus::Open);
        assert_eq!(store.threads()[0].thread.id, created.thread.id);
        assert_eq!(store.engagement().like_count(&created.thread.id), Some(0));
    }

    #[tokio::test]
    async fn test_moderation_requires_admin() {
        let (gateway, session, store) = setup();
        gateway.seed_thread("t1", 1);
        store.refresh().await.unwrap();

        let err = store.set_status("t1", ThreadStatus::Closed).await.unwrap_err();
        assert!(matches!(err, ForumError::NotSignedIn));

        sign_in(&session, "u1");
        let err = store.delete_thread("t1").await.unwrap_err();
        assert!(matches!(err, ForumError::NotAdmin));
        assert!(!store.is_admin().await.unwrap());

        gateway.add_admin("u1");
        store.set_status("t1", ThreadStatus::Closed).await.unwrap();
        assert_eq!(gateway.thread("t1").unwrap().status, ThreadStatus::Closed);
        assert_eq!(store.cached_thread("t1").unwrap().thread.status, ThreadStatus::Closed);

        store.delete_thread("t1").await.unwrap();
        assert!(gateway.thread("t1").is_none());
        assert!(store.cached_thread("t1").is_none());
        assert_eq!(store.engagement().like_count("t1"), None);
    }

    #[tokio::test]
    async fn test_gateway_errors_surface() {
        let (gateway, session, store) = setup();
        gateway.seed_thread("t1", 0);
        sign_in(&session, "u1");
        gateway.fail_next(GatewayOp::ListThreads);

        let err = store.refresh().await.unwrap_err();
        assert!(matches!(err, ForumError::Gateway(GatewayError::QueryFailed(_))));
        assert!(store.threads().is_empty());
    }

    #[tokio::test]
    async fn test_details_include_replies_in_order() {
        let (gateway, session, store) = setup();
        gateway.seed_thread("t1", 5);
        sign_in(&session, "u1");
        store.post_reply("t1", "one").await.unwrap();
        store.post_reply("t1", "two").await.unwrap();

        let details = store.details("t1").await.unwrap();
        assert_eq!(details.thread.thread.like_count(), 5);
        let contents: Vec<&str> = details.replies.iter().map(|r| r.content.as_str()).collect();
        assert_eq!(contents, vec!["one", "two"]);
    }
}
