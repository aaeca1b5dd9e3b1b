use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use parking_lot::Mutex;
use tokio::sync::Semaphore;

use super::{AuthGateway, EngagementGateway, ForumGateway, GatewayError, GatewayResult};
use crate::models::{
    AuthorProfile, Identity, LikeEdge, NewReply, NewThread, Reply, Session, SessionUser, Thread,
    ThreadStatus,
};

/// Every call a [`MemoryGateway`] can receive, for failure injection and call logs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum GatewayOp {
    ListThreads,
    GetThread,
    CreateThread,
    ListReplies,
    CreateReply,
    SetStatus,
    DeleteThread,
    IsAdmin,
    QueryLikes,
    InsertLike,
    DeleteLike,
    SetLikeCount,
    SignIn,
    SignUp,
    SignOut,
}

impl GatewayOp {
    fn injected_error(self) -> GatewayError {
        let reason = format!("injected failure in {:?}", self);
        match self {
            GatewayOp::ListThreads
            | GatewayOp::GetThread
            | GatewayOp::ListReplies
            | GatewayOp::IsAdmin
            | GatewayOp::QueryLikes => GatewayError::QueryFailed(reason),
            GatewayOp::CreateThread | GatewayOp::CreateReply | GatewayOp::InsertLike => {
                GatewayError::InsertFailed(reason)
            }
            GatewayOp::DeleteThread | GatewayOp::DeleteLike => GatewayError::DeleteFailed(reason),
            GatewayOp::SetStatus | GatewayOp::SetLikeCount => GatewayError::UpdateFailed(reason),
            GatewayOp::SignIn | GatewayOp::SignUp | GatewayOp::SignOut => {
                GatewayError::AuthFailed(reason)
            }
        }
    }
}

/// Holds calls of one operation in flight until released.
///
/// Each held call adds a permit to `reached`, so a test can wait until a
/// request is really outstanding before poking at local state.
pub struct PauseGate {
    reached: Semaphore,
    release: Semaphore,
}

impl PauseGate {
    fn new() -> Self {
        Self {
            reached: Semaphore::new(0),
            release: Semaphore::new(0),
        }
    }

    /// Wait until `calls` calls are parked at this gate.
    pub async fn reached(&self, calls: u32) {
        if let Ok(permits) = self.reached.acquire_many(calls).await {
            permits.forget();
        }
    }

    /// Let `calls` parked (or future) calls proceed.
    pub fn release(&self, calls: usize) {
        self.release.add_permits(calls);
    }

    async fn hold(&self) {
        self.reached.add_permits(1);
        if let Ok(permit) = self.release.acquire().await {
            permit.forget();
        }
    }
}

#[derive(Default)]
struct Tables {
    threads: Vec<Thread>,
    replies: Vec<Reply>,
    likes: HashSet<(String, String)>,
    admins: HashSet<String>,
    /// email -> (password, user id)
    users: HashMap<String, (String, String)>,
}

impl Tables {
    /// The embedded author profile the backend joins onto rows.
    fn profile(&self, user_id: &str) -> Option<AuthorProfile> {
        self.users
            .iter()
            .find(|(_, (_, id))| id == user_id)
            .map(|(email, _)| AuthorProfile {
                email: Some(email.clone()),
            })
    }
}

#[derive(Default)]
struct Faults {
    /// Ops whose next call fails
    failures: HashSet<GatewayOp>,
    gates: HashMap<GatewayOp, Arc<PauseGate>>,
    latency: Option<Duration>,
    calls: Vec<GatewayOp>,
}

/// In-process stand-in for the hosted backend with the same table rules
/// (unique like edges, replies and likes reference existing threads).
#[derive(Default)]
pub struct MemoryGateway {
    tables: Mutex<Tables>,
    faults: Mutex<Faults>,
}

impl MemoryGateway {
    pub fn new() -> Self {
        Self::default()
    }

    // ===== Seeding =====

    pub fn add_thread(&self, thread: Thread) {
        self.tables.lock().threads.push(thread);
    }

    /// Seed a bare open thread with the given stored counter.
    pub fn seed_thread(&self, id: &str, likes: i64) {
        self.add_thread(Thread {
            id: id.to_string(),
            title: format!("Thread {}", id),
            description: String::new(),
            tags: Vec::new(),
            created_at: Some(Utc::now()),
            user_id: "author".to_string(),
            likes,
            status: ThreadStatus::Open,
            profiles: None,
        });
    }

    pub fn add_like(&self, user_id: &str, thread_id: &str) {
        self.tables
            .lock()
            .likes
            .insert((user_id.to_string(), thread_id.to_string()));
    }

    pub fn add_admin(&self, user_id: &str) {
        self.tables.lock().admins.insert(user_id.to_string());
    }

    pub fn add_user(&self, email: &str, password: &str, user_id: &str) {
        self.tables
            .lock()
            .users
            .insert(email.to_string(), (password.to_string(), user_id.to_string()));
    }

    // ===== Inspection =====

    pub fn thread(&self, thread_id: &str) -> Option<Thread> {
        self.tables
            .lock()
            .threads
            .iter()
            .find(|t| t.id == thread_id)
            .cloned()
    }

    pub fn has_like(&self, user_id: &str, thread_id: &str) -> bool {
        self.tables
            .lock()
            .likes
            .contains(&(user_id.to_string(), thread_id.to_string()))
    }

    pub fn replies_for(&self, thread_id: &str) -> Vec<Reply> {
        self.tables
            .lock()
            .replies
            .iter()
            .filter(|r| r.forum_id.as_deref() == Some(thread_id))
            .cloned()
            .collect()
    }

    pub fn calls(&self) -> Vec<GatewayOp> {
        self.faults.lock().calls.clone()
    }

    // ===== Fault injection =====

    pub fn fail_next(&self, op: GatewayOp) {
        self.faults.lock().failures.insert(op);
    }

    /// Park every future call of `op` until released through the returned gate.
    pub fn pause(&self, op: GatewayOp) -> Arc<PauseGate> {
        let gate = Arc::new(PauseGate::new());
        self.faults.lock().gates.insert(op, gate.clone());
        gate
    }

    pub fn set_latency(&self, latency: Duration) {
        self.faults.lock().latency = Some(latency);
    }

    /// Log the call, apply latency and pause gates, then fire any injected failure.
    async fn checkpoint(&self, op: GatewayOp) -> GatewayResult<()> {
        let (gate, latency) = {
            let mut faults = self.faults.lock();
            faults.calls.push(op);
            (faults.gates.get(&op).cloned(), faults.latency)
        };
        if let Some(latency) = latency {
            tokio::time::sleep(latency).await;
        }
        if let Some(gate) = gate {
            gate.hold().await;
        }
        if self.faults.lock().failures.remove(&op) {
            return Err(op.injected_error());
        }
        Ok(())
    }

    fn session_for(user_id: &str, email: &str) -> Session {
        Session {
            access_token: format!("token-{}", user_id),
            refresh_token: None,
            user: SessionUser {
                id: user_id.to_string(),
                email: Some(email.to_string()),
            },
        }
    }
}

#[async_trait]
impl EngagementGateway for MemoryGateway {
    async fn query_like_edges(&self, identity: &Identity) -> GatewayResult<Vec<LikeEdge>> {
        self.checkpoint(GatewayOp::QueryLikes).await?;
        let tables = self.tables.lock();
        Ok(tables
            .likes
            .iter()
            .filter(|(user, _)| user == identity.as_str())
            .map(|(user, thread)| LikeEdge::new(user.clone(), thread.clone()))
            .collect())
    }

    async fn insert_like_edge(&self, identity: &Identity, thread_id: &str) -> GatewayResult<()> {
        self.checkpoint(GatewayOp::InsertLike).await?;
        let mut tables = self.tables.lock();
        if !tables.threads.iter().any(|t| t.id == thread_id) {
            return Err(GatewayError::InsertFailed(format!(
                "thread {} does not exist",
                thread_id
            )));
        }
        let inserted = tables
            .likes
            .insert((identity.as_str().to_string(), thread_id.to_string()));
        if !inserted {
            return Err(GatewayError::DuplicateLike {
                thread_id: thread_id.to_string(),
            });
        }
        Ok(())
    }

    async fn delete_like_edge(&self, identity: &Identity, thread_id: &str) -> GatewayResult<()> {
        self.checkpoint(GatewayOp::DeleteLike).await?;
        self.tables
            .lock()
            .likes
            .remove(&(identity.as_str().to_string(), thread_id.to_string()));
        Ok(())
    }

    async fn set_thread_like_count(&self, thread_id: &str, value: u64) -> GatewayResult<()> {
        self.checkpoint(GatewayOp::SetLikeCount).await?;
        let mut tables = self.tables.lock();
        if let Some(thread) = tables.threads.iter_mut().find(|t| t.id == thread_id) {
            thread.likes = i64::try_from(value).unwrap_or(i64::MAX);
        }
        Ok(())
    }
}

#[async_trait]
impl ForumGateway for MemoryGateway {
    async fn list_threads(&self) -> GatewayResult<Vec<Thread>> {
        self.checkpoint(GatewayOp::ListThreads).await?;
        Ok(self.tables.lock().threads.iter().rev().cloned().collect())
    }

    async fn get_thread(&self, thread_id: &str) -> GatewayResult<Thread> {
        self.checkpoint(GatewayOp::GetThread).await?;
        self.thread(thread_id)
            .ok_or_else(|| GatewayError::NotFound(format!("thread {}", thread_id)))
    }

    async fn create_thread(&self, thread: &NewThread) -> GatewayResult<Thread> {
        self.checkpoint(GatewayOp::CreateThread).await?;
        let mut tables = self.tables.lock();
        let created = Thread {
            id: uuid::Uuid::new_v4().to_string(),
            title: thread.title.clone(),
            description: thread.description.clone(),
            tags: thread.tags.clone(),
            created_at: Some(Utc::now()),
            user_id: thread.user_id.clone(),
            likes: 0,
            status: ThreadStatus::Open,
            profiles: tables.profile(&thread.user_id),
        };
        tables.threads.push(created.clone());
        Ok(created)
    }

    async fn list_replies(&self, thread_id: &str) -> GatewayResult<Vec<Reply>> {
        self.checkpoint(GatewayOp::ListReplies).await?;
        Ok(self.replies_for(thread_id))
    }

    async fn create_reply(&self, reply: &NewReply) -> GatewayResult<()> {
        self.checkpoint(GatewayOp::CreateReply).await?;
        let mut tables = self.tables.lock();
        if !tables.threads.iter().any(|t| t.id == reply.forum_id) {
            return Err(GatewayError::InsertFailed(format!(
                "thread {} does not exist",
                reply.forum_id
            )));
        }
        let profiles = tables.profile(&reply.user_id);
        tables.replies.push(Reply {
            id: uuid::Uuid::new_v4().to_string(),
            content: reply.content.clone(),
            created_at: Some(Utc::now()),
            forum_id: Some(reply.forum_id.clone()),
            user_id: reply.user_id.clone(),
            profiles,
        });
        Ok(())
    }

    async fn set_thread_status(&self, thread_id: &str, status: ThreadStatus) -> GatewayResult<()> {
        self.checkpoint(GatewayOp::SetStatus).await?;
        let mut tables = self.tables.lock();
        if let Some(thread) = tables.threads.iter_mut().find(|t| t.id == thread_id) {
            thread.status = status;
        }
        Ok(())
    }

    async fn delete_thread(&self, thread_id: &str) -> GatewayResult<()> {
        self.checkpoint(GatewayOp::DeleteThread).await?;
        let mut tables = self.tables.lock();
        tables.threads.retain(|t| t.id != thread_id);
        tables.replies.retain(|r| r.forum_id.as_deref() != Some(thread_id));
        tables.likes.retain(|(_, thread)| thread != thread_id);
        Ok(())
    }

    async fn is_admin(&self, identity: &Identity) -> GatewayResult<bool> {
        self.checkpoint(GatewayOp::IsAdmin).await?;
        Ok(self.tables.lock().admins.contains(identity.as_str()))
    }
}

#[async_trait]
impl AuthGateway for MemoryGateway {
    async fn sign_in(&self, email: &str, password: &str) -> GatewayResult<Session> {
        self.checkpoint(GatewayOp::SignIn).await?;
        let tables = self.tables.lock();
        match tables.users.get(email) {
            Some((stored, user_id)) if stored == password => {
                Ok(Self::session_for(user_id, email))
            }
            _ => Err(GatewayError::AuthFailed("Invalid login credentials".to_string())),
        }
    }

    async fn sign_up(&self, email: &str, password: &str) -> GatewayResult<Option<Session>> {
        self.checkpoint(GatewayOp::SignUp).await?;
        let mut tables = self.tables.lock();
        if tables.users.contains_key(email) {
            return Err(GatewayError::AuthFailed("User already registered".to_string()));
        }
        let user_id = uuid::Uuid::new_v4().to_string();
        tables
            .users
            .insert(email.to_string(), (password.to_string(), user_id.clone()));
        Ok(Some(Self::session_for(&user_id, email)))
    }

    async fn sign_out(&self, _session: &Session) -> GatewayResult<()> {
        self.checkpoint(GatewayOp::SignOut).await
    }
}
