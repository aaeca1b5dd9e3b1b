//! Boundary to the hosted backend.
//!
//! The backend owns every table; the core only talks to it through these
//! traits. `RestGateway` speaks the hosted REST API, `MemoryGateway` keeps the
//! same tables in process.

pub mod memory;
pub mod rest;

use async_trait::async_trait;
use thiserror::Error;

use crate::models::{Identity, LikeEdge, NewReply, NewThread, Reply, Session, Thread, ThreadStatus};

pub use memory::{GatewayOp, MemoryGateway, PauseGate};
pub use rest::RestGateway;

#[derive(Debug, Error)]
pub enum GatewayError {
    #[error("query failed: {0}")]
    QueryFailed(String),
    #[error("insert failed: {0}")]
    InsertFailed(String),
    #[error("like for thread {thread_id} already exists")]
    DuplicateLike { thread_id: String },
    #[error("delete failed: {0}")]
    DeleteFailed(String),
    #[error("update failed: {0}")]
    UpdateFailed(String),
    #[error("{0} not found")]
    NotFound(String),
    #[error("authentication failed: {0}")]
    AuthFailed(String),
    #[error("transport error: {0}")]
    Transport(#[from] reqwest::Error),
    #[error("could not decode backend response: {0}")]
    Decode(String),
}

pub type GatewayResult<T> = Result<T, GatewayError>;

/// Who is acting right now, if anyone.
pub trait IdentityProvider: Send + Sync {
    fn current_identity(&self) -> Option<Identity>;
}

/// Like edges and the denormalized like counter on threads.
///
/// The backend has no atomic toggle: an edge write and a counter write are two
/// independent calls, and the counter is set to an absolute value.
#[async_trait]
pub trait EngagementGateway: Send + Sync {
    async fn query_like_edges(&self, identity: &Identity) -> GatewayResult<Vec<LikeEdge>>;

    /// Fails with `DuplicateLike` when the pair already exists.
    async fn insert_like_edge(&self, identity: &Identity, thread_id: &str) -> GatewayResult<()>;

    async fn delete_like_edge(&self, identity: &Identity, thread_id: &str) -> GatewayResult<()>;

    async fn set_thread_like_count(&self, thread_id: &str, value: u64) -> GatewayResult<()>;
}

#[async_trait]
pub trait ForumGateway: Send + Sync {
    /// All threads, newest first.
    async fn list_threads(&self) -> GatewayResult<Vec<Thread>>;

    async fn get_thread(&self, thread_id: &str) -> GatewayResult<Thread>;

    async fn create_thread(&self, thread: &NewThread) -> GatewayResult<Thread>;

    /// Replies of one thread, oldest first.
    async fn list_replies(&self, thread_id: &str) -> GatewayResult<Vec<Reply>>;

    async fn create_reply(&self, reply: &NewReply) -> GatewayResult<()>;

    async fn set_thread_status(&self, thread_id: &str, status: ThreadStatus) -> GatewayResult<()>;

    async fn delete_thread(&self, thread_id: &str) -> GatewayResult<()>;

    async fn is_admin(&self, identity: &Identity) -> GatewayResult<bool>;
}

#[async_trait]
pub trait AuthGateway: Send + Sync {
    async fn sign_in(&self, email: &str, password: &str) -> GatewayResult<Session>;

    /// `None` when the backend wants the address confirmed before issuing a session.
    async fn sign_up(&self, email: &str, password: &str) -> GatewayResult<Option<Session>>;

    async fn sign_out(&self, session: &Session) -> GatewayResult<()>;
}
