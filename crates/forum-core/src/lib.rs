pub mod config;
pub mod constants;
pub mod events;
pub mod gateway;
pub mod models;
pub mod runtime;
pub mod search;
pub mod session;
pub mod store;
pub mod tracing_setup;

pub use config::CoreConfig;
pub use events::{EngagementUpdate, LikeState, UpdatePhase};
pub use runtime::CoreRuntime;
pub use session::SessionState;
pub use store::{EngagementSync, ForumError, ForumStore, SyncError};
