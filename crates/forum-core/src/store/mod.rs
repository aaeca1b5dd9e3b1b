pub mod engagement;
pub mod forum_store;

pub use engagement::{EngagementSync, SyncError};
pub use forum_store::{ForumError, ForumStore, ThreadDetails, ThreadView};
