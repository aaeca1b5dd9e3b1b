use serde::Serialize;

/// Which step of a like change produced an update.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum UpdatePhase {
    /// Applied locally, remote writes still outstanding
    Optimistic,
    /// Both remote writes succeeded
    Confirmed,
    /// A remote write failed and the local change was undone
    RolledBack,
    /// Membership changed because likes were (re)loaded or the user changed
    Hydrated,
}

/// Derived like state of one thread for the current user.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct LikeState {
    pub liked: bool,
    pub like_count: u64,
}

/// Pushed to presentation listeners whenever the mirrored state of a thread moves.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct EngagementUpdate {
    pub thread_id: String,
    pub liked: bool,
    pub like_count: u64,
    pub phase: UpdatePhase,
}

impl EngagementUpdate {
    pub fn state(&self) -> LikeState {
        LikeState {
            liked: self.liked,
            like_count: self.like_count,
        }
    }
}
