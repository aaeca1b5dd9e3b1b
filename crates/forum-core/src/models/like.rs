use serde::{Deserialize, Serialize};

/// One identity liking one thread. The backend keeps at most one per pair.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct LikeEdge {
    pub user_id: String,
    pub forum_id: String,
}

impl LikeEdge {
    pub fn new(user_id: impl Into<String>, forum_id: impl Into<String>) -> Self {
        Self {
            user_id: user_id.into(),
            forum_id: forum_id.into(),
        }
    }
}
