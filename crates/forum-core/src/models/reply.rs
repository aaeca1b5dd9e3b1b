use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::thread::AuthorProfile;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Reply {
    pub id: String,
    pub content: String,
    #[serde(default)]
    pub created_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub forum_id: Option<String>,
    pub user_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub profiles: Option<AuthorProfile>,
}

impl Reply {
    pub fn author_email(&self) -> Option<&str> {
        self.profiles.as_ref().and_then(|p| p.email.as_deref())
    }
}

/// Insert payload for the replies table.
#[derive(Debug, Clone, Serialize)]
pub struct NewReply {
    pub content: String,
    pub forum_id: String,
    pub user_id: String,
}
