use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};

/// Moderation status of a thread. Only open threads take new replies.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ThreadStatus {
    #[default]
    Open,
    Closed,
    Solved,
}

impl ThreadStatus {
    pub const ALL: [ThreadStatus; 3] = [ThreadStatus::Open, ThreadStatus::Closed, ThreadStatus::Solved];

    pub fn as_str(self) -> &'static str {
        match self {
            ThreadStatus::Open => "open",
            ThreadStatus::Closed => "closed",
            ThreadStatus::Solved => "solved",
        }
    }

    pub fn accepts_replies(self) -> bool {
        matches!(self, ThreadStatus::Open)
    }
}

impl fmt::Display for ThreadStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown thread status '{0}' (expected open, closed or solved)")]
pub struct UnknownStatus(pub String);

impl FromStr for ThreadStatus {
    type Err = UnknownStatus;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let lowered = s.trim().to_ascii_lowercase();
        ThreadStatus::ALL
            .into_iter()
            .find(|status| status.as_str() == lowered)
            .ok_or_else(|| UnknownStatus(s.to_string()))
    }
}

/// Rows written by older clients may carry a status we don't know; treat those as open.
fn lenient_status<'de, D>(deserializer: D) -> Result<ThreadStatus, D::Error>
where
    D: Deserializer<'de>,
{
    let raw = Option::<String>::deserialize(deserializer)?;
    Ok(raw
        .and_then(|s| s.parse().ok())
        .unwrap_or_default())
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuthorProfile {
    #[serde(default)]
    pub email: Option<String>,
}

/// A forum thread as stored by the backend (`forums` table).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Thread {
    pub id: String,
    pub title: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default)]
    pub created_at: Option<DateTime<Utc>>,
    pub user_id: String,
    /// Stored counter. Written blind by clients, so it can drift below zero.
    #[serde(default)]
    pub likes: i64,
    #[serde(default, deserialize_with = "lenient_status")]
    pub status: ThreadStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub profiles: Option<AuthorProfile>,
}

impl Thread {
    pub fn like_count(&self) -> u64 {
        u64::try_from(self.likes).unwrap_or(0)
    }

    pub fn author_email(&self) -> Option<&str> {
        self.profiles.as_ref().and_then(|p| p.email.as_deref())
    }

    pub fn accepts_replies(&self) -> bool {
        self.status.accepts_replies()
    }
}

/// Insert payload for the `forums` table.
#[derive(Debug, Clone, Serialize)]
pub struct NewThread {
    pub title: String,
    pub description: String,
    pub tags: Vec<String>,
    pub user_id: String,
}

/// Split a comma separated tag field, dropping blanks.
pub fn parse_tags(input: &str) -> Vec<String> {
    input
        .split(',')
        .map(str::trim)
        .filter(|tag| !tag.is_empty())
        .map(str::to_string)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_tags() {
        assert_eq!(parse_tags("rust, async ,help"), vec!["rust", "async", "help"]);
        assert_eq!(parse_tags("rust,,  ,"), vec!["rust"]);
        assert!(parse_tags("").is_empty());
    }

    #[test]
    fn test_status_from_str() {
        assert_eq!("open".parse::<ThreadStatus>().unwrap(), ThreadStatus::Open);
        assert_eq!(" Solved ".parse::<ThreadStatus>().unwrap(), ThreadStatus::Solved);
        assert!("archived".parse::<ThreadStatus>().is_err());
        assert!(!ThreadStatus::Closed.accepts_replies());
        assert!(!ThreadStatus::Solved.accepts_replies());
        assert!(ThreadStatus::Open.accepts_replies());
    }

    #[test]
    fn test_thread_row_decoding() {
        let json = r#"{
            "id": "t1",
            "title": "Borrow checker question",
            "description": "Why does this not compile?",
            "tags": ["rust", "help"],
            "created_at": "2024-03-01T10:00:00+00:00",
            "user_id": "u1",
            "likes": 3,
            "status": "solved",
            "profiles": {"email": "a@example.com"}
        }"#;
        let thread: Thread = serde_json::from_str(json).unwrap();
        assert_eq!(thread.status, ThreadStatus::Solved);
        assert_eq!(thread.like_count(), 3);
        assert_eq!(thread.author_email(), Some("a@example.com"));
        assert!(!thread.accepts_replies());
    }

    #[test]
    fn test_thread_row_tolerates_odd_values() {
        let json = r#"{"id": "t2", "title": "x", "user_id": "u1", "likes": -2, "status": "weird"}"#;
        let thread: Thread = serde_json::from_str(json).unwrap();
        assert_eq!(thread.status, ThreadStatus::Open);
        assert_eq!(thread.like_count(), 0);
        assert!(thread.tags.is_empty());

        let json = r#"{"id": "t3", "title": "x", "user_id": "u1", "status": null}"#;
        let thread: Thread = serde_json::from_str(json).unwrap();
        assert_eq!(thread.status, ThreadStatus::Open);
    }
}
