//! Application-wide constants
//!
//! Table names, embedded selects and defaults shared across modules.

/// How long the thread list may take to load before the UI gives up.
pub const LOADING_TIMEOUT_SECS: u64 = 10;

/// Per-request HTTP timeout for the REST gateway.
pub const REQUEST_TIMEOUT_SECS: u64 = 30;

/// Buffered engagement updates per subscriber before slow receivers lag.
pub const UPDATE_CHANNEL_CAPACITY: usize = 256;

pub const DEFAULT_BACKEND_URL: &str = "http://localhost:54321";

// Backend tables
pub mod tables {
    pub const THREADS: &str = "forums";
    pub const REPLIES: &str = "replies";
    pub const LIKES: &str = "forum_likes";
    pub const ADMINS: &str = "admin_users";
}

// Column selections with the author's profile embedded
pub mod select {
    pub const THREAD: &str = "*,profiles!forums_user_id_fkey_profiles(email)";
    pub const REPLY: &str = "*,profiles!replies_user_id_fkey(email)";
}
