use forum_core::gateway::GatewayError;
use forum_core::models::ThreadStatus;
use forum_core::{ForumError, SyncError};
use serde::Serialize;

/// CLI command parsed from arguments
#[derive(Debug, Clone)]
pub enum CliCommand {
    SignUp { email: String, password: String },
    Login { email: String, password: String },
    Logout,
    WhoAmI,
    /// List threads, optionally filtered by a search string
    ListThreads { search: Option<String> },
    ShowThread { thread_id: String },
    CreateThread {
        title: String,
        description: String,
        tags: String,
    },
    Reply { thread_id: String, content: String },
    ToggleLike { thread_id: String },
    LikedThreads,
    SetStatus { thread_id: String, status: ThreadStatus },
    DeleteThread { thread_id: String },
}

impl CliCommand {
    /// Commands that only make sense with a stored session.
    pub fn needs_session(&self) -> bool {
        !matches!(
            self,
            CliCommand::SignUp { .. }
                | CliCommand::Login { .. }
                | CliCommand::Logout
                | CliCommand::WhoAmI
                | CliCommand::ListThreads { .. }
                | CliCommand::ShowThread { .. }
        )
    }
}

#[derive(Debug, Serialize)]
pub struct ErrorInfo {
    pub code: String,
    pub message: String,
}

impl ErrorInfo {
    pub fn from_error(err: &anyhow::Error) -> Self {
        Self {
            code: error_code(err).to_string(),
            message: format!("{:#}", err),
        }
    }
}

/// Stable machine-readable code for the errors a command can end with.
pub fn error_code(err: &anyhow::Error) -> &'static str {
    if let Some(err) = err.downcast_ref::<ForumError>() {
        return match err {
            ForumError::NotSignedIn => "not_signed_in",
            ForumError::NotAdmin => "not_admin",
            ForumError::ThreadClosed { .. } => "thread_closed",
            ForumError::EmptyField(_) => "invalid_input",
            ForumError::UnknownThread(_) => "unknown_thread",
            ForumError::Timeout(_) => "timeout",
            ForumError::Gateway(err) => gateway_code(err),
            ForumError::Engagement(err) => sync_code(err),
        };
    }
    if let Some(err) = err.downcast_ref::<SyncError>() {
        return sync_code(err);
    }
    if let Some(err) = err.downcast_ref::<GatewayError>() {
        return gateway_code(err);
    }
    "error"
}

fn sync_code(err: &SyncError) -> &'static str {
    match err {
        SyncError::InvalidThread => "invalid_input",
        SyncError::Unauthenticated => "not_signed_in",
        SyncError::OperationInProgress { .. } => "in_progress",
        SyncError::RemoteMutationFailed(_) => "like_failed",
        SyncError::HydrationFailed(_) => "load_failed",
        SyncError::Aborted { .. } => "aborted",
    }
}

fn gateway_code(err: &GatewayError) -> &'static str {
    match err {
        GatewayError::NotFound(_) => "not_found",
        GatewayError::AuthFailed(_) => "auth_failed",
        GatewayError::DuplicateLike { .. } => "duplicate_like",
        GatewayError::Transport(_) => "network",
        _ => "backend",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_codes_see_through_wrappers() {
        let err = anyhow::Error::new(ForumError::Engagement(SyncError::Unauthenticated));
        assert_eq!(error_code(&err), "not_signed_in");

        let err = anyhow::Error::new(GatewayError::AuthFailed("bad password".to_string()))
            .context("login failed");
        assert_eq!(error_code(&err), "auth_failed");
        let info = ErrorInfo::from_error(&err);
        assert_eq!(info.message, "login failed: authentication failed: bad password");

        assert_eq!(error_code(&anyhow::anyhow!("boom")), "error");
    }

    #[test]
    fn test_read_only_commands_skip_session() {
        assert!(!CliCommand::ListThreads { search: None }.needs_session());
        assert!(CliCommand::LikedThreads.needs_session());
        assert!(!CliCommand::Logout.needs_session());
    }
}
