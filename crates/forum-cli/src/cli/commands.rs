use anyhow::{Context, Result};
use forum_core::models::parse_tags;
use forum_core::{CoreRuntime, ForumError};
use serde_json::{json, Value};
use tracing::warn;

use super::protocol::CliCommand;
use super::session_file::SessionFile;

/// Put the stored session (if any) back into the runtime.
pub fn restore_session(runtime: &CoreRuntime, sessions: &SessionFile) -> Result<()> {
    if let Some(session) = sessions.load()? {
        runtime.session().restore(session);
    }
    Ok(())
}

/// Run one command against the runtime and return its JSON result.
pub async fn execute(
    runtime: &CoreRuntime,
    sessions: &SessionFile,
    command: CliCommand,
) -> Result<Value> {
    if command.needs_session() && runtime.session().current().is_none() {
        return Err(ForumError::NotSignedIn.into());
    }
    let forum = runtime.forum();

    match command {
        CliCommand::SignUp { email, password } => {
            match runtime.sign_up(&email, &password).await.context("sign up failed")? {
                Some(session) => {
                    sessions.save(&session)?;
                    Ok(json!({
                        "status": "signed_in",
                        "user_id": session.user.id,
                        "email": session.user.email,
                    }))
                }
                None => Ok(json!({ "status": "confirmation_pending", "email": email })),
            }
        }

        CliCommand::Login { email, password } => {
            let session = runtime
                .sign_in(&email, &password)
                .await
                .context("login failed")?;
            sessions.save(&session)?;
            Ok(json!({
                "status": "signed_in",
                "user_id": session.user.id,
                "email": session.user.email,
            }))
        }

        CliCommand::Logout => {
            runtime.sign_out().await.context("logout failed")?;
            sessions.clear()?;
            Ok(json!({ "status": "signed_out" }))
        }

        CliCommand::WhoAmI => match runtime.session().current() {
            Some(session) => {
                let admin = forum.is_admin().await?;
                Ok(json!({
                    "signed_in": true,
                    "user_id": session.user.id,
                    "email": session.user.email,
                    "admin": admin,
                }))
            }
            None => Ok(json!({ "signed_in": false })),
        },

        CliCommand::ListThreads { search } => {
            if let Err(e) = runtime.hydrate_current().await {
                warn!(error = %e, "listing without like state");
            }
            forum.refresh().await?;
            let threads = match search.as_deref().map(str::trim) {
                Some(query) if !query.is_empty() => forum.search(query),
                _ => forum.threads(),
            };
            Ok(json!(threads))
        }

        CliCommand::ShowThread { thread_id } => {
            if let Err(e) = runtime.hydrate_current().await {
                warn!(error = %e, "showing thread without like state");
            }
            let details = forum.details(&thread_id).await?;
            let replies: Vec<Value> = details
                .replies
                .iter()
                .map(|reply| {
                    json!({
                        "id": reply.id,
                        "content": reply.content,
                        "created_at": reply.created_at,
                        "author": reply.author_email(),
                    })
                })
                .collect();
            Ok(json!({
                "thread": details.thread,
                "author": details.thread.thread.author_email(),
                "replies": replies,
            }))
        }

        CliCommand::CreateThread {
            title,
            description,
            tags,
        } => {
            let thread = forum
                .create_thread(&title, &description, parse_tags(&tags))
                .await?;
            Ok(json!(thread))
        }

        CliCommand::Reply { thread_id, content } => {
            let replies = forum.post_reply(&thread_id, &content).await?;
            Ok(json!({ "thread_id": thread_id, "replies": replies }))
        }

        CliCommand::ToggleLike { thread_id } => {
            runtime.hydrate_current().await?;
            forum.refresh().await?;
            let state = forum.toggle_like(&thread_id).await?;
            Ok(json!({
                "thread_id": thread_id,
                "liked": state.liked,
                "like_count": state.like_count,
            }))
        }

        CliCommand::LikedThreads => {
            runtime.hydrate_current().await?;
            Ok(json!(runtime.engagement().liked_threads()))
        }

        CliCommand::SetStatus { thread_id, status } => {
            forum.set_status(&thread_id, status).await?;
            Ok(json!({ "thread_id": thread_id, "status": status }))
        }

        CliCommand::DeleteThread { thread_id } => {
            forum.delete_thread(&thread_id).await?;
            Ok(json!({ "thread_id": thread_id, "status": "deleted" }))
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use forum_core::gateway::MemoryGateway;
    use forum_core::models::ThreadStatus;
    use forum_core::{CoreConfig, SessionState};

    use super::*;
    use crate::cli::protocol::error_code;

    struct Harness {
        gateway: Arc<MemoryGateway>,
        runtime: CoreRuntime,
        sessions: SessionFile,
        _dir: tempfile::TempDir,
    }

    impl Harness {
        fn new() -> Self {
            let gateway = Arc::new(MemoryGateway::new());
            gateway.seed_thread("t1", 2);
            gateway.add_user("ada@example.com", "pw", "u1");
            let runtime = CoreRuntime::with_gateway(
                CoreConfig::new("http://unused.invalid", "anon"),
                SessionState::new(),
                gateway.clone(),
            );
            let dir = tempfile::tempdir().unwrap();
            let sessions = SessionFile::new(dir.path().join("session.json"));
            Self {
                gateway,
                runtime,
                sessions,
                _dir: dir,
            }
        }

        async fn run(&self, command: CliCommand) -> Result<Value> {
            execute(&self.runtime, &self.sessions, command).await
        }

        async fn login(&self) {
            self.run(CliCommand::Login {
                email: "ada@example.com".to_string(),
                password: "pw".to_string(),
            })
            .await
            .unwrap();
        }
    }

    #[tokio::test]
    async fn test_login_persists_session_and_logout_clears_it() {
        let h = Harness::new();
        h.login().await;
        let stored = h.sessions.load().unwrap().unwrap();
        assert_eq!(stored.user.id, "u1");

        let out = h.run(CliCommand::WhoAmI).await.unwrap();
        assert_eq!(out["user_id"], "u1");
        assert_eq!(out["admin"], false);

        h.run(CliCommand::Logout).await.unwrap();
        assert!(h.sessions.load().unwrap().is_none());
        let out = h.run(CliCommand::WhoAmI).await.unwrap();
        assert_eq!(out["signed_in"], false);
    }

    #[tokio::test]
    async fn test_restored_session_is_used() {
        let h = Harness::new();
        h.login().await;

        let fresh = CoreRuntime::with_gateway(
            CoreConfig::new("http://unused.invalid", "anon"),
            SessionState::new(),
            h.gateway.clone(),
        );
        restore_session(&fresh, &h.sessions).unwrap();
        let out = execute(&fresh, &h.sessions, CliCommand::LikedThreads)
            .await
            .unwrap();
        assert_eq!(out, json!([]));
    }

    #[tokio::test]
    async fn test_like_toggles_and_reports_state() {
        let h = Harness::new();
        h.login().await;

        let out = h
            .run(CliCommand::ToggleLike {
                thread_id: "t1".to_string(),
            })
            .await
            .unwrap();
        assert_eq!(out, json!({"thread_id": "t1", "liked": true, "like_count": 3}));
        assert_eq!(h.run(CliCommand::LikedThreads).await.unwrap(), json!(["t1"]));

        let out = h
            .run(CliCommand::ToggleLike {
                thread_id: "t1".to_string(),
            })
            .await
            .unwrap();
        assert_eq!(out["liked"], false);
        assert_eq!(out["like_count"], 2);
    }

    #[tokio::test]
    async fn test_signed_out_writes_are_rejected() {
        let h = Harness::new();
        let err = h
            .run(CliCommand::ToggleLike {
                thread_id: "t1".to_string(),
            })
            .await
            .unwrap_err();
        assert_eq!(error_code(&err), "not_signed_in");

        let out = h.run(CliCommand::ListThreads { search: None }).await.unwrap();
        assert_eq!(out[0]["id"], "t1");
        assert_eq!(out[0]["liked"], false);
    }

    #[tokio::test]
    async fn test_create_reply_and_show() {
        let h = Harness::new();
        h.login().await;

        let created = h
            .run(CliCommand::CreateThread {
                title: "Borrow checker".to_string(),
                description: "Why does this not compile?".to_string(),
                tags: "rust, lifetimes".to_string(),
            })
            .await
            .unwrap();
        let thread_id = created["id"].as_str().unwrap().to_string();
        assert_eq!(created["tags"], json!(["rust", "lifetimes"]));

        let out = h
            .run(CliCommand::Reply {
                thread_id: thread_id.clone(),
                content: "Add a lifetime".to_string(),
            })
            .await
            .unwrap();
        assert_eq!(out["replies"].as_array().unwrap().len(), 1);

        let shown = h
            .run(CliCommand::ShowThread {
                thread_id: thread_id.clone(),
            })
            .await
            .unwrap();
        assert_eq!(shown["thread"]["title"], "Borrow checker");
        assert_eq!(shown["author"], "ada@example.com");
        assert_eq!(shown["replies"][0]["content"], "Add a lifetime");
        assert_eq!(shown["replies"][0]["author"], "ada@example.com");

        let found = h
            .run(CliCommand::ListThreads {
                search: Some("lifetimes".to_string()),
            })
            .await
            .unwrap();
        assert_eq!(found.as_array().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_admin_commands_need_admin_rights() {
        let h = Harness::new();
        h.login().await;

        let err = h
            .run(CliCommand::DeleteThread {
                thread_id: "t1".to_string(),
            })
            .await
            .unwrap_err();
        assert_eq!(error_code(&err), "not_admin");

        h.gateway.add_admin("u1");
        h.run(CliCommand::SetStatus {
            thread_id: "t1".to_string(),
            status: ThreadStatus::Solved,
        })
        .await
        .unwrap();
        assert_eq!(h.gateway.thread("t1").unwrap().status, ThreadStatus::Solved);

        h.run(CliCommand::DeleteThread {
            thread_id: "t1".to_string(),
        })
        .await
        .unwrap();
        assert!(h.gateway.thread("t1").is_none());
    }
}
