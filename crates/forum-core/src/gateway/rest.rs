use anyhow::Context;
use async_trait::async_trait;
use reqwest::{Method, RequestBuilder, Response, StatusCode};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tracing::debug;

use super::{AuthGateway, EngagementGateway, ForumGateway, GatewayError, GatewayResult};
use crate::config::CoreConfig;
use crate::constants::{tables, select};
use crate::models::{
    Identity, LikeEdge, NewReply, NewThread, Reply, Session, SessionUser, Thread, ThreadStatus,
};
use crate::session::SessionState;

/// Client for the hosted backend: REST row API plus the auth API.
///
/// Row requests carry the signed-in user's access token so row-level policies
/// apply; anonymous requests fall back to the project's anon key.
pub struct RestGateway {
    base_url: String,
    anon_key: String,
    client: reqwest::Client,
    session: SessionState,
}

#[derive(Debug, Serialize)]
struct Credentials<'a> {
    email: &'a str,
    password: &'a str,
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    #[serde(default)]
    refresh_token: Option<String>,
    user: SessionUser,
}

impl From<TokenResponse> for Session {
    fn from(token: TokenResponse) -> Self {
        Session {
            access_token: token.access_token,
            refresh_token: token.refresh_token,
            user: token.user,
        }
    }
}

#[derive(Debug, Deserialize)]
struct ForumIdRow {
    forum_id: String,
}

fn eq(value: &str) -> String {
    format!("eq.{}", value)
}

/// Pull the human readable part out of a backend error body.
fn backend_message(body: &str) -> String {
    serde_json::from_str::<serde_json::Value>(body)
        .ok()
        .and_then(|value| {
            ["message", "msg", "error_description", "error"]
                .iter()
                .find_map(|key| value.get(*key).and_then(|v| v.as_str()).map(str::to_string))
        })
        .unwrap_or_else(|| body.trim().to_string())
}

async fn expect_success(
    response: Response,
    fail: impl FnOnce(String) -> GatewayError,
) -> GatewayResult<Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let body = response.text().await.unwrap_or_default();
    Err(fail(format!("{} ({})", backend_message(&body), status)))
}

async fn decode<T: DeserializeOwned>(response: Response) -> GatewayResult<T> {
    let body = response.text().await?;
    serde_json::from_str(&body).map_err(|e| GatewayError::Decode(e.to_string()))
}

impl RestGateway {
    pub fn new(config: &CoreConfig, session: SessionState) -> anyhow::Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(config.request_timeout)
            .build()
            .context("Failed to build HTTP client")?;
        Ok(Self {
            base_url: config.backend_url.trim_end_matches('/').to_string(),
            anon_key: config.anon_key.clone(),
            client,
            session,
        })
    }

    fn table_url(&self, table: &str) -> String {
        format!("{}/rest/v1/{}", self.base_url, table)
    }

    fn auth_url(&self, path: &str) -> String {
        format!("{}/auth/v1/{}", self.base_url, path)
    }

    fn rows(&self, method: Method, table: &str) -> RequestBuilder {
        let token = self
            .session
            .access_token()
            .unwrap_or_else(|| self.anon_key.clone());
        self.client
            .request(method, self.table_url(table))
            .header("apikey", &self.anon_key)
            .bearer_auth(token)
    }

    fn auth(&self, method: Method, path: &str) -> RequestBuilder {
        self.client
            .request(method, self.auth_url(path))
            .header("apikey", &self.anon_key)
    }
}

#[async_trait]
impl EngagementGateway for RestGateway {
    async fn query_like_edges(&self, identity: &Identity) -> GatewayResult<Vec<LikeEdge>> {
        let response = self
            .rows(Method::GET, tables::LIKES)
            .query(&[("select", "forum_id")])
            .query(&[("user_id", eq(identity.as_str()))])
            .send()
            .await?;
        let response = expect_success(response, GatewayError::QueryFailed).await?;
        let rows: Vec<ForumIdRow> = decode(response).await?;
        Ok(rows
            .into_iter()
            .map(|row| LikeEdge::new(identity.as_str(), row.forum_id))
            .collect())
    }

    async fn insert_like_edge(&self, identity: &Identity, thread_id: &str) -> GatewayResult<()> {
        let edge = LikeEdge::new(identity.as_str(), thread_id);
        let response = self
            .rows(Method::POST, tables::LIKES)
            .header("Prefer", "return=minimal")
            .json(&[edge])
            .send()
            .await?;
        if response.status() == StatusCode::CONFLICT {
            return Err(GatewayError::DuplicateLike {
                thread_id: thread_id.to_string(),
            });
        }
        expect_success(response, GatewayError::InsertFailed).await?;
        Ok(())
    }

    async fn delete_like_edge(&self, identity: &Identity, thread_id: &str) -> GatewayResult<()> {
        let response = self
            .rows(Method::DELETE, tables::LIKES)
            .query(&[("user_id", eq(identity.as_str())), ("forum_id", eq(thread_id))])
            .send()
            .await?;
        expect_success(response, GatewayError::DeleteFailed).await?;
        Ok(())
    }

    async fn set_thread_like_count(&self, thread_id: &str, value: u64) -> GatewayResult<()> {
        let response = self
            .rows(Method::PATCH, tables::THREADS)
            .query(&[("id", eq(thread_id))])
            .json(&serde_json::json!({ "likes": value }))
            .send()
            .await?;
        expect_success(response, GatewayError::UpdateFailed).await?;
        Ok(())
    }
}

#[async_trait]
impl ForumGateway for RestGateway {
    async fn list_threads(&self) -> GatewayResult<Vec<Thread>> {
        let response = self
            .rows(Method::GET, tables::THREADS)
            .query(&[("select", select::THREAD), ("order", "created_at.desc")])
            .send()
            .await?;
        let response = expect_success(response, GatewayError::QueryFailed).await?;
        decode(response).await
    }

    async fn get_thread(&self, thread_id: &str) -> GatewayResult<Thread> {
        let response = self
            .rows(Method::GET, tables::THREADS)
            .query(&[("select", select::THREAD)])
            .query(&[("id", eq(thread_id))])
            .send()
            .await?;
        let response = expect_success(response, GatewayError::QueryFailed).await?;
        let rows: Vec<Thread> = decode(response).await?;
        rows.into_iter()
            .next()
            .ok_or_else(|| GatewayError::NotFound(format!("thread {}", thread_id)))
    }

    async fn create_thread(&self, thread: &NewThread) -> GatewayResult<Thread> {
        let response = self
            .rows(Method::POST, tables::THREADS)
            .header("Prefer", "return=representation")
            .json(&[thread])
            .send()
            .await?;
        let response = expect_success(response, GatewayError::InsertFailed).await?;
        let rows: Vec<Thread> = decode(response).await?;
        rows.into_iter()
            .next()
            .ok_or_else(|| GatewayError::Decode("insert returned no row".to_string()))
    }

    async fn list_replies(&self, thread_id: &str) -> GatewayResult<Vec<Reply>> {
        let response = self
            .rows(Method::GET, tables::REPLIES)
            .query(&[("select", select::REPLY), ("order", "created_at.asc")])
            .query(&[("forum_id", eq(thread_id))])
            .send()
            .await?;
        let response = expect_success(response, GatewayError::QueryFailed).await?;
        decode(response).await
    }

    async fn create_reply(&self, reply: &NewReply) -> GatewayResult<()> {
        let response = self
            .rows(Method::POST, tables::REPLIES)
            .header("Prefer", "return=minimal")
            .json(&[reply])
            .send()
            .await?;
        expect_success(response, GatewayError::InsertFailed).await?;
        Ok(())
    }

    async fn set_thread_status(&self, thread_id: &str, status: ThreadStatus) -> GatewayResult<()> {
        let response = self
            .rows(Method::PATCH, tables::THREADS)
            .query(&[("id", eq(thread_id))])
            .json(&serde_json::json!({ "status": status }))
            .send()
            .await?;
        expect_success(response, GatewayError::UpdateFailed).await?;
        Ok(())
    }

    async fn delete_thread(&self, thread_id: &str) -> GatewayResult<()> {
        let response = self
            .rows(Method::DELETE, tables::THREADS)
            .query(&[("id", eq(thread_id))])
            .send()
            .await?;
        expect_success(response, GatewayError::DeleteFailed).await?;
        Ok(())
    }

    async fn is_admin(&self, identity: &Identity) -> GatewayResult<bool> {
        let response = self
            .rows(Method::GET, tables::ADMINS)
            .query(&[("select", "id")])
            .query(&[("user_id", eq(identity.as_str()))])
            .send()
            .await?;
        let response = expect_success(response, GatewayError::QueryFailed).await?;
        let rows: Vec<serde_json::Value> = decode(response).await?;
        Ok(!rows.is_empty())
    }
}

#[async_trait]
impl AuthGateway for RestGateway {
    async fn sign_in(&self, email: &str, password: &str) -> GatewayResult<Session> {
        let response = self
            .auth(Method::POST, "token")
            .query(&[("grant_type", "password")])
            .json(&Credentials { email, password })
            .send()
            .await?;
        let response = expect_success(response, GatewayError::AuthFailed).await?;
        let token: TokenResponse = decode(response).await?;
        debug!(user_id = %token.user.id, "signed in");
        Ok(token.into())
    }

    async fn sign_up(&self, email: &str, password: &str) -> GatewayResult<Option<Session>> {
        let response = self
            .auth(Method::POST, "signup")
            .json(&Credentials { email, password })
            .send()
            .await?;
        let response = expect_success(response, GatewayError::AuthFailed).await?;
        let body: serde_json::Value = decode(response).await?;
        if body.get("access_token").is_none() {
            // Email confirmation pending: the backend only echoes the user.
            return Ok(None);
        }
        let token: TokenResponse =
            serde_json::from_value(body).map_err(|e| GatewayError::Decode(e.to_string()))?;
        Ok(Some(token.into()))
    }

    async fn sign_out(&self, session: &Session) -> GatewayResult<()> {
        let response = self
            .auth(Method::POST, "logout")
            .bearer_auth(&session.access_token)
            .send()
            .await?;
        expect_success(response, GatewayError::AuthFailed).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mockito::Matcher;
    use serde_json::json;

    fn gateway(server: &mockito::ServerGuard, session: SessionState) -> RestGateway {
        let config = CoreConfig {
            backend_url: server.url(),
            anon_key: "anon".to_string(),
            ..CoreConfig::default()
        };
        RestGateway::new(&config, session).unwrap()
    }

    fn signed_in() -> SessionState {
        let session = SessionState::new();
        session.restore(Session {
            access_token: "token-u1".to_string(),
            refresh_token: None,
            user: SessionUser {
                id: "u1".to_string(),
                email: Some("u1@example.com".to_string()),
            },
        });
        session
    }

    #[tokio::test]
    async fn test_query_like_edges_uses_session_token() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("GET", "/rest/v1/forum_likes")
            .match_query(Matcher::AllOf(vec![
                Matcher::UrlEncoded("select".into(), "forum_id".into()),
                Matcher::UrlEncoded("user_id".into(), "eq.u1".into()),
            ]))
            .match_header("apikey", "anon")
            .match_header("authorization", "Bearer token-u1")
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(r#"[{"forum_id": "t1"}, {"forum_id": "t2"}]"#)
            .create_async()
            .await;

        let gateway = gateway(&server, signed_in());
        let edges = gateway.query_like_edges(&Identity::new("u1")).await.unwrap();

        mock.assert_async().await;
        assert_eq!(edges, vec![LikeEdge::new("u1", "t1"), LikeEdge::new("u1", "t2")]);
    }

    #[tokio::test]
    async fn test_insert_conflict_maps_to_duplicate_like() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("POST", "/rest/v1/forum_likes")
            .match_body(Matcher::Json(json!([{"user_id": "u1", "forum_id": "t1"}])))
            .with_status(409)
            .with_body(r#"{"code": "23505", "message": "duplicate key value"}"#)
            .create_async()
            .await;

        let gateway = gateway(&server, signed_in());
        let err = gateway
            .insert_like_edge(&Identity::new("u1"), "t1")
            .await
            .unwrap_err();
        assert!(matches!(err, GatewayError::DuplicateLike { ref thread_id } if thread_id == "t1"));
    }

    #[tokio::test]
    async fn test_set_like_count_reports_backend_message() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("PATCH", "/rest/v1/forums")
            .match_query(Matcher::UrlEncoded("id".into(), "eq.t1".into()))
            .match_body(Matcher::Json(json!({"likes": 4})))
            .with_status(403)
            .with_body(r#"{"message": "permission denied for table forums"}"#)
            .create_async()
            .await;

        let gateway = gateway(&server, signed_in());
        let err = gateway.set_thread_like_count("t1", 4).await.unwrap_err();
        match err {
            GatewayError::UpdateFailed(message) => {
                assert!(message.contains("permission denied"), "{}", message)
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_anonymous_requests_use_anon_key() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("GET", "/rest/v1/forums")
            .match_query(Matcher::UrlEncoded("order".into(), "created_at.desc".into()))
            .match_header("authorization", "Bearer anon")
            .with_status(200)
            .with_body(
                r#"[{"id": "t1", "title": "Hello", "description": "", "user_id": "u2", "likes": 2, "status": "open"}]"#,
            )
            .create_async()
            .await;

        let gateway = gateway(&server, SessionState::new());
        let threads = gateway.list_threads().await.unwrap();

        mock.assert_async().await;
        assert_eq!(threads.len(), 1);
        assert_eq!(threads[0].like_count(), 2);
    }

    #[tokio::test]
    async fn test_get_thread_missing_is_not_found() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("GET", "/rest/v1/forums")
            .match_query(Matcher::Any)
            .with_status(200)
            .with_body("[]")
            .create_async()
            .await;

        let gateway = gateway(&server, SessionState::new());
        let err = gateway.get_thread("nope").await.unwrap_err();
        assert!(matches!(err, GatewayError::NotFound(_)));
    }

    #[tokio::test]
    async fn test_sign_in_and_unconfirmed_sign_up() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("POST", "/auth/v1/token")
            .match_query(Matcher::UrlEncoded("grant_type".into(), "password".into()))
            .with_status(200)
            .with_body(
                r#"{"access_token": "abc", "refresh_token": "def", "user": {"id": "u9", "email": "u9@example.com"}}"#,
            )
            .create_async()
            .await;
        server
            .mock("POST", "/auth/v1/signup")
            .with_status(200)
            .with_body(r#"{"id": "u10", "email": "new@example.com"}"#)
            .create_async()
            .await;

        let gateway = gateway(&server, SessionState::new());
        let session = gateway.sign_in("u9@example.com", "pw").await.unwrap();
        assert_eq!(session.identity(), Identity::new("u9"));
        assert_eq!(session.refresh_token.as_deref(), Some("def"));

        let pending = gateway.sign_up("new@example.com", "pw").await.unwrap();
        assert!(pending.is_none());
    }

    #[tokio::test]
    async fn test_sign_in_rejected() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("POST", "/auth/v1/token")
            .match_query(Matcher::Any)
            .with_status(400)
            .with_body(r#"{"error": "invalid_grant", "error_description": "Invalid login credentials"}"#)
            .create_async()
            .await;

        let gateway = gateway(&server, SessionState::new());
        let err = gateway.sign_in("x@example.com", "bad").await.unwrap_err();
        match err {
            GatewayError::AuthFailed(message) => assert!(message.contains("Invalid login")),
            other => panic!("unexpected error: {other:?}"),
        }
    }
}
