//! Axum router setup.

use crate::auth::{auth_middleware, offline_forbidder};
use crate::config::ServerConfig;
use crate::handlers::{data, identity};
use crate::storage::ServerStorage;
use axum::middleware;
use axum::routing::{delete, get, post};
use axum::Router;
use std::sync::Arc;
use std::time::Duration;
use tower_http::limit::RequestBodyLimitLayer;
use tower_http::trace::TraceLayer;

/// Shared state handed to every handler and middleware.
#[derive(Clone)]
pub struct AppState {
    pub storage: ServerStorage,
    /// HS256 signing secret.
    pub secret: Arc<[u8]>,
    pub token_ttl: Duration,
    /// Agents that have not pulled for longer than this (plus a grace
    /// period) may not write.
    pub sync_period: Duration,
}

impl AppState {
    pub fn new(storage: ServerStorage, config: &ServerConfig) -> Self {
        Self {
            storage,
            secret: config.secret().into(),
            token_ttl: Duration::from_secs(config.expire_token),
            sync_period: Duration::from_secs(config.sync_period),
        }
    }
}

pub fn build_router(state: AppState, config: &ServerConfig) -> Router {
    // Writes are refused while the agent is out of sync
    let guarded = Router::new()
        .route("/api/client/data/add", post(data::add))
        .route("/api/client/data/replace", post(data::replace))
        .route("/api/client/data/conflict", post(data::append))
        .route("/api/client/data/delete", delete(data::delete))
        .layer(middleware::from_fn_with_state(
            state.clone(),
            offline_forbidder,
        ));

    // Authenticated routes
    let authenticated = Router::new()
        .merge(guarded)
        .route("/api/client/data/get", get(data::get_all))
        .layer(middleware::from_fn_with_state(
            state.clone(),
            auth_middleware,
        ));

    // Unauthenticated routes
    let public = Router::new()
        .route("/api/client/register", post(identity::register))
        .route("/api/client/authorize", post(identity::authorize))
        .route("/health", get(health));

    Router::new()
        .merge(authenticated)
        .merge(public)
        .layer(TraceLayer::new_for_http())
        .layer(RequestBodyLimitLayer::new(config.max_body_size))
        .with_state(state)
}

async fn health() -> &'static str {
    "ok"
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::bearer;
    use crate::jwt;
    use chrono::Utc;
    use reqwest::{header, StatusCode};

    struct TestServer {
        state: AppState,
        base: String,
        http: reqwest::Client,
    }

    impl TestServer {
        async fn start() -> Self {
            let mut config = ServerConfig::default();
            config.secret_key = Some("test-secret".to_string());
            let state = AppState::new(ServerStorage::in_memory().unwrap(), &config);
            let router = build_router(state.clone(), &config);
            let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
            let base = format!("http://{}", listener.local_addr().unwrap());
            tokio::spawn(async move { axum::serve(listener, router).await });
            Self {
                state,
                base,
                http: reqwest::Client::new(),
            }
        }

        fn url(&self, path: &str) -> String {
            format!("{}{}", self.base, path)
        }

        /// A user who has just synced, and their token.
        fn fresh_user(&self, login: &str) -> (i64, String) {
            let user = self.state.storage.create_user(login, "abc").unwrap().unwrap();
            self.state.storage.set_last_seen(user.id, Utc::now()).unwrap();
            let token = jwt::issue(&self.state.secret, user.id, self.state.token_ttl).unwrap();
            (user.id, token)
        }

        async fn post(&self, path: &str, token: Option<&str>, body: &str) -> StatusCode {
            let mut req = self
                .http
                .post(self.url(path))
                .header(header::CONTENT_TYPE, "application/json")
                .body(body.to_string());
            if let Some(token) = token {
                req = req.header(header::AUTHORIZATION, bearer(token));
            }
            req.send().await.unwrap().status()
        }

        async fn get_all(&self, token: &str) -> StatusCode {
            self.http
                .get(self.url("/api/client/data/get"))
                .header(header::AUTHORIZATION, bearer(token))
                .send()
                .await
                .unwrap()
                .status()
        }
    }

    fn record_json(name: &str) -> String {
        format!(
            r#"{{"encrypted_data":"AQID","name":"{}",
                "create_data":"2023-11-14T22:13:20Z","edit_date":"2023-11-14T22:13:20Z"}}"#,
            name
        )
    }

    #[tokio::test]
    async fn health_is_public() {
        let server = TestServer::start().await;
        let resp = server.http.get(server.url("/health")).send().await.unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        assert_eq!(resp.text().await.unwrap(), "ok");
    }

    #[tokio::test]
    async fn register_issues_bearer_and_rejects_duplicates() {
        let server = TestServer::start().await;
        let body = r#"{"login":"alice","hash":"abc"}"#;

        let resp = server
            .http
            .post(server.url("/api/client/register"))
            .header(header::CONTENT_TYPE, "application/json")
            .body(body)
            .send()
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        let auth = resp.headers()[header::AUTHORIZATION].to_str().unwrap();
        assert!(auth.starts_with("Bearer "));

        assert_eq!(
            server.post("/api/client/register", None, body).await,
            StatusCode::CONFLICT
        );
        assert_eq!(
            server
                .post("/api/client/register", None, r#"{"login":"","hash":"abc"}"#)
                .await,
            StatusCode::BAD_REQUEST
        );
    }

    #[tokio::test]
    async fn authorize_distinguishes_unknown_user_and_wrong_hash() {
        let server = TestServer::start().await;
        server.state.storage.create_user("alice", "abc").unwrap();

        let cases = [
            (r#"{"login":"bob","hash":"abc"}"#, StatusCode::BAD_REQUEST),
            (r#"{"login":"alice","hash":"abd"}"#, StatusCode::UNAUTHORIZED),
            (r#"{"login":"alice","hash":"abc"}"#, StatusCode::OK),
        ];
        for (body, status) in cases {
            assert_eq!(server.post("/api/client/authorize", None, body).await, status, "{}", body);
        }
    }

    #[tokio::test]
    async fn data_routes_require_bearer() {
        let server = TestServer::start().await;
        let resp = server
            .http
            .get(server.url("/api/client/data/get"))
            .send()
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);
        assert_eq!(
            server
                .post("/api/client/data/add", Some("garbage"), &record_json("a"))
                .await,
            StatusCode::UNAUTHORIZED
        );
    }

    #[tokio::test]
    async fn add_conflicts_on_duplicate_name() {
        let server = TestServer::start().await;
        let (_, token) = server.fresh_user("alice");
        let body = record_json("gmail");

        assert_eq!(
            server.post("/api/client/data/add", Some(&token), &body).await,
            StatusCode::OK
        );
        assert_eq!(
            server.post("/api/client/data/add", Some(&token), &body).await,
            StatusCode::CONFLICT
        );
    }

    #[tokio::test]
    async fn stale_agent_is_forbidden_until_it_pulls() {
        let server = TestServer::start().await;
        let (user_id, token) = server.fresh_user("alice");
        let stale = Utc::now()
            - chrono::Duration::seconds(server.state.sync_period.as_secs() as i64 + 60);
        server.state.storage.set_last_seen(user_id, stale).unwrap();
        let body = record_json("gmail");

        assert_eq!(
            server.post("/api/client/data/add", Some(&token), &body).await,
            StatusCode::FORBIDDEN
        );
        assert_eq!(server.get_all(&token).await, StatusCode::OK);
        assert_eq!(
            server.post("/api/client/data/add", Some(&token), &body).await,
            StatusCode::OK
        );
    }

    #[tokio::test]
    async fn replace_and_delete_report_missing_records() {
        let server = TestServer::start().await;
        let (_, token) = server.fresh_user("alice");

        assert_eq!(
            server
                .post("/api/client/data/replace", Some(&token), &record_json("x"))
                .await,
            StatusCode::NOT_FOUND
        );

        let resp = server
            .http
            .delete(server.url("/api/client/data/delete"))
            .header(header::AUTHORIZATION, bearer(&token))
            .json(&serde_json::json!({ "name": "x" }))
            .send()
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::NOT_FOUND);
    }
}
