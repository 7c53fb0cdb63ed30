//! HTTP client for the GophKeeper server.
//!
//! Every data request carries `Authorization: Bearer <token>`. A 401 is
//! answered by exactly one re-authentication with the stored credentials
//! followed by one retry; a second 401 surfaces as [`KeeperError::Auth`].

use crate::crypto::identity_hash;
use crate::database::AgentStore;
use crate::record::EncryptedRecord;
use crate::session::UserInfoStorage;
use crate::sync::auth::{bearer_header, parse_bearer};
use crate::sync::models::{DeleteRequest, IdentityData, ReplaceMode, ReplaceRequest, Reply};
use crate::{KeeperError, Result};
use reqwest::{header, Method, Response, StatusCode};
use tracing::debug;

const API_PREFIX: &str = "/api/client";

/// HTTP client bound to one server and the signed-in session.
#[derive(Clone)]
pub struct ApiClient {
    http: reqwest::Client,
    base_url: String,
    session: UserInfoStorage,
    store: AgentStore,
}

fn network(e: reqwest::Error) -> KeeperError {
    KeeperError::Network(e.to_string())
}

impl ApiClient {
    /// Create a client for the server at `base_url`.
    pub fn new(base_url: &str, session: UserInfoStorage, store: AgentStore) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(30))
            .build()
            .map_err(network)?;

        Ok(Self {
            http,
            base_url: base_url.trim_end_matches('/').to_string(),
            session,
            store,
        })
    }

    pub fn session(&self) -> &UserInfoStorage {
        &self.session
    }

    pub fn store(&self) -> &AgentStore {
        &self.store
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}{}", self.base_url, API_PREFIX, path)
    }

    /// `POST /register`. Returns the issued bearer token.
    pub async fn register(&self, identity: &IdentityData) -> Result<String> {
        let resp = self
            .http
            .post(self.url("/register"))
            .json(identity)
            .send()
            .await
            .map_err(network)?;

        match resp.status() {
            StatusCode::OK => token_from(&resp),
            StatusCode::CONFLICT => Err(KeeperError::AlreadyExists(format!(
                "login {:?} is taken",
                identity.login
            ))),
            StatusCode::BAD_REQUEST => Err(KeeperError::InvalidInput(error_text(resp).await)),
            status => Err(server_error(status, resp).await),
        }
    }

    /// `POST /authorize`. Returns the issued bearer token.
    pub async fn authorize(&self, identity: &IdentityData) -> Result<String> {
        let resp = self
            .http
            .post(self.url("/authorize"))
            .json(identity)
            .send()
            .await
            .map_err(network)?;

        match resp.status() {
            StatusCode::OK => token_from(&resp),
            StatusCode::BAD_REQUEST | StatusCode::UNAUTHORIZED => Err(KeeperError::Auth(
                "wrong login or password".to_string(),
            )),
            status => Err(server_error(status, resp).await),
        }
    }

    /// `POST /data/add`
    pub async fn add(&self, record: &EncryptedRecord) -> Result<Reply> {
        let body = serde_json::to_vec(record)?;
        let resp = self.send(Method::POST, "/data/add", Some(body)).await?;
        Ok(Reply::from_status(resp.status()))
    }

    /// `POST /data/replace`
    pub async fn replace(&self, record: &EncryptedRecord, mode: ReplaceMode) -> Result<Reply> {
        let body = serde_json::to_vec(&ReplaceRequest::new(record, mode))?;
        let resp = self.send(Method::POST, "/data/replace", Some(body)).await?;
        Ok(Reply::from_status(resp.status()))
    }

    /// `POST /data/conflict`: append `record` as an extra server version.
    pub async fn append(&self, record: &EncryptedRecord) -> Result<Reply> {
        let body = serde_json::to_vec(record)?;
        let resp = self.send(Method::POST, "/data/conflict", Some(body)).await?;
        Ok(Reply::from_status(resp.status()))
    }

    /// `DELETE /data/delete`
    pub async fn delete(&self, name: &str) -> Result<Reply> {
        let body = serde_json::to_vec(&DeleteRequest { name })?;
        let resp = self.send(Method::DELETE, "/data/delete", Some(body)).await?;
        Ok(Reply::from_status(resp.status()))
    }

    /// `GET /data/get`: every record of the user, one version list per name.
    pub async fn fetch_all(&self) -> Result<Vec<Vec<EncryptedRecord>>> {
        let resp = self.send(Method::GET, "/data/get", None).await?;
        match Reply::from_status(resp.status()) {
            Reply::Ok => resp.json().await.map_err(|e| {
                KeeperError::Serialization(format!("Invalid record list: {}", e))
            }),
            Reply::Forbidden => Err(KeeperError::Forbidden),
            _ => Err(server_error(resp.status(), resp).await),
        }
    }

    /// Re-authenticate with the session credentials and persist the new
    /// token locally.
    pub async fn reauthenticate(&self) -> Result<String> {
        let info = self.session.get().await?;
        let identity = IdentityData {
            login: info.login.clone(),
            hash: identity_hash(&info.login, &info.password),
        };
        let token = self.authorize(&identity).await?;
        self.store.set_token(&info.login, &token)?;
        self.session.set_token(&token).await?;
        debug!("Re-authenticated {}", info.login);
        Ok(token)
    }

    // --- Internal helpers ---

    async fn request(
        &self,
        method: Method,
        path: &str,
        body: Option<Vec<u8>>,
        token: &str,
    ) -> Result<Response> {
        let mut builder = self
            .http
            .request(method, self.url(path))
            .header(header::AUTHORIZATION, bearer_header(token));
        if let Some(body) = body {
            builder = builder
                .header(header::CONTENT_TYPE, "application/json")
                .body(body);
        }
        builder.send().await.map_err(network)
    }

    async fn send(&self, method: Method, path: &str, body: Option<Vec<u8>>) -> Result<Response> {
        let token = self.session.token().await?;
        let resp = self
            .request(method.clone(), path, body.clone(), &token)
            .await?;
        if resp.status() != StatusCode::UNAUTHORIZED {
            return Ok(resp);
        }

        debug!("Token rejected on {}, re-authenticating", path);
        let token = self.reauthenticate().await?;
        let resp = self.request(method, path, body, &token).await?;
        if resp.status() == StatusCode::UNAUTHORIZED {
            return Err(KeeperError::Auth(
                "token rejected after re-authentication".to_string(),
            ));
        }
        Ok(resp)
    }
}

fn token_from(resp: &Response) -> Result<String> {
    resp.headers()
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(parse_bearer)
        .map(str::to_string)
        .ok_or_else(|| KeeperError::Auth("server did not issue a bearer token".to_string()))
}

async fn error_text(resp: Response) -> String {
    resp.text().await.unwrap_or_else(|_| "unknown".to_string())
}

async fn server_error(status: StatusCode, resp: Response) -> KeeperError {
    KeeperError::Server {
        status: status.as_u16(),
        message: error_text(resp).await,
    }
}
