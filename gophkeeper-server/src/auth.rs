//! Bearer JWT middleware and the offline forbidder.

use crate::error::ServerError;
use crate::jwt;
use crate::server::AppState;
use axum::body::Body;
use axum::extract::State;
use axum::http::{header, Request};
use axum::middleware::Next;
use axum::response::Response;
use chrono::Utc;

/// Slack added to the sync period before an agent counts as out of sync.
pub const FORBIDDER_GRACE_SECS: i64 = 5;

/// Authenticated user id, placed in request extensions by [`auth_middleware`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UserId(pub i64);

/// Format the `Authorization` header value for `token`.
pub fn bearer(token: &str) -> String {
    format!("Bearer {}", token)
}

/// Validates `Authorization: Bearer <jwt>` and stores the user id.
pub async fn auth_middleware(
    State(state): State<AppState>,
    mut request: Request<Body>,
    next: Next,
) -> Result<Response, ServerError> {
    let token = request
        .headers()
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .ok_or_else(|| ServerError::Auth("Missing Authorization header".to_string()))?
        .strip_prefix("Bearer ")
        .ok_or_else(|| ServerError::Auth("Invalid auth scheme".to_string()))?
        .to_string();

    let claims = jwt::verify(&state.secret, &token)?;
    request.extensions_mut().insert(UserId(claims.user_id));

    Ok(next.run(request).await)
}

/// Rejects mutations from agents that have not pulled within the sync
/// period. Must run after [`auth_middleware`].
pub async fn offline_forbidder(
    State(state): State<AppState>,
    request: Request<Body>,
    next: Next,
) -> Result<Response, ServerError> {
    let UserId(user_id) = request
        .extensions()
        .get::<UserId>()
        .copied()
        .ok_or_else(|| ServerError::Auth("Not authenticated".to_string()))?;

    let last_seen = state.storage.get_last_seen(user_id)?;
    let limit = state.sync_period.as_secs() as i64 + FORBIDDER_GRACE_SECS;
    let stale = match last_seen {
        Some(seen) => (Utc::now() - seen).num_seconds() > limit,
        None => true,
    };
    if stale {
        tracing::debug!("User {} out of sync, refusing {}", user_id, request.uri().path());
        return Err(ServerError::Forbidden(
            "Out of sync, pull before writing".to_string(),
        ));
    }

    Ok(next.run(request).await)
}
