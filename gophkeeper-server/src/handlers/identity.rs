//! Registration and login.

use crate::auth::bearer;
use crate::error::ServerError;
use crate::jwt;
use crate::server::AppState;
use crate::storage::models::IdentityData;
use crate::storage::verify_identity;
use axum::extract::State;
use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use chrono::Utc;

fn validate(identity: &IdentityData) -> Result<(), ServerError> {
    if identity.login.is_empty() || identity.hash.is_empty() {
        return Err(ServerError::BadRequest(
            "login and hash are required".to_string(),
        ));
    }
    Ok(())
}

fn issue_response(state: &AppState, user_id: i64) -> Result<Response, ServerError> {
    state.storage.set_last_seen(user_id, Utc::now())?;
    let token = jwt::issue(&state.secret, user_id, state.token_ttl)?;
    Ok((StatusCode::OK, [(header::AUTHORIZATION, bearer(&token))]).into_response())
}

/// POST /api/client/register
pub async fn register(
    State(state): State<AppState>,
    Json(identity): Json<IdentityData>,
) -> Result<Response, ServerError> {
    validate(&identity)?;

    let user = state
        .storage
        .create_user(&identity.login, &identity.hash)?
        .ok_or_else(|| ServerError::Conflict("Login already taken".to_string()))?;

    tracing::info!("Registered user {} ({})", user.id, user.login);
    issue_response(&state, user.id)
}

/// POST /api/client/authorize
pub async fn authorize(
    State(state): State<AppState>,
    Json(identity): Json<IdentityData>,
) -> Result<Response, ServerError> {
    validate(&identity)?;

    let user = state
        .storage
        .find_user(&identity.login)?
        .ok_or_else(|| ServerError::BadRequest("Unknown login".to_string()))?;
    if !verify_identity(&identity.hash, &user.hash) {
        return Err(ServerError::Auth("Wrong credentials".to_string()));
    }

    tracing::debug!("Authorized user {}", user.id);
    issue_response(&state, user.id)
}
