//! Record endpoints. The user id comes from the auth middleware.

use crate::auth::UserId;
use crate::error::ServerError;
use crate::server::AppState;
use crate::storage::models::{DeleteRequest, EncryptedRecord, ReplaceOutcome, ReplaceRequest};
use axum::extract::State;
use axum::http::{Extensions, StatusCode};
use axum::Json;
use chrono::Utc;

fn user_id(extensions: &Extensions) -> Result<i64, ServerError> {
    extensions
        .get::<UserId>()
        .map(|id| id.0)
        .ok_or_else(|| ServerError::Auth("Not authenticated".to_string()))
}

fn not_found(name: &str) -> ServerError {
    ServerError::NotFound(format!("Record {:?} not found", name))
}

/// POST /api/client/data/add
pub async fn add(
    State(state): State<AppState>,
    extensions: Extensions,
    Json(record): Json<EncryptedRecord>,
) -> Result<StatusCode, ServerError> {
    let user_id = user_id(&extensions)?;
    if record.name.is_empty() {
        return Err(ServerError::BadRequest("Record name is empty".to_string()));
    }
    if !state.storage.add(user_id, &record)? {
        return Err(ServerError::Conflict(format!(
            "Record {:?} already exists",
            record.name
        )));
    }
    tracing::debug!("User {} added {:?}", user_id, record.name);
    Ok(StatusCode::OK)
}

/// POST /api/client/data/replace
pub async fn replace(
    State(state): State<AppState>,
    extensions: Extensions,
    Json(request): Json<ReplaceRequest>,
) -> Result<StatusCode, ServerError> {
    let user_id = user_id(&extensions)?;
    let record = &request.record;

    let outcome = match &request.precondition {
        None => {
            if state.storage.replace(user_id, record)? {
                ReplaceOutcome::Replaced
            } else {
                ReplaceOutcome::Missing
            }
        }
        Some(precondition) => {
            state
                .storage
                .replace_if(user_id, record, precondition.base_edit_date)?
        }
    };

    match outcome {
        ReplaceOutcome::Replaced => {
            tracing::debug!("User {} replaced {:?}", user_id, record.name);
            Ok(StatusCode::OK)
        }
        ReplaceOutcome::Conflict => Err(ServerError::Conflict(format!(
            "Record {:?} changed on the server",
            record.name
        ))),
        ReplaceOutcome::Missing => Err(not_found(&record.name)),
    }
}

/// POST /api/client/data/conflict
pub async fn append(
    State(state): State<AppState>,
    extensions: Extensions,
    Json(record): Json<EncryptedRecord>,
) -> Result<StatusCode, ServerError> {
    let user_id = user_id(&extensions)?;
    if !state.storage.append(user_id, &record)? {
        return Err(not_found(&record.name));
    }
    tracing::info!("User {} appended a conflicting version of {:?}", user_id, record.name);
    Ok(StatusCode::OK)
}

/// GET /api/client/data/get
pub async fn get_all(
    State(state): State<AppState>,
    extensions: Extensions,
) -> Result<Json<Vec<Vec<EncryptedRecord>>>, ServerError> {
    let user_id = user_id(&extensions)?;
    let records = state.storage.get_all(user_id)?;
    state.storage.set_last_seen(user_id, Utc::now())?;
    Ok(Json(records))
}

/// DELETE /api/client/data/delete
pub async fn delete(
    State(state): State<AppState>,
    extensions: Extensions,
    Json(request): Json<DeleteRequest>,
) -> Result<StatusCode, ServerError> {
    let user_id = user_id(&extensions)?;
    if !state.storage.delete(user_id, &request.name)? {
        return Err(not_found(&request.name));
    }
    tracing::info!("User {} deleted {:?}", user_id, request.name);
    Ok(StatusCode::OK)
}
