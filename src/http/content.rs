use std::path::Path;

use axum::{extract::rejection::JsonRejection, Extension, Json};
use serde::Deserialize;
use serde_json::Value;

use super::{
    response::{ApiError, SuccessResponse},
    AppState,
};
use crate::errors::SyncError;

#[derive(Debug, Deserialize)]
pub struct UpdateContentRequest {
    pub content: Option<String>,
}

#[tracing::instrument(name = "http::update_members_ts", skip_all)]
pub async fn update_members_ts(
    Extension(state): Extension<AppState>,
    payload: Result<Json<UpdateContentRequest>, JsonRejection>,
) -> Result<Json<SuccessResponse>, ApiError> {
    let failure = "members.ts commit failed";
    let content = required_content(payload).map_err(|err| ApiError::new(err, failure))?;

    replace(&state, &state.targets.members_ts, content.into_bytes(), failure).await
}

#[tracing::instrument(name = "http::update_schedules_ts", skip_all)]
pub async fn update_schedules_ts(
    Extension(state): Extension<AppState>,
    payload: Result<Json<UpdateContentRequest>, JsonRejection>,
) -> Result<Json<SuccessResponse>, ApiError> {
    let failure = "schedules.ts commit failed";
    let content = required_content(payload).map_err(|err| ApiError::new(err, failure))?;

    replace(&state, &state.targets.schedules_ts, content.into_bytes(), failure).await
}

/// Persists the whole request body, pretty printed, as the members JSON file.
#[tracing::instrument(name = "http::update_members", skip_all)]
pub async fn update_members(
    Extension(state): Extension<AppState>,
    payload: Result<Json<Value>, JsonRejection>,
) -> Result<Json<SuccessResponse>, ApiError> {
    let failure = "members.json commit failed";

    let value = match payload {
        Ok(Json(Value::Null)) => {
            return Err(ApiError::new(
                SyncError::Validation("members data is required".to_string()),
                failure,
            ))
        }
        Ok(Json(value)) => value,
        Err(rejection) => {
            return Err(ApiError::new(
                SyncError::Validation(rejection.to_string()),
                failure,
            ))
        }
    };

    let content = serde_json::to_vec_pretty(&value)
        .map_err(|err| ApiError::new(SyncError::Validation(err.to_string()), failure))?;

    replace(&state, &state.targets.members_json, content, failure).await
}

fn required_content(
    payload: Result<Json<UpdateContentRequest>, JsonRejection>,
) -> Result<String, SyncError> {
    match payload {
        Ok(Json(UpdateContentRequest {
            content: Some(content),
        })) => Ok(content),
        Ok(_) => Err(SyncError::Validation("content is required".to_string())),
        Err(rejection) => Err(SyncError::Validation(rejection.to_string())),
    }
}

async fn replace(
    state: &AppState,
    path: &Path,
    content: Vec<u8>,
    failure: &'static str,
) -> Result<Json<SuccessResponse>, ApiError> {
    let report = state
        .sync_service
        .replace_tracked_file(path, content)
        .await
        .map_err(|err| ApiError::new(err, failure))?;

    let label = path
        .file_name()
        .map(|name| name.to_string_lossy().to_string())
        .unwrap_or_else(|| path.to_string_lossy().to_string());

    Ok(Json(SuccessResponse::updated(&label, &report)))
}
