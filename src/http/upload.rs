use std::path::Path;

use axum::{
    extract::{
        multipart::{Field, MultipartError},
        Multipart,
    },
    Extension, Json,
};

use super::{
    response::{ApiError, SuccessResponse},
    AppState,
};
use crate::errors::SyncError;

#[derive(Debug, Default)]
struct UploadForm {
    payload: Option<Vec<u8>>,
    original_name: Option<String>,
    desired_name: Option<String>,
}

#[tracing::instrument(name = "http::upload_image", skip_all)]
pub async fn upload_image(
    Extension(state): Extension<AppState>,
    multipart: Multipart,
) -> Result<Json<SuccessResponse>, ApiError> {
    store(&state, &state.targets.images_dir, multipart).await
}

#[tracing::instrument(name = "http::upload_profile", skip_all)]
pub async fn upload_profile(
    Extension(state): Extension<AppState>,
    multipart: Multipart,
) -> Result<Json<SuccessResponse>, ApiError> {
    store(&state, &state.targets.profile_images_dir, multipart).await
}

#[tracing::instrument(name = "http::upload_member_image", skip_all)]
pub async fn upload_member_image(
    Extension(state): Extension<AppState>,
    multipart: Multipart,
) -> Result<Json<SuccessResponse>, ApiError> {
    store(&state, &state.targets.member_images_dir, multipart).await
}

async fn store(
    state: &AppState,
    directory: &Path,
    multipart: Multipart,
) -> Result<Json<SuccessResponse>, ApiError> {
    let failure = "image upload failed";

    let form = read_form(multipart, state.targets.max_upload_bytes)
        .await
        .map_err(|err| ApiError::new(err, failure))?;

    let (payload, desired_name) = match (form.payload, form.desired_name) {
        (Some(payload), Some(desired_name)) => (payload, desired_name),
        _ => {
            return Err(ApiError::new(
                SyncError::Validation("file or name missing".to_string()),
                failure,
            ))
        }
    };

    let original_extension = form
        .original_name
        .as_deref()
        .and_then(|name| Path::new(name).extension())
        .and_then(|extension| extension.to_str())
        .unwrap_or_default();

    let asset = state
        .sync_service
        .store_uploaded_asset(directory, &desired_name, payload, original_extension)
        .await
        .map_err(|err| ApiError::new(err, failure))?;

    Ok(Json(SuccessResponse::uploaded(&asset)))
}

async fn read_form(mut multipart: Multipart, max_bytes: usize) -> Result<UploadForm, SyncError> {
    let mut form = UploadForm::default();

    while let Some(field) = multipart.next_field().await.map_err(malformed)? {
        let field_name = field.name().unwrap_or_default().to_string();

        match field_name.as_str() {
            "image" | "file" => {
                let original_name = field.file_name().map(str::to_string);
                let bytes = read_limited(field, max_bytes).await?;

                if !bytes.is_empty() {
                    form.payload = Some(bytes);
                    form.original_name = original_name;
                }
            }
            "filename" | "name" => {
                let bytes = read_limited(field, max_bytes).await?;
                let text = String::from_utf8(bytes)
                    .map_err(|_| SyncError::Validation(format!("{field_name} is not UTF-8")))?;

                if !text.trim().is_empty() {
                    form.desired_name = Some(text);
                }
            }
            _ => {
                tracing::debug!("ignoring multipart field {}", field_name);
            }
        }
    }

    Ok(form)
}

fn malformed(err: MultipartError) -> SyncError {
    SyncError::Validation(format!("malformed upload: {err}"))
}

/// Reads a field chunk by chunk, giving up as soon as it outgrows `max_bytes`.
async fn read_limited(mut field: Field<'_>, max_bytes: usize) -> Result<Vec<u8>, SyncError> {
    let mut buffer = Vec::new();

    while let Some(chunk) = field.chunk().await.map_err(malformed)? {
        if buffer.len() + chunk.len() > max_bytes {
            return Err(SyncError::Validation(format!(
                "file exceeds the {max_bytes} byte upload limit"
            )));
        }
        buffer.extend_from_slice(&chunk);
    }

    Ok(buffer)
}
