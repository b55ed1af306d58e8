use axum::{
    http::{header, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;

use crate::{
    errors::{ErrorKind, SyncError},
    models::{StoredAsset, SyncReport},
};

const RETRY_AFTER_SECS: &str = "5";

#[derive(Debug, Serialize)]
pub struct SuccessResponse {
    pub success: bool,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub filename: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
}

impl SuccessResponse {
    pub fn updated(label: &str, report: &SyncReport) -> Self {
        let message = if report.changed() {
            format!("{label} updated, committed and pushed")
        } else {
            format!("{label} unchanged, nothing to commit")
        };

        Self {
            success: true,
            message,
            filename: None,
            url: None,
        }
    }

    pub fn uploaded(asset: &StoredAsset) -> Self {
        let message = if asset.report.changed() {
            "image uploaded, committed and pushed"
        } else {
            "image unchanged, nothing to commit"
        };

        Self {
            success: true,
            message: message.to_string(),
            filename: Some(asset.filename.clone()),
            url: Some(asset.url.clone()),
        }
    }
}

#[derive(Debug, Serialize)]
pub struct FailureResponse {
    pub success: bool,
    pub error: String,
}

/// Boundary error: logs the full cause and answers with a uniform body.
#[derive(Debug)]
pub struct ApiError {
    pub error: SyncError,
    pub failure: &'static str,
}

impl ApiError {
    pub fn new(error: SyncError, failure: &'static str) -> Self {
        Self { error, failure }
    }

    pub fn status(&self) -> StatusCode {
        match self.error.kind() {
            ErrorKind::Validation => StatusCode::BAD_REQUEST,
            ErrorKind::Unavailable => StatusCode::SERVICE_UNAVAILABLE,
            ErrorKind::Filesystem | ErrorKind::Sync => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        let kind = self.error.kind();

        let message = match kind {
            ErrorKind::Validation => {
                tracing::warn!("rejected request: {}", self.error);
                self.error.to_string()
            }
            ErrorKind::Unavailable => {
                tracing::warn!("{}: {}", self.failure, self.error);
                format!("{}: try again later", self.failure)
            }
            ErrorKind::Filesystem | ErrorKind::Sync => {
                tracing::error!(kind = ?kind, "{}: {:?}", self.failure, self.error);
                self.failure.to_string()
            }
        };

        let body = Json(FailureResponse {
            success: false,
            error: message,
        });

        if status == StatusCode::SERVICE_UNAVAILABLE {
            (status, [(header::RETRY_AFTER, RETRY_AFTER_SECS)], body).into_response()
        } else {
            (status, body).into_response()
        }
    }
}

#[cfg(test)]
mod tests {
    use std::{io, time::Duration};

    use commitsync_core::GitError;

    use super::*;

    #[test]
    fn test_status_mapping() {
        let validation = ApiError::new(SyncError::Validation("content is required".into()), "x");
        assert_eq!(validation.status(), StatusCode::BAD_REQUEST);

        let filesystem = ApiError::new(
            SyncError::Filesystem {
                path: "data/members.ts".into(),
                source: io::Error::from(io::ErrorKind::PermissionDenied),
            },
            "x",
        );
        assert_eq!(filesystem.status(), StatusCode::INTERNAL_SERVER_ERROR);

        let rejected = ApiError::new(
            SyncError::Sync(GitError::PushRejected {
                message: "fetch first".into(),
            }),
            "x",
        );
        assert_eq!(rejected.status(), StatusCode::INTERNAL_SERVER_ERROR);

        let timed_out = ApiError::new(SyncError::TimedOut(Duration::from_secs(1)), "x");
        assert_eq!(timed_out.status(), StatusCode::SERVICE_UNAVAILABLE);
    }

    #[test]
    fn test_busy_response_has_retry_after() {
        let response = ApiError::new(SyncError::Busy, "members.ts commit failed").into_response();

        assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(response.headers()[header::RETRY_AFTER], RETRY_AFTER_SECS);
    }
}
