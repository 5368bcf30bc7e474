use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;

use crate::services::approval::ApprovalError;
use crate::services::storage::StorageError;

#[derive(Debug, Serialize)]
struct ErrorResponse {
    status: u16,
    detail: String,
}

#[derive(Debug)]
pub(crate) enum ApiError {
    Forbidden(String),
    BadRequest(String),
    NotFound(String),
    Conflict(String),
    Internal(String),
}

impl ApiError {
    /// Log the underlying error with context and return an `Internal` variant.
    pub(crate) fn internal(err: impl std::fmt::Display, context: &str) -> Self {
        tracing::error!(error = %err, "{context}");
        Self::Internal(context.to_string())
    }

    pub(crate) fn validation(err: validator::ValidationErrors) -> Self {
        Self::BadRequest(err.to_string())
    }
}

impl From<ApprovalError> for ApiError {
    fn from(err: ApprovalError) -> Self {
        match err {
            ApprovalError::NotFound => ApiError::NotFound("Submission not found".to_string()),
            ApprovalError::PermissionDenied => ApiError::Forbidden(err.to_string()),
            ApprovalError::NotPendingReview(_)
            | ApprovalError::NotApproved(_)
            | ApprovalError::MissingResults => {
                ApiError::Conflict(err.to_string())
            }
            ApprovalError::UnknownQuestion(_)
            | ApprovalError::ScoreExceedsMax { .. }
            | ApprovalError::InvalidScore { .. } => ApiError::BadRequest(err.to_string()),
            ApprovalError::Db(err) => ApiError::internal(err, "Approval query failed"),
        }
    }
}

impl From<StorageError> for ApiError {
    fn from(err: StorageError) -> Self {
        match err {
            StorageError::UnsupportedExtension(_) | StorageError::TooLarge { .. } => {
                ApiError::BadRequest(err.to_string())
            }
            StorageError::Io(err) => ApiError::internal(err, "Failed to store upload"),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, detail) = match self {
            ApiError::Forbidden(message) => (StatusCode::FORBIDDEN, message),
            ApiError::BadRequest(message) => (StatusCode::BAD_REQUEST, message),
            ApiError::NotFound(message) => (StatusCode::NOT_FOUND, message),
            ApiError::Conflict(message) => (StatusCode::CONFLICT, message),
            ApiError::Internal(message) => {
                tracing::error!(error = %message, "Internal server error");
                (StatusCode::INTERNAL_SERVER_ERROR, message)
            }
        };
        (status, Json(ErrorResponse { status: status.as_u16(), detail })).into_response()
    }
}
