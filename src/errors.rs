use crate::services::{
    presign::PresignError, storage_service::StorageError, upload_service::SessionError,
};
use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde_json::json;
use std::fmt;

/// A lightweight wrapper for general errors that keeps the message local.
#[derive(Debug)]
pub struct AppError {
    pub status: StatusCode,
    pub message: String,
}

impl AppError {
    /// Create a new AppError with a specific status and message.
    pub fn new(status: StatusCode, msg: impl Into<String>) -> Self {
        Self {
            status,
            message: msg.into(),
        }
    }

    /// Shortcut for a 500 Internal Server Error
    pub fn internal(msg: impl Into<String>) -> Self {
        Self::new(StatusCode::INTERNAL_SERVER_ERROR, msg)
    }

    /// Shortcut for 400 Bad Request
    pub fn bad_request(msg: impl Into<String>) -> Self {
        Self::new(StatusCode::BAD_REQUEST, msg)
    }
}

impl fmt::Display for AppError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl std::error::Error for AppError {}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        if self.status.is_server_error() {
            tracing::error!(status = self.status.as_u16(), "{}", self.message);
        }

        let body = Json(json!({
            "success": false,
            "error": self.message,
            "status": self.status.as_u16()
        }));

        (self.status, body).into_response()
    }
}

impl From<anyhow::Error> for AppError {
    fn from(err: anyhow::Error) -> Self {
        AppError::internal(err.to_string())
    }
}

impl From<SessionError> for AppError {
    fn from(err: SessionError) -> Self {
        let status = match &err {
            SessionError::Validation(_) => StatusCode::BAD_REQUEST,
            SessionError::InvalidSession { .. } => StatusCode::NOT_FOUND,
            SessionError::AlreadyPresigned(_) | SessionError::IncompleteUpload { .. } => {
                StatusCode::CONFLICT
            }
            SessionError::StorageUnavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
        };
        AppError::new(status, err.to_string())
    }
}

impl From<StorageError> for AppError {
    fn from(err: StorageError) -> Self {
        let status = match &err {
            StorageError::UploadNotFound(_) | StorageError::ObjectNotFound(_) => {
                StatusCode::NOT_FOUND
            }
            StorageError::UploadCompleted(_)
            | StorageError::PartCountAlreadySet(_)
            | StorageError::PartCountUnset(_)
            | StorageError::IncompleteUpload { .. } => StatusCode::CONFLICT,
            StorageError::InvalidObjectKey
            | StorageError::InvalidPartCount(_)
            | StorageError::PartOutOfRange { .. } => StatusCode::BAD_REQUEST,
            StorageError::PartTooLarge => StatusCode::PAYLOAD_TOO_LARGE,
            StorageError::Sqlx(_) | StorageError::Io(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };
        AppError::new(status, err.to_string())
    }
}

impl From<PresignError> for AppError {
    fn from(err: PresignError) -> Self {
        AppError::new(StatusCode::FORBIDDEN, err.to_string())
    }
}
