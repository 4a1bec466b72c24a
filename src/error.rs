use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use std::fmt::Display;

use crate::lifecycle::LifecycleError;
use crate::query::FilterError;
use crate::storage::StorageError;
use crate::upload::UploadRejection;

pub type AppResult<T> = Result<T, AppError>;

#[derive(Debug)]
pub struct AppError {
    status: StatusCode,
    message: String,
}

impl AppError {
    pub fn new(status: StatusCode, message: impl Into<String>) -> Self {
        Self {
            status,
            message: message.into(),
        }
    }

    pub fn status(&self) -> StatusCode {
        self.status
    }

    pub fn bad_request(message: impl Into<String>) -> Self {
        Self::new(StatusCode::BAD_REQUEST, message)
    }

    pub fn unauthorized() -> Self {
        Self::new(StatusCode::UNAUTHORIZED, "unauthorized")
    }

    pub fn forbidden() -> Self {
        Self::new(StatusCode::FORBIDDEN, "forbidden")
    }

    pub fn not_found() -> Self {
        Self::new(StatusCode::NOT_FOUND, "resource not found")
    }

    pub fn not_found_with(message: impl Into<String>) -> Self {
        Self::new(StatusCode::NOT_FOUND, message)
    }

    pub fn conflict(message: impl Into<String>) -> Self {
        Self::new(StatusCode::CONFLICT, message)
    }

    pub fn unsupported_media_type(message: impl Into<String>) -> Self {
        Self::new(StatusCode::UNSUPPORTED_MEDIA_TYPE, message)
    }

    pub fn payload_too_large(message: impl Into<String>) -> Self {
        Self::new(StatusCode::PAYLOAD_TOO_LARGE, message)
    }

    /// Logs the underlying error; clients only see a generic message.
    pub fn internal<E: Display>(error: E) -> Self {
        tracing::error!(error = %error, "internal error");
        Self::new(StatusCode::INTERNAL_SERVER_ERROR, "internal server error")
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status;
        let body = Json(ErrorResponse {
            error: self.message,
        });
        (status, body).into_response()
    }
}

#[derive(Serialize)]
struct ErrorResponse {
    error: String,
}

impl From<LifecycleError> for AppError {
    fn from(value: LifecycleError) -> Self {
        match value {
            LifecycleError::NotFound => AppError::not_found_with("document not found"),
            LifecycleError::UnknownUser
            | LifecycleError::UnknownDocumentType
            | LifecycleError::InactiveDocumentType
            | LifecycleError::Validation(_)
            | LifecycleError::NoChanges => AppError::bad_request(value.to_string()),
            LifecycleError::InvalidTransition { .. } => AppError::conflict(value.to_string()),
            LifecycleError::Corrupt(_) | LifecycleError::Database(_) => AppError::internal(value),
        }
    }
}

impl From<FilterError> for AppError {
    fn from(value: FilterError) -> Self {
        AppError::bad_request(value.to_string())
    }
}

impl From<UploadRejection> for AppError {
    fn from(value: UploadRejection) -> Self {
        match value {
            UploadRejection::UnsupportedType { .. } => {
                AppError::unsupported_media_type(value.to_string())
            }
            UploadRejection::TooLarge { .. } => AppError::payload_too_large(value.to_string()),
        }
    }
}

impl From<StorageError> for AppError {
    fn from(value: StorageError) -> Self {
        match value {
            StorageError::NotFound(_) => AppError::not_found_with("file not found"),
            _ => AppError::internal(value),
        }
    }
}

impl From<diesel::result::Error> for AppError {
    fn from(value: diesel::result::Error) -> Self {
        match value {
            diesel::result::Error::NotFound => AppError::not_found(),
            _ => AppError::internal(value),
        }
    }
}

impl From<jsonwebtoken::errors::Error> for AppError {
    fn from(value: jsonwebtoken::errors::Error) -> Self {
        AppError::internal(value)
    }
}

impl From<anyhow::Error> for AppError {
    fn from(value: anyhow::Error) -> Self {
        AppError::internal(value)
    }
}

impl From<std::io::Error> for AppError {
    fn from(value: std::io::Error) -> Self {
        AppError::internal(value)
    }
}
