// HTTP error handling

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Result type for HTTP handlers
pub type AppResult<T> = Result<T, AppError>;

/// Application error with HTTP status code and a stable error kind.
#[derive(Debug)]
pub struct AppError {
    pub status: StatusCode,
    pub kind: &'static str,
    pub message: String,
}

impl AppError {
    pub fn new(status: StatusCode, kind: &'static str, message: impl Into<String>) -> Self {
        Self {
            status,
            kind,
            message: message.into(),
        }
    }

    pub fn bad_request(message: impl Into<String>) -> Self {
        Self::new(StatusCode::BAD_REQUEST, "BadRequest", message)
    }

    pub fn forbidden(message: impl Into<String>) -> Self {
        Self::new(StatusCode::FORBIDDEN, "Forbidden", message)
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new(StatusCode::NOT_FOUND, "NotFound", message)
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::new(StatusCode::INTERNAL_SERVER_ERROR, "Internal", message)
    }
}

impl fmt::Display for AppError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.status, self.message)
    }
}

impl std::error::Error for AppError {}

/// Error response JSON structure: `{success:false, error, message}`.
#[derive(Debug, Serialize, Deserialize)]
struct ErrorResponse {
    success: bool,
    error: String,
    message: String,
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let body = Json(ErrorResponse {
            success: false,
            error: self.kind.to_string(),
            message: self.message,
        });
        (self.status, body).into_response()
    }
}

/// Convert core errors to HTTP errors. Internal detail stays in the logs;
/// the body carries the error kind and a terse message.
impl From<clipstream_core::Error> for AppError {
    fn from(err: clipstream_core::Error) -> Self {
        use clipstream_core::Error;

        match err {
            Error::InvalidInput(msg) => Self::bad_request(msg),
            Error::NotFound(msg) => Self::not_found(msg),
            Error::StorageUnavailable(msg) => {
                tracing::error!("Storage unavailable: {}", msg);
                Self::new(
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "StorageUnavailable",
                    "Could not persist upload",
                )
            }
            Error::TranscodeFailed(msg) => {
                tracing::error!("Transcode failed: {}", msg);
                Self::new(
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "TranscodeFailed",
                    "Video processing failed",
                )
            }
            Error::OwnershipUnresolved(msg) => {
                tracing::error!("Ownership unresolved: {}", msg);
                Self::new(
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "OwnershipUnresolved",
                    "Could not resolve stream ownership",
                )
            }
            Error::CatalogWriteFailed(msg) => {
                tracing::error!("Catalog write failed: {}", msg);
                Self::new(
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "CatalogWriteFailed",
                    "Could not register the asset",
                )
            }
            Error::Database(e) => {
                tracing::error!("Database error: {}", e);
                Self::internal("Database error")
            }
            Error::Redis(e) => {
                tracing::error!("Redis error: {}", e);
                Self::internal("Service temporarily unavailable")
            }
            Error::Serialization(e) => {
                tracing::error!("Serialization error: {}", e);
                Self::internal("Data processing error")
            }
            Error::Io(e) => {
                tracing::error!("I/O error: {}", e);
                Self::internal("I/O error")
            }
            Error::Internal(msg) => {
                tracing::error!("Internal error: {}", msg);
                Self::internal("Internal server error")
            }
        }
    }
}
