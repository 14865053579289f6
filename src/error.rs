/// Unified error types for the agent directory
use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Main error type for the directory service
#[derive(Error, Debug)]
pub enum DirError {
    /// Database errors
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    /// Migration errors
    #[error("Migration error: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),

    /// Validation errors
    #[error("Validation error: {0}")]
    Validation(String),

    /// Not found errors
    #[error("Not found: {0}")]
    NotFound(String),

    /// Operation exists on the service surface but has no implementation
    #[error("Not implemented: {0}")]
    NotImplemented(String),

    /// Misconfiguration, e.g. a store without referrer support
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// JSON encoding/decoding errors
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// IO errors
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Internal server errors
    #[error("Internal error: {0}")]
    Internal(String),
}

/// JSON error response format
#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: String,
    pub message: String,
}

/// Convert DirError to HTTP response
impl IntoResponse for DirError {
    fn into_response(self) -> Response {
        let (status, error_code, message) = match self {
            DirError::Validation(_) => (
                StatusCode::BAD_REQUEST,
                "InvalidRequest",
                self.to_string(),
            ),
            DirError::NotFound(_) => (StatusCode::NOT_FOUND, "NotFound", self.to_string()),
            DirError::NotImplemented(_) => (
                StatusCode::NOT_IMPLEMENTED,
                "NotImplemented",
                self.to_string(),
            ),
            DirError::Database(_)
            | DirError::Migration(_)
            | DirError::Internal(_)
            | DirError::Io(_) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                "InternalServerError",
                "Internal server error".to_string(), // Don't leak details
            ),
            _ => (
                StatusCode::INTERNAL_SERVER_ERROR,
                "InternalServerError",
                self.to_string(),
            ),
        };

        if status.is_server_error() {
            crate::metrics::record_error(error_code, "api");
        }

        let body = Json(ErrorResponse {
            error: error_code.to_string(),
            message,
        });

        (status, body).into_response()
    }
}

/// Result type alias for directory operations
pub type DirResult<T> = Result<T, DirError>;
