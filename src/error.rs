use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum AppError {
    #[error("{0}")]
    Validation(String),

    #[error("{0}")]
    BadRequest(String),

    #[error("{0}")]
    NotFound(String),

    #[error("{0}")]
    Conflict(String),

    #[error("{0}")]
    UnsupportedMediaType(String),

    #[error("{0}")]
    MethodNotAllowed(String),

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Internal server error")]
    Internal(#[from] anyhow::Error),
}

/// Uniform JSON error body returned for every failed request.
#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorEnvelope {
    pub status: u16,
    pub error: String,
    pub message: String,
}

impl ErrorEnvelope {
    pub fn new(status: StatusCode, message: impl Into<String>) -> Self {
        Self {
            status: status.as_u16(),
            error: status.canonical_reason().unwrap_or("Error").to_string(),
            message: message.into(),
        }
    }

    /// Builds the response and logs it at the level matching the status class.
    pub fn into_logged_response(self) -> Response {
        let status =
            StatusCode::from_u16(self.status).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);

        if status.is_server_error() {
            tracing::error!(status = self.status, message = %self.message, "Request failed");
        } else {
            tracing::warn!(status = self.status, message = %self.message, "Request rejected");
        }

        (status, Json(self)).into_response()
    }
}

impl AppError {
    pub fn status_code(&self) -> StatusCode {
        match self {
            AppError::Validation(_) | AppError::BadRequest(_) => StatusCode::BAD_REQUEST,
            AppError::NotFound(_) => StatusCode::NOT_FOUND,
            AppError::Conflict(_) => StatusCode::CONFLICT,
            AppError::UnsupportedMediaType(_) => StatusCode::UNSUPPORTED_MEDIA_TYPE,
            AppError::MethodNotAllowed(_) => StatusCode::METHOD_NOT_ALLOWED,
            AppError::Database(_) | AppError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status_code();

        // Causes of 500s stay in the logs, never in the body
        let message = match &self {
            AppError::Database(e) => {
                tracing::error!(error = ?e, "Unhandled database error");
                "Database error".to_string()
            }
            AppError::Internal(e) => {
                tracing::error!(error = ?e, "Unhandled internal error");
                "Internal server error".to_string()
            }
            other => other.to_string(),
        };

        ErrorEnvelope::new(status, message).into_logged_response()
    }
}

pub type Result<T> = std::result::Result<T, AppError>;
