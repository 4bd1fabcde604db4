//! Error types for the pollution aggregator
//!
//! Upstream integrations have their own error enums (`AuthError`,
//! `UpstreamError`). Data-call failures are absorbed by the pollution
//! client; only `AuthError` reaches a handler, converted to `AppError`,
//! which implements `IntoResponse`.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use thiserror::Error;

use crate::upstream::AuthError;

/// Application-wide error type
///
/// Each variant maps to one HTTP status in `into_response`.
#[derive(Debug, Error)]
pub enum AppError {
    /// No data for the requested resource (404)
    #[error("{0}")]
    NotFound(String),

    /// Validation error (400)
    #[error("{0}")]
    Validation(String),

    /// Upstream session could not be established (503)
    #[error("Upstream authentication failed: {0}")]
    Auth(#[from] AuthError),

    /// HTTP client error (502)
    #[error("HTTP client error: {0}")]
    HttpClient(#[from] reqwest::Error),

    /// Configuration error (500)
    #[error("Configuration error: {0}")]
    Config(String),

    /// Internal server error (500)
    #[error("Internal error: {0}")]
    Internal(#[from] anyhow::Error),
}

impl From<config::ConfigError> for AppError {
    fn from(err: config::ConfigError) -> Self {
        AppError::Config(err.to_string())
    }
}

impl AppError {
    /// Short label used for the error metric and logs
    pub fn kind(&self) -> &'static str {
        match self {
            AppError::NotFound(_) => "not_found",
            AppError::Validation(_) => "validation",
            AppError::Auth(_) => "auth",
            AppError::HttpClient(_) => "http_client",
            AppError::Config(_) => "config",
            AppError::Internal(_) => "internal",
        }
    }
}

impl IntoResponse for AppError {
    /// Convert error to HTTP response
    ///
    /// Body is always `{"error": "<message>"}`.
    fn into_response(self) -> Response {
        use axum::Json;

        let (status, error_message) = match &self {
            AppError::NotFound(msg) => (StatusCode::NOT_FOUND, msg.clone()),
            AppError::Validation(msg) => (StatusCode::BAD_REQUEST, msg.clone()),
            AppError::Auth(_) => (
                StatusCode::SERVICE_UNAVAILABLE,
                "External service unavailable".to_string(),
            ),
            AppError::HttpClient(_) => {
                (StatusCode::BAD_GATEWAY, self.to_string())
            }
            AppError::Config(msg) => (StatusCode::INTERNAL_SERVER_ERROR, msg.clone()),
            AppError::Internal(_) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                "Internal server error".to_string(),
            ),
        };

        if status.is_server_error() {
            tracing::error!(error = %self, "Request failed");
        }

        use crate::metrics::ERRORS_TOTAL;
        ERRORS_TOTAL.with_label_values(&[self.kind()]).inc();

        let body = Json(serde_json::json!({
            "error": error_message,
        }));

        (status, body).into_response()
    }
}

/// Result type alias using AppError
pub type Result<T> = std::result::Result<T, AppError>;
