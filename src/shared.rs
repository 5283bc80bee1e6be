use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use std::sync::Arc;
use thiserror::Error;
use tracing::error;

use crate::session::SessionManager;

/// Shared application state containing all dependencies
#[derive(Clone)]
pub struct AppState {
    pub session_manager: Arc<SessionManager>,
}

impl AppState {
    pub fn new(session_manager: Arc<SessionManager>) -> Self {
        Self { session_manager }
    }
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum AppError {
    #[error("Invalid key material: {0}")]
    KeyFormat(String),

    #[error("Signing error: {0}")]
    Signing(String),

    #[error("Invalid token: {0}")]
    InvalidToken(String),

    #[error("Session not found: {0}")]
    SessionNotFound(String),

    #[error("Session expired: {0}")]
    SessionExpired(String),

    #[error("Authentication failed: {0}")]
    Authentication(String),

    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    #[error("Bad request: {0}")]
    BadRequest(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Internal server error")]
    Internal,
}

impl AppError {
    /// Stable machine-readable name, used as the `kind` field of error bodies
    pub fn kind(&self) -> &'static str {
        match self {
            AppError::KeyFormat(_) => "key_format_error",
            AppError::Signing(_) => "signing_error",
            AppError::InvalidToken(_) => "invalid_token",
            AppError::SessionNotFound(_) => "session_not_found",
            AppError::SessionExpired(_) => "session_expired",
            AppError::Authentication(_) => "authentication_error",
            AppError::Unauthorized(_) => "unauthorized",
            AppError::BadRequest(_) => "bad_request",
            AppError::Config(_) => "config_error",
            AppError::Internal => "internal_error",
        }
    }

    /// HTTP status for the error. `Authentication` only arises from signing faults while
    /// creating a session, so it is a 500 rather than a 4xx.
    pub fn status_code(&self) -> StatusCode {
        match self {
            AppError::SessionNotFound(_) => StatusCode::NOT_FOUND,
            AppError::SessionExpired(_) | AppError::InvalidToken(_) | AppError::Unauthorized(_) => {
                StatusCode::UNAUTHORIZED
            }
            AppError::BadRequest(_) => StatusCode::BAD_REQUEST,
            AppError::KeyFormat(_)
            | AppError::Signing(_)
            | AppError::Authentication(_)
            | AppError::Config(_)
            | AppError::Internal => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status_code();

        // Server-side failures get a generic message; the detail goes to the log only.
        let error_message = if status.is_server_error() {
            error!(kind = self.kind(), error = %self, "Request failed with internal error");
            "Internal server error".to_string()
        } else {
            self.to_string()
        };

        let body = Json(json!({
            "error": error_message,
            "kind": self.kind(),
        }));

        (status, body).into_response()
    }
}

/// Masks a sensitive value for logging, keeping only the first and last four characters
pub fn mask_sensitive(value: &str) -> String {
    const VISIBLE: usize = 4;

    let chars: Vec<char> = value.chars().collect();
    if chars.len() <= VISIBLE * 2 {
        return "*".repeat(chars.len());
    }

    let head: String = chars[..VISIBLE].iter().collect();
    let tail: String = chars[chars.len() - VISIBLE..].iter().collect();
    format!("{}{}{}", head, "*".repeat(chars.len() - VISIBLE * 2), tail)
}
