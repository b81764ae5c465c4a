//! API error types and the client-facing error envelope.
//!
//! Handlers and middleware return `ApiError`. Its `IntoResponse` impl only
//! sets the status (plus `Retry-After` where relevant) and attaches an
//! [`ErrorReport`] to the response extensions. The error normalization
//! middleware is the one place that turns a report into the JSON envelope.

use axum::http::{HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use serde::Serialize;

use crate::db::DatabaseError;
use crate::token::TokenError;
use crate::users::UserError;

/// Message used for every 5xx envelope. Details stay in the server log.
pub const INTERNAL_ERROR_MESSAGE: &str = "An unexpected error occurred";

/// JSON body returned for every failed request.
#[derive(Debug, Serialize)]
pub struct ErrorEnvelope {
    pub error: String,
    #[serde(rename = "statusCode")]
    pub status_code: u16,
    #[serde(rename = "stackTrace", skip_serializing_if = "Option::is_none")]
    pub stack_trace: Option<String>,
}

/// Failure description carried from the error site to the normalization
/// middleware through response extensions.
#[derive(Debug, Clone)]
pub struct ErrorReport {
    pub status: StatusCode,
    /// Safe to show to any client.
    pub message: String,
    /// Full detail for the server log and development clients.
    pub detail: String,
}

impl ErrorReport {
    /// Report for a failure that never went through `ApiError`, such as a
    /// framework rejection or a caught panic.
    pub fn from_status(status: StatusCode, detail: impl Into<String>) -> Self {
        let message = if status.is_server_error() {
            INTERNAL_ERROR_MESSAGE.to_string()
        } else {
            status
                .canonical_reason()
                .unwrap_or("Request failed")
                .to_string()
        };
        Self {
            status,
            message,
            detail: detail.into(),
        }
    }
}

/// API-level errors with HTTP status mapping.
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error("Authentication required")]
    Unauthorized,
    #[error("Invalid username or password")]
    InvalidCredentials,
    #[error("Too many failed login attempts. Please try again later.")]
    LockedOut,
    #[error("Invalid request: {0}")]
    BadRequest(String),
    #[error("Not found: {0}")]
    NotFound(String),
    #[error("Conflict: {0}")]
    Conflict(String),
    #[error("Rate limit exceeded")]
    RateLimited { retry_after: u64 },
    #[error("Internal error: {0}")]
    Internal(String),
    #[error("Handler panicked: {0}")]
    Panicked(String),
}

impl ApiError {
    pub fn status(&self) -> StatusCode {
        match self {
            ApiError::Unauthorized | ApiError::InvalidCredentials => StatusCode::UNAUTHORIZED,
            ApiError::LockedOut => StatusCode::FORBIDDEN,
            ApiError::BadRequest(_) => StatusCode::BAD_REQUEST,
            ApiError::NotFound(_) => StatusCode::NOT_FOUND,
            ApiError::Conflict(_) => StatusCode::CONFLICT,
            ApiError::RateLimited { .. } => StatusCode::TOO_MANY_REQUESTS,
            ApiError::Internal(_) | ApiError::Panicked(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    fn client_message(&self) -> String {
        match self {
            ApiError::BadRequest(detail) | ApiError::NotFound(detail) | ApiError::Conflict(detail) => {
                detail.clone()
            }
            ApiError::RateLimited { retry_after } => {
                format!("Rate limit exceeded. Retry after {retry_after}s")
            }
            ApiError::Internal(_) | ApiError::Panicked(_) => INTERNAL_ERROR_MESSAGE.to_string(),
            other => other.to_string(),
        }
    }

    pub fn report(&self) -> ErrorReport {
        ErrorReport {
            status: self.status(),
            message: self.client_message(),
            detail: self.to_string(),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let report = self.report();
        let mut response = report.status.into_response();

        if let ApiError::RateLimited { retry_after } = &self {
            if let Ok(val) = HeaderValue::from_str(&retry_after.to_string()) {
                response.headers_mut().insert("Retry-After", val);
            }
        }
        response.extensions_mut().insert(report);
        response
    }
}

impl From<UserError> for ApiError {
    fn from(err: UserError) -> Self {
        match err {
            UserError::AlreadyExists => {
                ApiError::BadRequest("Username or email already exists".into())
            }
            UserError::InvalidInput(detail) => ApiError::BadRequest(detail),
            UserError::Storage(e) => e.into(),
        }
    }
}

impl From<TokenError> for ApiError {
    fn from(err: TokenError) -> Self {
        match err {
            TokenError::Expired | TokenError::Invalid(_) => ApiError::Unauthorized,
            TokenError::Configuration(e) => ApiError::Internal(e.to_string()),
            TokenError::Encoding(e) => ApiError::Internal(e),
        }
    }
}

impl From<DatabaseError> for ApiError {
    fn from(err: DatabaseError) -> Self {
        match err {
            DatabaseError::ConstraintViolation(detail) => ApiError::Conflict(detail),
            other => ApiError::Internal(other.to_string()),
        }
    }
}
