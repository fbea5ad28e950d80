//! Centralized error types for the core library.
//!
//! This module provides a unified error handling system that:
//! - Defines structured error types using `thiserror`
//! - Maps errors to appropriate HTTP status codes
//! - Implements `IntoResponse` for automatic JSON error responses

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;
use thiserror::Error;

/// Trait for error types that provide machine-readable error codes.
///
/// Implement this trait to provide consistent error codes across different
/// error conversion paths.
pub trait ErrorCode {
    /// Returns a machine-readable error code for API responses.
    fn code(&self) -> &'static str;
}

/// Application-wide error type for the server.
#[derive(Debug, Error)]
pub enum CoreError {
    /// Client sent malformed JSON or an unparseable request.
    #[error("invalid request: {0}")]
    InvalidRequest(String),

    /// Referenced track does not exist (by `uri`).
    #[error("track not found: {0}")]
    TrackNotFound(String),

    /// No subscriber cookie was present on a request that requires one.
    #[error("unknown subscriber")]
    UnknownSubscriber,

    /// Caller is not in the admin set.
    #[error("admin privileges required")]
    Unauthorized,

    /// Admin token did not match the configured password.
    #[error("invalid admin token")]
    InvalidAdminToken,

    /// Internal error that does not fit a more specific variant.
    #[error("internal error: {0}")]
    Internal(String),
}

impl ErrorCode for CoreError {
    fn code(&self) -> &'static str {
        match self {
            Self::InvalidRequest(_) => "invalid_request",
            Self::TrackNotFound(_) => "track_not_found",
            Self::UnknownSubscriber => "unknown_subscriber",
            Self::Unauthorized => "unauthorized",
            Self::InvalidAdminToken => "invalid_admin_token",
            Self::Internal(_) => "internal_error",
        }
    }
}

impl CoreError {
    /// Maps the error to an appropriate HTTP status code.
    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::InvalidRequest(_) => StatusCode::BAD_REQUEST,
            Self::TrackNotFound(_) => StatusCode::NOT_FOUND,
            Self::UnknownSubscriber | Self::Unauthorized | Self::InvalidAdminToken => {
                StatusCode::UNAUTHORIZED
            }
            Self::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

/// Convenient Result alias for application-wide operations.
pub type CoreResult<T> = Result<T, CoreError>;

/// JSON response body for error responses.
#[derive(Serialize)]
struct ErrorResponse {
    error: &'static str,
    message: String,
}

impl IntoResponse for CoreError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let body = ErrorResponse {
            error: self.code(),
            message: self.to_string(),
        };
        (status, Json(body)).into_response()
    }
}

impl From<serde_json::Error> for CoreError {
    fn from(err: serde_json::Error) -> Self {
        Self::InvalidRequest(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn track_not_found_returns_correct_code() {
        let err = CoreError::TrackNotFound("a".into());
        assert_eq!(err.code(), "track_not_found");
        assert_eq!(err.status_code(), StatusCode::NOT_FOUND);
    }

    #[test]
    fn unauthorized_maps_to_401() {
        let err = CoreError::Unauthorized;
        assert_eq!(err.status_code(), StatusCode::UNAUTHORIZED);
    }
}
