//! API error handling
//!
//! Converts service errors into HTTP responses with a stable
//! `{"error": {"code", "message"}}` body.

use axum::{
    http::{header::RETRY_AFTER, HeaderValue, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use hypertrader_shared::{AuthError, ErrorDetail, ErrorResponse};
use thiserror::Error;

/// API error type that can be converted to HTTP responses
#[derive(Error, Debug)]
pub enum ApiError {
    #[error(transparent)]
    Auth(#[from] AuthError),

    #[error("Resource not found: {0}")]
    NotFound(String),

    #[error("Unauthorized: {0}")]
    Unauthorized(String),
}

impl ApiError {
    pub fn status(&self) -> StatusCode {
        match self {
            ApiError::Auth(err) => auth_status(err),
            ApiError::NotFound(_) => StatusCode::NOT_FOUND,
            ApiError::Unauthorized(_) => StatusCode::UNAUTHORIZED,
        }
    }

    fn code(&self) -> &'static str {
        match self {
            ApiError::Auth(err) => err.code(),
            ApiError::NotFound(_) => "NOT_FOUND",
            ApiError::Unauthorized(_) => "UNAUTHORIZED",
        }
    }
}

fn auth_status(err: &AuthError) -> StatusCode {
    match err {
        AuthError::WeakPassword(_) | AuthError::InvalidInput(_) | AuthError::InvalidRole(_) => {
            StatusCode::BAD_REQUEST
        }
        AuthError::DuplicateAccount => StatusCode::CONFLICT,
        AuthError::InvalidCredentials | AuthError::InvalidToken => StatusCode::UNAUTHORIZED,
        AuthError::AccountDeactivated | AuthError::Forbidden(_) => StatusCode::FORBIDDEN,
        AuthError::AccountLocked { .. } => StatusCode::LOCKED,
        AuthError::RateLimited => StatusCode::TOO_MANY_REQUESTS,
        AuthError::ServiceUnavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        let code = self.code();
        let message = match &self {
            // Infrastructure detail stays in the logs
            ApiError::Auth(AuthError::ServiceUnavailable(_)) => {
                "Service temporarily unavailable".to_string()
            }
            other => other.to_string(),
        };

        let body = Json(ErrorResponse {
            error: ErrorDetail {
                code: code.to_string(),
                message,
                field: None,
            },
        });

        let mut response = (status, body).into_response();
        if let ApiError::Auth(AuthError::AccountLocked {
            retry_after_secs, ..
        }) = &self
        {
            if let Ok(value) = HeaderValue::from_str(&retry_after_secs.to_string()) {
                response.headers_mut().insert(RETRY_AFTER, value);
            }
        }
        response
    }
}

/// Result type alias for API handlers
pub type ApiResult<T> = Result<T, ApiError>;
