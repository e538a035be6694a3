//! Error types for the Hypertrader authentication core

use chrono::{DateTime, Utc};
use thiserror::Error;

/// Typed rejection returned by every authentication and authorization path.
///
/// Expected rejections are values of this enum, never panics. Wrong
/// password and unknown user both map to [`AuthError::InvalidCredentials`]
/// so callers cannot enumerate usernames.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum AuthError {
    #[error("Password does not meet security requirements: {0}")]
    WeakPassword(String),

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Invalid role specified: {0}")]
    InvalidRole(String),

    #[error("Username or email already registered")]
    DuplicateAccount,

    #[error("Invalid username or password")]
    InvalidCredentials,

    #[error("Account is temporarily locked due to too many failed login attempts")]
    AccountLocked {
        until: DateTime<Utc>,
        /// Whole seconds until `until`, measured on the service clock
        retry_after_secs: i64,
    },

    #[error("Account is deactivated")]
    AccountDeactivated,

    #[error("Invalid token")]
    InvalidToken,

    #[error("Forbidden: {0}")]
    Forbidden(String),

    #[error("Too many attempts, try again later")]
    RateLimited,

    #[error("Service unavailable: {0}")]
    ServiceUnavailable(String),
}

impl AuthError {
    /// Stable machine-readable code for this rejection
    pub fn code(&self) -> &'static str {
        match self {
            AuthError::WeakPassword(_) => "WEAK_PASSWORD",
            AuthError::InvalidInput(_) => "VALIDATION_ERROR",
            AuthError::InvalidRole(_) => "INVALID_ROLE",
            AuthError::DuplicateAccount => "DUPLICATE_ACCOUNT",
            AuthError::InvalidCredentials => "INVALID_CREDENTIALS",
            AuthError::AccountLocked { .. } => "ACCOUNT_LOCKED",
            AuthError::AccountDeactivated => "ACCOUNT_DEACTIVATED",
            AuthError::InvalidToken => "INVALID_TOKEN",
            AuthError::Forbidden(_) => "FORBIDDEN",
            AuthError::RateLimited => "RATE_LIMITED",
            AuthError::ServiceUnavailable(_) => "SERVICE_UNAVAILABLE",
        }
    }

    /// Whether the caller may retry the same request unchanged later
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            AuthError::ServiceUnavailable(_) | AuthError::RateLimited | AuthError::AccountLocked { .. }
        )
    }
}
