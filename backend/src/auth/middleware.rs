//! Authentication extractor
//!
//! Resolves the `Authorization: Bearer <token>` header into the current
//! account through [`AuthService::resolve_current_user`](crate::services::AuthService::resolve_current_user).

use crate::auth::jwt::Claims;
use crate::error::ApiError;
use crate::repositories::UserRecord;
use crate::state::AppState;
use axum::{
    extract::FromRef,
    http::{header::AUTHORIZATION, request::Parts},
};

/// Authenticated account and the access-token claims it was resolved from
#[derive(Debug, Clone)]
pub struct AuthUser {
    pub user: UserRecord,
    pub claims: Claims,
}

/// Pull the bearer token out of request headers
pub(crate) fn bearer_token(parts: &Parts) -> Result<&str, ApiError> {
    let header = parts
        .headers
        .get(AUTHORIZATION)
        .and_then(|value| value.to_str().ok())
        .ok_or_else(|| ApiError::Unauthorized("Missing authorization header".to_string()))?;

    header
        .strip_prefix("Bearer ")
        .map(str::trim)
        .filter(|token| !token.is_empty())
        .ok_or_else(|| ApiError::Unauthorized("Invalid authorization format".to_string()))
}

#[axum::async_trait]
impl<S> axum::extract::FromRequestParts<S> for AuthUser
where
    AppState: FromRef<S>,
    S: Send + Sync,
{
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        let app_state = AppState::from_ref(state);
        let token = bearer_token(parts)?;

        let resolved = app_state.auth().resolve_current_user(token).await?;
        Ok(AuthUser {
            user: resolved.user,
            claims: resolved.claims,
        })
    }
}
