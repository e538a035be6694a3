//! Authentication routes
//!
//! Registration, login, token refresh, the current-user profile and
//! password changes.
//!
//! # Performance
//!
//! Password hashing and verification run on the blocking thread pool
//! inside [`AuthService`](crate::services::AuthService).

use crate::auth::{AuthUser, Credentials};
use crate::error::ApiResult;
use crate::state::AppState;
use axum::{
    extract::State,
    http::StatusCode,
    routing::{get, post},
    Json, Router,
};
use hypertrader_shared::types::{
    AuthTokens, ChangePasswordRequest, LoginRequest, RefreshTokenRequest, RegisterRequest,
    UserProfile,
};
use secrecy::SecretString;

pub fn auth_routes() -> Router<AppState> {
    Router::new()
        .route("/register", post(register))
        .route("/login", post(login))
        .route("/refresh", post(refresh_token))
        .route("/me", get(get_profile))
        .route("/password", post(change_password))
}

/// POST /api/v1/auth/register
async fn register(
    State(state): State<AppState>,
    Json(req): Json<RegisterRequest>,
) -> ApiResult<(StatusCode, Json<UserProfile>)> {
    let user = state.auth().register_with_limit(req).await?;
    Ok((StatusCode::CREATED, Json(user.to_profile())))
}

/// POST /api/v1/auth/login
async fn login(
    State(state): State<AppState>,
    Json(req): Json<LoginRequest>,
) -> ApiResult<Json<AuthTokens>> {
    let tokens = state.auth().login(Credentials::from(req)).await?;
    Ok(Json(tokens))
}

/// POST /api/v1/auth/refresh
async fn refresh_token(
    State(state): State<AppState>,
    Json(req): Json<RefreshTokenRequest>,
) -> ApiResult<Json<AuthTokens>> {
    let tokens = state.auth().refresh(&req.refresh_token).await?;
    Ok(Json(tokens))
}

/// GET /api/v1/auth/me
///
/// Requires a valid Bearer access token.
async fn get_profile(auth_user: AuthUser) -> Json<UserProfile> {
    Json(auth_user.user.to_profile())
}

/// POST /api/v1/auth/password
async fn change_password(
    State(state): State<AppState>,
    auth_user: AuthUser,
    Json(req): Json<ChangePasswordRequest>,
) -> ApiResult<StatusCode> {
    state
        .auth()
        .change_password(
            auth_user.user.id,
            SecretString::new(req.current_password),
            SecretString::new(req.new_password),
        )
        .await?;
    Ok(StatusCode::NO_CONTENT)
}
