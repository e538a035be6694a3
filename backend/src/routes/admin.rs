//! Administrative routes
//!
//! Account listing (admin role) and activation management (`manage:users`).

use crate::auth::AuthUser;
use crate::error::{ApiError, ApiResult};
use crate::repositories::UserRecord;
use crate::state::AppState;
use axum::{
    extract::{Path, State},
    routing::{get, put},
    Json, Router,
};
use hypertrader_shared::types::{SetActiveRequest, UserProfile};
use uuid::Uuid;

pub fn admin_routes() -> Router<AppState> {
    Router::new()
        .route("/users", get(list_users))
        .route("/users/:id/active", put(set_active))
}

/// GET /api/v1/admin/users
async fn list_users(
    State(state): State<AppState>,
    auth_user: AuthUser,
) -> ApiResult<Json<Vec<UserProfile>>> {
    let users = state.auth().list_users(&auth_user.claims).await?;
    Ok(Json(users.iter().map(UserRecord::to_profile).collect()))
}

/// PUT /api/v1/admin/users/:id/active
async fn set_active(
    State(state): State<AppState>,
    auth_user: AuthUser,
    Path(user_id): Path<Uuid>,
    Json(req): Json<SetActiveRequest>,
) -> ApiResult<Json<UserProfile>> {
    let user = state
        .auth()
        .set_active(&auth_user.claims, user_id, req.active)
        .await?
        .ok_or_else(|| ApiError::NotFound(format!("User {}", user_id)))?;
    Ok(Json(user.to_profile()))
}
