use super::{ApiJson, ApiResponse};
use crate::auth::AuthUser;
use crate::error::Result;
use crate::models::{UpsertProfile, User};
use crate::state::AppState;
use axum::extract::State;

pub async fn get_me(
    State(state): State<AppState>,
    auth: AuthUser,
) -> Result<ApiResponse<User>> {
    let user = state.user_service.get_by_id(auth.user_id).await?;
    Ok(ApiResponse::ok(user, "User fetched successfully"))
}

pub async fn update_me(
    State(state): State<AppState>,
    auth: AuthUser,
    ApiJson(input): ApiJson<UpsertProfile>,
) -> Result<ApiResponse<User>> {
    let user = state
        .user_service
        .update_profile(auth.user_id, &auth.username, input)
        .await?;
    Ok(ApiResponse::ok(user, "Profile updated successfully"))
}
