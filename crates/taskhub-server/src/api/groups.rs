use super::{ApiJson, ApiPath, ApiResponse, FormInput};
use crate::auth::AuthUser;
use crate::error::Result;
use crate::models::{AddMember, GroupDetails, GroupSummary, JoinGroup};
use crate::services::group::NewGroup;
use crate::state::AppState;
use axum::extract::State;
use serde_json::{json, Value};
use uuid::Uuid;

/// POST /api/v1/groups/create (multipart: name, description, groupImage)
pub async fn create_group(
    State(state): State<AppState>,
    auth: AuthUser,
    mut form: FormInput,
) -> Result<ApiResponse<GroupDetails>> {
    let input = NewGroup {
        name: form.take("name"),
        description: form.take("description"),
        image: form.take_files("groupImage").into_iter().next(),
    };

    let group = state.group_service.create(auth.user_id, input).await?;
    Ok(ApiResponse::created(group, "Group created successfully"))
}

pub async fn my_groups(
    State(state): State<AppState>,
    auth: AuthUser,
) -> Result<ApiResponse<Vec<GroupSummary>>> {
    let groups = state.group_service.list_for_user(auth.user_id).await?;
    Ok(ApiResponse::ok(groups, "Groups fetched successfully"))
}

pub async fn add_member(
    State(state): State<AppState>,
    auth: AuthUser,
    ApiJson(input): ApiJson<AddMember>,
) -> Result<ApiResponse<GroupDetails>> {
    let group = state.group_service.add_member(auth.user_id, input).await?;
    Ok(ApiResponse::ok(group, "Member added successfully"))
}

pub async fn get_group(
    State(state): State<AppState>,
    auth: AuthUser,
    ApiPath(group_id): ApiPath<Uuid>,
) -> Result<ApiResponse<GroupDetails>> {
    let group = state.group_service.details(group_id, auth.user_id).await?;
    Ok(ApiResponse::ok(group, "Group details fetched successfully"))
}

pub async fn remove_member(
    State(state): State<AppState>,
    auth: AuthUser,
    ApiPath((group_id, member_id)): ApiPath<(Uuid, Uuid)>,
) -> Result<ApiResponse<GroupDetails>> {
    let group = state
        .group_service
        .remove_member(group_id, member_id, auth.user_id)
        .await?;
    Ok(ApiResponse::ok(group, "Member removed successfully"))
}

pub async fn join_group(
    State(state): State<AppState>,
    auth: AuthUser,
    ApiJson(input): ApiJson<JoinGroup>,
) -> Result<ApiResponse<GroupDetails>> {
    let group = state.group_service.join(auth.user_id, input).await?;
    Ok(ApiResponse::ok(group, "Successfully joined the group"))
}

pub async fn delete_group(
    State(state): State<AppState>,
    auth: AuthUser,
    ApiPath(group_id): ApiPath<Uuid>,
) -> Result<ApiResponse<Value>> {
    state.group_service.delete(group_id, auth.user_id).await?;
    Ok(ApiResponse::ok(json!({}), "Group deleted successfully"))
}
