use super::{ApiJson, ApiPath, ApiQuery, ApiResponse, FormInput};
use crate::auth::AuthUser;
use crate::error::Result;
use crate::models::{ListMessagesQuery, PageRequest};
use crate::state::AppState;
use axum::extract::State;
use serde::Deserialize;
use serde_json::{json, Value};
use taskhub_protocol::MessageData;
use uuid::Uuid;

#[derive(Debug, Default, Deserialize)]
pub struct TypingRequest {
    pub username: Option<String>,
}

/// POST /api/v1/chat/group/{group_id} (multipart: content, attachments[])
pub async fn send_message(
    State(state): State<AppState>,
    auth: AuthUser,
    ApiPath(group_id): ApiPath<Uuid>,
    mut form: FormInput,
) -> Result<ApiResponse<MessageData>> {
    let content = form.take("content");
    let attachments = form.take_files("attachments");

    let message = state
        .message_service
        .send(group_id, auth.user_id, content, attachments)
        .await?;
    Ok(ApiResponse::created(message, "Message sent successfully"))
}

pub async fn list_messages(
    State(state): State<AppState>,
    auth: AuthUser,
    ApiPath(group_id): ApiPath<Uuid>,
    ApiQuery(query): ApiQuery<ListMessagesQuery>,
) -> Result<ApiResponse<Vec<MessageData>>> {
    let messages = state
        .message_service
        .list(group_id, auth.user_id, PageRequest::from(query))
        .await?;
    Ok(ApiResponse::ok(messages, "Messages retrieved successfully"))
}

pub async fn unread_count(
    State(state): State<AppState>,
    auth: AuthUser,
    ApiPath(group_id): ApiPath<Uuid>,
) -> Result<ApiResponse<Value>> {
    let unread = state.message_service.unread_count(group_id, auth.user_id).await?;
    Ok(ApiResponse::ok(
        json!({ "unreadCount": unread }),
        "Unread count retrieved successfully",
    ))
}

pub async fn typing(
    State(state): State<AppState>,
    auth: AuthUser,
    ApiPath(group_id): ApiPath<Uuid>,
    ApiJson(input): ApiJson<TypingRequest>,
) -> Result<ApiResponse<Value>> {
    let username = input.username.unwrap_or(auth.username);
    state
        .message_service
        .notify_typing(group_id, auth.user_id, username)
        .await?;
    Ok(ApiResponse::ok(json!({}), "Typing status sent successfully"))
}

pub async fn delete_message(
    State(state): State<AppState>,
    auth: AuthUser,
    ApiPath(message_id): ApiPath<Uuid>,
) -> Result<ApiResponse<Value>> {
    state.message_service.delete(message_id, auth.user_id).await?;
    Ok(ApiResponse::ok(json!({}), "Message deleted successfully"))
}
