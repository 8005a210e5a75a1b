mod chat;
mod groups;
mod tasks;
mod users;

use crate::blob::{PendingUpload, MAX_FILE_SIZE};
use crate::error::AppError;
use crate::state::AppState;
use crate::ws;
use axum::{
    extract::{DefaultBodyLimit, FromRequest, FromRequestParts, Multipart, Request},
    http::{header::CONTENT_TYPE, HeaderValue, StatusCode},
    response::{IntoResponse, Response},
    routing::{delete, get, post},
    Json, Router,
};
use serde::Serialize;
use serde_json::Value;
use std::collections::HashMap;
use tower_http::cors::{Any, CorsLayer};
use tower_http::services::ServeDir;
use tower_http::trace::TraceLayer;

/// Uniform success body: `{success, statusCode, message, data, errors}`
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ApiResponse<T> {
    #[serde(skip)]
    status: StatusCode,
    success: bool,
    status_code: u16,
    message: String,
    data: T,
    errors: Vec<String>,
}

impl<T: Serialize> ApiResponse<T> {
    fn with_status(status: StatusCode, data: T, message: impl Into<String>) -> Self {
        Self {
            status,
            success: true,
            status_code: status.as_u16(),
            message: message.into(),
            data,
            errors: Vec::new(),
        }
    }

    pub fn ok(data: T, message: impl Into<String>) -> Self {
        Self::with_status(StatusCode::OK, data, message)
    }

    pub fn created(data: T, message: impl Into<String>) -> Self {
        Self::with_status(StatusCode::CREATED, data, message)
    }
}

impl<T: Serialize> IntoResponse for ApiResponse<T> {
    fn into_response(self) -> Response {
        (self.status, Json(self)).into_response()
    }
}

/// JSON body whose rejections render as the error envelope
#[derive(FromRequest)]
#[from_request(via(axum::Json), rejection(AppError))]
pub struct ApiJson<T>(pub T);

#[derive(FromRequestParts)]
#[from_request(via(axum::extract::Path), rejection(AppError))]
pub struct ApiPath<T>(pub T);

#[derive(FromRequestParts)]
#[from_request(via(axum::extract::Query), rejection(AppError))]
pub struct ApiQuery<T>(pub T);

/// Text fields and files of a request body.
///
/// Accepts `multipart/form-data` (the web client's forms) as well as a flat
/// JSON object, whose non-string values are kept in their JSON text form.
#[derive(Debug, Default)]
pub struct FormInput {
    pub fields: HashMap<String, String>,
    /// `(field name, file)` in upload order
    pub files: Vec<(String, PendingUpload)>,
}

impl FormInput {
    pub fn take(&mut self, name: &str) -> Option<String> {
        self.fields.remove(name)
    }

    pub fn take_files(&mut self, name: &str) -> Vec<PendingUpload> {
        let (matching, rest) = std::mem::take(&mut self.files)
            .into_iter()
            .partition(|(field, _)| field == name);
        self.files = rest;
        matching.into_iter().map(|(_, file)| file).collect()
    }
}

impl<S: Send + Sync> FromRequest<S> for FormInput {
    type Rejection = AppError;

    async fn from_request(req: Request, state: &S) -> Result<Self, Self::Rejection> {
        let is_multipart = req
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .is_some_and(|ct| ct.starts_with("multipart/form-data"));

        let mut input = FormInput::default();

        if !is_multipart {
            let Json(object) = Json::<serde_json::Map<String, Value>>::from_request(req, state).await?;
            for (name, value) in object {
                let text = match value {
                    Value::Null => continue,
                    Value::String(s) => s,
                    other => other.to_string(),
                };
                input.fields.insert(name, text);
            }
            return Ok(input);
        }

        let mut multipart = Multipart::from_request(req, state).await?;
        while let Some(field) = multipart.next_field().await? {
            let name = field.name().unwrap_or_default().to_string();
            match field.file_name().map(String::from) {
                // Browsers send an empty filename for an untouched file input
                Some(filename) if filename.is_empty() => {}
                Some(filename) => {
                    let content_type = field.content_type().map(String::from);
                    let data = field.bytes().await?;
                    input.files.push((
                        name,
                        PendingUpload {
                            filename,
                            content_type,
                            data: data.to_vec(),
                        },
                    ));
                }
                None => {
                    let text = field.text().await?;
                    input.fields.insert(name, text);
                }
            }
        }

        Ok(input)
    }
}

fn cors_layer(origin: Option<&str>) -> CorsLayer {
    let cors = CorsLayer::new().allow_methods(Any).allow_headers(Any);
    match origin.map(HeaderValue::from_str) {
        Some(Ok(origin)) => cors.allow_origin(origin),
        Some(Err(e)) => {
            tracing::warn!("Ignoring invalid CORS_ORIGIN: {}", e);
            cors.allow_origin(Any)
        }
        None => cors.allow_origin(Any),
    }
}

async fn endpoint_not_found() -> AppError {
    AppError::not_found("API endpoint not found")
}

pub fn create_router(state: AppState) -> Router {
    let cors = cors_layer(state.config.cors_origin.as_deref());
    let files = ServeDir::new(&state.config.upload_dir);

    Router::new()
        // Health check
        .route("/health", get(|| async { "OK" }))
        // User routes
        .route("/api/v1/users/me", get(users::get_me).put(users::update_me))
        // Group routes
        .route("/api/v1/groups/create", post(groups::create_group))
        .route("/api/v1/groups/my", get(groups::my_groups))
        .route("/api/v1/groups/join", post(groups::join_group))
        .route("/api/v1/groups/add-member", post(groups::add_member))
        .route(
            "/api/v1/groups/{group_id}",
            get(groups::get_group).delete(groups::delete_group),
        )
        .route(
            "/api/v1/groups/{group_id}/members/{member_id}",
            delete(groups::remove_member),
        )
        // Task routes
        .route("/api/v1/tasks/create", post(tasks::create_task))
        .route("/api/v1/tasks/complete/{task_id}", post(tasks::complete_task))
        .route("/api/v1/tasks/group/{group_id}", get(tasks::group_tasks))
        .route(
            "/api/v1/tasks/group/{group_id}/status/{status}",
            get(tasks::group_tasks_by_status),
        )
        .route("/api/v1/tasks/all", get(tasks::all_tasks))
        .route("/api/v1/tasks/user/pending", get(tasks::pending_tasks))
        .route("/api/v1/tasks/{task_id}", delete(tasks::delete_task))
        // Chat routes
        .route(
            "/api/v1/chat/group/{group_id}",
            get(chat::list_messages).post(chat::send_message),
        )
        .route("/api/v1/chat/group/{group_id}/unread", get(chat::unread_count))
        .route("/api/v1/chat/group/{group_id}/typing", post(chat::typing))
        .route("/api/v1/chat/message/{message_id}", delete(chat::delete_message))
        // WebSocket endpoint
        .route("/ws", get(ws::handler::ws_handler))
        // Uploaded files
        .nest_service("/files", files)
        .fallback(endpoint_not_found)
        .layer(DefaultBodyLimit::max(4 * MAX_FILE_SIZE))
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(state)
}
