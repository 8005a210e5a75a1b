use super::{ApiPath, ApiQuery, ApiResponse, FormInput};
use crate::auth::AuthUser;
use crate::error::{AppError, Result};
use crate::models::{CreateTask, Task, TaskStatus, TaskStatusQuery};
use crate::state::AppState;
use axum::extract::State;
use chrono::{DateTime, NaiveDate, Utc};
use serde_json::{json, Value};
use std::str::FromStr;
use uuid::Uuid;

fn parse_status(raw: Option<&str>) -> Result<Option<TaskStatus>> {
    match raw.filter(|s| !s.is_empty()) {
        Some(s) => s.parse().map(Some).map_err(AppError::BadRequest),
        None => Ok(None),
    }
}

/// Parses an optional text field; blank counts as absent.
fn parse_field<T: FromStr>(form: &mut FormInput, name: &str) -> Result<Option<T>> {
    match form.take(name).filter(|v| !v.trim().is_empty()) {
        Some(raw) => raw
            .trim()
            .parse()
            .map(Some)
            .map_err(|_| AppError::bad_request(format!("Invalid {}", name))),
        None => Ok(None),
    }
}

/// RFC 3339 timestamp, or a bare `YYYY-MM-DD` from a date input (midnight UTC)
fn parse_due_date(form: &mut FormInput) -> Result<Option<DateTime<Utc>>> {
    let Some(raw) = form.take("dueDate").filter(|v| !v.trim().is_empty()) else {
        return Ok(None);
    };
    let raw = raw.trim();
    if let Ok(at) = raw.parse::<DateTime<Utc>>() {
        return Ok(Some(at));
    }
    NaiveDate::parse_from_str(raw, "%Y-%m-%d")
        .ok()
        .and_then(|d| d.and_hms_opt(0, 0, 0))
        .map(|dt| Some(dt.and_utc()))
        .ok_or_else(|| AppError::bad_request("Invalid dueDate"))
}

/// POST /api/v1/tasks/create (JSON or multipart: title, description, groupId, dueDate, points)
pub async fn create_task(
    State(state): State<AppState>,
    auth: AuthUser,
    mut form: FormInput,
) -> Result<ApiResponse<Task>> {
    let input = CreateTask {
        title: form.take("title"),
        description: form.take("description"),
        group_id: parse_field(&mut form, "groupId")?,
        due_date: parse_due_date(&mut form)?,
        points: parse_field(&mut form, "points")?,
    };

    let task = state.task_service.create(auth.user_id, input).await?;
    Ok(ApiResponse::created(task, "Task created successfully"))
}

pub async fn complete_task(
    State(state): State<AppState>,
    auth: AuthUser,
    ApiPath(task_id): ApiPath<Uuid>,
) -> Result<ApiResponse<Task>> {
    let task = state.task_service.complete(task_id, auth.user_id).await?;
    Ok(ApiResponse::ok(task, "Task marked as completed"))
}

pub async fn group_tasks(
    State(state): State<AppState>,
    auth: AuthUser,
    ApiPath(group_id): ApiPath<Uuid>,
) -> Result<ApiResponse<Vec<Task>>> {
    let tasks = state.task_service.list(auth.user_id, Some(group_id), None).await?;
    Ok(ApiResponse::ok(tasks, "Tasks fetched successfully"))
}

pub async fn group_tasks_by_status(
    State(state): State<AppState>,
    auth: AuthUser,
    ApiPath((group_id, status)): ApiPath<(Uuid, String)>,
) -> Result<ApiResponse<Vec<Task>>> {
    let status = parse_status(Some(&status))?;
    let tasks = state.task_service.list(auth.user_id, Some(group_id), status).await?;
    Ok(ApiResponse::ok(tasks, "Tasks fetched successfully"))
}

/// GET /api/v1/tasks/all?status= (every group the requester belongs to)
pub async fn all_tasks(
    State(state): State<AppState>,
    auth: AuthUser,
    ApiQuery(query): ApiQuery<TaskStatusQuery>,
) -> Result<ApiResponse<Vec<Task>>> {
    let status = parse_status(query.status.as_deref())?;
    let tasks = state.task_service.list(auth.user_id, None, status).await?;
    Ok(ApiResponse::ok(tasks, "Tasks fetched successfully"))
}

pub async fn delete_task(
    State(state): State<AppState>,
    auth: AuthUser,
    ApiPath(task_id): ApiPath<Uuid>,
) -> Result<ApiResponse<Value>> {
    let task = state.task_service.delete(task_id, auth.user_id).await?;
    Ok(ApiResponse::ok(json!({ "deletedTask": task }), "Task deleted successfully"))
}

pub async fn pending_tasks(
    State(state): State<AppState>,
    auth: AuthUser,
) -> Result<ApiResponse<Vec<Task>>> {
    let tasks = state.task_service.pending_for_user(auth.user_id).await?;
    let message = if tasks.is_empty() {
        "No pending tasks found"
    } else {
        "Pending tasks fetched successfully"
    };
    Ok(ApiResponse::ok(tasks, message))
}
