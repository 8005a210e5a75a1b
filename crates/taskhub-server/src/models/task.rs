use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

/// Points awarded when a task is created without a positive value
pub const DEFAULT_TASK_POINTS: i32 = 10;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::Type, Default)]
#[sqlx(type_name = "task_status", rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum TaskStatus {
    #[default]
    Pending,
    Completed,
}

impl fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TaskStatus::Pending => f.write_str("pending"),
            TaskStatus::Completed => f.write_str("completed"),
        }
    }
}

impl FromStr for TaskStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(TaskStatus::Pending),
            "completed" => Ok(TaskStatus::Completed),
            other => Err(format!("Unknown task status '{}'", other)),
        }
    }
}

/// One entry of a task's completion ledger
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, FromRow)]
#[serde(rename_all = "camelCase")]
pub struct Completion {
    pub user_id: Uuid,
    pub completed_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
#[serde(rename_all = "camelCase")]
pub struct Task {
    pub id: Uuid,
    pub group_id: Uuid,
    pub created_by: Uuid,
    pub title: String,
    pub description: String,
    pub due_date: DateTime<Utc>,
    pub points: i32,
    pub status: TaskStatus,
    #[sqlx(skip)]
    pub completed_by: Vec<Completion>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Task {
    pub fn has_completed(&self, user_id: Uuid) -> bool {
        self.completed_by.iter().any(|c| c.user_id == user_id)
    }

    /// Status after a completion was appended, given the group's current size.
    /// Never moves a completed task back to pending.
    pub fn recomputed_status(&self, member_count: usize) -> TaskStatus {
        if self.status == TaskStatus::Completed || self.completed_by.len() == member_count {
            TaskStatus::Completed
        } else {
            TaskStatus::Pending
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateTask {
    pub title: Option<String>,
    pub description: Option<String>,
    pub group_id: Option<Uuid>,
    pub due_date: Option<DateTime<Utc>>,
    pub points: Option<i32>,
}

/// Store-level task query. `group_ids: None` means every group.
#[derive(Debug, Clone, Default)]
pub struct TaskFilter {
    pub group_ids: Option<Vec<Uuid>>,
    pub status: Option<TaskStatus>,
}

#[derive(Debug, Default, Deserialize)]
pub struct TaskStatusQuery {
    pub status: Option<String>,
}
