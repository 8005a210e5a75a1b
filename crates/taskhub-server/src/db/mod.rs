//! Persistence for users, groups, tasks and messages.
//!
//! Services talk to a [`Store`]; the server picks PostgreSQL when a database
//! URL is configured and falls back to the in-memory store otherwise.

mod memory;
mod postgres;

pub use memory::MemoryStore;
pub use postgres::PgStore;

use crate::error::Result;
use crate::models::{Group, Message, PageRequest, Task, TaskFilter, User};
use anyhow::Context;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::postgres::PgPoolOptions;
use sqlx::PgPool;
use std::sync::Arc;
use uuid::Uuid;

pub type DynStore = Arc<dyn Store>;

/// Result of appending to a task's completion ledger
#[derive(Debug, Clone)]
pub enum CompletionOutcome {
    /// Entry appended; carries the task with its recomputed status
    Recorded(Task),
    /// The user already has an entry in the ledger
    AlreadyCompleted,
    TaskMissing,
}

#[async_trait]
pub trait Store: Send + Sync {
    // Users

    async fn upsert_user(&self, user: User) -> Result<User>;
    async fn get_user(&self, id: Uuid) -> Result<Option<User>>;
    /// Users for the given ids, in no particular order. Unknown ids are skipped.
    async fn get_users(&self, ids: &[Uuid]) -> Result<Vec<User>>;

    // Groups

    async fn insert_group(&self, group: &Group) -> Result<()>;
    async fn get_group(&self, id: Uuid) -> Result<Option<Group>>;
    async fn groups_for_member(&self, user_id: Uuid) -> Result<Vec<Group>>;
    /// Adds a member unless already present. Returns whether the set changed.
    async fn add_member(&self, group_id: Uuid, user_id: Uuid) -> Result<bool>;
    /// Removes a non-admin member. Returns whether the set changed.
    ///
    /// In the same step the member's entries leave every completion ledger of
    /// the group, and pending tasks the remaining members have all completed
    /// become completed.
    async fn remove_member(&self, group_id: Uuid, user_id: Uuid) -> Result<bool>;
    /// Deletes the group together with its tasks and messages.
    async fn delete_group(&self, id: Uuid) -> Result<bool>;

    // Tasks

    async fn insert_task(&self, task: &Task) -> Result<()>;
    async fn get_task(&self, id: Uuid) -> Result<Option<Task>>;
    /// Tasks matching the filter, newest first
    async fn find_tasks(&self, filter: &TaskFilter) -> Result<Vec<Task>>;
    /// Appends `(user_id, at)` to the ledger and recomputes the status against
    /// the group's current member count, as one atomic step.
    async fn record_completion(
        &self,
        task_id: Uuid,
        user_id: Uuid,
        at: DateTime<Utc>,
    ) -> Result<CompletionOutcome>;
    async fn delete_task(&self, id: Uuid) -> Result<bool>;

    // Messages

    async fn insert_message(&self, message: &Message) -> Result<()>;
    async fn get_message(&self, id: Uuid) -> Result<Option<Message>>;
    /// One page of a group's messages, newest first
    async fn list_messages(&self, group_id: Uuid, page: PageRequest) -> Result<Vec<Message>>;
    /// Adds `user_id` to the read-by set of every listed message.
    async fn mark_read(&self, message_ids: &[Uuid], user_id: Uuid) -> Result<()>;
    async fn count_unread(&self, group_id: Uuid, user_id: Uuid) -> Result<i64>;
    async fn delete_message(&self, id: Uuid) -> Result<bool>;
}

pub async fn init_pool(database_url: &str, max_connections: u32) -> anyhow::Result<PgPool> {
    let pool = PgPoolOptions::new()
        .max_connections(max_connections)
        .connect(database_url)
        .await
        .context("connecting to database")?;

    tracing::info!("Database connection pool initialized");
    Ok(pool)
}

pub async fn run_migrations(pool: &PgPool) -> anyhow::Result<()> {
    sqlx::migrate!("./migrations").run(pool).await?;
    tracing::info!("Database migrations completed");
    Ok(())
}

/// Connects to PostgreSQL when `database_url` is set, otherwise returns an
/// in-memory store.
pub async fn open_store(database_url: Option<&str>, max_connections: u32) -> anyhow::Result<DynStore> {
    match database_url {
        Some(url) => {
            let pool = init_pool(url, max_connections).await?;
            run_migrations(&pool).await?;
            Ok(Arc::new(PgStore::new(pool)))
        }
        None => {
            tracing::warn!("DATABASE_URL not set, using in-memory store (data is lost on restart)");
            Ok(Arc::new(MemoryStore::new()))
        }
    }
}
