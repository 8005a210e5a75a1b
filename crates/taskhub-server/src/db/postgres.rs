use super::{CompletionOutcome, Store};
use crate::error::Result;
use crate::models::{Completion, Group, Message, PageRequest, Task, TaskFilter, User};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{PgPool, Postgres, QueryBuilder};
use std::collections::HashMap;
use uuid::Uuid;

const GROUP_COLUMNS: &str = "id, name, description, image_url, admin_id, created_at, updated_at";
const TASK_COLUMNS: &str =
    "id, group_id, created_by, title, description, due_date, points, status, created_at, updated_at";
const MESSAGE_COLUMNS: &str = "id, group_id, sender_id, content, attachments, created_at";

#[derive(Clone)]
pub struct PgStore {
    db: PgPool,
}

impl PgStore {
    pub fn new(db: PgPool) -> Self {
        Self { db }
    }

    async fn load_members(&self, groups: &mut [Group]) -> Result<()> {
        if groups.is_empty() {
            return Ok(());
        }
        let ids: Vec<Uuid> = groups.iter().map(|g| g.id).collect();
        let rows: Vec<(Uuid, Uuid)> = sqlx::query_as(
            r#"
            SELECT group_id, user_id FROM group_members
            WHERE group_id = ANY($1)
            ORDER BY position
            "#,
        )
        .bind(&ids)
        .fetch_all(&self.db)
        .await?;

        let mut by_group: HashMap<Uuid, Vec<Uuid>> = HashMap::new();
        for (group_id, user_id) in rows {
            by_group.entry(group_id).or_default().push(user_id);
        }
        for group in groups {
            group.members = by_group.remove(&group.id).unwrap_or_default();
        }
        Ok(())
    }

    async fn load_completions(&self, tasks: &mut [Task]) -> Result<()> {
        if tasks.is_empty() {
            return Ok(());
        }
        let ids: Vec<Uuid> = tasks.iter().map(|t| t.id).collect();
        let rows: Vec<(Uuid, Uuid, DateTime<Utc>)> = sqlx::query_as(
            r#"
            SELECT task_id, user_id, completed_at FROM task_completions
            WHERE task_id = ANY($1)
            ORDER BY completed_at, position
            "#,
        )
        .bind(&ids)
        .fetch_all(&self.db)
        .await?;

        let mut by_task: HashMap<Uuid, Vec<Completion>> = HashMap::new();
        for (task_id, user_id, completed_at) in rows {
            by_task.entry(task_id).or_default().push(Completion {
                user_id,
                completed_at,
            });
        }
        for task in tasks {
            task.completed_by = by_task.remove(&task.id).unwrap_or_default();
        }
        Ok(())
    }

    async fn load_reads(&self, messages: &mut [Message]) -> Result<()> {
        if messages.is_empty() {
            return Ok(());
        }
        let ids: Vec<Uuid> = messages.iter().map(|m| m.id).collect();
        let rows: Vec<(Uuid, Uuid)> = sqlx::query_as(
            r#"
            SELECT message_id, user_id FROM message_reads
            WHERE message_id = ANY($1)
            ORDER BY position
            "#,
        )
        .bind(&ids)
        .fetch_all(&self.db)
        .await?;

        let mut by_message: HashMap<Uuid, Vec<Uuid>> = HashMap::new();
        for (message_id, user_id) in rows {
            by_message.entry(message_id).or_default().push(user_id);
        }
        for message in messages {
            message.read_by = by_message.remove(&message.id).unwrap_or_default();
        }
        Ok(())
    }
}

#[async_trait]
impl Store for PgStore {
    async fn upsert_user(&self, user: User) -> Result<User> {
        let user = sqlx::query_as::<_, User>(
            r#"
            INSERT INTO users (id, username, display_name, avatar_url, created_at, updated_at)
            VALUES ($1, $2, $3, $4, NOW(), NOW())
            ON CONFLICT (id) DO UPDATE
            SET username = EXCLUDED.username,
                display_name = EXCLUDED.display_name,
                avatar_url = EXCLUDED.avatar_url,
                updated_at = NOW()
            RETURNING id, username, display_name, avatar_url, created_at, updated_at
            "#,
        )
        .bind(user.id)
        .bind(&user.username)
        .bind(&user.display_name)
        .bind(&user.avatar_url)
        .fetch_one(&self.db)
        .await?;

        Ok(user)
    }

    async fn get_user(&self, id: Uuid) -> Result<Option<User>> {
        let user = sqlx::query_as::<_, User>(
            "SELECT id, username, display_name, avatar_url, created_at, updated_at FROM users WHERE id = $1",
        )
        .bind(id)
        .fetch_optional(&self.db)
        .await?;

        Ok(user)
    }

    async fn get_users(&self, ids: &[Uuid]) -> Result<Vec<User>> {
        if ids.is_empty() {
            return Ok(vec![]);
        }
        let users = sqlx::query_as::<_, User>(
            "SELECT id, username, display_name, avatar_url, created_at, updated_at FROM users WHERE id = ANY($1)",
        )
        .bind(ids)
        .fetch_all(&self.db)
        .await?;

        Ok(users)
    }

    async fn insert_group(&self, group: &Group) -> Result<()> {
        let mut tx = self.db.begin().await?;

        sqlx::query(
            r#"
            INSERT INTO groups (id, name, description, image_url, admin_id, created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            "#,
        )
        .bind(group.id)
        .bind(&group.name)
        .bind(&group.description)
        .bind(&group.image_url)
        .bind(group.admin_id)
        .bind(group.created_at)
        .bind(group.updated_at)
        .execute(&mut *tx)
        .await?;

        let mut members = vec![group.admin_id];
        members.extend(group.members.iter().filter(|m| **m != group.admin_id));
        for user_id in members {
            sqlx::query(
                r#"
                INSERT INTO group_members (group_id, user_id, joined_at)
                VALUES ($1, $2, NOW())
                ON CONFLICT (group_id, user_id) DO NOTHING
                "#,
            )
            .bind(group.id)
            .bind(user_id)
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;
        Ok(())
    }

    async fn get_group(&self, id: Uuid) -> Result<Option<Group>> {
        let group = sqlx::query_as::<_, Group>(&format!(
            "SELECT {GROUP_COLUMNS} FROM groups WHERE id = $1"
        ))
        .bind(id)
        .fetch_optional(&self.db)
        .await?;

        let Some(group) = group else {
            return Ok(None);
        };
        let mut groups = [group];
        self.load_members(&mut groups).await?;
        let [group] = groups;
        Ok(Some(group))
    }

    async fn groups_for_member(&self, user_id: Uuid) -> Result<Vec<Group>> {
        let mut groups = sqlx::query_as::<_, Group>(
            r#"
            SELECT g.id, g.name, g.description, g.image_url, g.admin_id, g.created_at, g.updated_at
            FROM groups g
            INNER JOIN group_members m ON m.group_id = g.id
            WHERE m.user_id = $1
            ORDER BY g.created_at
            "#,
        )
        .bind(user_id)
        .fetch_all(&self.db)
        .await?;

        self.load_members(&mut groups).await?;
        Ok(groups)
    }

    async fn add_member(&self, group_id: Uuid, user_id: Uuid) -> Result<bool> {
        let result = sqlx::query(
            r#"
            INSERT INTO group_members (group_id, user_id, joined_at)
            SELECT $1, $2, NOW() WHERE EXISTS (SELECT 1 FROM groups WHERE id = $1)
            ON CONFLICT (group_id, user_id) DO NOTHING
            "#,
        )
        .bind(group_id)
        .bind(user_id)
        .execute(&self.db)
        .await?;

        if result.rows_affected() > 0 {
            sqlx::query("UPDATE groups SET updated_at = NOW() WHERE id = $1")
                .bind(group_id)
                .execute(&self.db)
                .await?;
        }
        Ok(result.rows_affected() > 0)
    }

    async fn remove_member(&self, group_id: Uuid, user_id: Uuid) -> Result<bool> {
        let mut tx = self.db.begin().await?;

        // Same row locks as record_completion, so no completion interleaves
        sqlx::query("SELECT id FROM tasks WHERE group_id = $1 ORDER BY id FOR UPDATE")
            .bind(group_id)
            .execute(&mut *tx)
            .await?;

        let result = sqlx::query(
            r#"
            DELETE FROM group_members m
            USING groups g
            WHERE m.group_id = g.id AND m.group_id = $1 AND m.user_id = $2 AND g.admin_id <> $2
            "#,
        )
        .bind(group_id)
        .bind(user_id)
        .execute(&mut *tx)
        .await?;

        if result.rows_affected() == 0 {
            tx.rollback().await?;
            return Ok(false);
        }

        sqlx::query(
            r#"
            DELETE FROM task_completions c
            USING tasks t
            WHERE c.task_id = t.id AND t.group_id = $1 AND c.user_id = $2
            "#,
        )
        .bind(group_id)
        .bind(user_id)
        .execute(&mut *tx)
        .await?;

        sqlx::query(
            r#"
            UPDATE tasks t SET status = 'completed', updated_at = NOW()
            WHERE t.group_id = $1 AND t.status = 'pending'
              AND (SELECT COUNT(*) FROM task_completions c WHERE c.task_id = t.id)
                = (SELECT COUNT(*) FROM group_members m WHERE m.group_id = $1)
            "#,
        )
        .bind(group_id)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(true)
    }

    async fn delete_group(&self, id: Uuid) -> Result<bool> {
        // tasks, messages and their ledgers go with it (ON DELETE CASCADE)
        let result = sqlx::query("DELETE FROM groups WHERE id = $1")
            .bind(id)
            .execute(&self.db)
            .await?;

        Ok(result.rows_affected() > 0)
    }

    async fn insert_task(&self, task: &Task) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO tasks (id, group_id, created_by, title, description, due_date, points,
                               status, created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
            "#,
        )
        .bind(task.id)
        .bind(task.group_id)
        .bind(task.created_by)
        .bind(&task.title)
        .bind(&task.description)
        .bind(task.due_date)
        .bind(task.points)
        .bind(task.status)
        .bind(task.created_at)
        .bind(task.updated_at)
        .execute(&self.db)
        .await?;

        Ok(())
    }

    async fn get_task(&self, id: Uuid) -> Result<Option<Task>> {
        let task = sqlx::query_as::<_, Task>(&format!("SELECT {TASK_COLUMNS} FROM tasks WHERE id = $1"))
            .bind(id)
            .fetch_optional(&self.db)
            .await?;

        let Some(task) = task else {
            return Ok(None);
        };
        let mut tasks = [task];
        self.load_completions(&mut tasks).await?;
        let [task] = tasks;
        Ok(Some(task))
    }

    async fn find_tasks(&self, filter: &TaskFilter) -> Result<Vec<Task>> {
        let mut query: QueryBuilder<Postgres> =
            QueryBuilder::new(format!("SELECT {TASK_COLUMNS} FROM tasks WHERE TRUE"));
        if let Some(group_ids) = &filter.group_ids {
            query.push(" AND group_id = ANY(");
            query.push_bind(group_ids.clone());
            query.push(")");
        }
        if let Some(status) = filter.status {
            query.push(" AND status = ");
            query.push_bind(status);
        }
        query.push(" ORDER BY created_at DESC");

        let mut tasks = query.build_query_as::<Task>().fetch_all(&self.db).await?;
        self.load_completions(&mut tasks).await?;
        Ok(tasks)
    }

    async fn record_completion(
        &self,
        task_id: Uuid,
        user_id: Uuid,
        at: DateTime<Utc>,
    ) -> Result<CompletionOutcome> {
        let mut tx = self.db.begin().await?;

        // Row lock serializes concurrent completions of the same task
        let task = sqlx::query_as::<_, Task>(&format!(
            "SELECT {TASK_COLUMNS} FROM tasks WHERE id = $1 FOR UPDATE"
        ))
        .bind(task_id)
        .fetch_optional(&mut *tx)
        .await?;

        let Some(mut task) = task else {
            return Ok(CompletionOutcome::TaskMissing);
        };

        let inserted = sqlx::query(
            r#"
            INSERT INTO task_completions (task_id, user_id, completed_at)
            VALUES ($1, $2, $3)
            ON CONFLICT (task_id, user_id) DO NOTHING
            "#,
        )
        .bind(task_id)
        .bind(user_id)
        .bind(at)
        .execute(&mut *tx)
        .await?;

        if inserted.rows_affected() == 0 {
            tx.rollback().await?;
            return Ok(CompletionOutcome::AlreadyCompleted);
        }

        task.completed_by = sqlx::query_as::<_, Completion>(
            r#"
            SELECT user_id, completed_at FROM task_completions
            WHERE task_id = $1
            ORDER BY completed_at, position
            "#,
        )
        .bind(task_id)
        .fetch_all(&mut *tx)
        .await?;

        let member_count: i64 =
            sqlx::query_scalar("SELECT COUNT(*) FROM group_members WHERE group_id = $1")
                .bind(task.group_id)
                .fetch_one(&mut *tx)
                .await?;

        task.status = task.recomputed_status(member_count as usize);
        task.updated_at = at;

        sqlx::query("UPDATE tasks SET status = $2, updated_at = $3 WHERE id = $1")
            .bind(task_id)
            .bind(task.status)
            .bind(at)
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;
        Ok(CompletionOutcome::Recorded(task))
    }

    async fn delete_task(&self, id: Uuid) -> Result<bool> {
        let result = sqlx::query("DELETE FROM tasks WHERE id = $1")
            .bind(id)
            .execute(&self.db)
            .await?;

        Ok(result.rows_affected() > 0)
    }

    async fn insert_message(&self, message: &Message) -> Result<()> {
        let mut tx = self.db.begin().await?;

        sqlx::query(
            r#"
            INSERT INTO messages (id, group_id, sender_id, content, attachments, created_at)
            VALUES ($1, $2, $3, $4, $5, $6)
            "#,
        )
        .bind(message.id)
        .bind(message.group_id)
        .bind(message.sender_id)
        .bind(&message.content)
        .bind(&message.attachments)
        .bind(message.created_at)
        .execute(&mut *tx)
        .await?;

        for user_id in &message.read_by {
            sqlx::query(
                r#"
                INSERT INTO message_reads (message_id, user_id, read_at)
                VALUES ($1, $2, NOW())
                ON CONFLICT (message_id, user_id) DO NOTHING
                "#,
            )
            .bind(message.id)
            .bind(user_id)
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;
        Ok(())
    }

    async fn get_message(&self, id: Uuid) -> Result<Option<Message>> {
        let message = sqlx::query_as::<_, Message>(&format!(
            "SELECT {MESSAGE_COLUMNS} FROM messages WHERE id = $1"
        ))
        .bind(id)
        .fetch_optional(&self.db)
        .await?;

        let Some(message) = message else {
            return Ok(None);
        };
        let mut messages = [message];
        self.load_reads(&mut messages).await?;
        let [message] = messages;
        Ok(Some(message))
    }

    async fn list_messages(&self, group_id: Uuid, page: PageRequest) -> Result<Vec<Message>> {
        let mut messages = sqlx::query_as::<_, Message>(&format!(
            r#"
            SELECT {MESSAGE_COLUMNS} FROM messages
            WHERE group_id = $1
            ORDER BY created_at DESC
            OFFSET $2 LIMIT $3
            "#
        ))
        .bind(group_id)
        .bind(page.offset())
        .bind(page.page_size)
        .fetch_all(&self.db)
        .await?;

        self.load_reads(&mut messages).await?;
        Ok(messages)
    }

    async fn mark_read(&self, message_ids: &[Uuid], user_id: Uuid) -> Result<()> {
        if message_ids.is_empty() {
            return Ok(());
        }
        sqlx::query(
            r#"
            INSERT INTO message_reads (message_id, user_id, read_at)
            SELECT id, $2, NOW() FROM UNNEST($1::uuid[]) AS id
            ON CONFLICT (message_id, user_id) DO NOTHING
            "#,
        )
        .bind(message_ids)
        .bind(user_id)
        .execute(&self.db)
        .await?;

        Ok(())
    }

    async fn count_unread(&self, group_id: Uuid, user_id: Uuid) -> Result<i64> {
        let count: i64 = sqlx::query_scalar(
            r#"
            SELECT COUNT(*) FROM messages m
            WHERE m.group_id = $1
              AND NOT EXISTS (
                  SELECT 1 FROM message_reads r
                  WHERE r.message_id = m.id AND r.user_id = $2
              )
            "#,
        )
        .bind(group_id)
        .bind(user_id)
        .fetch_one(&self.db)
        .await?;

        Ok(count)
    }

    async fn delete_message(&self, id: Uuid) -> Result<bool> {
        let result = sqlx::query("DELETE FROM messages WHERE id = $1")
            .bind(id)
            .execute(&self.db)
            .await?;

        Ok(result.rows_affected() > 0)
    }
}
