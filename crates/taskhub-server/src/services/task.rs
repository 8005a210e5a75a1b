use crate::authority;
use crate::db::{CompletionOutcome, DynStore};
use crate::error::{AppError, Result};
use crate::models::{CreateTask, Group, Task, TaskFilter, TaskStatus, DEFAULT_TASK_POINTS};
use chrono::Utc;
use uuid::Uuid;

#[derive(Clone)]
pub struct TaskService {
    store: DynStore,
}

impl TaskService {
    pub fn new(store: DynStore) -> Self {
        Self { store }
    }

    async fn group(&self, id: Uuid) -> Result<Group> {
        self.store
            .get_group(id)
            .await?
            .ok_or_else(|| AppError::not_found("Group not found"))
    }

    pub async fn get_by_id(&self, id: Uuid) -> Result<Task> {
        self.store
            .get_task(id)
            .await?
            .ok_or_else(|| AppError::not_found("Task not found"))
    }

    pub async fn create(&self, creator_id: Uuid, input: CreateTask) -> Result<Task> {
        let title = input.title.as_deref().map(str::trim).unwrap_or_default();
        let description = input.description.as_deref().unwrap_or_default();
        let (Some(group_id), Some(due_date)) = (input.group_id, input.due_date) else {
            return Err(AppError::bad_request("All required fields must be provided"));
        };
        if title.is_empty() || description.is_empty() {
            return Err(AppError::bad_request("All required fields must be provided"));
        }

        let group = self.group(group_id).await?;
        authority::require_member(&group, creator_id)?;

        let now = Utc::now();
        let task = Task {
            id: Uuid::new_v4(),
            group_id,
            created_by: creator_id,
            title: title.to_string(),
            description: description.to_string(),
            due_date,
            points: input.points.filter(|p| *p != 0).unwrap_or(DEFAULT_TASK_POINTS),
            status: TaskStatus::Pending,
            completed_by: vec![],
            created_at: now,
            updated_at: now,
        };
        self.store.insert_task(&task).await?;

        tracing::info!("Task {} created in group {} by {}", task.id, group_id, creator_id);
        Ok(task)
    }

    /// Records that `user_id` finished the task. A second completion by the
    /// same user is rejected rather than ignored.
    pub async fn complete(&self, task_id: Uuid, user_id: Uuid) -> Result<Task> {
        let task = self.get_by_id(task_id).await?;
        let group = self.group(task.group_id).await?;
        authority::require_member(&group, user_id)?;

        if task.has_completed(user_id) {
            return Err(AppError::bad_request("You have already completed this task"));
        }

        match self.store.record_completion(task_id, user_id, Utc::now()).await? {
            CompletionOutcome::Recorded(task) => {
                if task.status == TaskStatus::Completed {
                    tracing::info!("Task {} completed by every member of group {}", task.id, task.group_id);
                }
                Ok(task)
            }
            CompletionOutcome::AlreadyCompleted => {
                Err(AppError::bad_request("You have already completed this task"))
            }
            CompletionOutcome::TaskMissing => Err(AppError::not_found("Task not found")),
        }
    }

    /// Tasks of one group, or of every group the requester belongs to when no
    /// group is given. Newest first.
    pub async fn list(
        &self,
        requester_id: Uuid,
        group_id: Option<Uuid>,
        status: Option<TaskStatus>,
    ) -> Result<Vec<Task>> {
        let group_ids = match group_id {
            Some(group_id) => {
                let group = self.group(group_id).await?;
                authority::require_member(&group, requester_id)?;
                vec![group_id]
            }
            None => self.member_group_ids(requester_id).await?,
        };

        self.store
            .find_tasks(&TaskFilter {
                group_ids: Some(group_ids),
                status,
            })
            .await
    }

    /// Deletes the task and returns what was deleted.
    pub async fn delete(&self, task_id: Uuid, requester_id: Uuid) -> Result<Task> {
        let task = self.get_by_id(task_id).await?;
        let group = self.group(task.group_id).await?;

        if !authority::can_delete_task(&task, &group, requester_id) {
            return Err(AppError::forbidden("Only task creator or group admin can delete tasks"));
        }
        if !self.store.delete_task(task_id).await? {
            return Err(AppError::not_found("Task not found"));
        }

        tracing::info!("Task {} deleted by {}", task_id, requester_id);
        Ok(task)
    }

    /// Pending tasks across every group the user is a member of.
    pub async fn pending_for_user(&self, user_id: Uuid) -> Result<Vec<Task>> {
        let group_ids = self.member_group_ids(user_id).await?;
        if group_ids.is_empty() {
            return Ok(vec![]);
        }

        self.store
            .find_tasks(&TaskFilter {
                group_ids: Some(group_ids),
                status: Some(TaskStatus::Pending),
            })
            .await
    }

    async fn member_group_ids(&self, user_id: Uuid) -> Result<Vec<Uuid>> {
        let groups = self.store.groups_for_member(user_id).await?;
        Ok(groups.into_iter().map(|g| g.id).collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Group, JoinGroup};
    use crate::services::group::NewGroup;
    use crate::services::testing::Fixture;
    use chrono::Duration;

    async fn group_of(fx: &Fixture, admin: Uuid, others: &[Uuid]) -> Group {
        let details = fx
            .state
            .group_service
            .create(
                admin,
                NewGroup {
                    name: Some("Flat".to_string()),
                    description: Some("Chores".to_string()),
                    image: None,
                },
            )
            .await
            .unwrap();
        for user in others {
            fx.state
                .group_service
                .join(*user, JoinGroup { group_id: Some(details.id) })
                .await
                .unwrap();
        }
        fx.store.get_group(details.id).await.unwrap().unwrap()
    }

    fn new_task(group_id: Uuid, points: Option<i32>) -> CreateTask {
        CreateTask {
            title: Some("Take out trash".to_string()),
            description: Some("Before Friday".to_string()),
            group_id: Some(group_id),
            due_date: Some(Utc::now() + Duration::days(2)),
            points,
        }
    }

    #[tokio::test]
    async fn test_points_default_to_ten() {
        let fx = Fixture::new();
        let alice = fx.user("alice").await;
        let group = group_of(&fx, alice, &[]).await;
        let tasks = &fx.state.task_service;

        assert_eq!(tasks.create(alice, new_task(group.id, None)).await.unwrap().points, 10);
        assert_eq!(tasks.create(alice, new_task(group.id, Some(0))).await.unwrap().points, 10);
        assert_eq!(tasks.create(alice, new_task(group.id, Some(25))).await.unwrap().points, 25);
    }

    #[tokio::test]
    async fn test_create_requires_fields_and_membership() {
        let fx = Fixture::new();
        let (alice, mallory) = (fx.user("alice").await, fx.user("mallory").await);
        let group = group_of(&fx, alice, &[]).await;
        let tasks = &fx.state.task_service;

        let mut input = new_task(group.id, None);
        input.due_date = None;
        assert!(matches!(tasks.create(alice, input).await, Err(AppError::BadRequest(_))));

        let err = tasks.create(mallory, new_task(group.id, None)).await.unwrap_err();
        assert!(matches!(err, AppError::Forbidden(_)));
        assert!(tasks.list(alice, Some(group.id), None).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_completion_scenario() {
        let fx = Fixture::new();
        let (alice, bob) = (fx.user("alice").await, fx.user("bob").await);
        let group = group_of(&fx, alice, &[bob]).await;
        let tasks = &fx.state.task_service;
        let task = tasks.create(alice, new_task(group.id, Some(10))).await.unwrap();

        let after_bob = tasks.complete(task.id, bob).await.unwrap();
        assert_eq!(after_bob.status, TaskStatus::Pending);
        assert_eq!(after_bob.completed_by.len(), 1);

        let err = tasks.complete(task.id, bob).await.unwrap_err();
        assert!(matches!(err, AppError::BadRequest(_)));

        let after_alice = tasks.complete(task.id, alice).await.unwrap();
        assert_eq!(after_alice.status, TaskStatus::Completed);
        assert_eq!(after_alice.completed_by.len(), 2);
    }

    #[tokio::test]
    async fn test_completed_task_stays_completed_when_group_grows() {
        let fx = Fixture::new();
        let (alice, carol) = (fx.user("alice").await, fx.user("carol").await);
        let group = group_of(&fx, alice, &[]).await;
        let tasks = &fx.state.task_service;
        let task = tasks.create(alice, new_task(group.id, None)).await.unwrap();

        assert_eq!(tasks.complete(task.id, alice).await.unwrap().status, TaskStatus::Completed);

        fx.state
            .group_service
            .join(carol, JoinGroup { group_id: Some(group.id) })
            .await
            .unwrap();
        let after = tasks.complete(task.id, carol).await.unwrap();
        assert_eq!(after.status, TaskStatus::Completed);
    }

    #[tokio::test]
    async fn test_non_member_cannot_complete() {
        let fx = Fixture::new();
        let (alice, mallory) = (fx.user("alice").await, fx.user("mallory").await);
        let group = group_of(&fx, alice, &[]).await;
        let tasks = &fx.state.task_service;
        let task = tasks.create(alice, new_task(group.id, None)).await.unwrap();

        let err = tasks.complete(task.id, mallory).await.unwrap_err();
        assert!(matches!(err, AppError::Forbidden(_)));
        assert!(tasks.get_by_id(task.id).await.unwrap().completed_by.is_empty());

        let err = tasks.complete(Uuid::new_v4(), alice).await.unwrap_err();
        assert!(matches!(err, AppError::NotFound(_)));
    }

    #[tokio::test]
    async fn test_delete_by_creator_or_admin_only() {
        let fx = Fixture::new();
        let (alice, bob, carol) = (fx.user("alice").await, fx.user("bob").await, fx.user("carol").await);
        let group = group_of(&fx, alice, &[bob, carol]).await;
        let tasks = &fx.state.task_service;
        let by_bob = tasks.create(bob, new_task(group.id, None)).await.unwrap();
        let by_carol = tasks.create(carol, new_task(group.id, None)).await.unwrap();

        let err = tasks.delete(by_bob.id, carol).await.unwrap_err();
        assert!(matches!(err, AppError::Forbidden(_)));

        assert_eq!(tasks.delete(by_bob.id, bob).await.unwrap().id, by_bob.id);
        assert_eq!(tasks.delete(by_carol.id, alice).await.unwrap().id, by_carol.id);
        assert!(tasks.list(alice, Some(group.id), None).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_list_filters_and_scoping() {
        let fx = Fixture::new();
        let (alice, bob) = (fx.user("alice").await, fx.user("bob").await);
        let shared = group_of(&fx, alice, &[bob]).await;
        let private = group_of(&fx, alice, &[]).await;
        let tasks = &fx.state.task_service;

        let first = tasks.create(alice, new_task(shared.id, None)).await.unwrap();
        let second = tasks.create(alice, new_task(shared.id, None)).await.unwrap();
        let hidden = tasks.create(alice, new_task(private.id, None)).await.unwrap();
        tasks.complete(first.id, alice).await.unwrap();
        tasks.complete(first.id, bob).await.unwrap();

        let all_shared = tasks.list(bob, Some(shared.id), None).await.unwrap();
        assert_eq!(all_shared.iter().map(|t| t.id).collect::<Vec<_>>(), vec![second.id, first.id]);

        let completed = tasks.list(bob, Some(shared.id), Some(TaskStatus::Completed)).await.unwrap();
        assert_eq!(completed.iter().map(|t| t.id).collect::<Vec<_>>(), vec![first.id]);

        let err = tasks.list(bob, Some(private.id), None).await.unwrap_err();
        assert!(matches!(err, AppError::Forbidden(_)));

        let everything_for_bob = tasks.list(bob, None, None).await.unwrap();
        assert!(everything_for_bob.iter().all(|t| t.id != hidden.id));
        assert_eq!(everything_for_bob.len(), 2);
    }

    #[tokio::test]
    async fn test_pending_for_user_spans_groups() {
        let fx = Fixture::new();
        let (alice, bob, loner) = (fx.user("alice").await, fx.user("bob").await, fx.user("loner").await);
        let first = group_of(&fx, alice, &[bob]).await;
        let second = group_of(&fx, bob, &[]).await;
        let tasks = &fx.state.task_service;

        let a = tasks.create(alice, new_task(first.id, None)).await.unwrap();
        let b = tasks.create(bob, new_task(second.id, None)).await.unwrap();
        tasks.complete(b.id, bob).await.unwrap();

        let pending = tasks.pending_for_user(bob).await.unwrap();
        assert_eq!(pending.iter().map(|t| t.id).collect::<Vec<_>>(), vec![a.id]);
        assert!(tasks.pending_for_user(loner).await.unwrap().is_empty());
    }
}
