use super::{CompletionOutcome, Store};
use crate::error::Result;
use crate::models::{Completion, Group, Message, PageRequest, Task, TaskFilter, User};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use tokio::sync::RwLock;
use uuid::Uuid;

#[derive(Default)]
struct MemoryState {
    users: HashMap<Uuid, User>,
    groups: HashMap<Uuid, Group>,
    /// Insertion order doubles as creation order
    tasks: Vec<Task>,
    messages: Vec<Message>,
}

/// Process-local store. Every operation runs under one lock, so ledger and
/// membership updates are atomic.
#[derive(Default)]
pub struct MemoryStore {
    state: RwLock<MemoryState>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl Store for MemoryStore {
    async fn upsert_user(&self, mut user: User) -> Result<User> {
        let mut state = self.state.write().await;
        if let Some(existing) = state.users.get(&user.id) {
            user.created_at = existing.created_at;
            user.updated_at = Utc::now();
        }
        state.users.insert(user.id, user.clone());
        Ok(user)
    }

    async fn get_user(&self, id: Uuid) -> Result<Option<User>> {
        Ok(self.state.read().await.users.get(&id).cloned())
    }

    async fn get_users(&self, ids: &[Uuid]) -> Result<Vec<User>> {
        let state = self.state.read().await;
        Ok(ids.iter().filter_map(|id| state.users.get(id).cloned()).collect())
    }

    async fn insert_group(&self, group: &Group) -> Result<()> {
        let mut group = group.clone();
        if !group.members.contains(&group.admin_id) {
            group.members.insert(0, group.admin_id);
        }
        self.state.write().await.groups.insert(group.id, group);
        Ok(())
    }

    async fn get_group(&self, id: Uuid) -> Result<Option<Group>> {
        Ok(self.state.read().await.groups.get(&id).cloned())
    }

    async fn groups_for_member(&self, user_id: Uuid) -> Result<Vec<Group>> {
        let state = self.state.read().await;
        let mut groups: Vec<Group> = state
            .groups
            .values()
            .filter(|g| g.members.contains(&user_id))
            .cloned()
            .collect();
        groups.sort_by_key(|g| g.created_at);
        Ok(groups)
    }

    async fn add_member(&self, group_id: Uuid, user_id: Uuid) -> Result<bool> {
        let mut state = self.state.write().await;
        let Some(group) = state.groups.get_mut(&group_id) else {
            return Ok(false);
        };
        if group.members.contains(&user_id) {
            return Ok(false);
        }
        group.members.push(user_id);
        group.updated_at = Utc::now();
        Ok(true)
    }

    async fn remove_member(&self, group_id: Uuid, user_id: Uuid) -> Result<bool> {
        let mut state = self.state.write().await;
        let MemoryState { groups, tasks, .. } = &mut *state;
        let Some(group) = groups.get_mut(&group_id) else {
            return Ok(false);
        };
        if group.admin_id == user_id {
            return Ok(false);
        }
        let before = group.members.len();
        group.members.retain(|m| *m != user_id);
        if group.members.len() == before {
            return Ok(false);
        }

        let now = Utc::now();
        group.updated_at = now;
        let member_count = group.members.len();

        // The leaver's completions go too; the rest may now cover everyone
        for task in tasks.iter_mut().filter(|t| t.group_id == group_id) {
            task.completed_by.retain(|c| c.user_id != user_id);
            let status = task.recomputed_status(member_count);
            if status != task.status {
                task.status = status;
                task.updated_at = now;
            }
        }
        Ok(true)
    }

    async fn delete_group(&self, id: Uuid) -> Result<bool> {
        let mut state = self.state.write().await;
        if state.groups.remove(&id).is_none() {
            return Ok(false);
        }
        state.tasks.retain(|t| t.group_id != id);
        state.messages.retain(|m| m.group_id != id);
        Ok(true)
    }

    async fn insert_task(&self, task: &Task) -> Result<()> {
        self.state.write().await.tasks.push(task.clone());
        Ok(())
    }

    async fn get_task(&self, id: Uuid) -> Result<Option<Task>> {
        let state = self.state.read().await;
        Ok(state.tasks.iter().find(|t| t.id == id).cloned())
    }

    async fn find_tasks(&self, filter: &TaskFilter) -> Result<Vec<Task>> {
        let state = self.state.read().await;
        Ok(state
            .tasks
            .iter()
            .rev()
            .filter(|t| match &filter.group_ids {
                Some(ids) => ids.contains(&t.group_id),
                None => true,
            })
            .filter(|t| filter.status.is_none_or(|s| t.status == s))
            .cloned()
            .collect())
    }

    async fn record_completion(
        &self,
        task_id: Uuid,
        user_id: Uuid,
        at: DateTime<Utc>,
    ) -> Result<CompletionOutcome> {
        let mut state = self.state.write().await;
        let MemoryState { groups, tasks, .. } = &mut *state;

        let Some(task) = tasks.iter_mut().find(|t| t.id == task_id) else {
            return Ok(CompletionOutcome::TaskMissing);
        };
        if task.has_completed(user_id) {
            return Ok(CompletionOutcome::AlreadyCompleted);
        }

        let member_count = groups.get(&task.group_id).map_or(0, |g| g.members.len());
        task.completed_by.push(Completion {
            user_id,
            completed_at: at,
        });
        task.status = task.recomputed_status(member_count);
        task.updated_at = at;

        Ok(CompletionOutcome::Recorded(task.clone()))
    }

    async fn delete_task(&self, id: Uuid) -> Result<bool> {
        let mut state = self.state.write().await;
        let before = state.tasks.len();
        state.tasks.retain(|t| t.id != id);
        Ok(state.tasks.len() != before)
    }

    async fn insert_message(&self, message: &Message) -> Result<()> {
        self.state.write().await.messages.push(message.clone());
        Ok(())
    }

    async fn get_message(&self, id: Uuid) -> Result<Option<Message>> {
        let state = self.state.read().await;
        Ok(state.messages.iter().find(|m| m.id == id).cloned())
    }

    async fn list_messages(&self, group_id: Uuid, page: PageRequest) -> Result<Vec<Message>> {
        let state = self.state.read().await;
        Ok(state
            .messages
            .iter()
            .rev()
            .filter(|m| m.group_id == group_id)
            .skip(page.offset() as usize)
            .take(page.page_size as usize)
            .cloned()
            .collect())
    }

    async fn mark_read(&self, message_ids: &[Uuid], user_id: Uuid) -> Result<()> {
        let mut state = self.state.write().await;
        for message in state.messages.iter_mut().filter(|m| message_ids.contains(&m.id)) {
            if !message.read_by.contains(&user_id) {
                message.read_by.push(user_id);
            }
        }
        Ok(())
    }

    async fn count_unread(&self, group_id: Uuid, user_id: Uuid) -> Result<i64> {
        let state = self.state.read().await;
        Ok(state
            .messages
            .iter()
            .filter(|m| m.group_id == group_id && !m.is_read_by(user_id))
            .count() as i64)
    }

    async fn delete_message(&self, id: Uuid) -> Result<bool> {
        let mut state = self.state.write().await;
        let before = state.messages.len();
        state.messages.retain(|m| m.id != id);
        Ok(state.messages.len() != before)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{TaskStatus, DEFAULT_TASK_POINTS};
    use std::sync::Arc;

    fn new_task(group_id: Uuid, creator: Uuid) -> Task {
        let now = Utc::now();
        Task {
            id: Uuid::new_v4(),
            group_id,
            created_by: creator,
            title: "Dishes".to_string(),
            description: "Do the dishes".to_string(),
            due_date: now,
            points: DEFAULT_TASK_POINTS,
            status: TaskStatus::Pending,
            completed_by: vec![],
            created_at: now,
            updated_at: now,
        }
    }

    #[tokio::test]
    async fn test_membership_is_a_set() {
        let store = MemoryStore::new();
        let admin = Uuid::new_v4();
        let member = Uuid::new_v4();
        let group = Group::new("g", "d", None, admin);
        store.insert_group(&group).await.unwrap();

        assert!(store.add_member(group.id, member).await.unwrap());
        assert!(!store.add_member(group.id, member).await.unwrap());
        assert!(!store.add_member(group.id, admin).await.unwrap());

        let loaded = store.get_group(group.id).await.unwrap().unwrap();
        assert_eq!(loaded.members, vec![admin, member]);

        assert!(!store.remove_member(group.id, admin).await.unwrap());
        assert!(store.remove_member(group.id, member).await.unwrap());
        assert!(store.groups_for_member(member).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_concurrent_completions_transition_once() {
        let store = Arc::new(MemoryStore::new());
        let admin = Uuid::new_v4();
        let mut group = Group::new("g", "d", None, admin);
        let others: Vec<Uuid> = (0..7).map(|_| Uuid::new_v4()).collect();
        group.members.extend(&others);
        store.insert_group(&group).await.unwrap();
        let task = new_task(group.id, admin);
        store.insert_task(&task).await.unwrap();

        let task_id = task.id;
        let mut handles = Vec::new();
        for user in group.members.clone() {
            let store = store.clone();
            handles.push(tokio::spawn(async move {
                store.record_completion(task_id, user, Utc::now()).await.unwrap()
            }));
        }

        let mut completed_transitions = 0;
        for handle in handles {
            if let CompletionOutcome::Recorded(t) = handle.await.unwrap() {
                if t.status == TaskStatus::Completed && t.completed_by.len() == group.members.len() {
                    completed_transitions += 1;
                }
            }
        }

        let stored = store.get_task(task.id).await.unwrap().unwrap();
        assert_eq!(completed_transitions, 1);
        assert_eq!(stored.completed_by.len(), group.members.len());
        assert_eq!(stored.status, TaskStatus::Completed);
    }

    #[tokio::test]
    async fn test_remove_member_prunes_ledgers() {
        let store = MemoryStore::new();
        let (a, b, c) = (Uuid::new_v4(), Uuid::new_v4(), Uuid::new_v4());
        let mut group = Group::new("g", "d", None, a);
        group.members.extend([b, c]);
        store.insert_group(&group).await.unwrap();
        let t1 = new_task(group.id, a);
        let t2 = new_task(group.id, a);
        store.insert_task(&t1).await.unwrap();
        store.insert_task(&t2).await.unwrap();

        for (task_id, user) in [(t1.id, b), (t1.id, c), (t2.id, a), (t2.id, b)] {
            store.record_completion(task_id, user, Utc::now()).await.unwrap();
        }

        assert!(store.remove_member(group.id, c).await.unwrap());

        let first = store.get_task(t1.id).await.unwrap().unwrap();
        assert_eq!(first.status, TaskStatus::Pending);
        assert_eq!(first.completed_by.len(), 1);
        assert!(!first.has_completed(c));

        // Everyone left had already completed it
        let second = store.get_task(t2.id).await.unwrap().unwrap();
        assert_eq!(second.status, TaskStatus::Completed);
        assert_eq!(second.completed_by.len(), 2);

        match store.record_completion(t1.id, a, Utc::now()).await.unwrap() {
            CompletionOutcome::Recorded(task) => {
                assert_eq!(task.status, TaskStatus::Completed);
                assert_eq!(task.completed_by.len(), 2);
            }
            other => panic!("unexpected outcome: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_delete_group_cascades() {
        let store = MemoryStore::new();
        let admin = Uuid::new_v4();
        let group = Group::new("g", "d", None, admin);
        store.insert_group(&group).await.unwrap();
        let task = new_task(group.id, admin);
        store.insert_task(&task).await.unwrap();
        let message = Message::new(group.id, admin, "hi".to_string(), vec![]);
        store.insert_message(&message).await.unwrap();

        assert!(store.delete_group(group.id).await.unwrap());
        assert!(store.get_task(task.id).await.unwrap().is_none());
        assert!(store.get_message(message.id).await.unwrap().is_none());
        assert!(!store.delete_group(group.id).await.unwrap());
    }

    #[tokio::test]
    async fn test_messages_newest_first_with_offset() {
        let store = MemoryStore::new();
        let group_id = Uuid::new_v4();
        let sender = Uuid::new_v4();
        let mut ids = Vec::new();
        for i in 0..5 {
            let m = Message::new(group_id, sender, format!("m{}", i), vec![]);
            ids.push(m.id);
            store.insert_message(&m).await.unwrap();
        }

        let first = store.list_messages(group_id, PageRequest::new(Some(1), Some(2))).await.unwrap();
        let second = store.list_messages(group_id, PageRequest::new(Some(2), Some(2))).await.unwrap();

        assert_eq!(first.iter().map(|m| m.id).collect::<Vec<_>>(), vec![ids[4], ids[3]]);
        assert_eq!(second.iter().map(|m| m.id).collect::<Vec<_>>(), vec![ids[2], ids[1]]);
    }
}
