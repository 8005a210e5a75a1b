//! Behaviour every `Store` implementation must share
//!
//! Each test runs against the in-memory store, and also against PostgreSQL
//! when `TEST_DATABASE_URL` points at a database the migrations may run on.
//! Without it the PostgreSQL half is skipped.
//!
//! Run with: TEST_DATABASE_URL=postgres://... cargo test -p taskhub-server --test store_tests

use chrono::{Duration, Utc};
use std::sync::Arc;
use taskhub_server::{
    db::{init_pool, run_migrations, CompletionOutcome, DynStore, MemoryStore, PgStore},
    models::{Group, Message, PageRequest, Task, TaskStatus, User, DEFAULT_TASK_POINTS},
};
use uuid::Uuid;

async fn stores() -> Vec<(&'static str, DynStore)> {
    let mut stores: Vec<(&'static str, DynStore)> = vec![("memory", Arc::new(MemoryStore::new()))];

    match std::env::var("TEST_DATABASE_URL") {
        Ok(url) if !url.is_empty() => {
            let pool = init_pool(&url, 10).await.expect("connect to TEST_DATABASE_URL");
            run_migrations(&pool).await.expect("migrations");
            stores.push(("postgres", Arc::new(PgStore::new(pool))));
        }
        _ => eprintln!("TEST_DATABASE_URL not set, skipping PostgreSQL store"),
    }

    stores
}

/// Fresh users with profiles, so foreign keys hold in PostgreSQL
async fn users(store: &DynStore, n: usize) -> Vec<Uuid> {
    let mut ids = Vec::with_capacity(n);
    for i in 0..n {
        let id = Uuid::new_v4();
        store
            .upsert_user(User::new(id, format!("user{}", i), format!("User {}", i)))
            .await
            .expect("user");
        ids.push(id);
    }
    ids
}

fn new_task(group_id: Uuid, creator: Uuid) -> Task {
    let now = Utc::now();
    Task {
        id: Uuid::new_v4(),
        group_id,
        created_by: creator,
        title: "Hoover".to_string(),
        description: "Living room".to_string(),
        due_date: now + Duration::days(1),
        points: DEFAULT_TASK_POINTS,
        status: TaskStatus::Pending,
        completed_by: vec![],
        created_at: now,
        updated_at: now,
    }
}

fn ids_of(messages: &[Message]) -> Vec<Uuid> {
    messages.iter().map(|m| m.id).collect()
}

#[tokio::test]
async fn test_membership_is_a_set() {
    for (name, store) in stores().await {
        let ids = users(&store, 2).await;
        let (admin, member) = (ids[0], ids[1]);
        let group = Group::new("g", "d", None, admin);
        store.insert_group(&group).await.unwrap();

        assert!(store.add_member(group.id, member).await.unwrap(), "{}", name);
        assert!(!store.add_member(group.id, member).await.unwrap(), "{}", name);
        assert!(!store.add_member(group.id, admin).await.unwrap(), "{}", name);

        let loaded = store.get_group(group.id).await.unwrap().unwrap();
        assert_eq!(loaded.members, vec![admin, member], "{}", name);

        assert!(!store.remove_member(group.id, admin).await.unwrap(), "{}", name);
        assert!(store.remove_member(group.id, member).await.unwrap(), "{}", name);
        assert!(!store.remove_member(group.id, member).await.unwrap(), "{}", name);
        assert!(store.groups_for_member(member).await.unwrap().is_empty(), "{}", name);
    }
}

#[tokio::test]
async fn test_concurrent_completions_transition_once() {
    for (name, store) in stores().await {
        let ids = users(&store, 8).await;
        let mut group = Group::new("g", "d", None, ids[0]);
        group.members.extend(&ids[1..]);
        store.insert_group(&group).await.unwrap();
        let task = new_task(group.id, ids[0]);
        store.insert_task(&task).await.unwrap();

        let task_id = task.id;
        let mut handles = Vec::new();
        for user in ids.clone() {
            let store = store.clone();
            handles.push(tokio::spawn(async move {
                store.record_completion(task_id, user, Utc::now()).await.unwrap()
            }));
        }

        let mut completed_transitions = 0;
        for handle in handles {
            if let CompletionOutcome::Recorded(t) = handle.await.unwrap() {
                assert!(t.completed_by.len() <= ids.len(), "{}", name);
                if t.status == TaskStatus::Completed && t.completed_by.len() == ids.len() {
                    completed_transitions += 1;
                }
            }
        }

        let stored = store.get_task(task_id).await.unwrap().unwrap();
        assert_eq!(completed_transitions, 1, "{}", name);
        assert_eq!(stored.completed_by.len(), ids.len(), "{}", name);
        assert_eq!(stored.status, TaskStatus::Completed, "{}", name);

        assert!(
            matches!(
                store.record_completion(task_id, ids[0], Utc::now()).await.unwrap(),
                CompletionOutcome::AlreadyCompleted
            ),
            "{}",
            name
        );
    }
}

#[tokio::test]
async fn test_removing_a_member_prunes_ledgers() {
    for (name, store) in stores().await {
        let ids = users(&store, 3).await;
        let (a, b, c) = (ids[0], ids[1], ids[2]);
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
        assert!(store.remove_member(group.id, c).await.unwrap(), "{}", name);

        let first = store.get_task(t1.id).await.unwrap().unwrap();
        assert_eq!(first.status, TaskStatus::Pending, "{}", name);
        assert!(!first.has_completed(c), "{}", name);

        let second = store.get_task(t2.id).await.unwrap().unwrap();
        assert_eq!(second.status, TaskStatus::Completed, "{}", name);
        assert_eq!(second.completed_by.len(), 2, "{}", name);

        match store.record_completion(t1.id, a, Utc::now()).await.unwrap() {
            CompletionOutcome::Recorded(task) => {
                assert_eq!(task.status, TaskStatus::Completed, "{}", name);
                assert_eq!(task.completed_by.len(), 2, "{}", name);
            }
            other => panic!("{}: unexpected outcome {:?}", name, other),
        }
    }
}

#[tokio::test]
async fn test_delete_group_cascades() {
    for (name, store) in stores().await {
        let ids = users(&store, 2).await;
        let mut group = Group::new("g", "d", None, ids[0]);
        group.members.push(ids[1]);
        store.insert_group(&group).await.unwrap();
        let task = new_task(group.id, ids[0]);
        store.insert_task(&task).await.unwrap();
        store.record_completion(task.id, ids[1], Utc::now()).await.unwrap();
        let message = Message::new(group.id, ids[0], "hi".to_string(), vec![]);
        store.insert_message(&message).await.unwrap();
        store.mark_read(&[message.id], ids[1]).await.unwrap();

        assert!(store.delete_group(group.id).await.unwrap(), "{}", name);
        assert!(store.get_group(group.id).await.unwrap().is_none(), "{}", name);
        assert!(store.get_task(task.id).await.unwrap().is_none(), "{}", name);
        assert!(store.get_message(message.id).await.unwrap().is_none(), "{}", name);
        assert!(store.groups_for_member(ids[1]).await.unwrap().is_empty(), "{}", name);
        assert!(!store.delete_group(group.id).await.unwrap(), "{}", name);
    }
}

#[tokio::test]
async fn test_messages_newest_first_with_offset() {
    for (name, store) in stores().await {
        let ids = users(&store, 1).await;
        let group = Group::new("g", "d", None, ids[0]);
        store.insert_group(&group).await.unwrap();

        let base = Utc::now();
        let mut sent = Vec::new();
        for i in 0..5 {
            let mut m = Message::new(group.id, ids[0], format!("m{}", i), vec![]);
            m.created_at = base + Duration::seconds(i);
            sent.push(m.id);
            store.insert_message(&m).await.unwrap();
        }

        let page = |n| PageRequest::new(Some(n), Some(2));
        let first = store.list_messages(group.id, page(1)).await.unwrap();
        let second = store.list_messages(group.id, page(2)).await.unwrap();
        let third = store.list_messages(group.id, page(3)).await.unwrap();
        let beyond = store.list_messages(group.id, page(i64::MAX)).await.unwrap();

        assert_eq!(ids_of(&first), vec![sent[4], sent[3]], "{}", name);
        assert_eq!(ids_of(&second), vec![sent[2], sent[1]], "{}", name);
        assert_eq!(ids_of(&third), vec![sent[0]], "{}", name);
        assert!(beyond.is_empty(), "{}", name);
    }
}
