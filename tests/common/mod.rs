#![allow(dead_code)]

use std::sync::Arc;

use mongodb::bson::oid::ObjectId;
use serde_json::Value;

use taskboard::integrity::Coordinator;
use taskboard::models::{Task, TaskPayload, User, UserPayload, UNASSIGNED};
use taskboard::store::MemoryStore;

pub fn setup() -> (MemoryStore, Coordinator) {
    let store = MemoryStore::new();
    let coordinator = Coordinator::new(Arc::new(store.clone()));
    (store, coordinator)
}

pub fn task_payload(body: Value) -> TaskPayload {
    serde_json::from_value(body).expect("task payload")
}

pub fn user_payload(body: Value) -> UserPayload {
    serde_json::from_value(body).expect("user payload")
}

pub async fn create_user(coordinator: &Coordinator, name: &str, email: &str) -> User {
    coordinator
        .create_user(user_payload(serde_json::json!({ "name": name, "email": email })))
        .await
        .expect("create user")
}

pub async fn create_task(coordinator: &Coordinator, name: &str, user: Option<&ObjectId>) -> Task {
    let mut body = serde_json::json!({ "name": name, "deadline": "2030-01-01T00:00:00Z" });
    if let Some(user) = user {
        body["assignedUser"] = Value::String(user.to_hex());
    }
    coordinator
        .create_task(task_payload(body))
        .await
        .expect("create task")
}

/// Checks that assignments, pending lists and denormalized names agree.
pub async fn assert_consistent(store: &MemoryStore) {
    let (tasks, users) = store.snapshot().await;

    for task in &tasks {
        match task.assigned_user {
            Some(user_id) => {
                let user = users
                    .iter()
                    .find(|u| u.id == user_id)
                    .unwrap_or_else(|| panic!("task {} points at missing user", task.id));
                assert!(
                    user.pending_tasks.contains(&task.id),
                    "user {} is missing pending task {}",
                    user.id,
                    task.id
                );
                assert_eq!(task.assigned_user_name, user.name);
            }
            None => assert_eq!(task.assigned_user_name, UNASSIGNED),
        }
    }

    for user in &users {
        for task_id in &user.pending_tasks {
            let task = tasks
                .iter()
                .find(|t| &t.id == task_id)
                .unwrap_or_else(|| panic!("user {} lists missing task {}", user.id, task_id));
            assert_eq!(task.assigned_user, Some(user.id));
        }
    }
}
