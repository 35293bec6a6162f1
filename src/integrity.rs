//! Keeps `Task.assignedUser` and `User.pendingTasks` in agreement.
//!
//! Each mutation is validated first, then runs inside a single store
//! transaction: the current state is read through the transaction, the
//! delta is computed from it, every write goes through the same transaction,
//! and the result either commits as a whole or is aborted.

use std::sync::Arc;

use log::{debug, info, warn};
use mongodb::bson::{oid::ObjectId, DateTime};

use crate::error::{ApiError, ApiResult};
use crate::models::{Task, TaskPayload, User, UserPayload, UNASSIGNED};
use crate::store::{Store, Transaction};
use crate::validation::{self, AssigneeChange, TaskChanges, UserChanges};

pub const TASK_NOT_FOUND: &str = "task not found";
pub const USER_NOT_FOUND: &str = "User not found";

/// Difference between a user's stored `pendingTasks` and a requested one.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PendingDiff {
    pub to_remove: Vec<ObjectId>,
    pub to_add: Vec<ObjectId>,
}

impl PendingDiff {
    pub fn between(old: &[ObjectId], new: &[ObjectId]) -> Self {
        PendingDiff {
            to_remove: old.iter().filter(|id| !new.contains(id)).copied().collect(),
            to_add: new.iter().filter(|id| !old.contains(id)).copied().collect(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.to_remove.is_empty() && self.to_add.is_empty()
    }
}

#[derive(Clone)]
pub struct Coordinator {
    store: Arc<dyn Store>,
}

impl Coordinator {
    pub fn new(store: Arc<dyn Store>) -> Self {
        Coordinator { store }
    }

    pub async fn create_task(&self, payload: TaskPayload) -> ApiResult<Task> {
        let (task, assignee) = validation::new_task(payload, DateTime::now())?;
        let mut txn = self.store.begin().await?;
        let result = create_task_in(txn.as_mut(), task, assignee).await;
        let task = settle(txn, result).await?;
        info!("Created task {} ({})", task.id, task.assigned_user_name);
        Ok(task)
    }

    pub async fn update_task(&self, id: ObjectId, payload: TaskPayload) -> ApiResult<Task> {
        let changes = validation::task_changes(payload)?;
        let mut txn = self.store.begin().await?;
        let result = update_task_in(txn.as_mut(), id, &changes).await;
        let task = settle(txn, result).await?;
        info!("Updated task {}", id);
        Ok(task)
    }

    pub async fn delete_task(&self, id: ObjectId) -> ApiResult<Task> {
        let mut txn = self.store.begin().await?;
        let result = delete_task_in(txn.as_mut(), id).await;
        let task = settle(txn, result).await?;
        info!("Deleted task {}", id);
        Ok(task)
    }

    pub async fn create_user(&self, payload: UserPayload) -> ApiResult<User> {
        let (user, pending) = validation::new_user(payload, DateTime::now())?;
        let mut txn = self.store.begin().await?;
        let result = create_user_in(txn.as_mut(), user, pending).await;
        let user = settle(txn, result).await?;
        info!(
            "Created user {} with {} pending tasks",
            user.id,
            user.pending_tasks.len()
        );
        Ok(user)
    }

    pub async fn update_user(&self, id: ObjectId, payload: UserPayload) -> ApiResult<User> {
        let changes = validation::user_changes(payload)?;
        let mut txn = self.store.begin().await?;
        let result = update_user_in(txn.as_mut(), id, &changes).await;
        let user = settle(txn, result).await?;
        info!("Updated user {}", id);
        Ok(user)
    }

    pub async fn delete_user(&self, id: ObjectId) -> ApiResult<User> {
        let mut txn = self.store.begin().await?;
        let result = delete_user_in(txn.as_mut(), id).await;
        let user = settle(txn, result).await?;
        info!(
            "Deleted user {}, unassigned {} tasks",
            id,
            user.pending_tasks.len()
        );
        Ok(user)
    }
}

/// Commits on success, aborts on failure. An abort failure is logged and the
/// mutation's own error is returned.
async fn settle<T>(mut txn: Box<dyn Transaction>, result: ApiResult<T>) -> ApiResult<T> {
    match result {
        Ok(value) => {
            txn.commit().await?;
            Ok(value)
        }
        Err(err) => {
            if let Err(abort_err) = txn.abort().await {
                warn!("Failed to abort transaction after {}: {}", err, abort_err);
            }
            Err(err)
        }
    }
}

async fn existing_user(txn: &mut dyn Transaction, id: &ObjectId) -> ApiResult<User> {
    txn.find_user(id)
        .await?
        .ok_or_else(|| ApiError::bad_request(format!("User {} does not exist", id)))
}

async fn create_task_in(
    txn: &mut dyn Transaction,
    mut task: Task,
    assignee: Option<ObjectId>,
) -> ApiResult<Task> {
    if let Some(user_id) = assignee {
        let user = existing_user(txn, &user_id).await?;
        task.assigned_user = Some(user.id);
        task.assigned_user_name = user.name;
    }
    txn.insert_task(&task).await?;
    if let Some(user_id) = task.assigned_user {
        txn.add_pending_task(&user_id, &task.id).await?;
    }
    Ok(task)
}

async fn update_task_in(
    txn: &mut dyn Transaction,
    id: ObjectId,
    changes: &TaskChanges,
) -> ApiResult<Task> {
    let current = txn
        .find_task(&id)
        .await?
        .ok_or_else(|| ApiError::not_found(TASK_NOT_FOUND))?;

    let mut task = current.clone();
    changes.apply(&mut task);
    task.updated_at = DateTime::now();

    let new_user = match changes.assignee {
        AssigneeChange::Set(user) if user != current.assigned_user => user,
        _ => {
            txn.replace_task(&task).await?;
            return Ok(task);
        }
    };

    match new_user {
        Some(user_id) => {
            let user = existing_user(txn, &user_id).await?;
            task.assigned_user = Some(user.id);
            task.assigned_user_name = user.name;
        }
        None => {
            task.assigned_user = None;
            task.assigned_user_name = UNASSIGNED.to_string();
        }
    }
    debug!(
        "Task {} moves from {:?} to {:?}",
        id, current.assigned_user, task.assigned_user
    );

    txn.replace_task(&task).await?;
    if let Some(old_user) = current.assigned_user {
        txn.pull_pending_task(&old_user, &id).await?;
    }
    if let Some(user_id) = task.assigned_user {
        txn.add_pending_task(&user_id, &id).await?;
    }
    Ok(task)
}

async fn delete_task_in(txn: &mut dyn Transaction, id: ObjectId) -> ApiResult<Task> {
    let task = txn
        .find_task(&id)
        .await?
        .ok_or_else(|| ApiError::not_found(TASK_NOT_FOUND))?;
    if let Some(user_id) = task.assigned_user {
        txn.pull_pending_task(&user_id, &id).await?;
    }
    txn.delete_task(&id).await?;
    Ok(task)
}

/// Moves tasks onto and off `user` according to `diff`. `user` carries the
/// name the added tasks should show.
async fn apply_pending_diff(
    txn: &mut dyn Transaction,
    user: &User,
    diff: &PendingDiff,
) -> ApiResult<()> {
    if !diff.to_remove.is_empty() {
        txn.unassign_tasks(&diff.to_remove, &user.id).await?;
    }
    if diff.to_add.is_empty() {
        return Ok(());
    }

    let tasks = txn.find_tasks(&diff.to_add).await?;
    if let Some(missing) = diff
        .to_add
        .iter()
        .find(|id| !tasks.iter().any(|task| &task.id == *id))
    {
        return Err(ApiError::bad_request(format!(
            "Task {} does not exist",
            missing
        )));
    }

    // a task has one owner, so taking it removes it from the previous one
    for task in &tasks {
        match task.assigned_user {
            Some(owner) if owner != user.id => txn.pull_pending_task(&owner, &task.id).await?,
            _ => {}
        }
    }
    txn.assign_tasks(&diff.to_add, &user.id, &user.name).await?;
    Ok(())
}

async fn create_user_in(
    txn: &mut dyn Transaction,
    mut user: User,
    pending: Vec<ObjectId>,
) -> ApiResult<User> {
    let diff = PendingDiff::between(&[], &pending);
    user.pending_tasks = pending;
    apply_pending_diff(txn, &user, &diff).await?;
    txn.insert_user(&user).await?;
    Ok(user)
}

async fn update_user_in(
    txn: &mut dyn Transaction,
    id: ObjectId,
    changes: &UserChanges,
) -> ApiResult<User> {
    let current = txn
        .find_user(&id)
        .await?
        .ok_or_else(|| ApiError::not_found(USER_NOT_FOUND))?;

    let mut user = current.clone();
    changes.apply(&mut user);
    user.updated_at = DateTime::now();

    if let Some(pending) = &changes.pending_tasks {
        let diff = PendingDiff::between(&current.pending_tasks, pending);
        debug!(
            "User {} pending tasks: -{:?} +{:?}",
            id, diff.to_remove, diff.to_add
        );
        user.pending_tasks = pending.clone();
        if !diff.is_empty() {
            apply_pending_diff(txn, &user, &diff).await?;
        }
    }

    if user.name != current.name {
        txn.rename_assignee(&id, &user.name).await?;
    }
    txn.replace_user(&user).await?;
    Ok(user)
}

async fn delete_user_in(txn: &mut dyn Transaction, id: ObjectId) -> ApiResult<User> {
    let user = txn
        .find_user(&id)
        .await?
        .ok_or_else(|| ApiError::not_found(USER_NOT_FOUND))?;
    if !user.pending_tasks.is_empty() {
        txn.unassign_tasks(&user.pending_tasks, &id).await?;
    }
    txn.delete_user(&id).await?;
    Ok(user)
}
