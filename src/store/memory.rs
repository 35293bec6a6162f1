//! In-memory store for tests and local runs.
//!
//! A transaction holds the store lock for its whole lifetime, so
//! transactions are serialized, and it writes to a private copy of the state
//! that replaces the shared state only on commit.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use log::debug;
use mongodb::bson::{self, oid::ObjectId, DateTime, Document};
use tokio::sync::{Mutex, OwnedMutexGuard};

use super::{Store, StoreError, StoreResult, Transaction};
use crate::models::{Collection, Task, User, UNASSIGNED};
use crate::query::ListQuery;

#[derive(Debug, Clone, Default)]
struct MemoryState {
    tasks: Vec<Task>,
    users: Vec<User>,
}

impl MemoryState {
    fn documents(&self, collection: Collection) -> StoreResult<Vec<Document>> {
        let docs: Result<Vec<Document>, bson::ser::Error> = match collection {
            Collection::Tasks => self.tasks.iter().map(|t| bson::to_document(t)).collect(),
            Collection::Users => self.users.iter().map(|u| bson::to_document(u)).collect(),
        };
        Ok(docs?)
    }

    fn check_email_unique(&self, user: &User) -> StoreResult<()> {
        if self.users.iter().any(|u| u.id != user.id && u.email == user.email) {
            return Err(StoreError::DuplicateKey(format!(
                "users index: email_1 dup key: {{ email: {:?} }}",
                user.email
            )));
        }
        Ok(())
    }

    fn user_mut(&mut self, id: &ObjectId) -> Option<&mut User> {
        self.users.iter_mut().find(|u| &u.id == id)
    }
}

#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    state: Arc<Mutex<MemoryState>>,
    fail_at_write: Arc<AtomicUsize>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes the `n`th write (1-based) of the next transaction fail.
    pub fn fail_on_write(&self, n: usize) {
        self.fail_at_write.store(n, Ordering::SeqCst);
    }

    pub async fn task(&self, id: &ObjectId) -> Option<Task> {
        self.state.lock().await.tasks.iter().find(|t| &t.id == id).cloned()
    }

    pub async fn user(&self, id: &ObjectId) -> Option<User> {
        self.state.lock().await.users.iter().find(|u| &u.id == id).cloned()
    }

    /// Every stored task and user, in insertion order.
    pub async fn snapshot(&self) -> (Vec<Task>, Vec<User>) {
        let state = self.state.lock().await;
        (state.tasks.clone(), state.users.clone())
    }
}

#[async_trait]
impl Store for MemoryStore {
    async fn begin(&self) -> StoreResult<Box<dyn Transaction>> {
        let guard = Arc::clone(&self.state).lock_owned().await;
        let working = guard.clone();
        let fail_at = match self.fail_at_write.swap(0, Ordering::SeqCst) {
            0 => None,
            n => Some(n),
        };
        Ok(Box::new(MemoryTransaction {
            guard,
            working,
            writes: 0,
            fail_at,
            finished: false,
        }))
    }

    async fn find(&self, collection: Collection, query: &ListQuery) -> StoreResult<Vec<Document>> {
        let docs = self.state.lock().await.documents(collection)?;
        Ok(query.evaluate(docs))
    }

    async fn count(&self, collection: Collection, query: &ListQuery) -> StoreResult<u64> {
        let docs = self.state.lock().await.documents(collection)?;
        Ok(query.count_matching(&docs))
    }
}

struct MemoryTransaction {
    guard: OwnedMutexGuard<MemoryState>,
    working: MemoryState,
    writes: usize,
    fail_at: Option<usize>,
    finished: bool,
}

impl MemoryTransaction {
    fn write(&mut self) -> StoreResult<&mut MemoryState> {
        if self.finished {
            return Err(StoreError::TransactionFinished);
        }
        self.writes += 1;
        if self.fail_at == Some(self.writes) {
            return Err(StoreError::Other(format!(
                "simulated store failure on write {}",
                self.writes
            )));
        }
        Ok(&mut self.working)
    }
}

#[async_trait]
impl Transaction for MemoryTransaction {
    async fn find_task(&mut self, id: &ObjectId) -> StoreResult<Option<Task>> {
        Ok(self.working.tasks.iter().find(|t| &t.id == id).cloned())
    }

    async fn find_tasks(&mut self, ids: &[ObjectId]) -> StoreResult<Vec<Task>> {
        Ok(self
            .working
            .tasks
            .iter()
            .filter(|t| ids.contains(&t.id))
            .cloned()
            .collect())
    }

    async fn find_user(&mut self, id: &ObjectId) -> StoreResult<Option<User>> {
        Ok(self.working.users.iter().find(|u| &u.id == id).cloned())
    }

    async fn insert_task(&mut self, task: &Task) -> StoreResult<()> {
        let state = self.write()?;
        if state.tasks.iter().any(|t| t.id == task.id) {
            return Err(StoreError::DuplicateKey(format!("tasks _id {}", task.id)));
        }
        state.tasks.push(task.clone());
        Ok(())
    }

    async fn replace_task(&mut self, task: &Task) -> StoreResult<()> {
        let state = self.write()?;
        if let Some(existing) = state.tasks.iter_mut().find(|t| t.id == task.id) {
            *existing = task.clone();
        }
        Ok(())
    }

    async fn delete_task(&mut self, id: &ObjectId) -> StoreResult<()> {
        self.write()?.tasks.retain(|t| &t.id != id);
        Ok(())
    }

    async fn insert_user(&mut self, user: &User) -> StoreResult<()> {
        let state = self.write()?;
        if state.users.iter().any(|u| u.id == user.id) {
            return Err(StoreError::DuplicateKey(format!("users _id {}", user.id)));
        }
        state.check_email_unique(user)?;
        state.users.push(user.clone());
        Ok(())
    }

    async fn replace_user(&mut self, user: &User) -> StoreResult<()> {
        let state = self.write()?;
        state.check_email_unique(user)?;
        if let Some(existing) = state.user_mut(&user.id) {
            *existing = user.clone();
        }
        Ok(())
    }

    async fn delete_user(&mut self, id: &ObjectId) -> StoreResult<()> {
        self.write()?.users.retain(|u| &u.id != id);
        Ok(())
    }

    async fn add_pending_task(&mut self, user: &ObjectId, task: &ObjectId) -> StoreResult<()> {
        if let Some(existing) = self.write()?.user_mut(user) {
            if !existing.pending_tasks.contains(task) {
                existing.pending_tasks.push(*task);
                existing.updated_at = DateTime::now();
            }
        }
        Ok(())
    }

    async fn pull_pending_task(&mut self, user: &ObjectId, task: &ObjectId) -> StoreResult<()> {
        if let Some(existing) = self.write()?.user_mut(user) {
            existing.pending_tasks.retain(|id| id != task);
            existing.updated_at = DateTime::now();
        }
        Ok(())
    }

    async fn assign_tasks(
        &mut self,
        ids: &[ObjectId],
        user: &ObjectId,
        user_name: &str,
    ) -> StoreResult<()> {
        let now = DateTime::now();
        for task in self.write()?.tasks.iter_mut().filter(|t| ids.contains(&t.id)) {
            task.assigned_user = Some(*user);
            task.assigned_user_name = user_name.to_string();
            task.updated_at = now;
        }
        Ok(())
    }

    async fn unassign_tasks(&mut self, ids: &[ObjectId], user: &ObjectId) -> StoreResult<()> {
        let now = DateTime::now();
        for task in self
            .write()?
            .tasks
            .iter_mut()
            .filter(|t| ids.contains(&t.id) && t.assigned_user.as_ref() == Some(user))
        {
            task.assigned_user = None;
            task.assigned_user_name = UNASSIGNED.to_string();
            task.updated_at = now;
        }
        Ok(())
    }

    async fn rename_assignee(&mut self, user: &ObjectId, user_name: &str) -> StoreResult<()> {
        let now = DateTime::now();
        for task in self
            .write()?
            .tasks
            .iter_mut()
            .filter(|t| t.assigned_user.as_ref() == Some(user))
        {
            task.assigned_user_name = user_name.to_string();
            task.updated_at = now;
        }
        Ok(())
    }

    async fn commit(&mut self) -> StoreResult<()> {
        if self.finished {
            return Err(StoreError::TransactionFinished);
        }
        self.finished = true;
        *self.guard = std::mem::take(&mut self.working);
        debug!("memory transaction committed after {} writes", self.writes);
        Ok(())
    }

    async fn abort(&mut self) -> StoreResult<()> {
        self.finished = true;
        self.working = MemoryState::default();
        Ok(())
    }
}
