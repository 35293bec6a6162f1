//! Storage contract for tasks and users.
//!
//! Every mutation runs inside one [`Transaction`]: a request-scoped handle
//! that all reads and writes of that mutation go through. Writes become
//! visible only on [`Transaction::commit`]; aborting (or dropping the handle
//! without committing) discards them.

mod memory;
mod mongo;

use async_trait::async_trait;
use mongodb::bson::{self, oid::ObjectId, Document};
use thiserror::Error;

use crate::models::{Collection, Task, User};
use crate::query::ListQuery;

pub use memory::MemoryStore;
pub use mongo::MongoStore;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("{0}")]
    Database(#[from] mongodb::error::Error),

    /// A unique index (the users' email) rejected the write.
    #[error("Duplicate key: {0}")]
    DuplicateKey(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] bson::ser::Error),

    #[error("Deserialization error: {0}")]
    Deserialization(#[from] bson::de::Error),

    #[error("Transaction already finished")]
    TransactionFinished,

    #[error("{0}")]
    Other(String),
}

pub type StoreResult<T> = Result<T, StoreError>;

#[async_trait]
pub trait Store: Send + Sync {
    /// Opens a transaction for one mutation.
    async fn begin(&self) -> StoreResult<Box<dyn Transaction>>;

    async fn find(&self, collection: Collection, query: &ListQuery) -> StoreResult<Vec<Document>>;

    async fn count(&self, collection: Collection, query: &ListQuery) -> StoreResult<u64>;
}

#[async_trait]
pub trait Transaction: Send {
    async fn find_task(&mut self, id: &ObjectId) -> StoreResult<Option<Task>>;

    /// Returns the tasks among `ids` that exist, in no particular order.
    async fn find_tasks(&mut self, ids: &[ObjectId]) -> StoreResult<Vec<Task>>;

    async fn find_user(&mut self, id: &ObjectId) -> StoreResult<Option<User>>;

    async fn insert_task(&mut self, task: &Task) -> StoreResult<()>;

    async fn replace_task(&mut self, task: &Task) -> StoreResult<()>;

    async fn delete_task(&mut self, id: &ObjectId) -> StoreResult<()>;

    async fn insert_user(&mut self, user: &User) -> StoreResult<()>;

    async fn replace_user(&mut self, user: &User) -> StoreResult<()>;

    async fn delete_user(&mut self, id: &ObjectId) -> StoreResult<()>;

    /// Adds `task` to the user's `pendingTasks` unless already present.
    async fn add_pending_task(&mut self, user: &ObjectId, task: &ObjectId) -> StoreResult<()>;

    /// Removes `task` from the user's `pendingTasks`.
    async fn pull_pending_task(&mut self, user: &ObjectId, task: &ObjectId) -> StoreResult<()>;

    /// Points every task in `ids` at `user`, denormalizing `user_name`.
    async fn assign_tasks(
        &mut self,
        ids: &[ObjectId],
        user: &ObjectId,
        user_name: &str,
    ) -> StoreResult<()>;

    /// Clears the assignment of the tasks in `ids` that still point at `user`.
    async fn unassign_tasks(&mut self, ids: &[ObjectId], user: &ObjectId) -> StoreResult<()>;

    /// Rewrites `assignedUserName` on every task assigned to `user`.
    async fn rename_assignee(&mut self, user: &ObjectId, user_name: &str) -> StoreResult<()>;

    async fn commit(&mut self) -> StoreResult<()>;

    async fn abort(&mut self) -> StoreResult<()>;
}
