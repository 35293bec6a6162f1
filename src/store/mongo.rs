use async_trait::async_trait;
use futures_util::TryStreamExt;
use log::info;
use mongodb::bson::{doc, oid::ObjectId, Bson, DateTime, Document};
use mongodb::error::{ErrorKind, WriteFailure};
use mongodb::options::{ClientOptions, IndexOptions};
use mongodb::{Client, ClientSession, Collection as MongoCollection, Database, IndexModel};

use super::{Store, StoreError, StoreResult, Transaction};
use crate::models::{Collection, Task, User, UNASSIGNED};
use crate::query::ListQuery;

const DUPLICATE_KEY: i32 = 11000;

/// MongoDB-backed store. Transactions need a replica set or sharded cluster.
pub struct MongoStore {
    client: Client,
    db: Database,
}

impl MongoStore {
    pub async fn connect(uri: &str, db_name: &str) -> StoreResult<Self> {
        let client_options = ClientOptions::parse(uri).await?;
        let client = Client::with_options(client_options)?;
        let db = client.database(db_name);
        Ok(MongoStore { client, db })
    }

    /// Creates the unique index on `users.email`.
    pub async fn ensure_indexes(&self) -> StoreResult<()> {
        let index = IndexModel::builder()
            .keys(doc! { "email": 1 })
            .options(IndexOptions::builder().unique(true).build())
            .build();
        self.users().create_index(index).await?;
        info!("Ensured unique index on {}.email", Collection::Users.name());
        Ok(())
    }

    fn tasks(&self) -> MongoCollection<Task> {
        self.db.collection(Collection::Tasks.name())
    }

    fn users(&self) -> MongoCollection<User> {
        self.db.collection(Collection::Users.name())
    }
}

#[async_trait]
impl Store for MongoStore {
    async fn begin(&self) -> StoreResult<Box<dyn Transaction>> {
        let mut session = self.client.start_session().await?;
        session.start_transaction().await?;
        Ok(Box::new(MongoTransaction {
            session,
            tasks: self.tasks(),
            users: self.users(),
        }))
    }

    async fn find(&self, collection: Collection, query: &ListQuery) -> StoreResult<Vec<Document>> {
        let coll = self.db.collection::<Document>(collection.name());
        let mut find = coll.find(query.filter.to_document());
        if let Some(sort) = query.sort_document() {
            find = find.sort(sort);
        }
        if let Some(projection) = query.projection_document() {
            find = find.projection(projection);
        }
        if let Some(skip) = query.skip {
            find = find.skip(skip);
        }
        if let Some(limit) = query.limit {
            find = find.limit(limit);
        }
        let cursor = find.await?;
        Ok(cursor.try_collect().await?)
    }

    async fn count(&self, collection: Collection, query: &ListQuery) -> StoreResult<u64> {
        let coll = self.db.collection::<Document>(collection.name());
        let mut count = coll.count_documents(query.filter.to_document());
        if let Some(skip) = query.skip {
            count = count.skip(skip);
        }
        if let Some(limit) = query.count_limit() {
            count = count.limit(limit);
        }
        Ok(count.await?)
    }
}

struct MongoTransaction {
    session: ClientSession,
    tasks: MongoCollection<Task>,
    users: MongoCollection<User>,
}

/// Separates unique-index violations from other driver failures.
fn write_error(err: mongodb::error::Error) -> StoreError {
    if let ErrorKind::Write(WriteFailure::WriteError(ref failure)) = *err.kind {
        if failure.code == DUPLICATE_KEY {
            return StoreError::DuplicateKey(failure.message.clone());
        }
    }
    StoreError::Database(err)
}

#[async_trait]
impl Transaction for MongoTransaction {
    async fn find_task(&mut self, id: &ObjectId) -> StoreResult<Option<Task>> {
        Ok(self
            .tasks
            .find_one(doc! { "_id": *id })
            .session(&mut self.session)
            .await?)
    }

    async fn find_tasks(&mut self, ids: &[ObjectId]) -> StoreResult<Vec<Task>> {
        let mut cursor = self
            .tasks
            .find(doc! { "_id": { "$in": ids.to_vec() } })
            .session(&mut self.session)
            .await?;
        let mut found = Vec::new();
        while let Some(task) = cursor.next(&mut self.session).await {
            found.push(task?);
        }
        Ok(found)
    }

    async fn find_user(&mut self, id: &ObjectId) -> StoreResult<Option<User>> {
        Ok(self
            .users
            .find_one(doc! { "_id": *id })
            .session(&mut self.session)
            .await?)
    }

    async fn insert_task(&mut self, task: &Task) -> StoreResult<()> {
        self.tasks
            .insert_one(task)
            .session(&mut self.session)
            .await
            .map_err(write_error)?;
        Ok(())
    }

    async fn replace_task(&mut self, task: &Task) -> StoreResult<()> {
        self.tasks
            .replace_one(doc! { "_id": task.id }, task)
            .session(&mut self.session)
            .await
            .map_err(write_error)?;
        Ok(())
    }

    async fn delete_task(&mut self, id: &ObjectId) -> StoreResult<()> {
        self.tasks
            .delete_one(doc! { "_id": *id })
            .session(&mut self.session)
            .await
            .map_err(write_error)?;
        Ok(())
    }

    async fn insert_user(&mut self, user: &User) -> StoreResult<()> {
        self.users
            .insert_one(user)
            .session(&mut self.session)
            .await
            .map_err(write_error)?;
        Ok(())
    }

    async fn replace_user(&mut self, user: &User) -> StoreResult<()> {
        self.users
            .replace_one(doc! { "_id": user.id }, user)
            .session(&mut self.session)
            .await
            .map_err(write_error)?;
        Ok(())
    }

    async fn delete_user(&mut self, id: &ObjectId) -> StoreResult<()> {
        self.users
            .delete_one(doc! { "_id": *id })
            .session(&mut self.session)
            .await
            .map_err(write_error)?;
        Ok(())
    }

    async fn add_pending_task(&mut self, user: &ObjectId, task: &ObjectId) -> StoreResult<()> {
        self.users
            .update_one(
                doc! { "_id": *user },
                doc! {
                    "$addToSet": { "pendingTasks": *task },
                    "$set": { "updatedAt": DateTime::now() },
                },
            )
            .session(&mut self.session)
            .await
            .map_err(write_error)?;
        Ok(())
    }

    async fn pull_pending_task(&mut self, user: &ObjectId, task: &ObjectId) -> StoreResult<()> {
        self.users
            .update_one(
                doc! { "_id": *user },
                doc! {
                    "$pull": { "pendingTasks": *task },
                    "$set": { "updatedAt": DateTime::now() },
                },
            )
            .session(&mut self.session)
            .await
            .map_err(write_error)?;
        Ok(())
    }

    async fn assign_tasks(
        &mut self,
        ids: &[ObjectId],
        user: &ObjectId,
        user_name: &str,
    ) -> StoreResult<()> {
        self.tasks
            .update_many(
                doc! { "_id": { "$in": ids.to_vec() } },
                doc! {
                    "$set": {
                        "assignedUser": *user,
                        "assignedUserName": user_name,
                        "updatedAt": DateTime::now(),
                    }
                },
            )
            .session(&mut self.session)
            .await
            .map_err(write_error)?;
        Ok(())
    }

    async fn unassign_tasks(&mut self, ids: &[ObjectId], user: &ObjectId) -> StoreResult<()> {
        self.tasks
            .update_many(
                doc! { "_id": { "$in": ids.to_vec() }, "assignedUser": *user },
                doc! {
                    "$set": {
                        "assignedUser": Bson::Null,
                        "assignedUserName": UNASSIGNED,
                        "updatedAt": DateTime::now(),
                    }
                },
            )
            .session(&mut self.session)
            .await
            .map_err(write_error)?;
        Ok(())
    }

    async fn rename_assignee(&mut self, user: &ObjectId, user_name: &str) -> StoreResult<()> {
        self.tasks
            .update_many(
                doc! { "assignedUser": *user },
                doc! {
                    "$set": {
                        "assignedUserName": user_name,
                        "updatedAt": DateTime::now(),
                    }
                },
            )
            .session(&mut self.session)
            .await
            .map_err(write_error)?;
        Ok(())
    }

    async fn commit(&mut self) -> StoreResult<()> {
        self.session.commit_transaction().await?;
        Ok(())
    }

    async fn abort(&mut self) -> StoreResult<()> {
        self.session.abort_transaction().await?;
        Ok(())
    }
}
