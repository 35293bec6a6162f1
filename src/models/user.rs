use mongodb::bson::oid::ObjectId;
use mongodb::bson::DateTime;
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;

use super::Field;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct User {
    #[serde(rename = "_id")]
    pub id: ObjectId,
    pub name: String,
    pub email: String,
    /// Ids of tasks assigned to this user, in insertion order, no duplicates.
    #[serde(default)]
    pub pending_tasks: Vec<ObjectId>,
    pub date_created: DateTime,
    pub updated_at: DateTime,
}

/// Body of `POST /users` and `PUT /users/{id}`.
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct UserPayload {
    #[serde(default)]
    pub name: Field<String>,
    #[serde(default)]
    pub email: Field<String>,
    #[serde(default)]
    pub pending_tasks: PendingTasksInput,
}

/// The shapes `pendingTasks` arrives in.
///
/// Anything that is neither a string nor an array (null, numbers, objects)
/// is read as an empty list.
#[derive(Debug, Clone, Default, PartialEq)]
pub enum PendingTasksInput {
    #[default]
    Absent,
    Single(String),
    Many(Vec<String>),
}

impl<'de> Deserialize<'de> for PendingTasksInput {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        Ok(match Value::deserialize(deserializer)? {
            Value::String(id) => PendingTasksInput::Single(id),
            Value::Array(items) => PendingTasksInput::Many(
                items
                    .into_iter()
                    .map(|item| match item {
                        Value::String(id) => id,
                        other => other.to_string(),
                    })
                    .collect(),
            ),
            _ => PendingTasksInput::Many(Vec::new()),
        })
    }
}
