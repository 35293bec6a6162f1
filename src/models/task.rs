use mongodb::bson::oid::ObjectId;
use mongodb::bson::DateTime;
use serde::de::Error as _;
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;

use super::Field;

/// Stored in `assignedUserName` whenever a task has no user.
pub const UNASSIGNED: &str = "unassigned";
pub const DEFAULT_DESCRIPTION: &str = "No description";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Task {
    #[serde(rename = "_id")]
    pub id: ObjectId,
    pub name: String,
    #[serde(default = "default_description")]
    pub description: String,
    pub deadline: DateTime,
    #[serde(default)]
    pub completed: bool,
    #[serde(default)]
    pub assigned_user: Option<ObjectId>,
    #[serde(default = "default_assigned_user_name")]
    pub assigned_user_name: String,
    pub date_created: DateTime,
    pub updated_at: DateTime,
}

fn default_description() -> String {
    DEFAULT_DESCRIPTION.to_string()
}

fn default_assigned_user_name() -> String {
    UNASSIGNED.to_string()
}

/// Body of `POST /tasks` and `PUT /tasks/{id}`.
///
/// Every field is optional so the same shape serves as a partial update;
/// required-field checks happen in the validation gate.
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct TaskPayload {
    #[serde(default)]
    pub name: Field<String>,
    pub description: Option<String>,
    #[serde(default)]
    pub deadline: Field<DeadlineInput>,
    pub completed: Option<bool>,
    #[serde(default)]
    pub assigned_user: UserReference,
}

/// A deadline as epoch milliseconds or as a date string.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(untagged)]
pub enum DeadlineInput {
    Millis(i64),
    Text(String),
}

/// The `assignedUser` field of a payload.
///
/// Absent leaves the assignment alone, `null` and `""` both clear it.
#[derive(Debug, Clone, Default, PartialEq)]
pub enum UserReference {
    #[default]
    Absent,
    Cleared,
    Id(String),
}

impl<'de> Deserialize<'de> for UserReference {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        match Value::deserialize(deserializer)? {
            Value::Null => Ok(UserReference::Cleared),
            Value::String(id) if id.trim().is_empty() => Ok(UserReference::Cleared),
            Value::String(id) => Ok(UserReference::Id(id)),
            other => Err(D::Error::custom(format!(
                "assignedUser must be a user id string or null, got {}",
                other
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn assigned_user_is_tri_state() {
        let absent: TaskPayload = serde_json::from_value(json!({ "name": "T1" })).unwrap();
        assert_eq!(absent.assigned_user, UserReference::Absent);

        let null: TaskPayload = serde_json::from_value(json!({ "assignedUser": null })).unwrap();
        assert_eq!(null.assigned_user, UserReference::Cleared);

        let empty: TaskPayload = serde_json::from_value(json!({ "assignedUser": "" })).unwrap();
        assert_eq!(empty.assigned_user, UserReference::Cleared);

        let set: TaskPayload =
            serde_json::from_value(json!({ "assignedUser": "64b7f0c2a1b2c3d4e5f60718" })).unwrap();
        assert_eq!(
            set.assigned_user,
            UserReference::Id("64b7f0c2a1b2c3d4e5f60718".to_string())
        );
    }

    #[test]
    fn rejects_unknown_and_derived_fields() {
        let unknown = serde_json::from_value::<TaskPayload>(json!({ "name": "T1", "priority": 3 }));
        assert!(unknown.is_err());

        let derived =
            serde_json::from_value::<TaskPayload>(json!({ "assignedUserName": "Alice" }));
        assert!(derived.is_err());
    }

    #[test]
    fn deadline_accepts_millis_and_text() {
        let millis: TaskPayload = serde_json::from_value(json!({ "deadline": 1700000000000i64 })).unwrap();
        assert_eq!(millis.deadline, Field::Value(DeadlineInput::Millis(1_700_000_000_000)));

        let text: TaskPayload = serde_json::from_value(json!({ "deadline": "2025-01-01" })).unwrap();
        assert_eq!(text.deadline, Field::Value(DeadlineInput::Text("2025-01-01".to_string())));

        let null: TaskPayload = serde_json::from_value(json!({ "deadline": null })).unwrap();
        assert_eq!(null.deadline, Field::Null);

        let absent: TaskPayload = serde_json::from_value(json!({})).unwrap();
        assert_eq!(absent.deadline, Field::Absent);
    }

    #[test]
    fn stored_task_uses_camel_case_fields() {
        let now = DateTime::now();
        let task = Task {
            id: ObjectId::new(),
            name: "T1".to_string(),
            description: DEFAULT_DESCRIPTION.to_string(),
            deadline: now,
            completed: false,
            assigned_user: None,
            assigned_user_name: UNASSIGNED.to_string(),
            date_created: now,
            updated_at: now,
        };
        let doc = mongodb::bson::to_document(&task).unwrap();
        assert!(doc.contains_key("_id"));
        assert!(doc.contains_key("assignedUserName"));
        assert!(doc.contains_key("dateCreated"));
        assert!(doc.is_null("assignedUser"));
    }
}
