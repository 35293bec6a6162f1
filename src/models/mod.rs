pub mod task;
pub mod user;

use chrono::{NaiveDate, NaiveDateTime};
use mongodb::bson::DateTime;
use serde::{Deserialize, Deserializer};

pub use task::{DeadlineInput, Task, TaskPayload, UserReference, DEFAULT_DESCRIPTION, UNASSIGNED};
pub use user::{PendingTasksInput, User, UserPayload};

/// A payload field that may be left out but, when sent, may not be `null`.
#[derive(Debug, Clone, PartialEq)]
pub enum Field<T> {
    Absent,
    Null,
    Value(T),
}

impl<T> Default for Field<T> {
    fn default() -> Self {
        Field::Absent
    }
}

impl<'de, T: Deserialize<'de>> Deserialize<'de> for Field<T> {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        Ok(match Option::<T>::deserialize(deserializer)? {
            Some(value) => Field::Value(value),
            None => Field::Null,
        })
    }
}

/// The two document collections and the schema facts the query layer needs
/// to cast raw JSON values.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Collection {
    Tasks,
    Users,
}

impl Collection {
    pub fn name(&self) -> &'static str {
        match self {
            Collection::Tasks => "tasks",
            Collection::Users => "users",
        }
    }

    /// Fields stored as ObjectId (or arrays of ObjectId).
    pub fn is_object_id_field(&self, field: &str) -> bool {
        match self {
            Collection::Tasks => matches!(field, "_id" | "assignedUser"),
            Collection::Users => matches!(field, "_id" | "pendingTasks"),
        }
    }

    pub fn is_date_field(&self, field: &str) -> bool {
        match self {
            Collection::Tasks => matches!(field, "deadline" | "dateCreated" | "updatedAt"),
            Collection::Users => matches!(field, "dateCreated" | "updatedAt"),
        }
    }
}

/// Parses the timestamp shapes clients send: RFC 3339, a naive
/// `YYYY-MM-DDTHH:MM:SS[.fff]` (taken as UTC) or a bare `YYYY-MM-DD`.
pub fn parse_timestamp(raw: &str) -> Option<DateTime> {
    let raw = raw.trim();
    if let Ok(parsed) = chrono::DateTime::parse_from_rfc3339(raw) {
        return Some(DateTime::from_millis(parsed.timestamp_millis()));
    }
    if let Ok(naive) = NaiveDateTime::parse_from_str(raw, "%Y-%m-%dT%H:%M:%S%.f") {
        return Some(DateTime::from_millis(naive.and_utc().timestamp_millis()));
    }
    NaiveDate::parse_from_str(raw, "%Y-%m-%d")
        .ok()
        .and_then(|date| date.and_hms_opt(0, 0, 0))
        .map(|naive| DateTime::from_millis(naive.and_utc().timestamp_millis()))
}
