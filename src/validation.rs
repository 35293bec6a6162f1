//! Field checks that run before any transaction is opened.
//!
//! Payloads are turned into typed change sets here; once a payload passes,
//! merging it onto a stored entity cannot produce an invalid entity.

use std::sync::OnceLock;

use mongodb::bson::{oid::ObjectId, DateTime};
use regex::Regex;

use crate::error::{ApiError, ApiResult};
use crate::models::{
    parse_timestamp, DeadlineInput, Field, PendingTasksInput, Task, TaskPayload, User, UserPayload,
    UserReference, DEFAULT_DESCRIPTION, UNASSIGNED,
};

/// What a payload asks for regarding the task's user.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AssigneeChange {
    Unchanged,
    Set(Option<ObjectId>),
}

#[derive(Debug, Clone, PartialEq)]
pub struct TaskChanges {
    pub name: Option<String>,
    pub description: Option<String>,
    pub deadline: Option<DateTime>,
    pub completed: Option<bool>,
    pub assignee: AssigneeChange,
}

impl TaskChanges {
    /// Merges the plain fields. The assignment is left to the coordinator.
    pub fn apply(&self, task: &mut Task) {
        if let Some(name) = &self.name {
            task.name = name.clone();
        }
        if let Some(description) = &self.description {
            task.description = description.clone();
        }
        if let Some(deadline) = self.deadline {
            task.deadline = deadline;
        }
        if let Some(completed) = self.completed {
            task.completed = completed;
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct UserChanges {
    pub name: Option<String>,
    pub email: Option<String>,
    /// The replacement set, deduplicated in order; `None` keeps the current one.
    pub pending_tasks: Option<Vec<ObjectId>>,
}

impl UserChanges {
    pub fn apply(&self, user: &mut User) {
        if let Some(name) = &self.name {
            user.name = name.clone();
        }
        if let Some(email) = &self.email {
            user.email = email.clone();
        }
    }
}

/// Collects every problem with a payload so they are reported together.
struct Issues {
    entity: &'static str,
    items: Vec<String>,
}

impl Issues {
    fn new(entity: &'static str) -> Self {
        Issues {
            entity,
            items: Vec::new(),
        }
    }

    fn push(&mut self, path: &str, message: impl AsRef<str>) {
        self.items.push(format!("{}: {}", path, message.as_ref()));
    }

    fn finish(self) -> ApiResult<()> {
        if self.items.is_empty() {
            return Ok(());
        }
        Err(ApiError::Validation(format!(
            "{} validation failed: {}",
            self.entity,
            self.items.join(", ")
        )))
    }
}

fn looks_like_email(raw: &str) -> bool {
    static EMAIL: OnceLock<Option<Regex>> = OnceLock::new();
    EMAIL
        .get_or_init(|| Regex::new(r"^[^@\s]+@[^@\s]+\.[^@\s]+$").ok())
        .as_ref()
        .map_or(false, |pattern| pattern.is_match(raw))
}

fn cast_object_id(issues: &mut Issues, path: &str, raw: &str) -> Option<ObjectId> {
    match ObjectId::parse_str(raw.trim()) {
        Ok(id) => Some(id),
        Err(_) => {
            issues.push(path, format!("Cast to ObjectId failed for value {:?}", raw));
            None
        }
    }
}

fn required_text(
    issues: &mut Issues,
    path: &str,
    message: &str,
    value: Field<String>,
    required: bool,
) -> Option<String> {
    match value {
        Field::Value(text) if !text.trim().is_empty() => Some(text),
        Field::Value(_) | Field::Null => {
            issues.push(path, message);
            None
        }
        Field::Absent => {
            if required {
                issues.push(path, message);
            }
            None
        }
    }
}

fn check_task(payload: TaskPayload, required: bool) -> ApiResult<TaskChanges> {
    let mut issues = Issues::new("Task");

    let name = required_text(&mut issues, "name", "Name is required", payload.name, required);

    let deadline = match payload.deadline {
        Field::Value(DeadlineInput::Millis(millis)) => Some(DateTime::from_millis(millis)),
        Field::Value(DeadlineInput::Text(raw)) => {
            let parsed = parse_timestamp(&raw);
            if parsed.is_none() {
                issues.push("deadline", format!("Cast to date failed for value {:?}", raw));
            }
            parsed
        }
        Field::Null => {
            issues.push("deadline", "Deadline is required");
            None
        }
        Field::Absent => {
            if required {
                issues.push("deadline", "Deadline is required");
            }
            None
        }
    };

    let assignee = match payload.assigned_user {
        UserReference::Absent => AssigneeChange::Unchanged,
        UserReference::Cleared => AssigneeChange::Set(None),
        UserReference::Id(raw) => {
            AssigneeChange::Set(cast_object_id(&mut issues, "assignedUser", &raw))
        }
    };

    issues.finish()?;
    Ok(TaskChanges {
        name,
        description: payload.description,
        deadline,
        completed: payload.completed,
        assignee,
    })
}

/// Validates an update payload for `PUT /tasks/{id}`.
pub fn task_changes(payload: TaskPayload) -> ApiResult<TaskChanges> {
    check_task(payload, false)
}

/// Validates a create payload and builds the unassigned task it describes,
/// returning the requested user separately.
pub fn new_task(payload: TaskPayload, now: DateTime) -> ApiResult<(Task, Option<ObjectId>)> {
    let changes = check_task(payload, true)?;
    let mut task = Task {
        id: ObjectId::new(),
        name: String::new(),
        description: DEFAULT_DESCRIPTION.to_string(),
        deadline: now,
        completed: false,
        assigned_user: None,
        assigned_user_name: UNASSIGNED.to_string(),
        date_created: now,
        updated_at: now,
    };
    changes.apply(&mut task);
    let assignee = match changes.assignee {
        AssigneeChange::Set(user) => user,
        AssigneeChange::Unchanged => None,
    };
    Ok((task, assignee))
}

fn check_user(payload: UserPayload, required: bool) -> ApiResult<UserChanges> {
    let mut issues = Issues::new("User");

    let name = required_text(&mut issues, "name", "Name is required", payload.name, required);
    let email = required_text(&mut issues, "email", "Email is required", payload.email, required)
        .map(|email| email.trim().to_string());
    if let Some(email) = &email {
        if !looks_like_email(email) {
            issues.push("email", format!("{:?} is not a valid email address", email));
        }
    }

    let raw_ids = match payload.pending_tasks {
        PendingTasksInput::Absent => None,
        PendingTasksInput::Single(id) => Some(vec![id]),
        PendingTasksInput::Many(ids) => Some(ids),
    };
    let pending_tasks = raw_ids.map(|raw_ids| {
        let mut ids: Vec<ObjectId> = Vec::with_capacity(raw_ids.len());
        for raw in &raw_ids {
            if let Some(id) = cast_object_id(&mut issues, "pendingTasks", raw) {
                if !ids.contains(&id) {
                    ids.push(id);
                }
            }
        }
        ids
    });

    issues.finish()?;
    Ok(UserChanges {
        name,
        email,
        pending_tasks,
    })
}

/// Validates an update payload for `PUT /users/{id}`.
pub fn user_changes(payload: UserPayload) -> ApiResult<UserChanges> {
    check_user(payload, false)
}

/// Validates a create payload, returning the user (with no pending tasks
/// yet) and the tasks it should own.
pub fn new_user(payload: UserPayload, now: DateTime) -> ApiResult<(User, Vec<ObjectId>)> {
    let changes = check_user(payload, true)?;
    let mut user = User {
        id: ObjectId::new(),
        name: String::new(),
        email: String::new(),
        pending_tasks: Vec::new(),
        date_created: now,
        updated_at: now,
    };
    changes.apply(&mut user);
    Ok((user, changes.pending_tasks.unwrap_or_default()))
}
