//! Task data model for Boardsync.
//!
//! Defines the synchronized [`Task`] entity plus the payload types the
//! client and server exchange over REST: [`TaskDraft`] for creation,
//! [`TaskPatch`] for partial updates, and [`TaskFilter`] for list queries.
//! All JSON uses camelCase field names to match the board API.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Prefix marking a locally-generated placeholder identifier.
///
/// A task carrying a prefixed id is provisional: it exists in the client
/// cache only until the create request resolves.
pub const PLACEHOLDER_PREFIX: &str = "local-";

/// Unique identifier for a task.
///
/// Either a durable id issued by the server, or a `local-`-prefixed
/// placeholder generated client-side for an optimistic create.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TaskId(String);

impl TaskId {
    /// Creates a fresh placeholder identifier for a provisional task.
    #[must_use]
    pub fn placeholder() -> Self {
        Self(format!("{PLACEHOLDER_PREFIX}{}", Uuid::new_v4()))
    }

    /// Creates a `TaskId` from an existing identifier string.
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Returns `true` if this id is a locally-generated placeholder.
    #[must_use]
    pub fn is_placeholder(&self) -> bool {
        self.0.starts_with(PLACEHOLDER_PREFIX)
    }

    /// Returns the identifier as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for TaskId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Task priority. Absence on a [`Task`] means no priority set.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Priority {
    /// Low priority.
    Low,
    /// Medium priority.
    Medium,
    /// High priority.
    High,
}

impl std::fmt::Display for Priority {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Low => write!(f, "low"),
            Self::Medium => write!(f, "medium"),
            Self::High => write!(f, "high"),
        }
    }
}

/// The synchronized task entity.
///
/// The server is authoritative for every field once a task is confirmed;
/// `completed_at` and `completed_by` in particular are server-computed
/// and never set client-side.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Task {
    /// Unique identifier (server id or local placeholder).
    pub id: TaskId,
    /// Task name.
    pub name: String,
    /// Optional free-text description.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// Completion flag.
    pub completed: bool,
    /// When the task was completed (server-computed).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
    /// Who completed the task (server-computed).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed_by: Option<String>,
    /// Optional due date.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub due_date: Option<DateTime<Utc>>,
    /// Optional assignee reference.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub assignee_id: Option<String>,
    /// Optional project membership; also the push-event room for the task.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub project_id: Option<String>,
    /// Optional section membership within the project.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub section_id: Option<String>,
    /// Optional priority.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub priority: Option<Priority>,
    /// Ordered tag list; duplicates allowed to match server semantics.
    #[serde(default)]
    pub tags: Vec<String>,
    /// Ordering position, dense per section, for manual reordering.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub position: Option<i64>,
    /// Nested subtasks (same shape, recursively).
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub subtasks: Vec<Task>,
    /// Creation timestamp.
    pub created_at: DateTime<Utc>,
    /// Last-update timestamp.
    pub updated_at: DateTime<Utc>,
}

impl Task {
    /// Builds a provisional task from a draft, with a placeholder id and
    /// default fields. Unset completion defaults to `false`.
    #[must_use]
    pub fn provisional(draft: &TaskDraft) -> Self {
        let now = Utc::now();
        Self {
            id: TaskId::placeholder(),
            name: draft.name.clone(),
            description: draft.description.clone(),
            completed: false,
            completed_at: None,
            completed_by: None,
            due_date: draft.due_date,
            assignee_id: draft.assignee_id.clone(),
            project_id: draft.project_id.clone(),
            section_id: draft.section_id.clone(),
            priority: draft.priority,
            tags: draft.tags.clone(),
            position: None,
            subtasks: Vec::new(),
            created_at: now,
            updated_at: now,
        }
    }
}

/// Create payload: the caller-settable subset of task fields.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskDraft {
    /// Task name.
    pub name: String,
    /// Optional description.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// Optional due date.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub due_date: Option<DateTime<Utc>>,
    /// Optional assignee reference.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub assignee_id: Option<String>,
    /// Optional project membership.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub project_id: Option<String>,
    /// Optional section membership.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub section_id: Option<String>,
    /// Optional priority.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub priority: Option<Priority>,
    /// Initial tag list.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tags: Vec<String>,
}

impl TaskDraft {
    /// Convenience constructor for a named draft with no other fields.
    #[must_use]
    pub fn named(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Self::default()
        }
    }
}

/// Partial update: every field optional, omitted fields left untouched.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskPatch {
    /// New name.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    /// New description.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// New completion flag.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed: Option<bool>,
    /// New due date.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub due_date: Option<DateTime<Utc>>,
    /// New assignee reference.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub assignee_id: Option<String>,
    /// New project membership.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub project_id: Option<String>,
    /// New section membership.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub section_id: Option<String>,
    /// New priority.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub priority: Option<Priority>,
    /// Replacement tag list.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tags: Option<Vec<String>>,
    /// New ordering position.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub position: Option<i64>,
}

impl TaskPatch {
    /// A patch that only sets the completion flag.
    #[must_use]
    pub fn completion(completed: bool) -> Self {
        Self {
            completed: Some(completed),
            ..Self::default()
        }
    }

    /// Returns `true` if no field is set.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }

    /// Applies the set fields to a task in place. Does not touch
    /// server-computed fields or timestamps.
    pub fn apply(&self, task: &mut Task) {
        if let Some(name) = &self.name {
            task.name.clone_from(name);
        }
        if let Some(description) = &self.description {
            task.description = Some(description.clone());
        }
        if let Some(completed) = self.completed {
            task.completed = completed;
        }
        if let Some(due_date) = self.due_date {
            task.due_date = Some(due_date);
        }
        if let Some(assignee_id) = &self.assignee_id {
            task.assignee_id = Some(assignee_id.clone());
        }
        if let Some(project_id) = &self.project_id {
            task.project_id = Some(project_id.clone());
        }
        if let Some(section_id) = &self.section_id {
            task.section_id = Some(section_id.clone());
        }
        if let Some(priority) = self.priority {
            task.priority = Some(priority);
        }
        if let Some(tags) = &self.tags {
            task.tags.clone_from(tags);
        }
        if let Some(position) = self.position {
            task.position = Some(position);
        }
    }
}

/// List-query filter, rendered as a URL query string.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TaskFilter {
    /// Restrict to one project.
    pub project_id: Option<String>,
    /// Restrict to one assignee.
    pub assignee_id: Option<String>,
    /// Restrict by completion state.
    pub completed: Option<bool>,
    /// Substring match against name and description.
    pub text: Option<String>,
    /// Restrict to one priority.
    pub priority: Option<Priority>,
    /// Due on or after this instant.
    pub due_after: Option<DateTime<Utc>>,
    /// Due on or before this instant.
    pub due_before: Option<DateTime<Utc>>,
}

impl TaskFilter {
    /// Filter restricted to a single project.
    #[must_use]
    pub fn project(project_id: impl Into<String>) -> Self {
        Self {
            project_id: Some(project_id.into()),
            ..Self::default()
        }
    }

    /// Renders the filter as a query string, including the leading `?`.
    /// Returns an empty string when no field is set.
    #[must_use]
    pub fn to_query(&self) -> String {
        let mut query = url::form_urlencoded::Serializer::new(String::new());
        let mut any = false;
        if let Some(project_id) = &self.project_id {
            query.append_pair("projectId", project_id);
            any = true;
        }
        if let Some(assignee_id) = &self.assignee_id {
            query.append_pair("assigneeId", assignee_id);
            any = true;
        }
        if let Some(completed) = self.completed {
            query.append_pair("completed", if completed { "true" } else { "false" });
            any = true;
        }
        if let Some(text) = &self.text {
            query.append_pair("text", text);
            any = true;
        }
        if let Some(priority) = self.priority {
            query.append_pair("priority", &priority.to_string());
            any = true;
        }
        if let Some(due_after) = self.due_after {
            query.append_pair("dueAfter", &due_after.to_rfc3339());
            any = true;
        }
        if let Some(due_before) = self.due_before {
            query.append_pair("dueBefore", &due_before.to_rfc3339());
            any = true;
        }
        if any {
            format!("?{}", query.finish())
        } else {
            String::new()
        }
    }
}
