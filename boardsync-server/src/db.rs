//! In-memory task table.
//!
//! The server is authoritative: ids, timestamps, completion attribution,
//! and positions are computed here, never taken from the client.

use chrono::Utc;
use parking_lot::RwLock;
use uuid::Uuid;

use boardsync_proto::task::{Task, TaskDraft, TaskFilter, TaskId, TaskPatch};

/// Thread-safe in-memory task storage.
#[derive(Default)]
pub struct TaskDb {
    tasks: RwLock<Vec<Task>>,
}

impl TaskDb {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Tasks matching the filter, in insertion order.
    #[must_use]
    pub fn list(&self, filter: &TaskFilter) -> Vec<Task> {
        self.tasks
            .read()
            .iter()
            .filter(|t| matches_filter(t, filter))
            .cloned()
            .collect()
    }

    /// Task by id.
    #[must_use]
    pub fn get(&self, id: &TaskId) -> Option<Task> {
        self.tasks.read().iter().find(|t| &t.id == id).cloned()
    }

    /// Creates a task from a draft. The server assigns the id and
    /// timestamps and a dense position at the end of the task's section.
    pub fn insert(&self, draft: &TaskDraft) -> Task {
        let now = Utc::now();
        let mut tasks = self.tasks.write();
        let position = tasks
            .iter()
            .filter(|t| t.project_id == draft.project_id && t.section_id == draft.section_id)
            .count() as i64;
        let task = Task {
            id: TaskId::new(Uuid::new_v4().to_string()),
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
            position: Some(position),
            subtasks: Vec::new(),
            created_at: now,
            updated_at: now,
        };
        tasks.push(task.clone());
        task
    }

    /// Applies a patch to a task. Completion transitions set or clear
    /// `completed_at` and attribute `completed_by` to the acting user.
    /// Returns `None` for an unknown id.
    pub fn patch(&self, id: &TaskId, patch: &TaskPatch, actor: &str) -> Option<Task> {
        let mut tasks = self.tasks.write();
        let task = tasks.iter_mut().find(|t| &t.id == id)?;
        let was_completed = task.completed;
        patch.apply(task);
        if task.completed != was_completed {
            if task.completed {
                task.completed_at = Some(Utc::now());
                task.completed_by = Some(actor.to_string());
            } else {
                task.completed_at = None;
                task.completed_by = None;
            }
        }
        task.updated_at = Utc::now();
        Some(task.clone())
    }

    /// Removes a task, returning it if it existed. Deleting an unknown
    /// id is a no-op.
    pub fn remove(&self, id: &TaskId) -> Option<Task> {
        let mut tasks = self.tasks.write();
        let index = tasks.iter().position(|t| &t.id == id)?;
        Some(tasks.remove(index))
    }
}

fn matches_filter(task: &Task, filter: &TaskFilter) -> bool {
    if let Some(project_id) = &filter.project_id
        && task.project_id.as_deref() != Some(project_id)
    {
        return false;
    }
    if let Some(assignee_id) = &filter.assignee_id
        && task.assignee_id.as_deref() != Some(assignee_id)
    {
        return false;
    }
    if let Some(completed) = filter.completed
        && task.completed != completed
    {
        return false;
    }
    if let Some(text) = &filter.text {
        let needle = text.to_lowercase();
        let in_name = task.name.to_lowercase().contains(&needle);
        let in_description = task
            .description
            .as_ref()
            .is_some_and(|d| d.to_lowercase().contains(&needle));
        if !in_name && !in_description {
            return false;
        }
    }
    if let Some(priority) = filter.priority
        && task.priority != Some(priority)
    {
        return false;
    }
    if let Some(due_after) = filter.due_after
        && !task.due_date.is_some_and(|d| d >= due_after)
    {
        return false;
    }
    if let Some(due_before) = filter.due_before
        && !task.due_date.is_some_and(|d| d <= due_before)
    {
        return false;
    }
    true
}
