//! Typed task endpoints on top of [`ApiClient`].

use boardsync_proto::task::{Task, TaskDraft, TaskFilter, TaskId, TaskPatch};

use super::{ApiClient, ApiError};
use crate::session::Authenticator;

impl<A: Authenticator> ApiClient<A> {
    /// Lists tasks, optionally narrowed by a filter.
    ///
    /// # Errors
    ///
    /// Returns [`ApiError`] on request failure.
    pub async fn list_tasks(&self, filter: Option<&TaskFilter>) -> Result<Vec<Task>, ApiError> {
        let query = filter.map(TaskFilter::to_query).unwrap_or_default();
        self.get(&format!("/tasks{query}")).await
    }

    /// Fetches a single task by id.
    ///
    /// # Errors
    ///
    /// Returns [`ApiError`] on request failure, including a 404 status
    /// for an unknown id.
    pub async fn get_task(&self, id: &TaskId) -> Result<Task, ApiError> {
        self.get(&format!("/tasks/{id}")).await
    }

    /// Creates a task, returning the server-confirmed entity with its
    /// durable id.
    ///
    /// # Errors
    ///
    /// Returns [`ApiError`] on request failure.
    pub async fn create_task(&self, draft: &TaskDraft) -> Result<Task, ApiError> {
        self.post("/tasks", draft).await
    }

    /// Applies a partial update, returning the server's representation.
    ///
    /// # Errors
    ///
    /// Returns [`ApiError`] on request failure.
    pub async fn update_task(&self, id: &TaskId, patch: &TaskPatch) -> Result<Task, ApiError> {
        self.patch(&format!("/tasks/{id}"), patch).await
    }

    /// Deletes a task. Deleting an already-deleted task is a no-op from
    /// the caller's view.
    ///
    /// # Errors
    ///
    /// Returns [`ApiError`] on request failure.
    pub async fn delete_task(&self, id: &TaskId) -> Result<(), ApiError> {
        self.delete(&format!("/tasks/{id}")).await
    }

    /// Sets the completion flag. The server computes the completion
    /// actor and timestamp.
    ///
    /// # Errors
    ///
    /// Returns [`ApiError`] on request failure.
    pub async fn set_completion(&self, id: &TaskId, completed: bool) -> Result<Task, ApiError> {
        self.update_task(id, &TaskPatch::completion(completed)).await
    }
}
