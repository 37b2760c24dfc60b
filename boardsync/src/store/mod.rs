//! Optimistic task store.
//!
//! Single source of truth for the client's task collection. Mutations
//! apply to the in-memory cache first so callers see the result
//! immediately, then go to the server through the api client. On
//! confirmation the optimistic entry is replaced with the server's
//! version; on failure the cache is rolled back and the [`Notifier`]
//! is told. Push events from the sync channel converge the cache with
//! changes made by other clients.

pub mod notify;

use std::sync::{Arc, Weak};

use parking_lot::RwLock;

use boardsync_proto::event::{EventKind, EventPayload, PushEvent};
use boardsync_proto::task::{Task, TaskDraft, TaskFilter, TaskId, TaskPatch};

use crate::api::{ApiClient, ApiError};
use crate::channel::{Subscription, SyncChannel};
use crate::session::Authenticator;
pub use notify::{NoopNotifier, Notifier, TracingNotifier};

/// Errors from store operations that reach the server.
#[derive(Debug, thiserror::Error)]
#[error(transparent)]
pub struct StoreError(#[from] pub ApiError);

/// Cache plus server round-trip coordination.
///
/// Shared as `Arc<TaskStore<..>>`; all operations take `&self`.
pub struct TaskStore<A: Authenticator, N: Notifier> {
    api: ApiClient<A>,
    cache: RwLock<Vec<Task>>,
    /// Filter from the last `load_all`, reused when a failed delete or
    /// toggle forces a full resync.
    filter: RwLock<Option<TaskFilter>>,
    notifier: N,
}

impl<A: Authenticator, N: Notifier> TaskStore<A, N> {
    #[must_use]
    pub fn new(api: ApiClient<A>, notifier: N) -> Self {
        Self {
            api,
            cache: RwLock::new(Vec::new()),
            filter: RwLock::new(None),
            notifier,
        }
    }

    /// Snapshot of the cached tasks.
    #[must_use]
    pub fn tasks(&self) -> Vec<Task> {
        self.cache.read().clone()
    }

    /// Cached task by id.
    #[must_use]
    pub fn get(&self, id: &TaskId) -> Option<Task> {
        self.cache.read().iter().find(|t| &t.id == id).cloned()
    }

    /// Fetches tasks from the server and replaces the cache with the
    /// result.
    ///
    /// # Errors
    ///
    /// Propagates api failures. The cache is emptied rather than left
    /// stale, so callers keep a usable zero-task view and the push feed
    /// can repopulate it.
    pub async fn load_all(&self, filter: Option<&TaskFilter>) -> Result<Vec<Task>, StoreError> {
        *self.filter.write() = filter.cloned();
        match self.api.list_tasks(filter).await {
            Ok(tasks) => {
                *self.cache.write() = tasks.clone();
                tracing::debug!(count = tasks.len(), "task cache loaded");
                Ok(tasks)
            }
            Err(e) => {
                self.cache.write().clear();
                tracing::warn!(error = %e, "task load failed; cache emptied");
                Err(e.into())
            }
        }
    }

    /// Creates a task optimistically.
    ///
    /// A provisional task with a placeholder id appears in the cache
    /// immediately. On confirmation the placeholder is swapped for the
    /// server's task; our own `task:created` push for it is then a
    /// duplicate and is ignored by [`apply_event`](Self::apply_event).
    ///
    /// # Errors
    ///
    /// On failure the placeholder is removed and the error propagated.
    pub async fn create(&self, draft: TaskDraft) -> Result<Task, StoreError> {
        let provisional = Task::provisional(&draft);
        let placeholder_id = provisional.id.clone();
        self.cache.write().push(provisional);

        match self.api.create_task(&draft).await {
            Ok(confirmed) => {
                {
                    let mut cache = self.cache.write();
                    if cache.iter().any(|t| t.id == confirmed.id) {
                        // The push event beat the response; drop the placeholder.
                        cache.retain(|t| t.id != placeholder_id);
                    } else if let Some(slot) =
                        cache.iter_mut().find(|t| t.id == placeholder_id)
                    {
                        *slot = confirmed.clone();
                    } else {
                        cache.push(confirmed.clone());
                    }
                }
                self.notifier.success(&format!("created \"{}\"", confirmed.name));
                Ok(confirmed)
            }
            Err(e) => {
                self.cache.write().retain(|t| t.id != placeholder_id);
                self.notifier
                    .error(&format!("could not create \"{}\": {e}", draft.name));
                Err(e.into())
            }
        }
    }

    /// Patches a task optimistically. Returns the confirmed task, or
    /// `None` when the id is unknown or the server rejected the change
    /// (the optimistic edit is rolled back and the notifier told).
    pub async fn update(&self, id: &TaskId, patch: TaskPatch) -> Option<Task> {
        if patch.is_empty() {
            return self.get(id);
        }
        let snapshot = {
            let mut cache = self.cache.write();
            let slot = cache.iter_mut().find(|t| &t.id == id)?;
            let before = slot.clone();
            patch.apply(slot);
            slot.updated_at = chrono::Utc::now();
            before
        };

        match self.api.update_task(id, &patch).await {
            Ok(confirmed) => {
                self.replace(&confirmed);
                self.notifier
                    .success(&format!("updated \"{}\"", confirmed.name));
                Some(confirmed)
            }
            Err(e) => {
                // Restore only if the entry still exists; a concurrent
                // delete wins over the rollback.
                let mut cache = self.cache.write();
                if let Some(slot) = cache.iter_mut().find(|t| &t.id == id) {
                    *slot = snapshot;
                }
                drop(cache);
                self.notifier.error(&format!("update failed: {e}"));
                None
            }
        }
    }

    /// Deletes a task optimistically.
    ///
    /// # Errors
    ///
    /// On failure the whole cache is refetched, which also restores the
    /// task, and the error is propagated.
    pub async fn delete(&self, id: &TaskId) -> Result<(), StoreError> {
        let removed = {
            let mut cache = self.cache.write();
            let before = cache.len();
            cache.retain(|t| &t.id != id);
            cache.len() != before
        };
        if !removed {
            tracing::debug!(id = %id, "delete of unknown task");
        }

        match self.api.delete_task(id).await {
            Ok(()) => {
                self.notifier.success("task deleted");
                Ok(())
            }
            Err(e) => {
                self.notifier.error(&format!("delete failed: {e}"));
                self.resync().await;
                Err(e.into())
            }
        }
    }

    /// Flips a task's completion optimistically. Returns the confirmed
    /// task, or `None` when the id is unknown or the server rejected
    /// the change (a full resync restores a consistent cache).
    pub async fn toggle_completion(&self, id: &TaskId) -> Option<Task> {
        let target = {
            let mut cache = self.cache.write();
            let slot = cache.iter_mut().find(|t| &t.id == id)?;
            slot.completed = !slot.completed;
            slot.completed_at = slot.completed.then(chrono::Utc::now);
            if !slot.completed {
                slot.completed_by = None;
            }
            slot.completed
        };

        match self.api.set_completion(id, target).await {
            Ok(confirmed) => {
                self.replace(&confirmed);
                self.notifier.success(&format!(
                    "\"{}\" marked {}",
                    confirmed.name,
                    if confirmed.completed { "done" } else { "open" }
                ));
                Some(confirmed)
            }
            Err(e) => {
                self.notifier.error(&format!("completion change failed: {e}"));
                self.resync().await;
                None
            }
        }
    }

    /// Applies a push event from the sync channel to the cache.
    ///
    /// Events apply in arrival order; the server serializes them per
    /// room. Creates for an id already present and updates for an
    /// unknown id are ignored, so our own echoes and out-of-scope
    /// events converge instead of duplicating.
    pub fn apply_event(&self, event: &PushEvent) {
        match (event.kind, &event.payload) {
            (EventKind::TaskCreated, EventPayload::Task(task)) => {
                let mut cache = self.cache.write();
                if !cache.iter().any(|t| t.id == task.id) {
                    cache.push((**task).clone());
                }
            }
            (EventKind::TaskUpdated | EventKind::TaskMoved, EventPayload::Task(task)) => {
                let mut cache = self.cache.write();
                if let Some(slot) = cache.iter_mut().find(|t| t.id == task.id) {
                    *slot = (**task).clone();
                } else {
                    tracing::debug!(id = %task.id, "update event for unknown task, ignoring");
                }
            }
            (EventKind::TaskDeleted, payload) => {
                let id = payload.task_id().clone();
                self.cache.write().retain(|t| t.id != id);
            }
            (kind, _) => {
                tracing::debug!(kind = %kind, "event without task payload, ignoring");
            }
        }
    }

    /// Subscribes the store to all task events on a channel. The
    /// returned subscriptions keep the wiring alive; cancel them to
    /// detach. Handlers hold a weak reference so the store can drop
    /// while the channel lives.
    #[must_use]
    pub fn attach(self: &Arc<Self>, channel: &SyncChannel) -> Vec<Subscription>
    where
        A: 'static,
        N: 'static,
    {
        EventKind::ALL
            .iter()
            .map(|&kind| {
                let store: Weak<Self> = Arc::downgrade(self);
                channel.subscribe(kind, move |event| {
                    if let Some(store) = store.upgrade() {
                        store.apply_event(event);
                    }
                })
            })
            .collect()
    }

    /// Replaces the cached entry for a confirmed task, skipping the
    /// insert when a concurrent delete removed it.
    fn replace(&self, confirmed: &Task) {
        let mut cache = self.cache.write();
        if let Some(slot) = cache.iter_mut().find(|t| t.id == confirmed.id) {
            *slot = confirmed.clone();
        }
    }

    /// Refetches the cache with the last used filter after a failed
    /// destructive operation.
    async fn resync(&self) {
        let filter = self.filter.read().clone();
        if let Err(e) = self.load_all(filter.as_ref()).await {
            tracing::warn!(error = %e, "cache resync failed");
        }
    }
}
