//! Push-event types delivered over the real-time channel.
//!
//! The event stream historically used two spellings for each event name,
//! colon-delimited (`task:updated`) and underscore-delimited
//! (`task_updated`). Both are accepted on decode and resolve to one
//! logical [`EventKind`] through a fixed table; the alias never travels
//! past the channel boundary as a string.

use serde::{Deserialize, Serialize};

use crate::task::{Task, TaskId};

/// Logical push-event type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    /// A task was created.
    TaskCreated,
    /// A task was updated.
    TaskUpdated,
    /// A task was deleted.
    TaskDeleted,
    /// A task was reordered or moved between sections.
    TaskMoved,
}

/// Static bidirectional mapping from wire spellings to logical kinds.
const WIRE_TABLE: [(EventKind, &str, &str); 4] = [
    (EventKind::TaskCreated, "task:created", "task_created"),
    (EventKind::TaskUpdated, "task:updated", "task_updated"),
    (EventKind::TaskDeleted, "task:deleted", "task_deleted"),
    (EventKind::TaskMoved, "task:moved", "task_moved"),
];

impl EventKind {
    /// All logical event kinds.
    pub const ALL: [Self; 4] = [
        Self::TaskCreated,
        Self::TaskUpdated,
        Self::TaskDeleted,
        Self::TaskMoved,
    ];

    /// Resolves either wire spelling to its logical kind.
    #[must_use]
    pub fn from_wire(name: &str) -> Option<Self> {
        WIRE_TABLE
            .iter()
            .find(|(_, colon, underscore)| name == *colon || name == *underscore)
            .map(|(kind, _, _)| *kind)
    }

    /// The canonical (colon-delimited) wire spelling, used on encode.
    #[must_use]
    pub const fn canonical(self) -> &'static str {
        match self {
            Self::TaskCreated => "task:created",
            Self::TaskUpdated => "task:updated",
            Self::TaskDeleted => "task:deleted",
            Self::TaskMoved => "task:moved",
        }
    }

    /// The legacy (underscore-delimited) wire spelling, accepted on decode.
    #[must_use]
    pub const fn legacy(self) -> &'static str {
        match self {
            Self::TaskCreated => "task_created",
            Self::TaskUpdated => "task_updated",
            Self::TaskDeleted => "task_deleted",
            Self::TaskMoved => "task_moved",
        }
    }
}

impl std::fmt::Display for EventKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.canonical())
    }
}

/// Payload of a push event: a full task, or a bare id for deletions.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum EventPayload {
    /// Full task representation (created / updated / moved).
    Task(Box<Task>),
    /// Identifier only (deleted).
    TaskRef {
        /// The affected task id.
        id: TaskId,
    },
}

impl EventPayload {
    /// The id of the affected task, regardless of payload shape.
    #[must_use]
    pub fn task_id(&self) -> &TaskId {
        match self {
            Self::Task(task) => &task.id,
            Self::TaskRef { id } => id,
        }
    }
}

/// A normalized push event: logical kind plus payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PushEvent {
    /// Logical event type.
    pub kind: EventKind,
    /// Full task or bare id.
    pub payload: EventPayload,
}
