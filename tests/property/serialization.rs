//! Property-based serialization tests for the wire protocol.
//!
//! Uses proptest to verify:
//! 1. Any valid `Task` survives a JSON encode → decode round-trip.
//! 2. Both historical event spellings resolve to the same `EventKind`,
//!    and decoding a frame under either spelling yields the same event.
//! 3. Random text never causes a panic in the frame decoders (they
//!    return `Err` gracefully).
//! 4. `TaskFilter::to_query` is empty exactly when no field is set, and
//!    otherwise starts with `?`.

use chrono::{DateTime, Utc};
use proptest::prelude::*;
use serde_json::json;

use boardsync_proto::event::{EventKind, EventPayload, PushEvent};
use boardsync_proto::frame::{self, ServerFrame};
use boardsync_proto::task::{Priority, Task, TaskFilter, TaskId};

// --- Arbitrary implementations for protocol types ---

/// Strategy for generating arbitrary server-side `TaskId` values.
fn arb_task_id() -> impl Strategy<Value = TaskId> {
    "[a-z0-9]{8,24}".prop_map(TaskId::new)
}

/// Strategy for generating arbitrary `Priority` values.
fn arb_priority() -> impl Strategy<Value = Priority> {
    prop_oneof![
        Just(Priority::Low),
        Just(Priority::Medium),
        Just(Priority::High),
    ]
}

/// Strategy for generating arbitrary whole-second timestamps.
/// Sub-second precision is not exercised; servers emit whole seconds.
fn arb_timestamp() -> impl Strategy<Value = DateTime<Utc>> {
    (0i64..4_000_000_000).prop_map(|secs| {
        DateTime::from_timestamp(secs, 0).unwrap_or_else(Utc::now)
    })
}

/// Strategy for generating arbitrary `Task` values without subtasks.
fn arb_leaf_task() -> impl Strategy<Value = Task> {
    (
        arb_task_id(),
        "[^\x00]{1,64}",
        prop::option::of("[^\x00]{0,128}"),
        any::<bool>(),
        prop::option::of(arb_timestamp()),
        prop::option::of("[a-z0-9]{1,12}"),
        prop::option::of("[a-z0-9]{1,12}"),
        prop::option::of(arb_priority()),
        prop::collection::vec("[a-z]{1,8}", 0..4),
        prop::option::of(any::<i32>().prop_map(i64::from)),
        (arb_timestamp(), arb_timestamp()),
    )
        .prop_map(
            |(
                id,
                name,
                description,
                completed,
                due_date,
                project_id,
                section_id,
                priority,
                tags,
                position,
                (created_at, updated_at),
            )| Task {
                id,
                name,
                description,
                completed,
                completed_at: completed.then_some(created_at),
                completed_by: completed.then(|| "someone".to_string()),
                due_date,
                assignee_id: None,
                project_id,
                section_id,
                priority,
                tags,
                position,
                subtasks: Vec::new(),
                created_at,
                updated_at,
            },
        )
}

/// Strategy for generating arbitrary `Task` values with one level of
/// subtasks.
fn arb_task() -> impl Strategy<Value = Task> {
    (arb_leaf_task(), prop::collection::vec(arb_leaf_task(), 0..3)).prop_map(
        |(mut task, subtasks)| {
            task.subtasks = subtasks;
            task
        },
    )
}

/// Strategy picking one of the four logical event kinds.
fn arb_event_kind() -> impl Strategy<Value = EventKind> {
    prop::sample::select(EventKind::ALL.to_vec())
}

// --- Property tests ---

proptest! {
    /// Any valid Task survives a JSON encode → decode round-trip.
    #[test]
    fn task_json_round_trip(task in arb_task()) {
        let text = serde_json::to_string(&task).expect("encode should succeed");
        let decoded: Task = serde_json::from_str(&text).expect("decode should succeed");
        prop_assert_eq!(task, decoded);
    }

    /// Both wire spellings of every event kind resolve to that kind.
    #[test]
    fn both_spellings_resolve(kind in arb_event_kind()) {
        prop_assert_eq!(EventKind::from_wire(kind.canonical()), Some(kind));
        prop_assert_eq!(EventKind::from_wire(kind.legacy()), Some(kind));
    }

    /// A push frame decodes to the same event under either spelling.
    #[test]
    fn spelling_is_normalized_on_decode(kind in arb_event_kind(), task in arb_leaf_task()) {
        let data = match kind {
            EventKind::TaskDeleted => json!({ "id": task.id.as_str() }),
            _ => serde_json::to_value(&task).expect("task serializes"),
        };
        let canonical = json!({ "event": kind.canonical(), "data": data }).to_string();
        let legacy = json!({ "event": kind.legacy(), "data": data }).to_string();

        let a = frame::decode_server(&canonical).expect("canonical decodes");
        let b = frame::decode_server(&legacy).expect("legacy decodes");
        prop_assert_eq!(a, b);
    }

    /// A normalized event survives encode → decode and always re-encodes
    /// under the canonical spelling.
    #[test]
    fn push_event_round_trip(kind in arb_event_kind(), task in arb_leaf_task()) {
        let payload = match kind {
            EventKind::TaskDeleted => EventPayload::TaskRef { id: task.id.clone() },
            _ => EventPayload::Task(Box::new(task)),
        };
        let original = ServerFrame::Event(PushEvent { kind, payload });

        let text = frame::encode_server(&original).expect("encode should succeed");
        prop_assert!(text.contains(kind.canonical()));
        let decoded = frame::decode_server(&text).expect("decode should succeed");
        prop_assert_eq!(original, decoded);
    }

    /// Random text never causes a panic in the server-frame decoder.
    #[test]
    fn random_text_decode_server_no_panic(text in ".{0,256}") {
        // Ok or Err are both fine, only a panic would fail this.
        let _ = frame::decode_server(&text);
    }

    /// Random text never causes a panic in the client-frame decoder.
    #[test]
    fn random_text_decode_client_no_panic(text in ".{0,256}") {
        let _ = frame::decode_client(&text);
    }

    /// A well-formed frame with an unrecognized event name is an error,
    /// never a silent mis-parse.
    #[test]
    fn unknown_event_names_are_rejected(name in "[a-z]{1,12}-[a-z]{1,12}") {
        let text = json!({ "event": name, "data": {} }).to_string();
        prop_assert!(frame::decode_server(&text).is_err());
    }

    /// The query string for a project filter always starts with `?` and
    /// carries the project id.
    #[test]
    fn project_filter_query_shape(project in "[a-z0-9]{1,16}") {
        let query = TaskFilter::project(&project).to_query();
        prop_assert!(query.starts_with('?'));
        prop_assert!(query.contains(&project));
    }
}

#[test]
fn empty_filter_renders_no_query() {
    assert_eq!(TaskFilter::default().to_query(), "");
}
