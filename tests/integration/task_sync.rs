// Test-specific lint overrides: integration tests use unwrap/expect freely,
// and some pedantic/nursery lints are not appropriate for test code.
#![allow(
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::missing_panics_doc,
    clippy::missing_errors_doc,
    clippy::missing_docs_in_private_items,
    clippy::future_not_send,
    clippy::redundant_pub_crate
)]

//! End-to-end task synchronization between two clients.
//!
//! Two stores share a backend through the REST API and the push feed:
//! a mutation made by one client must appear in the other client's
//! cache without any polling, and the originating client must not end
//! up with a duplicate of its own task.
//!
//! Verification command: `cargo test --test task_sync`

use std::sync::Arc;
use std::time::Duration;

use boardsync::api::ApiClient;
use boardsync::channel::{ChannelConfig, Subscription, SyncChannel};
use boardsync::session::{NullAuthenticator, SessionHandle};
use boardsync::store::{NoopNotifier, TaskStore};
use boardsync_proto::task::{TaskDraft, TaskFilter};
use boardsync_server::server::{AppState, start_server_with_state};

// ---------------------------------------------------------------------------
// Test helpers
// ---------------------------------------------------------------------------

type TestStore = TaskStore<NullAuthenticator, NoopNotifier>;

struct TestClient {
    store: Arc<TestStore>,
    channel: SyncChannel,
    _subs: Vec<Subscription>,
}

async fn start_backend() -> (String, String, Arc<AppState>) {
    let state = Arc::new(AppState::new());
    let (addr, _handle) = start_server_with_state("127.0.0.1:0", Arc::clone(&state))
        .await
        .unwrap();
    (format!("http://{addr}"), format!("ws://{addr}/ws"), state)
}

/// Connects a client with its own session, joins the given room, and
/// wires the store to the push feed.
async fn connect_client(
    base_url: &str,
    ws_url: &str,
    state: &Arc<AppState>,
    user: &str,
    room: &str,
) -> TestClient {
    let (token, _refresh) = state.issue_session(user).await;
    let session = SessionHandle::with_token(token);
    let api = ApiClient::new(base_url, session.clone(), NullAuthenticator);
    let store = Arc::new(TaskStore::new(api, NoopNotifier));

    let mut config = ChannelConfig::new(ws_url);
    config.reconnect_delay = Duration::from_millis(50);
    let channel = SyncChannel::new(config, session);
    channel.connect().await.unwrap();
    channel.join_room(room).await;
    let subs = store.attach(&channel);

    TestClient {
        store,
        channel,
        _subs: subs,
    }
}

/// Polls a condition until it holds or a generous deadline passes.
async fn wait_until(what: &str, condition: impl Fn() -> bool) {
    for _ in 0..200 {
        if condition() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(25)).await;
    }
    panic!("timed out waiting for {what}");
}

fn draft(name: &str, project: &str) -> TaskDraft {
    TaskDraft {
        name: name.to_string(),
        project_id: Some(project.to_string()),
        ..TaskDraft::default()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[tokio::test]
async fn create_propagates_to_other_client() {
    let (base, ws, state) = start_backend().await;
    let alice = connect_client(&base, &ws, &state, "alice", "p1").await;
    let bob = connect_client(&base, &ws, &state, "bob", "p1").await;

    let created = alice
        .store
        .create(draft("write the report", "p1"))
        .await
        .unwrap();
    assert!(!created.id.is_placeholder());

    let bob_store = Arc::clone(&bob.store);
    let id = created.id.clone();
    wait_until("bob to see the created task", move || {
        bob_store.get(&id).is_some()
    })
    .await;

    alice.channel.disconnect().await;
    bob.channel.disconnect().await;
}

#[tokio::test]
async fn creator_sees_exactly_one_copy_of_own_task() {
    let (base, ws, state) = start_backend().await;
    let alice = connect_client(&base, &ws, &state, "alice", "p1").await;
    let bob = connect_client(&base, &ws, &state, "bob", "p1").await;

    let created = alice
        .store
        .create(draft("no duplicates", "p1"))
        .await
        .unwrap();

    // Once bob has it, alice's own echo has certainly been processed.
    let bob_store = Arc::clone(&bob.store);
    let id = created.id.clone();
    wait_until("bob to see the task", move || bob_store.get(&id).is_some()).await;

    let copies = alice
        .store
        .tasks()
        .iter()
        .filter(|t| t.id == created.id)
        .count();
    assert_eq!(copies, 1);
    assert!(alice.store.tasks().iter().all(|t| !t.id.is_placeholder()));

    alice.channel.disconnect().await;
    bob.channel.disconnect().await;
}

#[tokio::test]
async fn completion_toggle_propagates_with_attribution() {
    let (base, ws, state) = start_backend().await;
    let alice = connect_client(&base, &ws, &state, "alice", "p1").await;
    let bob = connect_client(&base, &ws, &state, "bob", "p1").await;

    let created = alice.store.create(draft("finish me", "p1")).await.unwrap();
    let bob_store = Arc::clone(&bob.store);
    let id = created.id.clone();
    wait_until("bob to see the task", move || bob_store.get(&id).is_some()).await;

    let done = bob.store.toggle_completion(&created.id).await.unwrap();
    assert!(done.completed);
    assert_eq!(done.completed_by.as_deref(), Some("bob"));
    assert!(done.completed_at.is_some());

    let alice_store = Arc::clone(&alice.store);
    let id = created.id.clone();
    wait_until("alice to see the completion", move || {
        alice_store.get(&id).is_some_and(|t| t.completed)
    })
    .await;

    alice.channel.disconnect().await;
    bob.channel.disconnect().await;
}

#[tokio::test]
async fn delete_propagates_to_other_client() {
    let (base, ws, state) = start_backend().await;
    let alice = connect_client(&base, &ws, &state, "alice", "p1").await;
    let bob = connect_client(&base, &ws, &state, "bob", "p1").await;

    let created = alice.store.create(draft("short-lived", "p1")).await.unwrap();
    let bob_store = Arc::clone(&bob.store);
    let id = created.id.clone();
    wait_until("bob to see the task", move || bob_store.get(&id).is_some()).await;

    alice.store.delete(&created.id).await.unwrap();
    assert!(alice.store.get(&created.id).is_none());

    let bob_store = Arc::clone(&bob.store);
    let id = created.id.clone();
    wait_until("bob to see the deletion", move || {
        bob_store.get(&id).is_none()
    })
    .await;

    alice.channel.disconnect().await;
    bob.channel.disconnect().await;
}

#[tokio::test]
async fn rename_propagates_to_other_client() {
    let (base, ws, state) = start_backend().await;
    let alice = connect_client(&base, &ws, &state, "alice", "p1").await;
    let bob = connect_client(&base, &ws, &state, "bob", "p1").await;

    let created = alice.store.create(draft("old name", "p1")).await.unwrap();
    let bob_store = Arc::clone(&bob.store);
    let id = created.id.clone();
    wait_until("bob to see the task", move || bob_store.get(&id).is_some()).await;

    let patch = boardsync_proto::task::TaskPatch {
        name: Some("new name".to_string()),
        ..Default::default()
    };
    let updated = alice.store.update(&created.id, patch).await.unwrap();
    assert_eq!(updated.name, "new name");

    let bob_store = Arc::clone(&bob.store);
    let id = created.id.clone();
    wait_until("bob to see the rename", move || {
        bob_store.get(&id).is_some_and(|t| t.name == "new name")
    })
    .await;

    alice.channel.disconnect().await;
    bob.channel.disconnect().await;
}

#[tokio::test]
async fn load_all_applies_server_side_filter() {
    let (base, ws, state) = start_backend().await;
    let alice = connect_client(&base, &ws, &state, "alice", "p1").await;

    alice.store.create(draft("in p1", "p1")).await.unwrap();
    alice.store.create(draft("also in p1", "p1")).await.unwrap();
    alice.store.create(draft("in p2", "p2")).await.unwrap();

    let tasks = alice
        .store
        .load_all(Some(&TaskFilter::project("p1")))
        .await
        .unwrap();
    assert_eq!(tasks.len(), 2);
    assert!(tasks.iter().all(|t| t.project_id.as_deref() == Some("p1")));
    assert_eq!(alice.store.tasks().len(), 2);

    alice.channel.disconnect().await;
}
