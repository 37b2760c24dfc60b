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

//! Push-event delivery: alias normalization, room scoping, and
//! subscription lifecycle.
//!
//! The alias tests run against a stub feed that emits frames verbatim,
//! including the legacy underscore spellings; the room-scoping tests run
//! against the real backend.
//!
//! Verification command: `cargo test --test room_events`

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::routing::get;
use parking_lot::Mutex;

use boardsync::api::ApiClient;
use boardsync::channel::{ChannelConfig, SyncChannel};
use boardsync::session::{NullAuthenticator, SessionHandle};
use boardsync::store::{NoopNotifier, TaskStore};
use boardsync_proto::event::EventKind;
use boardsync_proto::task::{Task, TaskDraft, TaskId};
use boardsync_server::server::{AppState, start_server_with_state};

// ---------------------------------------------------------------------------
// Stub push feed
// ---------------------------------------------------------------------------

/// Serves a WebSocket endpoint that completes the handshake, emits the
/// given frames verbatim, and then holds the connection open.
async fn start_push_stub(frames: Vec<String>) -> String {
    let app = axum::Router::new().route(
        "/ws",
        get(move |ws: WebSocketUpgrade| {
            let frames = frames.clone();
            async move { ws.on_upgrade(move |socket| stub_session(socket, frames)) }
        }),
    );
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    format!("ws://{addr}/ws")
}

async fn stub_session(mut socket: WebSocket, frames: Vec<String>) {
    // Consume the hello frame.
    while let Some(Ok(msg)) = socket.recv().await {
        if matches!(msg, Message::Text(_)) {
            break;
        }
    }
    let ready = r#"{"event":"ready","data":{"connectionId":"stub-1"}}"#;
    socket.send(Message::Text(ready.into())).await.unwrap();

    // Give the client a moment to finish the handshake path.
    tokio::time::sleep(Duration::from_millis(50)).await;
    for frame in frames {
        socket.send(Message::Text(frame.into())).await.unwrap();
    }

    // Hold the connection so the client does not start reconnecting
    // and replaying the frames.
    tokio::time::sleep(Duration::from_secs(30)).await;
}

fn event_frame(spelling: &str, task: &Task) -> String {
    serde_json::json!({ "event": spelling, "data": task }).to_string()
}

fn task_with_id(id: &str, name: &str) -> Task {
    let mut task = Task::provisional(&TaskDraft::named(name));
    task.id = TaskId::new(id);
    task
}

async fn connected_channel(url: &str) -> SyncChannel {
    let mut config = ChannelConfig::new(url);
    config.reconnect_delay = Duration::from_millis(50);
    let channel = SyncChannel::new(config, SessionHandle::new());
    channel.connect().await.unwrap();
    channel
}

async fn wait_until(what: &str, condition: impl Fn() -> bool) {
    for _ in 0..200 {
        if condition() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(25)).await;
    }
    panic!("timed out waiting for {what}");
}

// ---------------------------------------------------------------------------
// Alias normalization
// ---------------------------------------------------------------------------

#[tokio::test]
async fn both_spellings_deliver_to_one_subscription() {
    let task = task_with_id("t1", "spelled twice");
    let url = start_push_stub(vec![
        event_frame("task_updated", &task),
        event_frame("task:updated", &task),
    ])
    .await;

    let channel = connected_channel(&url).await;
    let updates = Arc::new(AtomicUsize::new(0));
    let creations = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&updates);
    let _update_sub = channel.subscribe(EventKind::TaskUpdated, move |_| {
        counter.fetch_add(1, Ordering::SeqCst);
    });
    let counter = Arc::clone(&creations);
    let _create_sub = channel.subscribe(EventKind::TaskCreated, move |_| {
        counter.fetch_add(1, Ordering::SeqCst);
    });

    let updates_check = Arc::clone(&updates);
    wait_until("both spellings to arrive", move || {
        updates_check.load(Ordering::SeqCst) == 2
    })
    .await;
    assert_eq!(creations.load(Ordering::SeqCst), 0);

    channel.disconnect().await;
}

#[tokio::test]
async fn deleted_event_carries_a_bare_id() {
    let url = start_push_stub(vec![
        r#"{"event":"task_deleted","data":{"id":"t9"}}"#.to_string(),
    ])
    .await;

    let channel = connected_channel(&url).await;
    let seen: Arc<Mutex<Vec<String>>> = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&seen);
    let _sub = channel.subscribe(EventKind::TaskDeleted, move |event| {
        sink.lock().push(event.payload.task_id().to_string());
    });

    let seen_check = Arc::clone(&seen);
    wait_until("the deletion to arrive", move || {
        !seen_check.lock().is_empty()
    })
    .await;
    assert_eq!(seen.lock().as_slice(), ["t9".to_string()]);

    channel.disconnect().await;
}

#[tokio::test]
async fn malformed_frames_are_skipped_not_fatal() {
    let task = task_with_id("t1", "after the garbage");
    let url = start_push_stub(vec![
        "{not valid json".to_string(),
        r#"{"event":"task:exploded","data":{}}"#.to_string(),
        r#"{"event":"task:updated","data":{"bogus":true}}"#.to_string(),
        event_frame("task:created", &task),
    ])
    .await;

    let channel = connected_channel(&url).await;
    let created = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&created);
    let _sub = channel.subscribe(EventKind::TaskCreated, move |_| {
        counter.fetch_add(1, Ordering::SeqCst);
    });

    let created_check = Arc::clone(&created);
    wait_until("the valid frame to arrive", move || {
        created_check.load(Ordering::SeqCst) == 1
    })
    .await;
    assert!(channel.is_connected());

    channel.disconnect().await;
}

#[tokio::test]
async fn cancelled_subscription_receives_nothing() {
    let task = task_with_id("t1", "unheard");
    let url = start_push_stub(vec![event_frame("task:updated", &task)]).await;

    let channel = connected_channel(&url).await;
    let heard = Arc::new(AtomicUsize::new(0));
    let kept = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&heard);
    let sub = channel.subscribe(EventKind::TaskUpdated, move |_| {
        counter.fetch_add(1, Ordering::SeqCst);
    });
    let counter = Arc::clone(&kept);
    let _kept_sub = channel.subscribe(EventKind::TaskUpdated, move |_| {
        counter.fetch_add(1, Ordering::SeqCst);
    });
    sub.cancel();
    sub.cancel(); // idempotent

    let kept_check = Arc::clone(&kept);
    wait_until("the kept handler to fire", move || {
        kept_check.load(Ordering::SeqCst) == 1
    })
    .await;
    assert_eq!(heard.load(Ordering::SeqCst), 0);

    channel.disconnect().await;
}

// ---------------------------------------------------------------------------
// Room scoping against the real backend
// ---------------------------------------------------------------------------

async fn start_backend() -> (String, String, Arc<AppState>) {
    let state = Arc::new(AppState::new());
    let (addr, _handle) = start_server_with_state("127.0.0.1:0", Arc::clone(&state))
        .await
        .unwrap();
    (format!("http://{addr}"), format!("ws://{addr}/ws"), state)
}

#[tokio::test]
async fn events_reach_only_the_joined_room() {
    let (base, ws, state) = start_backend().await;
    let (token, _refresh) = state.issue_session("alice").await;
    let session = SessionHandle::with_token(token);
    let api = ApiClient::new(&base, session.clone(), NullAuthenticator);

    let watcher_p1 = connected_channel(&ws).await;
    watcher_p1.join_room("p1").await;
    let watcher_p2 = connected_channel(&ws).await;
    watcher_p2.join_room("p2").await;

    let p1_hits = Arc::new(AtomicUsize::new(0));
    let p2_hits = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&p1_hits);
    let _sub1 = watcher_p1.subscribe(EventKind::TaskCreated, move |_| {
        counter.fetch_add(1, Ordering::SeqCst);
    });
    let counter = Arc::clone(&p2_hits);
    let _sub2 = watcher_p2.subscribe(EventKind::TaskCreated, move |_| {
        counter.fetch_add(1, Ordering::SeqCst);
    });

    let draft = TaskDraft {
        name: "only for p1".to_string(),
        project_id: Some("p1".to_string()),
        ..TaskDraft::default()
    };
    api.create_task(&draft).await.unwrap();

    let p1_check = Arc::clone(&p1_hits);
    wait_until("the p1 watcher to hear the create", move || {
        p1_check.load(Ordering::SeqCst) == 1
    })
    .await;
    // Grace period: the p2 watcher must stay silent.
    tokio::time::sleep(Duration::from_millis(200)).await;
    assert_eq!(p2_hits.load(Ordering::SeqCst), 0);

    watcher_p1.disconnect().await;
    watcher_p2.disconnect().await;
}

#[tokio::test]
async fn leaving_a_room_stops_delivery() {
    let (base, ws, state) = start_backend().await;
    let (token, _refresh) = state.issue_session("alice").await;
    let session = SessionHandle::with_token(token);
    let api = ApiClient::new(&base, session.clone(), NullAuthenticator);

    let channel = connected_channel(&ws).await;
    channel.join_room("p1").await;
    let hits = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&hits);
    let _sub = channel.subscribe(EventKind::TaskCreated, move |_| {
        counter.fetch_add(1, Ordering::SeqCst);
    });

    let draft = TaskDraft {
        name: "first".to_string(),
        project_id: Some("p1".to_string()),
        ..TaskDraft::default()
    };
    api.create_task(&draft).await.unwrap();
    let hits_check = Arc::clone(&hits);
    wait_until("the first create to arrive", move || {
        hits_check.load(Ordering::SeqCst) == 1
    })
    .await;

    channel.leave_room("p1").await;
    // Give the server a beat to process the leave.
    tokio::time::sleep(Duration::from_millis(100)).await;

    let draft = TaskDraft {
        name: "second".to_string(),
        project_id: Some("p1".to_string()),
        ..TaskDraft::default()
    };
    api.create_task(&draft).await.unwrap();
    tokio::time::sleep(Duration::from_millis(200)).await;
    assert_eq!(hits.load(Ordering::SeqCst), 1);

    channel.disconnect().await;
}

#[tokio::test]
async fn unscoped_tasks_are_not_broadcast() {
    let (base, ws, state) = start_backend().await;
    let (token, _refresh) = state.issue_session("alice").await;
    let api = ApiClient::new(&base, SessionHandle::with_token(token), NullAuthenticator);

    let channel = connected_channel(&ws).await;
    channel.join_room("p1").await;
    let store = Arc::new(TaskStore::new(api.clone(), NoopNotifier));
    let _subs = store.attach(&channel);

    // No project id: the task belongs to no room.
    api.create_task(&TaskDraft::named("orphan")).await.unwrap();
    tokio::time::sleep(Duration::from_millis(200)).await;
    assert!(store.tasks().is_empty());

    channel.disconnect().await;
}

#[tokio::test]
async fn room_operations_while_disconnected_are_noops() {
    let channel = SyncChannel::new(
        ChannelConfig::new("ws://127.0.0.1:1/ws"),
        SessionHandle::new(),
    );
    // Nothing to assert beyond "does not panic or block".
    channel.join_room("p1").await;
    channel.leave_room("p1").await;
    channel
        .publish_intent("task:drag", serde_json::json!({"taskId": "t1"}))
        .await;
    assert!(!channel.is_connected());
}

#[tokio::test]
async fn intents_are_fire_and_forget() {
    let (base, ws, state) = start_backend().await;
    let (token, _refresh) = state.issue_session("alice").await;
    let api = ApiClient::new(&base, SessionHandle::with_token(token), NullAuthenticator);

    let channel = connected_channel(&ws).await;
    channel.join_room("p1").await;
    channel
        .publish_intent("task:drag", serde_json::json!({"taskId": "t1", "over": "s2"}))
        .await;

    // The channel and the REST path both stay healthy afterwards.
    assert!(channel.is_connected());
    api.list_tasks(None).await.unwrap();

    channel.disconnect().await;
}
