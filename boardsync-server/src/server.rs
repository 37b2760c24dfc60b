//! Server core: shared state, REST routes, and the WebSocket push feed.
//!
//! REST mutations are the write path; every confirmed mutation is
//! broadcast to the task's project room as a push event. The WebSocket
//! side performs a `hello`/`ready` handshake, then accepts room
//! membership changes and fire-and-forget intents.

use std::collections::HashMap;
use std::sync::Arc;

use axum::Json;
use axum::extract::ws::{Message, WebSocket};
use axum::extract::{Path, Query, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use chrono::{DateTime, Utc};
use futures_util::{SinkExt, StreamExt};
use tokio::sync::{RwLock, mpsc};
use uuid::Uuid;

use boardsync_proto::event::{EventKind, EventPayload, PushEvent};
use boardsync_proto::frame::{self, ClientFrame, ServerFrame};
use boardsync_proto::task::{Priority, Task, TaskDraft, TaskFilter, TaskId, TaskPatch};

use crate::db::TaskDb;
use crate::rooms::RoomRegistry;

/// Shared server state.
pub struct AppState {
    /// Task storage.
    pub db: TaskDb,
    /// Room directory for push scoping.
    pub rooms: RoomRegistry,
    /// Access token to username.
    tokens: RwLock<HashMap<String, String>>,
    /// Refresh token to username.
    refresh_tokens: RwLock<HashMap<String, String>>,
    /// Connection id to its WebSocket writer channel.
    connections: RwLock<HashMap<String, mpsc::UnboundedSender<Message>>>,
}

impl Default for AppState {
    fn default() -> Self {
        Self::new()
    }
}

impl AppState {
    #[must_use]
    pub fn new() -> Self {
        Self {
            db: TaskDb::new(),
            rooms: RoomRegistry::new(),
            tokens: RwLock::new(HashMap::new()),
            refresh_tokens: RwLock::new(HashMap::new()),
            connections: RwLock::new(HashMap::new()),
        }
    }

    /// Issues a fresh access/refresh token pair for a user.
    pub async fn issue_session(&self, user: &str) -> (String, String) {
        let token = Uuid::new_v4().to_string();
        let refresh = Uuid::new_v4().to_string();
        self.tokens
            .write()
            .await
            .insert(token.clone(), user.to_string());
        self.refresh_tokens
            .write()
            .await
            .insert(refresh.clone(), user.to_string());
        (token, refresh)
    }

    /// The user an access token belongs to, if valid.
    pub async fn user_for_token(&self, token: &str) -> Option<String> {
        self.tokens.read().await.get(token).cloned()
    }

    /// Invalidates a single access token, simulating server-side
    /// session expiry in tests.
    pub async fn revoke_token(&self, token: &str) {
        self.tokens.write().await.remove(token);
    }

    /// Invalidates a refresh token.
    pub async fn revoke_refresh_token(&self, token: &str) {
        self.refresh_tokens.write().await.remove(token);
    }

    /// Send a WebSocket Close frame to all push connections.
    ///
    /// Causes each connection's writer task to emit a close frame, which
    /// the client reader detects as a dropped connection. Useful for
    /// graceful shutdown and reconnect testing.
    pub async fn close_all_connections(&self) {
        let conns = self.connections.read().await;
        for (conn_id, sender) in conns.iter() {
            tracing::info!(conn_id = %conn_id, "sending close frame to connection");
            let _ = sender.send(Message::Close(None));
        }
    }

    /// Broadcasts a push event to the task's project room, skipping the
    /// originating connection when known. Unscoped tasks reach no room.
    async fn broadcast_event(&self, kind: EventKind, task: &Task, skip_conn: Option<&str>) {
        let Some(room) = task.project_id.clone() else {
            tracing::debug!(id = %task.id, "task has no project; event not broadcast");
            return;
        };
        let payload = if kind == EventKind::TaskDeleted {
            EventPayload::TaskRef {
                id: task.id.clone(),
            }
        } else {
            EventPayload::Task(Box::new(task.clone()))
        };
        let event = PushEvent { kind, payload };
        match frame::encode_server(&ServerFrame::Event(event)) {
            Ok(text) => {
                let delivered = self.rooms.broadcast(&room, &text, skip_conn).await;
                tracing::debug!(room = %room, kind = %kind, delivered, "push event broadcast");
            }
            Err(e) => {
                tracing::error!(error = %e, "failed to encode push event");
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Auth endpoints
// ---------------------------------------------------------------------------

#[derive(serde::Deserialize)]
struct LoginRequest {
    username: String,
    password: String,
}

#[derive(serde::Serialize)]
#[serde(rename_all = "camelCase")]
struct LoginResponse {
    token: String,
    refresh_token: String,
    user: String,
}

#[derive(serde::Deserialize)]
#[serde(rename_all = "camelCase")]
struct RefreshRequest {
    refresh_token: String,
}

fn error_body(status: StatusCode, message: &str) -> Response {
    (status, Json(serde_json::json!({ "error": message }))).into_response()
}

async fn login(State(state): State<Arc<AppState>>, Json(req): Json<LoginRequest>) -> Response {
    if req.username.is_empty() || req.password.is_empty() {
        return error_body(StatusCode::UNAUTHORIZED, "invalid credentials");
    }
    let (token, refresh_token) = state.issue_session(&req.username).await;
    tracing::info!(user = %req.username, "user logged in");
    Json(LoginResponse {
        token,
        refresh_token,
        user: req.username,
    })
    .into_response()
}

async fn refresh(State(state): State<Arc<AppState>>, Json(req): Json<RefreshRequest>) -> Response {
    let user = state
        .refresh_tokens
        .read()
        .await
        .get(&req.refresh_token)
        .cloned();
    let Some(user) = user else {
        return error_body(StatusCode::UNAUTHORIZED, "invalid refresh token");
    };
    let token = Uuid::new_v4().to_string();
    state.tokens.write().await.insert(token.clone(), user);
    Json(serde_json::json!({ "token": token })).into_response()
}

async fn logout(State(state): State<Arc<AppState>>, headers: HeaderMap) -> Response {
    if let Some(token) = bearer_token(&headers) {
        state.revoke_token(token).await;
    }
    StatusCode::NO_CONTENT.into_response()
}

/// Extracts the bearer token from the Authorization header.
fn bearer_token(headers: &HeaderMap) -> Option<&str> {
    headers
        .get(axum::http::header::AUTHORIZATION)?
        .to_str()
        .ok()?
        .strip_prefix("Bearer ")
}

/// Resolves the acting user from the request headers, or 401.
async fn authorize(state: &AppState, headers: &HeaderMap) -> Result<String, Response> {
    let Some(token) = bearer_token(headers) else {
        return Err(error_body(StatusCode::UNAUTHORIZED, "missing bearer token"));
    };
    state
        .user_for_token(token)
        .await
        .ok_or_else(|| error_body(StatusCode::UNAUTHORIZED, "invalid or expired token"))
}

// ---------------------------------------------------------------------------
// Task endpoints
// ---------------------------------------------------------------------------

/// Query parameters for `GET /tasks`, the wire form of a task filter.
#[derive(Debug, Default, serde::Deserialize)]
#[serde(rename_all = "camelCase")]
struct FilterParams {
    project_id: Option<String>,
    assignee_id: Option<String>,
    completed: Option<bool>,
    text: Option<String>,
    priority: Option<Priority>,
    due_after: Option<DateTime<Utc>>,
    due_before: Option<DateTime<Utc>>,
}

impl From<FilterParams> for TaskFilter {
    fn from(params: FilterParams) -> Self {
        Self {
            project_id: params.project_id,
            assignee_id: params.assignee_id,
            completed: params.completed,
            text: params.text,
            priority: params.priority,
            due_after: params.due_after,
            due_before: params.due_before,
        }
    }
}

async fn list_tasks(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Query(params): Query<FilterParams>,
) -> Response {
    if let Err(response) = authorize(&state, &headers).await {
        return response;
    }
    Json(state.db.list(&params.into())).into_response()
}

async fn create_task(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Json(draft): Json<TaskDraft>,
) -> Response {
    if let Err(response) = authorize(&state, &headers).await {
        return response;
    }
    if draft.name.is_empty() {
        return error_body(StatusCode::UNPROCESSABLE_ENTITY, "task name is required");
    }
    let task = state.db.insert(&draft);
    state
        .broadcast_event(EventKind::TaskCreated, &task, None)
        .await;
    (StatusCode::CREATED, Json(task)).into_response()
}

async fn get_task(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Path(id): Path<String>,
) -> Response {
    if let Err(response) = authorize(&state, &headers).await {
        return response;
    }
    match state.db.get(&TaskId::new(id)) {
        Some(task) => Json(task).into_response(),
        None => error_body(StatusCode::NOT_FOUND, "task not found"),
    }
}

async fn patch_task(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Path(id): Path<String>,
    Json(patch): Json<TaskPatch>,
) -> Response {
    let actor = match authorize(&state, &headers).await {
        Ok(user) => user,
        Err(response) => return response,
    };
    let id = TaskId::new(id);
    let Some(task) = state.db.patch(&id, &patch, &actor) else {
        return error_body(StatusCode::NOT_FOUND, "task not found");
    };
    // Reorders and section moves announce as moves, everything else as
    // plain updates.
    let kind = if patch.position.is_some() || patch.section_id.is_some() {
        EventKind::TaskMoved
    } else {
        EventKind::TaskUpdated
    };
    state.broadcast_event(kind, &task, None).await;
    Json(task).into_response()
}

async fn delete_task(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Path(id): Path<String>,
) -> Response {
    if let Err(response) = authorize(&state, &headers).await {
        return response;
    }
    let id = TaskId::new(id);
    // Delete of an unknown id still reports success, so a retried
    // delete that already landed does not surface as an error.
    if let Some(task) = state.db.remove(&id) {
        state
            .broadcast_event(EventKind::TaskDeleted, &task, None)
            .await;
    } else {
        tracing::debug!(id = %id, "delete of unknown task");
    }
    StatusCode::NO_CONTENT.into_response()
}

// ---------------------------------------------------------------------------
// WebSocket push feed
// ---------------------------------------------------------------------------

/// Handles an upgraded WebSocket connection.
///
/// The connection lifecycle:
/// 1. Wait for a `hello` frame and validate its token if present.
/// 2. Send `ready` with the assigned connection id.
/// 3. Enter the frame loop, handling room membership and intents.
/// 4. On disconnect, leave all rooms and unregister.
pub async fn handle_socket(socket: WebSocket, state: Arc<AppState>) {
    let (mut ws_sender, mut ws_receiver) = socket.split();

    let Some(token) = wait_for_hello(&mut ws_receiver).await else {
        tracing::warn!("connection closed before hello");
        return;
    };

    // A token, when supplied, must be a live session. Anonymous hello
    // is accepted for local development.
    if let Some(token) = &token
        && state.user_for_token(token).await.is_none()
    {
        let reject = ServerFrame::Error {
            reason: "invalid token".to_string(),
        };
        if let Ok(text) = frame::encode_server(&reject) {
            let _ = ws_sender.send(Message::Text(text.into())).await;
        }
        tracing::warn!("hello with invalid token rejected");
        return;
    }

    let conn_id = Uuid::new_v4().to_string();
    let (tx, mut rx) = mpsc::unbounded_channel::<Message>();
    state
        .connections
        .write()
        .await
        .insert(conn_id.clone(), tx.clone());

    let ready = ServerFrame::Ready {
        connection_id: conn_id.clone(),
    };
    match frame::encode_server(&ready) {
        Ok(text) => {
            if let Err(e) = ws_sender.send(Message::Text(text.into())).await {
                tracing::error!(conn_id = %conn_id, error = %e, "failed to send ready");
                state.connections.write().await.remove(&conn_id);
                return;
            }
        }
        Err(e) => {
            tracing::error!(error = %e, "failed to encode ready frame");
            state.connections.write().await.remove(&conn_id);
            return;
        }
    }

    tracing::info!(conn_id = %conn_id, "push connection established");

    // Writer task forwards broadcasts from the channel to the socket.
    let writer_conn_id = conn_id.clone();
    let mut write_task = tokio::spawn(async move {
        while let Some(msg) = rx.recv().await {
            if ws_sender.send(msg).await.is_err() {
                tracing::warn!(conn_id = %writer_conn_id, "WebSocket write failed");
                break;
            }
        }
    });

    // Reader loop: room membership changes and intents.
    let reader_conn_id = conn_id.clone();
    let reader_state = Arc::clone(&state);
    let reader_tx = tx;
    let mut read_task = tokio::spawn(async move {
        while let Some(Ok(msg)) = ws_receiver.next().await {
            match msg {
                Message::Text(text) => {
                    handle_client_frame(&reader_conn_id, &text, &reader_state, &reader_tx).await;
                }
                Message::Close(_) => {
                    tracing::info!(conn_id = %reader_conn_id, "received close frame");
                    break;
                }
                _ => {
                    // Ignore binary, ping, pong frames.
                }
            }
        }
    });

    // Wait for either task to finish, then abort the other.
    tokio::select! {
        _ = &mut read_task => {
            write_task.abort();
        }
        _ = &mut write_task => {
            read_task.abort();
        }
    }

    state.rooms.leave_all(&conn_id).await;
    state.connections.write().await.remove(&conn_id);
    tracing::info!(conn_id = %conn_id, "push connection closed");
}

/// Waits for the first frame on the socket, expecting `hello`.
///
/// Returns the (optional) session token from a valid hello, or `None`
/// if the connection closes or a different frame arrives first.
async fn wait_for_hello(
    receiver: &mut (impl StreamExt<Item = Result<Message, axum::Error>> + Unpin),
) -> Option<Option<String>> {
    while let Some(Ok(msg)) = receiver.next().await {
        match msg {
            Message::Text(text) => match frame::decode_client(&text) {
                Ok(ClientFrame::Hello { token }) => return Some(token),
                Ok(other) => {
                    tracing::warn!(frame = ?other, "expected hello, got different frame");
                    return None;
                }
                Err(e) => {
                    tracing::warn!(error = %e, "failed to decode handshake frame");
                    return None;
                }
            },
            Message::Close(_) => return None,
            _ => {
                // Skip non-text frames during the handshake.
            }
        }
    }
    None
}

/// Handles a text frame from an established connection.
async fn handle_client_frame(
    conn_id: &str,
    text: &str,
    state: &Arc<AppState>,
    sender: &mpsc::UnboundedSender<Message>,
) {
    let client_frame = match frame::decode_client(text) {
        Ok(f) => f,
        Err(e) => {
            tracing::warn!(conn_id = %conn_id, error = %e, "failed to decode frame");
            return;
        }
    };

    match client_frame {
        ClientFrame::JoinRoom { room } => {
            state.rooms.join(&room, conn_id, sender.clone()).await;
        }
        ClientFrame::LeaveRoom { room } => {
            state.rooms.leave(&room, conn_id).await;
        }
        ClientFrame::Intent { kind, .. } => {
            // Intents are advisory only; log and drop.
            tracing::debug!(conn_id = %conn_id, kind = %kind, "intent received");
        }
        ClientFrame::Hello { .. } => {
            tracing::warn!(conn_id = %conn_id, "duplicate hello from established connection");
        }
    }
}

// ---------------------------------------------------------------------------
// Server entry points
// ---------------------------------------------------------------------------

/// Builds the axum router over the shared state.
fn router(state: Arc<AppState>) -> axum::Router {
    axum::Router::new()
        .route("/auth/login", axum::routing::post(login))
        .route("/auth/refresh", axum::routing::post(refresh))
        .route("/auth/logout", axum::routing::post(logout))
        .route(
            "/tasks",
            axum::routing::get(list_tasks).post(create_task),
        )
        .route(
            "/tasks/{id}",
            axum::routing::get(get_task)
                .patch(patch_task)
                .delete(delete_task),
        )
        .route("/ws", axum::routing::get(ws_handler))
        .with_state(state)
}

/// Starts the server on the given address and returns the bound address
/// and a join handle.
///
/// This is the primary entry point used by both `main.rs` and test code.
///
/// # Errors
///
/// Returns an error if the TCP listener cannot bind to the given address.
pub async fn start_server(
    addr: &str,
) -> Result<
    (std::net::SocketAddr, tokio::task::JoinHandle<()>),
    Box<dyn std::error::Error + Send + Sync>,
> {
    start_server_with_state(addr, Arc::new(AppState::new())).await
}

/// Starts the server with a pre-configured [`AppState`].
///
/// # Errors
///
/// Returns an error if the TCP listener cannot bind to the given address.
pub async fn start_server_with_state(
    addr: &str,
    state: Arc<AppState>,
) -> Result<
    (std::net::SocketAddr, tokio::task::JoinHandle<()>),
    Box<dyn std::error::Error + Send + Sync>,
> {
    let app = router(state);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    let bound_addr = listener.local_addr()?;

    let handle = tokio::spawn(async move {
        if let Err(e) = axum::serve(listener, app).await {
            tracing::error!(error = %e, "server error");
        }
    });

    Ok((bound_addr, handle))
}

/// axum handler that upgrades an HTTP request to a WebSocket connection.
async fn ws_handler(
    ws: axum::extract::ws::WebSocketUpgrade,
    State(state): State<Arc<AppState>>,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_socket(socket, state))
}
