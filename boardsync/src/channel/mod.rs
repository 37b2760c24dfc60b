//! Real-time sync channel over WebSocket.
//!
//! Maintains one logical auto-reconnecting connection per session and
//! delivers typed push events to subscribers. Callers never see
//! connection churn: a background reader task detects stream loss and
//! re-handshakes with a bounded attempt budget and fixed delay. Room
//! membership is not preserved across reconnects — the application
//! watches [`ChannelStatus`] and re-joins rooms after `Connected`.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use tokio::sync::watch;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async};

use boardsync_proto::event::{EventKind, PushEvent};
use boardsync_proto::frame::{self, ClientFrame, CodecError, ServerFrame};

use crate::session::SessionHandle;

/// Write half of the WebSocket connection.
type WsSink = futures_util::stream::SplitSink<
    WebSocketStream<MaybeTlsStream<tokio::net::TcpStream>>,
    Message,
>;

/// Read half of the WebSocket connection.
type WsReader =
    futures_util::stream::SplitStream<WebSocketStream<MaybeTlsStream<tokio::net::TcpStream>>>;

/// Push-event handler. Must be safe to invoke re-entrantly: a handler
/// may subscribe or cancel subscriptions from within another handler.
type Handler = Arc<dyn Fn(&PushEvent) + Send + Sync>;

/// Connection settings for the sync channel.
#[derive(Debug, Clone)]
pub struct ChannelConfig {
    /// WebSocket URL of the push feed (e.g. `ws://host:port/ws`).
    pub url: String,
    /// Timeout for establishing the TCP/WebSocket connection.
    pub connect_timeout: Duration,
    /// Timeout for the `ready` handshake acknowledgment.
    pub ready_timeout: Duration,
    /// Reconnection attempts before giving up (also the initial
    /// connect's internal retry budget).
    pub reconnect_attempts: u32,
    /// Fixed delay between reconnection attempts.
    pub reconnect_delay: Duration,
}

impl ChannelConfig {
    /// Config for the given URL with default timeouts and budget.
    #[must_use]
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            connect_timeout: Duration::from_secs(10),
            ready_timeout: Duration::from_secs(5),
            reconnect_attempts: 5,
            reconnect_delay: Duration::from_secs(2),
        }
    }
}

/// Connection state exposed through [`SyncChannel::watch_status`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChannelStatus {
    /// No connection; live updates are unavailable.
    Disconnected,
    /// Connected and delivering events.
    Connected,
    /// Connection lost; reconnection attempts are underway.
    Reconnecting,
}

/// Errors establishing or using the sync channel.
#[derive(Debug, thiserror::Error)]
pub enum ChannelError {
    /// Connect or handshake timed out.
    #[error("sync channel timed out")]
    Timeout,
    /// Underlying WebSocket failure.
    #[error("websocket error: {0}")]
    Ws(#[from] tokio_tungstenite::tungstenite::Error),
    /// The server rejected the handshake.
    #[error("handshake rejected: {0}")]
    Handshake(String),
    /// The connection closed before the handshake completed.
    #[error("connection closed during handshake")]
    Closed,
    /// A frame could not be decoded.
    #[error(transparent)]
    Codec(#[from] CodecError),
}

/// Handler registry keyed by logical event kind.
#[derive(Default)]
struct Registry {
    inner: parking_lot::Mutex<RegistryInner>,
}

#[derive(Default)]
struct RegistryInner {
    next_id: u64,
    handlers: HashMap<EventKind, Vec<(u64, Handler)>>,
}

impl Registry {
    fn add(&self, kind: EventKind, handler: Handler) -> u64 {
        let mut inner = self.inner.lock();
        let id = inner.next_id;
        inner.next_id += 1;
        inner.handlers.entry(kind).or_default().push((id, handler));
        id
    }

    fn remove(&self, kind: EventKind, id: u64) {
        let mut inner = self.inner.lock();
        if let Some(handlers) = inner.handlers.get_mut(&kind) {
            handlers.retain(|(handler_id, _)| *handler_id != id);
        }
    }

    fn clear(&self) {
        self.inner.lock().handlers.clear();
    }

    /// Delivers an event to every handler registered for its kind. The
    /// lock is held only while snapshotting, so handlers may re-enter.
    fn dispatch(&self, event: &PushEvent) {
        let handlers: Vec<Handler> = {
            let inner = self.inner.lock();
            inner
                .handlers
                .get(&event.kind)
                .map(|handlers| handlers.iter().map(|(_, h)| Arc::clone(h)).collect())
                .unwrap_or_default()
        };
        for handler in handlers {
            handler(event);
        }
    }
}

/// Cancellation token for a registered handler.
///
/// `cancel` removes the handler and is a no-op on repeated calls.
/// Dropping without cancelling leaves the handler registered for the
/// life of the channel, matching subscribe/unsubscribe semantics where
/// the unsubscribe closure is simply never called.
pub struct Subscription {
    registry: Arc<Registry>,
    kind: EventKind,
    id: u64,
    active: AtomicBool,
}

impl Subscription {
    /// Removes the handler. Idempotent.
    pub fn cancel(&self) {
        if self.active.swap(false, Ordering::AcqRel) {
            self.registry.remove(self.kind, self.id);
        }
    }
}

/// The real-time sync channel.
///
/// One instance per session, shared by reference. All operations take
/// `&self`; connection state lives behind atomics and async mutexes.
pub struct SyncChannel {
    config: ChannelConfig,
    session: SessionHandle,
    registry: Arc<Registry>,
    writer: Arc<tokio::sync::Mutex<Option<WsSink>>>,
    connected: Arc<AtomicBool>,
    shutdown: Arc<AtomicBool>,
    /// Serializes `connect` calls: a second caller awaits the in-flight
    /// attempt instead of starting another handshake.
    connect_gate: tokio::sync::Mutex<()>,
    status_tx: watch::Sender<ChannelStatus>,
    status_rx: watch::Receiver<ChannelStatus>,
    reader_handle: parking_lot::Mutex<Option<tokio::task::JoinHandle<()>>>,
}

impl SyncChannel {
    /// Creates a channel for the given config and session. No I/O
    /// happens until [`connect`](Self::connect).
    #[must_use]
    pub fn new(config: ChannelConfig, session: SessionHandle) -> Self {
        let (status_tx, status_rx) = watch::channel(ChannelStatus::Disconnected);
        Self {
            config,
            session,
            registry: Arc::new(Registry::default()),
            writer: Arc::new(tokio::sync::Mutex::new(None)),
            connected: Arc::new(AtomicBool::new(false)),
            shutdown: Arc::new(AtomicBool::new(false)),
            connect_gate: tokio::sync::Mutex::new(()),
            status_tx,
            status_rx,
            reader_handle: parking_lot::Mutex::new(None),
        }
    }

    /// Establishes the connection and performs the handshake.
    ///
    /// Idempotent: returns immediately when already connected, and a
    /// call made while another connect is underway awaits that attempt's
    /// outcome. Retries internally up to the configured budget with a
    /// fixed inter-attempt delay.
    ///
    /// # Errors
    ///
    /// Returns the last [`ChannelError`] once the internal retry budget
    /// is exhausted.
    pub async fn connect(&self) -> Result<(), ChannelError> {
        let _gate = self.connect_gate.lock().await;
        if self.connected.load(Ordering::Relaxed) {
            return Ok(());
        }
        self.shutdown.store(false, Ordering::Relaxed);

        let mut last_err = ChannelError::Timeout;
        for attempt in 0..=self.config.reconnect_attempts {
            if attempt > 0 {
                tokio::time::sleep(self.config.reconnect_delay).await;
            }
            match establish(&self.config, &self.session).await {
                Ok((sink, reader)) => {
                    *self.writer.lock().await = Some(sink);
                    self.connected.store(true, Ordering::Relaxed);
                    let _ = self.status_tx.send(ChannelStatus::Connected);

                    let task = ReaderTask {
                        config: self.config.clone(),
                        session: self.session.clone(),
                        registry: Arc::clone(&self.registry),
                        writer: Arc::clone(&self.writer),
                        connected: Arc::clone(&self.connected),
                        shutdown: Arc::clone(&self.shutdown),
                        status_tx: self.status_tx.clone(),
                    };
                    let handle = tokio::spawn(task.run(reader));
                    if let Some(old) = self.reader_handle.lock().replace(handle) {
                        old.abort();
                    }
                    return Ok(());
                }
                Err(e) => {
                    tracing::warn!(url = %self.config.url, attempt, error = %e, "sync channel connect failed");
                    last_err = e;
                }
            }
        }
        Err(last_err)
    }

    /// Registers a handler for a logical event type. Both wire spellings
    /// of the type deliver to this handler: aliases are normalized at
    /// decode, before dispatch.
    pub fn subscribe<F>(&self, kind: EventKind, handler: F) -> Subscription
    where
        F: Fn(&PushEvent) + Send + Sync + 'static,
    {
        let id = self.registry.add(kind, Arc::new(handler));
        Subscription {
            registry: Arc::clone(&self.registry),
            kind,
            id,
            active: AtomicBool::new(true),
        }
    }

    /// Scopes push delivery to a room (a project id). A no-op, logged,
    /// when the channel is not connected — callers must not block UI
    /// flows on room membership.
    pub async fn join_room(&self, room: &str) {
        if !self.is_connected() {
            tracing::warn!(room, "sync channel not connected; skipping join_room");
            return;
        }
        self.send_frame(&ClientFrame::JoinRoom {
            room: room.to_string(),
        })
        .await;
    }

    /// Stops push delivery for a room. Same no-op semantics as
    /// [`join_room`](Self::join_room).
    pub async fn leave_room(&self, room: &str) {
        if !self.is_connected() {
            tracing::warn!(room, "sync channel not connected; skipping leave_room");
            return;
        }
        self.send_frame(&ClientFrame::LeaveRoom {
            room: room.to_string(),
        })
        .await;
    }

    /// Best-effort, fire-and-forget collaboration hint. Never used for
    /// data that must be durably confirmed — that goes through the api
    /// client.
    pub async fn publish_intent(&self, kind: &str, payload: serde_json::Value) {
        if !self.is_connected() {
            tracing::debug!(kind, "sync channel not connected; dropping intent");
            return;
        }
        self.send_frame(&ClientFrame::Intent {
            kind: kind.to_string(),
            payload,
        })
        .await;
    }

    /// Tears down the connection and clears all handler registrations.
    /// A subsequent [`connect`](Self::connect) starts a fresh handshake.
    pub async fn disconnect(&self) {
        self.shutdown.store(true, Ordering::Relaxed);
        if let Some(handle) = self.reader_handle.lock().take() {
            handle.abort();
        }
        if let Some(mut sink) = self.writer.lock().await.take() {
            let _ = sink.send(Message::Close(None)).await;
        }
        self.connected.store(false, Ordering::Relaxed);
        self.registry.clear();
        let _ = self.status_tx.send(ChannelStatus::Disconnected);
        tracing::info!("sync channel disconnected");
    }

    /// Whether the channel currently has a live connection.
    #[must_use]
    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::Relaxed)
    }

    /// Current connection status.
    #[must_use]
    pub fn status(&self) -> ChannelStatus {
        *self.status_rx.borrow()
    }

    /// A watch receiver for status transitions, for re-joining rooms
    /// after reconnect.
    #[must_use]
    pub fn watch_status(&self) -> watch::Receiver<ChannelStatus> {
        self.status_rx.clone()
    }

    /// Sends a frame on the current connection, logging failures.
    async fn send_frame(&self, frame: &ClientFrame) {
        let text = frame::encode_client(frame);
        let mut writer = self.writer.lock().await;
        let Some(sink) = writer.as_mut() else {
            tracing::warn!("sync channel has no active connection; frame dropped");
            return;
        };
        if let Err(e) = sink.send(Message::Text(text.into())).await {
            tracing::warn!(error = %e, "sync channel send failed");
            self.connected.store(false, Ordering::Relaxed);
        }
    }
}

/// Connects, sends the `hello` handshake with the session token, and
/// waits for the server's `ready` acknowledgment.
async fn establish(
    config: &ChannelConfig,
    session: &SessionHandle,
) -> Result<(WsSink, WsReader), ChannelError> {
    let (ws_stream, _response) =
        tokio::time::timeout(config.connect_timeout, connect_async(&config.url))
            .await
            .map_err(|_| ChannelError::Timeout)??;
    let (mut sink, mut reader) = ws_stream.split();

    let hello = frame::encode_client(&ClientFrame::Hello {
        token: session.token(),
    });
    sink.send(Message::Text(hello.into())).await?;

    let ready = tokio::time::timeout(config.ready_timeout, async {
        loop {
            match reader.next().await {
                Some(Ok(Message::Text(text))) => match frame::decode_server(&text)? {
                    ServerFrame::Ready { connection_id } => return Ok(connection_id),
                    ServerFrame::Error { reason } => return Err(ChannelError::Handshake(reason)),
                    ServerFrame::Event(_) => {
                        // Events before ready are not expected; keep waiting.
                    }
                },
                Some(Ok(Message::Close(_))) | None => return Err(ChannelError::Closed),
                Some(Ok(_)) => {}
                Some(Err(e)) => return Err(ChannelError::Ws(e)),
            }
        }
    })
    .await
    .map_err(|_| ChannelError::Timeout)??;

    tracing::info!(url = %config.url, connection_id = %ready, "sync channel connected");
    Ok((sink, reader))
}

/// Background task owning the read side of the connection, including
/// reconnection.
struct ReaderTask {
    config: ChannelConfig,
    session: SessionHandle,
    registry: Arc<Registry>,
    writer: Arc<tokio::sync::Mutex<Option<WsSink>>>,
    connected: Arc<AtomicBool>,
    shutdown: Arc<AtomicBool>,
    status_tx: watch::Sender<ChannelStatus>,
}

impl ReaderTask {
    async fn run(self, mut reader: WsReader) {
        loop {
            self.read_until_closed(&mut reader).await;
            self.connected.store(false, Ordering::Relaxed);
            if self.shutdown.load(Ordering::Relaxed) {
                break;
            }
            let _ = self.status_tx.send(ChannelStatus::Reconnecting);
            tracing::info!("sync channel lost; reconnecting");
            match self.reconnect().await {
                Some(new_reader) => reader = new_reader,
                None => {
                    tracing::warn!(
                        attempts = self.config.reconnect_attempts,
                        "sync channel reconnect budget exhausted; live updates unavailable"
                    );
                    break;
                }
            }
        }
        let _ = self.status_tx.send(ChannelStatus::Disconnected);
        tracing::debug!("sync channel reader task exiting");
    }

    /// Reads and dispatches frames until the stream closes or errors.
    /// Malformed frames are logged and skipped, never fatal.
    async fn read_until_closed(&self, reader: &mut WsReader) {
        while let Some(message) = reader.next().await {
            match message {
                Ok(Message::Text(text)) => match frame::decode_server(&text) {
                    Ok(ServerFrame::Event(event)) => {
                        tracing::debug!(kind = %event.kind, "push event received");
                        self.registry.dispatch(&event);
                    }
                    Ok(ServerFrame::Error { reason }) => {
                        tracing::warn!(reason = %reason, "sync server error");
                    }
                    Ok(ServerFrame::Ready { .. }) => {
                        tracing::debug!("unexpected ready frame outside handshake");
                    }
                    Err(e) => {
                        tracing::warn!(error = %e, "malformed sync frame, skipping");
                    }
                },
                Ok(Message::Close(_)) => {
                    tracing::info!("sync channel closed by server");
                    return;
                }
                Ok(_) => {
                    // Ignore ping/pong/binary frames.
                }
                Err(e) => {
                    tracing::warn!(error = %e, "sync channel read error");
                    return;
                }
            }
        }
    }

    /// Bounded reconnect loop with fixed inter-attempt delay. Room
    /// membership is not restored; status watchers handle that.
    async fn reconnect(&self) -> Option<WsReader> {
        for attempt in 1..=self.config.reconnect_attempts {
            if self.shutdown.load(Ordering::Relaxed) {
                return None;
            }
            tokio::time::sleep(self.config.reconnect_delay).await;
            match establish(&self.config, &self.session).await {
                Ok((sink, reader)) => {
                    *self.writer.lock().await = Some(sink);
                    self.connected.store(true, Ordering::Relaxed);
                    let _ = self.status_tx.send(ChannelStatus::Connected);
                    tracing::info!(attempt, "sync channel reconnected");
                    return Some(reader);
                }
                Err(e) => {
                    tracing::warn!(attempt, error = %e, "sync channel reconnect attempt failed");
                }
            }
        }
        None
    }
}
