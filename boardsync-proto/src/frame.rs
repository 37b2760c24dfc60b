//! JSON text-frame codec for the real-time channel.
//!
//! Every frame is a JSON object `{"event": <name>, "data": <payload>}`.
//! Control frames (`hello`, `ready`, `join_room`, ...) use fixed names;
//! push events arrive under either historical spelling and are normalized
//! to an [`EventKind`] here, at the boundary.

use serde::Deserialize;
use serde_json::{Value, json};

use crate::event::{EventKind, EventPayload, PushEvent};
use crate::task::{Task, TaskId};

/// Error type for frame encode/decode operations.
#[derive(Debug, thiserror::Error)]
pub enum CodecError {
    /// Serialization or deserialization failed.
    #[error("serialization error: {0}")]
    Serialization(String),
    /// The frame is not a recognized event.
    #[error("unknown event name: {0}")]
    UnknownEvent(String),
    /// The payload does not match the event's expected shape.
    #[error("invalid payload for {event}: {reason}")]
    InvalidPayload {
        /// Event name as it appeared on the wire.
        event: String,
        /// What was wrong with the payload.
        reason: String,
    },
}

/// Frames sent from the client to the server.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClientFrame {
    /// Handshake carrying the current session credential, if any.
    Hello {
        /// Bearer token for the session, if signed in.
        token: Option<String>,
    },
    /// Scope push delivery to a room.
    JoinRoom {
        /// Room identifier (a project id).
        room: String,
    },
    /// Stop receiving push events for a room.
    LeaveRoom {
        /// Room identifier.
        room: String,
    },
    /// Best-effort collaboration hint; never durable data.
    Intent {
        /// Application-defined intent kind.
        kind: String,
        /// Opaque intent payload.
        payload: Value,
    },
}

/// Frames sent from the server to the client.
#[derive(Debug, Clone, PartialEq)]
pub enum ServerFrame {
    /// Handshake acknowledgment.
    Ready {
        /// Server-assigned connection identifier.
        connection_id: String,
    },
    /// Server-reported protocol error; non-fatal to the connection.
    Error {
        /// Human-readable reason.
        reason: String,
    },
    /// A normalized push event.
    Event(PushEvent),
}

/// Generic wire shape shared by all frames.
#[derive(Deserialize)]
struct WireFrame {
    event: String,
    #[serde(default)]
    data: Value,
}

/// Encodes a [`ClientFrame`] as a JSON text frame.
#[must_use]
pub fn encode_client(frame: &ClientFrame) -> String {
    let value = match frame {
        ClientFrame::Hello { token } => json!({ "event": "hello", "data": { "token": token } }),
        ClientFrame::JoinRoom { room } => json!({ "event": "join_room", "data": { "room": room } }),
        ClientFrame::LeaveRoom { room } => {
            json!({ "event": "leave_room", "data": { "room": room } })
        }
        ClientFrame::Intent { kind, payload } => {
            json!({ "event": "intent", "data": { "kind": kind, "payload": payload } })
        }
    };
    value.to_string()
}

/// Decodes a JSON text frame from a client.
///
/// # Errors
///
/// Returns [`CodecError`] if the text is not valid JSON, the event name
/// is unknown, or the payload does not match the event.
pub fn decode_client(text: &str) -> Result<ClientFrame, CodecError> {
    let frame: WireFrame =
        serde_json::from_str(text).map_err(|e| CodecError::Serialization(e.to_string()))?;
    match frame.event.as_str() {
        "hello" => Ok(ClientFrame::Hello {
            token: field_opt_string(&frame, "token"),
        }),
        "join_room" => Ok(ClientFrame::JoinRoom {
            room: field_string(&frame, "room")?,
        }),
        "leave_room" => Ok(ClientFrame::LeaveRoom {
            room: field_string(&frame, "room")?,
        }),
        "intent" => Ok(ClientFrame::Intent {
            kind: field_string(&frame, "kind")?,
            payload: frame.data.get("payload").cloned().unwrap_or(Value::Null),
        }),
        other => Err(CodecError::UnknownEvent(other.to_string())),
    }
}

/// Encodes a [`ServerFrame`] as a JSON text frame.
///
/// Push events always encode under the canonical (colon) spelling.
///
/// # Errors
///
/// Returns [`CodecError::Serialization`] if the payload cannot be
/// serialized.
pub fn encode_server(frame: &ServerFrame) -> Result<String, CodecError> {
    let value = match frame {
        ServerFrame::Ready { connection_id } => {
            json!({ "event": "ready", "data": { "connectionId": connection_id } })
        }
        ServerFrame::Error { reason } => json!({ "event": "error", "data": { "reason": reason } }),
        ServerFrame::Event(event) => {
            let data = serde_json::to_value(&event.payload)
                .map_err(|e| CodecError::Serialization(e.to_string()))?;
            json!({ "event": event.kind.canonical(), "data": data })
        }
    };
    Ok(value.to_string())
}

/// Decodes a JSON text frame from the server, normalizing event aliases.
///
/// # Errors
///
/// Returns [`CodecError`] if the text is not valid JSON, the event name
/// is not `ready`, `error`, or a known push-event spelling, or the
/// payload does not match the event's expected shape.
pub fn decode_server(text: &str) -> Result<ServerFrame, CodecError> {
    let frame: WireFrame =
        serde_json::from_str(text).map_err(|e| CodecError::Serialization(e.to_string()))?;
    match frame.event.as_str() {
        "ready" => Ok(ServerFrame::Ready {
            connection_id: field_opt_string(&frame, "connectionId").unwrap_or_default(),
        }),
        "error" => Ok(ServerFrame::Error {
            reason: field_opt_string(&frame, "reason").unwrap_or_default(),
        }),
        other => {
            let Some(kind) = EventKind::from_wire(other) else {
                return Err(CodecError::UnknownEvent(other.to_string()));
            };
            let payload = decode_payload(kind, &frame)?;
            Ok(ServerFrame::Event(PushEvent { kind, payload }))
        }
    }
}

/// Decodes the payload shape expected for the given event kind.
fn decode_payload(kind: EventKind, frame: &WireFrame) -> Result<EventPayload, CodecError> {
    if kind == EventKind::TaskDeleted {
        let id = field_string(frame, "id")?;
        return Ok(EventPayload::TaskRef {
            id: TaskId::new(id),
        });
    }
    let task: Task =
        serde_json::from_value(frame.data.clone()).map_err(|e| CodecError::InvalidPayload {
            event: frame.event.clone(),
            reason: e.to_string(),
        })?;
    Ok(EventPayload::Task(Box::new(task)))
}

fn field_string(frame: &WireFrame, key: &str) -> Result<String, CodecError> {
    field_opt_string(frame, key).ok_or_else(|| CodecError::InvalidPayload {
        event: frame.event.clone(),
        reason: format!("missing string field `{key}`"),
    })
}

fn field_opt_string(frame: &WireFrame, key: &str) -> Option<String> {
    frame
        .data
        .get(key)
        .and_then(Value::as_str)
        .map(ToString::to_string)
}
