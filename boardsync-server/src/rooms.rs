//! Room directory for push-event scoping.
//!
//! A room is a project id. Connections opt in with `join_room` and
//! receive every broadcast for that room until they leave or drop.

use std::collections::HashMap;

use axum::extract::ws::Message;
use tokio::sync::{RwLock, mpsc};

/// Maps room id to the connections subscribed to it.
#[derive(Default)]
pub struct RoomRegistry {
    rooms: RwLock<HashMap<String, HashMap<String, mpsc::UnboundedSender<Message>>>>,
}

impl RoomRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Subscribes a connection to a room. Joining twice replaces the
    /// stored sender.
    pub async fn join(&self, room: &str, conn_id: &str, sender: mpsc::UnboundedSender<Message>) {
        let mut rooms = self.rooms.write().await;
        rooms
            .entry(room.to_string())
            .or_default()
            .insert(conn_id.to_string(), sender);
        tracing::debug!(room, conn_id, "connection joined room");
    }

    /// Unsubscribes a connection from a room. Empty rooms are dropped.
    pub async fn leave(&self, room: &str, conn_id: &str) {
        let mut rooms = self.rooms.write().await;
        if let Some(members) = rooms.get_mut(room) {
            members.remove(conn_id);
            if members.is_empty() {
                rooms.remove(room);
            }
        }
        tracing::debug!(room, conn_id, "connection left room");
    }

    /// Removes a connection from every room, on disconnect.
    pub async fn leave_all(&self, conn_id: &str) {
        let mut rooms = self.rooms.write().await;
        rooms.retain(|_, members| {
            members.remove(conn_id);
            !members.is_empty()
        });
    }

    /// Sends a text frame to every member of a room, skipping a single
    /// connection (the originator). Returns the number of recipients.
    pub async fn broadcast(&self, room: &str, text: &str, skip_conn_id: Option<&str>) -> usize {
        let rooms = self.rooms.read().await;
        let Some(members) = rooms.get(room) else {
            return 0;
        };
        let mut delivered = 0;
        for (conn_id, sender) in members {
            if Some(conn_id.as_str()) == skip_conn_id {
                continue;
            }
            if sender.send(Message::Text(text.into())).is_ok() {
                delivered += 1;
            }
        }
        delivered
    }
}
