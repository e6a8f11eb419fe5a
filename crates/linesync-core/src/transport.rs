//! Connection transport collaborator.
//!
//! The transport owns room membership: which connections currently belong
//! to which topic. The subscription manager observes membership counts to
//! derive 0↔1 transitions, and pollers read membership at broadcast time
//! through [`Transport::emit_to_room`].

use std::collections::{HashMap, HashSet};
use std::fmt;

use dashmap::DashMap;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::mpsc::{self, error::TrySendError};
use tracing::debug;

use crate::error::{Error, Result};

/// Identifier of one live connection.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ConnectionId(String);

impl ConnectionId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for ConnectionId {
    fn from(id: &str) -> Self {
        Self::new(id)
    }
}

impl From<String> for ConnectionId {
    fn from(id: String) -> Self {
        Self(id)
    }
}

/// A named event pushed to a connection.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OutboundEvent {
    /// Event name, e.g. `sequences:update`.
    pub event: String,
    /// Event payload.
    pub data: Value,
}

/// Room membership plus outbound delivery.
pub trait Transport: Send + Sync {
    /// Add `connection` to `room`; returns the room size afterwards.
    fn join(&self, connection: &ConnectionId, room: &str) -> usize;

    /// Remove `connection` from `room`; returns the room size afterwards.
    fn leave(&self, connection: &ConnectionId, room: &str) -> usize;

    /// Rooms the connection currently belongs to.
    fn rooms_of(&self, connection: &ConnectionId) -> Vec<String>;

    /// Number of connections in `room`.
    fn room_size(&self, room: &str) -> usize;

    /// Send an event to every current member of `room`.
    ///
    /// Returns the number of connections the event was handed to.
    fn emit_to_room(&self, room: &str, event: &str, data: &Value) -> usize;

    /// Send an event to a single connection.
    fn emit_to(&self, connection: &ConnectionId, event: &str, data: Value) -> Result<()>;
}

/// Default number of undelivered events a connection's outbox holds.
pub const DEFAULT_OUTBOX_CAPACITY: usize = 32;

/// In-process transport.
///
/// Each registered connection owns a bounded outbox; the socket task on the
/// other end drains it. Every event is a full snapshot, so when a slow
/// connection's outbox is full further events for it are dropped and it
/// catches up on the next broadcast. Membership is kept separately so a
/// broadcast always addresses the room as it is at emit time.
pub struct LocalRooms {
    connections: DashMap<ConnectionId, mpsc::Sender<OutboundEvent>>,
    rooms: RwLock<HashMap<String, HashSet<ConnectionId>>>,
    outbox_capacity: usize,
}

impl Default for LocalRooms {
    fn default() -> Self {
        Self::with_outbox_capacity(DEFAULT_OUTBOX_CAPACITY)
    }
}

impl LocalRooms {
    pub fn new() -> Self {
        Self::default()
    }

    /// Transport whose outboxes hold at most `capacity` events (minimum 1).
    pub fn with_outbox_capacity(capacity: usize) -> Self {
        Self {
            connections: DashMap::new(),
            rooms: RwLock::new(HashMap::new()),
            outbox_capacity: capacity.max(1),
        }
    }

    /// Register a connection and return the receiving end of its outbox.
    pub fn register(&self, connection: ConnectionId) -> mpsc::Receiver<OutboundEvent> {
        let (tx, rx) = mpsc::channel(self.outbox_capacity);
        self.connections.insert(connection, tx);
        rx
    }

    /// Drop a connection and every membership it still holds.
    ///
    /// Callers that track topic lifecycles must unsubscribe the connection
    /// first; this only cleans up transport state.
    pub fn unregister(&self, connection: &ConnectionId) {
        self.connections.remove(connection);
        let mut rooms = self.rooms.write();
        rooms.retain(|_, members| {
            members.remove(connection);
            !members.is_empty()
        });
    }

    /// Number of registered connections.
    pub fn connection_count(&self) -> usize {
        self.connections.len()
    }

    fn send(&self, connection: &ConnectionId, event: OutboundEvent) -> bool {
        let Some(tx) = self.connections.get(connection) else {
            return false;
        };
        match tx.try_send(event) {
            Ok(()) => true,
            Err(TrySendError::Full(event)) => {
                debug!(%connection, event = %event.event, "outbox full, dropping event");
                false
            }
            Err(TrySendError::Closed(_)) => false,
        }
    }
}

impl Transport for LocalRooms {
    fn join(&self, connection: &ConnectionId, room: &str) -> usize {
        let mut rooms = self.rooms.write();
        let members = rooms.entry(room.to_string()).or_default();
        members.insert(connection.clone());
        members.len()
    }

    fn leave(&self, connection: &ConnectionId, room: &str) -> usize {
        let mut rooms = self.rooms.write();
        let Some(members) = rooms.get_mut(room) else {
            return 0;
        };
        members.remove(connection);
        let remaining = members.len();
        if remaining == 0 {
            rooms.remove(room);
        }
        remaining
    }

    fn rooms_of(&self, connection: &ConnectionId) -> Vec<String> {
        let rooms = self.rooms.read();
        let mut joined: Vec<String> = rooms
            .iter()
            .filter(|(_, members)| members.contains(connection))
            .map(|(room, _)| room.clone())
            .collect();
        joined.sort();
        joined
    }

    fn room_size(&self, room: &str) -> usize {
        self.rooms.read().get(room).map(|m| m.len()).unwrap_or(0)
    }

    fn emit_to_room(&self, room: &str, event: &str, data: &Value) -> usize {
        let members: Vec<ConnectionId> = match self.rooms.read().get(room) {
            Some(members) => members.iter().cloned().collect(),
            None => return 0,
        };

        let mut delivered = 0;
        for connection in &members {
            let message = OutboundEvent {
                event: event.to_string(),
                data: data.clone(),
            };
            if self.send(connection, message) {
                delivered += 1;
            } else {
                debug!(%connection, room, "event not delivered");
            }
        }
        delivered
    }

    fn emit_to(&self, connection: &ConnectionId, event: &str, data: Value) -> Result<()> {
        let message = OutboundEvent {
            event: event.to_string(),
            data,
        };
        if self.send(connection, message) {
            Ok(())
        } else {
            Err(Error::Transport(format!(
                "connection {} is closed or not draining",
                connection
            )))
        }
    }
}
