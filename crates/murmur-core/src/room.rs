//! Conversation rooms.
//!
//! A room is the set of connections that currently have one conversation
//! open. Rooms live inside the [`SocketRegistry`](crate::SocketRegistry) and
//! are created on first join and dropped when the last member leaves.

use murmur_protocol::ConversationId;
use murmur_transport::{ConnectionHandle, ConnectionId};
use std::collections::HashMap;
use tracing::debug;

/// A room identifier. Rooms are keyed by the conversation they show.
pub type RoomId = ConversationId;

/// Connections currently inside one conversation.
#[derive(Debug)]
pub struct Room {
    id: RoomId,
    members: HashMap<ConnectionId, ConnectionHandle>,
}

impl Room {
    /// Create an empty room.
    #[must_use]
    pub fn new(id: RoomId) -> Self {
        Self {
            id,
            members: HashMap::new(),
        }
    }

    #[must_use]
    pub fn id(&self) -> RoomId {
        self.id
    }

    /// Get the number of members.
    #[must_use]
    pub fn len(&self) -> usize {
        self.members.len()
    }

    /// Check if the room has no members.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.members.is_empty()
    }

    /// Check if a connection is in this room.
    #[must_use]
    pub fn contains(&self, connection: ConnectionId) -> bool {
        self.members.contains_key(&connection)
    }

    /// Add a connection.
    ///
    /// Returns `true` if the connection was not already a member.
    pub fn join(&mut self, handle: ConnectionHandle) -> bool {
        let connection = handle.id();
        let added = self.members.insert(connection, handle).is_none();
        if added {
            debug!(room = %self.id, %connection, members = self.members.len(), "Joined room");
        }
        added
    }

    /// Remove a connection.
    ///
    /// Returns `true` if the connection was a member.
    pub fn leave(&mut self, connection: ConnectionId) -> bool {
        let removed = self.members.remove(&connection).is_some();
        if removed {
            debug!(room = %self.id, %connection, members = self.members.len(), "Left room");
        }
        removed
    }

    /// Clone the current member handles.
    #[must_use]
    pub fn snapshot(&self) -> Vec<ConnectionHandle> {
        self.members.values().cloned().collect()
    }
}
