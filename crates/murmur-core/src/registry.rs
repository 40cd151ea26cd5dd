//! Socket registry.
//!
//! The registry owns every set membership in the system: which connections a
//! user holds, which connections are inside which room, and which connections
//! receive a user's notifications. All maps are sharded [`DashMap`]s and every
//! read-then-act sequence (remove, then drop the entry if empty) runs under a
//! single entry guard. No method holds references into two maps at once.

use crate::room::{Room, RoomId};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use murmur_protocol::UserId;
use murmur_transport::{ConnectionHandle, ConnectionId};
use std::collections::{HashMap, HashSet};
use tracing::{debug, trace};

/// Presence change implied by a registry update.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PresenceSignal {
    /// The user's connection count did not cross zero.
    None,
    /// The user went from zero connections to one.
    Online,
    /// The user's last connection went away. Tentative until the grace
    /// window confirms it.
    Offline,
}

type ConnectionSet = HashMap<ConnectionId, ConnectionHandle>;

/// In-memory bookkeeping of live connections.
#[derive(Debug, Default)]
pub struct SocketRegistry {
    /// Chat connections per user.
    users: DashMap<UserId, ConnectionSet>,
    /// Rooms indexed by conversation.
    rooms: DashMap<RoomId, Room>,
    /// Reverse index: rooms each connection is in.
    memberships: DashMap<ConnectionId, HashSet<RoomId>>,
    /// Notification connections per user.
    notifications: DashMap<UserId, ConnectionSet>,
}

impl SocketRegistry {
    /// Create an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a chat connection under its user.
    ///
    /// Returns [`PresenceSignal::Online`] iff this is the user's first
    /// concurrent connection. Registering the same connection twice is a
    /// no-op.
    pub fn connect(&self, handle: &ConnectionHandle) -> PresenceSignal {
        let user = handle.user_id();
        let mut connections = self.users.entry(user).or_default();
        let was_empty = connections.is_empty();
        let added = connections.insert(handle.id(), handle.clone()).is_none();

        debug!(
            connection = %handle.id(),
            %user,
            count = connections.len(),
            "Connection registered"
        );

        if was_empty && added {
            PresenceSignal::Online
        } else {
            PresenceSignal::None
        }
    }

    /// Remove a chat connection from its user.
    ///
    /// Returns [`PresenceSignal::Offline`] iff the user has no connections
    /// left. Unknown connections are ignored.
    pub fn disconnect(&self, connection: ConnectionId, user: UserId) -> PresenceSignal {
        match self.users.entry(user) {
            Entry::Occupied(mut entry) => {
                if entry.get_mut().remove(&connection).is_none() {
                    return PresenceSignal::None;
                }
                debug!(%connection, %user, count = entry.get().len(), "Connection unregistered");
                if entry.get().is_empty() {
                    entry.remove();
                    PresenceSignal::Offline
                } else {
                    PresenceSignal::None
                }
            }
            Entry::Vacant(_) => PresenceSignal::None,
        }
    }

    /// Put a connection inside a room, creating the room if needed.
    pub fn join_room(&self, handle: &ConnectionHandle, room: RoomId) {
        self.rooms
            .entry(room)
            .or_insert_with(|| {
                debug!(%room, "Creating room");
                Room::new(room)
            })
            .join(handle.clone());

        self.memberships.entry(handle.id()).or_default().insert(room);
    }

    /// Take a connection out of a room, deleting the room if it empties.
    ///
    /// Returns `true` if the connection was in the room.
    pub fn leave_room(&self, connection: ConnectionId, room: RoomId) -> bool {
        let left = self.remove_from_room(connection, room);

        if let Entry::Occupied(mut entry) = self.memberships.entry(connection) {
            entry.get_mut().remove(&room);
            if entry.get().is_empty() {
                entry.remove();
            }
        }

        left
    }

    /// Take a connection out of every room it is in.
    ///
    /// Returns the rooms it left.
    pub fn leave_all_rooms(&self, connection: ConnectionId) -> Vec<RoomId> {
        let Some((_, rooms)) = self.memberships.remove(&connection) else {
            return Vec::new();
        };

        rooms
            .into_iter()
            .filter(|room| self.remove_from_room(connection, *room))
            .collect()
    }

    fn remove_from_room(&self, connection: ConnectionId, room: RoomId) -> bool {
        match self.rooms.entry(room) {
            Entry::Occupied(mut entry) => {
                let left = entry.get_mut().leave(connection);
                if entry.get().is_empty() {
                    entry.remove();
                    debug!(%room, "Deleted empty room");
                }
                left
            }
            Entry::Vacant(_) => false,
        }
    }

    /// Register a connection on a user's notification channel.
    pub fn subscribe_notifications(&self, handle: &ConnectionHandle) {
        let user = handle.user_id();
        self.notifications
            .entry(user)
            .or_default()
            .insert(handle.id(), handle.clone());
        debug!(connection = %handle.id(), %user, "Notifications subscribed");
    }

    /// Remove a connection from a user's notification channel.
    ///
    /// Returns `true` if it was subscribed.
    pub fn unsubscribe_notifications(&self, connection: ConnectionId, user: UserId) -> bool {
        match self.notifications.entry(user) {
            Entry::Occupied(mut entry) => {
                let removed = entry.get_mut().remove(&connection).is_some();
                if entry.get().is_empty() {
                    entry.remove();
                }
                if removed {
                    debug!(%connection, %user, "Notifications unsubscribed");
                }
                removed
            }
            Entry::Vacant(_) => false,
        }
    }

    /// Remove a connection from every set it belongs to.
    ///
    /// Safe to call any number of times; only the call that removes the
    /// user's last chat connection reports [`PresenceSignal::Offline`].
    pub fn release(&self, connection: ConnectionId, user: UserId) -> PresenceSignal {
        let rooms = self.leave_all_rooms(connection);
        self.unsubscribe_notifications(connection, user);
        let signal = self.disconnect(connection, user);
        trace!(%connection, %user, rooms = rooms.len(), ?signal, "Connection released");
        signal
    }

    /// Check if a user holds at least one chat connection.
    #[must_use]
    pub fn is_user_online(&self, user: UserId) -> bool {
        self.users.contains_key(&user)
    }

    /// Check if any of a user's connections is inside a room.
    #[must_use]
    pub fn is_user_in_room(&self, user: UserId, room: RoomId) -> bool {
        let connections: Vec<ConnectionId> = match self.users.get(&user) {
            Some(set) => set.keys().copied().collect(),
            None => return false,
        };

        self.rooms
            .get(&room)
            .is_some_and(|r| connections.iter().any(|c| r.contains(*c)))
    }

    /// Snapshot of the connections inside a room.
    #[must_use]
    pub fn room_members(&self, room: RoomId) -> Vec<ConnectionHandle> {
        self.rooms
            .get(&room)
            .map(|r| r.snapshot())
            .unwrap_or_default()
    }

    /// Snapshot of a user's chat connections.
    #[must_use]
    pub fn user_connections(&self, user: UserId) -> Vec<ConnectionHandle> {
        self.users
            .get(&user)
            .map(|set| set.values().cloned().collect())
            .unwrap_or_default()
    }

    /// Snapshot of a user's notification connections.
    #[must_use]
    pub fn notification_connections(&self, user: UserId) -> Vec<ConnectionHandle> {
        self.notifications
            .get(&user)
            .map(|set| set.values().cloned().collect())
            .unwrap_or_default()
    }

    /// Snapshot of every chat connection not owned by `user`.
    #[must_use]
    pub fn all_connections_except(&self, user: UserId) -> Vec<ConnectionHandle> {
        self.users
            .iter()
            .filter(|entry| *entry.key() != user)
            .flat_map(|entry| entry.value().values().cloned().collect::<Vec<_>>())
            .collect()
    }

    /// Rooms a connection is currently in.
    #[must_use]
    pub fn rooms_of(&self, connection: ConnectionId) -> Vec<RoomId> {
        self.memberships
            .get(&connection)
            .map(|set| set.iter().copied().collect())
            .unwrap_or_default()
    }

    /// Check if a room exists.
    #[must_use]
    pub fn room_exists(&self, room: RoomId) -> bool {
        self.rooms.contains_key(&room)
    }

    /// Get registry statistics.
    #[must_use]
    pub fn stats(&self) -> RegistryStats {
        RegistryStats {
            online_users: self.users.len(),
            connections: self.users.iter().map(|e| e.value().len()).sum(),
            rooms: self.rooms.len(),
            room_memberships: self.rooms.iter().map(|e| e.value().len()).sum(),
            notification_subscribers: self.notifications.iter().map(|e| e.value().len()).sum(),
        }
    }
}

/// Registry statistics.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RegistryStats {
    /// Users with at least one chat connection.
    pub online_users: usize,
    /// Live chat connections.
    pub connections: usize,
    /// Non-empty rooms.
    pub rooms: usize,
    /// Total connection-in-room memberships.
    pub room_memberships: usize,
    /// Live notification connections.
    pub notification_subscribers: usize,
}
