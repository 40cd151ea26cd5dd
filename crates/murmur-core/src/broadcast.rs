//! Fan-out of server events to registry targets.
//!
//! Every broadcast works on a snapshot of its target set. A connection whose
//! send fails is pruned from the registry, fed back into presence tracking
//! and told to close, and delivery continues with the rest of the snapshot.

use crate::presence::PresenceTracker;
use crate::registry::SocketRegistry;
use crate::room::RoomId;
use murmur_protocol::{Envelope, ServerEvent, UserId};
use murmur_transport::ConnectionHandle;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::{trace, warn};

/// Sends events to rooms, users and notification channels.
#[derive(Debug)]
pub struct Broadcaster {
    registry: Arc<SocketRegistry>,
    presence: PresenceTracker,
    pruned: AtomicU64,
}

impl Broadcaster {
    #[must_use]
    pub fn new(registry: Arc<SocketRegistry>, presence: PresenceTracker) -> Self {
        Self {
            registry,
            presence,
            pruned: AtomicU64::new(0),
        }
    }

    /// Send to every connection inside a room.
    ///
    /// Returns the number of connections the event was queued for.
    pub fn to_room(&self, room: RoomId, event: ServerEvent) -> usize {
        let targets = self.registry.room_members(room);
        trace!(%room, event = event.name(), targets = targets.len(), "Room broadcast");
        self.deliver(targets, event)
    }

    /// Send to every chat connection of a user.
    pub fn to_user(&self, user: UserId, event: ServerEvent) -> usize {
        let targets = self.registry.user_connections(user);
        self.deliver(targets, event)
    }

    /// Send on a user's notification channel.
    pub fn notify(&self, user: UserId, event: ServerEvent) -> usize {
        let targets = self.registry.notification_connections(user);
        trace!(%user, event = event.name(), targets = targets.len(), "Notification");
        self.deliver(targets, event)
    }

    /// Send to every chat connection not owned by `user`.
    pub fn to_all_except(&self, user: UserId, event: ServerEvent) -> usize {
        let targets = self.registry.all_connections_except(user);
        self.deliver(targets, event)
    }

    /// Send to one connection.
    ///
    /// Returns `false` if the connection was pruned instead.
    pub fn reply(&self, handle: &ConnectionHandle, event: ServerEvent) -> bool {
        self.deliver(vec![handle.clone()], event) == 1
    }

    /// Total connections pruned after failed sends.
    #[must_use]
    pub fn pruned_count(&self) -> u64 {
        self.pruned.load(Ordering::Relaxed)
    }

    /// Drop a connection from every set and ask it to close.
    pub fn prune(&self, handle: &ConnectionHandle) {
        let user = handle.user_id();
        let signal = self.registry.release(handle.id(), user);
        self.presence.observe(user, signal);
        handle.close();
        self.pruned.fetch_add(1, Ordering::Relaxed);
    }

    fn deliver(&self, targets: Vec<ConnectionHandle>, event: ServerEvent) -> usize {
        if targets.is_empty() {
            return 0;
        }

        let envelope = Arc::new(Envelope::new(event));
        let mut delivered = 0;

        for handle in targets {
            match handle.send(Arc::clone(&envelope)) {
                Ok(()) => delivered += 1,
                Err(e) => {
                    warn!(
                        connection = %handle.id(),
                        user = %handle.user_id(),
                        event = envelope.event.name(),
                        error = %e,
                        "Pruning connection after failed send"
                    );
                    self.prune(&handle);
                }
            }
        }

        delivered
    }
}
