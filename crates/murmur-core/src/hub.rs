//! The hub ties the registry, presence tracking and fan-out together.
//!
//! Connections enter the hub through scoped guards. Dropping an
//! [`Admission`] or a [`NotificationSubscription`] removes the connection
//! from every set and re-evaluates presence, so teardown runs on every exit
//! path of a connection task, including early returns and panics.

use crate::broadcast::Broadcaster;
use crate::presence::{PresenceTracker, PresenceTransition, DEFAULT_GRACE_PERIOD};
use crate::registry::{RegistryStats, SocketRegistry};
use crate::room::RoomId;
use murmur_protocol::UserId;
use murmur_transport::ConnectionHandle;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{debug, info};

/// Hub configuration.
#[derive(Debug, Clone)]
pub struct HubConfig {
    /// How long a user with zero connections stays online.
    pub grace_period: Duration,
}

impl Default for HubConfig {
    fn default() -> Self {
        Self {
            grace_period: DEFAULT_GRACE_PERIOD,
        }
    }
}

/// Shared entry point to live connection state.
#[derive(Debug, Clone)]
pub struct Hub {
    registry: Arc<SocketRegistry>,
    presence: PresenceTracker,
    broadcaster: Arc<Broadcaster>,
}

impl Hub {
    /// Create a hub.
    ///
    /// Returns the hub and the stream of confirmed presence transitions,
    /// which the caller is expected to drain.
    #[must_use]
    pub fn new(config: HubConfig) -> (Self, mpsc::UnboundedReceiver<PresenceTransition>) {
        info!("Creating hub with config: {:?}", config);
        let registry = Arc::new(SocketRegistry::new());
        let (presence, transitions) = PresenceTracker::new(registry.clone(), config.grace_period);
        let broadcaster = Arc::new(Broadcaster::new(registry.clone(), presence.clone()));
        (
            Self {
                registry,
                presence,
                broadcaster,
            },
            transitions,
        )
    }

    #[must_use]
    pub fn registry(&self) -> &SocketRegistry {
        &self.registry
    }

    #[must_use]
    pub fn presence(&self) -> &PresenceTracker {
        &self.presence
    }

    #[must_use]
    pub fn broadcaster(&self) -> &Broadcaster {
        &self.broadcaster
    }

    #[must_use]
    pub fn stats(&self) -> RegistryStats {
        self.registry.stats()
    }

    /// Admit a chat connection.
    ///
    /// The connection is registered under its user until the returned guard
    /// is dropped.
    #[must_use]
    pub fn admit(&self, handle: ConnectionHandle) -> Admission {
        let signal = self.registry.connect(&handle);
        self.presence.observe(handle.user_id(), signal);
        Admission {
            hub: self.clone(),
            handle,
        }
    }

    /// Subscribe a connection to its user's notification channel until the
    /// returned guard is dropped.
    #[must_use]
    pub fn subscribe_notifications(&self, handle: ConnectionHandle) -> NotificationSubscription {
        self.registry.subscribe_notifications(&handle);
        NotificationSubscription {
            hub: self.clone(),
            handle,
        }
    }
}

/// A chat connection's membership in the hub.
#[derive(Debug)]
pub struct Admission {
    hub: Hub,
    handle: ConnectionHandle,
}

impl Admission {
    #[must_use]
    pub fn handle(&self) -> &ConnectionHandle {
        &self.handle
    }

    #[must_use]
    pub fn user_id(&self) -> UserId {
        self.handle.user_id()
    }

    /// Enter a room.
    pub fn join(&self, room: RoomId) {
        self.hub.registry.join_room(&self.handle, room);
    }

    /// Leave every current room and enter `room`.
    pub fn move_to(&self, room: RoomId) {
        let left = self.hub.registry.leave_all_rooms(self.handle.id());
        debug!(connection = %self.handle.id(), from = ?left, to = %room, "Moving rooms");
        self.join(room);
    }

    /// Rooms this connection is in.
    #[must_use]
    pub fn rooms(&self) -> Vec<RoomId> {
        self.hub.registry.rooms_of(self.handle.id())
    }
}

impl Drop for Admission {
    fn drop(&mut self) {
        let user = self.handle.user_id();
        let signal = self.hub.registry.release(self.handle.id(), user);
        self.hub.presence.observe(user, signal);
        debug!(connection = %self.handle.id(), %user, "Admission released");
    }
}

/// A notification connection's subscription.
#[derive(Debug)]
pub struct NotificationSubscription {
    hub: Hub,
    handle: ConnectionHandle,
}

impl NotificationSubscription {
    #[must_use]
    pub fn handle(&self) -> &ConnectionHandle {
        &self.handle
    }
}

impl Drop for NotificationSubscription {
    fn drop(&mut self) {
        self.hub
            .registry
            .unsubscribe_notifications(self.handle.id(), self.handle.user_id());
    }
}
