//! Presence tracking.
//!
//! Turns the registry's connection-count signals into user-visible
//! online/offline transitions. Going online is reported immediately. Going
//! offline waits out a grace window so that a quick reconnect (page reload,
//! network blip) does not flap the status.
//!
//! ```text
//! OFFLINE ──connect──▶ ONLINE ──last disconnect──▶ PENDING_OFFLINE
//!    ▲                   ▲                               │
//!    │                   └──────────connect──────────────┤
//!    └───────────grace elapsed, still zero connections───┘
//! ```

use crate::registry::{PresenceSignal, SocketRegistry};
use chrono::Utc;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use murmur_protocol::{PresenceStatus, Timestamp, UserId};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info};

/// Default grace window before an offline transition is confirmed.
pub const DEFAULT_GRACE_PERIOD: Duration = Duration::from_secs(4);

/// A confirmed presence change for one user.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PresenceTransition {
    pub user_id: UserId,
    pub status: PresenceStatus,
    pub at: Timestamp,
}

#[derive(Debug)]
enum UserPresence {
    Online,
    PendingOffline { generation: u64, timer: JoinHandle<()> },
}

#[derive(Debug)]
struct Inner {
    registry: Arc<SocketRegistry>,
    states: DashMap<UserId, UserPresence>,
    grace: Duration,
    generation: AtomicU64,
    transitions: mpsc::UnboundedSender<PresenceTransition>,
}

/// Per-user presence state machine with a cancellable offline grace window.
///
/// Cloning is cheap; clones share state.
#[derive(Debug, Clone)]
pub struct PresenceTracker {
    inner: Arc<Inner>,
}

impl PresenceTracker {
    /// Create a tracker over `registry`.
    ///
    /// Returns the tracker and the stream of confirmed transitions.
    #[must_use]
    pub fn new(
        registry: Arc<SocketRegistry>,
        grace: Duration,
    ) -> (Self, mpsc::UnboundedReceiver<PresenceTransition>) {
        let (transitions, rx) = mpsc::unbounded_channel();
        let tracker = Self {
            inner: Arc::new(Inner {
                registry,
                states: DashMap::new(),
                grace,
                generation: AtomicU64::new(0),
                transitions,
            }),
        };
        (tracker, rx)
    }

    /// Get the grace window.
    #[must_use]
    pub fn grace_period(&self) -> Duration {
        self.inner.grace
    }

    /// Feed a registry signal for `user` into the state machine.
    ///
    /// Must be called from within a tokio runtime.
    pub fn observe(&self, user: UserId, signal: PresenceSignal) {
        match signal {
            PresenceSignal::None => {}
            PresenceSignal::Online => self.mark_online(user),
            PresenceSignal::Offline => self.schedule_offline(user),
        }
    }

    /// Check if a user is online or inside its grace window.
    #[must_use]
    pub fn is_online(&self, user: UserId) -> bool {
        self.inner.states.contains_key(&user)
    }

    /// Check if a user is waiting out its grace window.
    #[must_use]
    pub fn is_pending_offline(&self, user: UserId) -> bool {
        self.inner
            .states
            .get(&user)
            .is_some_and(|s| matches!(*s, UserPresence::PendingOffline { .. }))
    }

    /// Lock order: presence state, then registry.
    fn mark_online(&self, user: UserId) {
        let entry = self.inner.states.entry(user);

        // A prune between `connect` and this call leaves a stale signal.
        if !self.inner.registry.is_user_online(user) {
            debug!(%user, "Ignoring online signal, no live connections");
            return;
        }

        match entry {
            Entry::Occupied(mut entry) => {
                let previous = std::mem::replace(entry.get_mut(), UserPresence::Online);
                if let UserPresence::PendingOffline { timer, .. } = previous {
                    timer.abort();
                    debug!(%user, "Reconnected within grace window");
                }
            }
            Entry::Vacant(entry) => {
                entry.insert(UserPresence::Online);
                self.emit(user, PresenceStatus::Online);
            }
        }
    }

    fn schedule_offline(&self, user: UserId) {
        let generation = self.inner.generation.fetch_add(1, Ordering::Relaxed);
        let grace = self.inner.grace;

        // The timer is spawned while the entry is held, so it cannot look
        // for its generation before the pending state is in place.
        let entry = self.inner.states.entry(user);
        let tracker = self.clone();
        let timer = tokio::spawn(async move {
            tokio::time::sleep(grace).await;
            tracker.confirm_offline(user, generation);
        });

        let pending = UserPresence::PendingOffline { generation, timer };
        match entry {
            Entry::Occupied(mut occupied) => {
                if let UserPresence::PendingOffline { timer, .. } =
                    std::mem::replace(occupied.get_mut(), pending)
                {
                    timer.abort();
                }
            }
            Entry::Vacant(vacant) => {
                vacant.insert(pending);
            }
        }
        debug!(%user, grace_ms = grace.as_millis() as u64, "Offline pending");
    }

    /// Runs when a grace timer fires.
    ///
    /// Lock order: presence state, then registry.
    fn confirm_offline(&self, user: UserId, generation: u64) {
        let Entry::Occupied(mut entry) = self.inner.states.entry(user) else {
            return;
        };
        match entry.get() {
            UserPresence::PendingOffline { generation: g, .. } if *g == generation => {}
            _ => return,
        }

        if self.inner.registry.is_user_online(user) {
            *entry.get_mut() = UserPresence::Online;
            debug!(%user, "Offline cancelled, user has live connections");
            return;
        }

        entry.remove();
        self.emit(user, PresenceStatus::Offline);
    }

    fn emit(&self, user: UserId, status: PresenceStatus) {
        info!(%user, ?status, "Presence changed");
        let _ = self.inner.transitions.send(PresenceTransition {
            user_id: user,
            status,
            at: Utc::now(),
        });
    }
}
