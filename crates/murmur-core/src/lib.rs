//! # murmur-core
//!
//! Live connection state for the murmur realtime chat core.
//!
//! - **Registry** - Which connections a user holds, which are in which room,
//!   and which receive a user's notifications
//! - **Presence** - Online/offline transitions with a reconnect grace window
//! - **Broadcaster** - Snapshot fan-out that prunes dead connections
//! - **Hub** - Shared facade and scoped admission guards
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────┐     ┌─────────────┐     ┌─────────────┐
//! │  Admission  │────▶│  Registry   │◀────│ Broadcaster │
//! └─────────────┘     └─────────────┘     └─────────────┘
//!        │                   ▲                   │
//!        ▼                   │                   │
//! ┌─────────────┐            │                   │
//! │  Presence   │────────────┘◀──────────────────┘
//! └─────────────┘
//! ```

pub mod broadcast;
pub mod hub;
pub mod presence;
pub mod registry;
pub mod room;

pub use broadcast::Broadcaster;
pub use hub::{Admission, Hub, HubConfig, NotificationSubscription};
pub use presence::{PresenceTracker, PresenceTransition, DEFAULT_GRACE_PERIOD};
pub use registry::{PresenceSignal, RegistryStats, SocketRegistry};
pub use room::{Room, RoomId};
