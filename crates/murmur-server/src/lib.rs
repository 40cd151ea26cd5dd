//! # murmur server
//!
//! WebSocket server for one-to-one conversations: message fan-out, delivery
//! and read receipts, typing indicators, presence, and out-of-room
//! notifications.
//!
//! The binary in `main.rs` is a thin wrapper around [`run_server`]. Tests and
//! embedders can bind their own listener and call [`serve`], or build the
//! router over custom collaborators with [`AppState::new`] and
//! [`build_router`].

pub mod auth;
pub mod config;
pub mod dispatch;
pub mod error;
pub mod events;
pub mod handlers;
pub mod metrics;
pub mod state;
pub mod store;

#[cfg(test)]
mod testing;

pub use config::Config;
pub use handlers::{build_router, run_server, serve, spawn_presence_fanout};
pub use state::AppState;
