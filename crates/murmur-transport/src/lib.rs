//! # murmur-transport
//!
//! Connection plumbing for the murmur realtime chat core.
//!
//! Every live socket is represented by a [`ConnectionHandle`]: a cheap,
//! cloneable sender into a bounded queue. One writer task per socket drains
//! that queue, so concurrent broadcasts never interleave partial frames.
//!
//! ```rust,ignore
//! use murmur_transport::{websocket, ConnectionHandle};
//!
//! let (handle, rx) = ConnectionHandle::channel(user_id, 256);
//! tokio::spawn(websocket::write_loop(sink, rx, encoding, handle.close_signal(), handle.id()));
//! ```

pub mod connection;

#[cfg(feature = "websocket")]
pub mod websocket;

pub use connection::{
    CloseSignal, ConnectionHandle, ConnectionId, Outbound, OutboundReceiver, SendError,
};

#[cfg(feature = "websocket")]
pub use websocket::Encoding;
