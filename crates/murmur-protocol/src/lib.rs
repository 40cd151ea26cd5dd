//! # murmur-protocol
//!
//! Wire protocol definitions for the murmur realtime chat core.
//!
//! Clients send tagged events (`{"event": "send_message", ...}`) and receive
//! versioned envelopes (`{"v": 1, "event": "new_message", ...}`).
//!
//! ## Event Families
//!
//! - `typing_*` - Typing indicators
//! - `send_message` / `message_*` - Messages, receipts, edits and deletes
//! - `reconnect` / `resume_conversation` - Missed message replay and room moves
//!
//! ## Example
//!
//! ```rust
//! use murmur_protocol::{codec, ClientEvent};
//!
//! let event = codec::decode_text(r#"{"event": "send_message", "content": "hi"}"#).unwrap();
//! assert_eq!(event, ClientEvent::send_message("hi"));
//! ```

pub mod codec;
pub mod events;
pub mod outbound;
pub mod types;
pub mod version;

pub use codec::{decode_binary, decode_text, encode_json, encode_msgpack, ProtocolError};
pub use events::{ClientEvent, EventKind};
pub use outbound::{
    DeletedMessage, DeliveryReceipt, EditedMessage, Envelope, ErrorCode, MessagePayload,
    MissedMessage, NotificationKind, PresenceStatus, ReadReceipt, ServerEvent,
};
pub use types::{ConversationId, MessageId, Timestamp, UserId};
pub use version::PROTOCOL_VERSION;
