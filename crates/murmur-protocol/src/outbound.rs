//! Outbound server events.
//!
//! Each event is wrapped in an [`Envelope`] that stamps the protocol major
//! version next to the `event` tag.

use serde::{Deserialize, Serialize};

use crate::types::{ConversationId, MessageId, Timestamp, UserId};
use crate::version::PROTOCOL_VERSION;

/// A message as broadcast to a room.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MessagePayload {
    pub id: MessageId,
    pub conversation_id: ConversationId,
    pub sender_id: UserId,
    pub receiver_id: UserId,
    pub content: String,
    pub sent_at: Timestamp,
}

/// Delivery receipt payload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeliveryReceipt {
    pub message_id: MessageId,
    pub delivered_at: Timestamp,
}

/// Read receipt payload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReadReceipt {
    pub message_id: MessageId,
    pub read_at: Timestamp,
}

/// Edited message payload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EditedMessage {
    pub id: MessageId,
    pub content: String,
    pub edited_at: Timestamp,
}

/// Deleted message payload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeletedMessage {
    pub id: MessageId,
    pub deleted_at: Timestamp,
}

/// A message replayed after a reconnect.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MissedMessage {
    pub id: MessageId,
    pub conversation_id: ConversationId,
    pub sender_id: UserId,
    pub content: String,
    pub sent_at: Timestamp,
}

/// What a notification is about.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NotificationKind {
    Message,
    MessageRead,
    MessageEdited,
    MessageDeleted,
}

/// Aggregate presence of a user.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PresenceStatus {
    Online,
    Offline,
}

/// Error codes reported back to the originating connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCode {
    UnknownEvent,
    MalformedEvent,
    UnsupportedVersion,
    Validation,
    NotFound,
    AccessDenied,
    Internal,
}

impl ErrorCode {
    /// The wire name of this code.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            ErrorCode::UnknownEvent => "unknown_event",
            ErrorCode::MalformedEvent => "malformed_event",
            ErrorCode::UnsupportedVersion => "unsupported_version",
            ErrorCode::Validation => "validation",
            ErrorCode::NotFound => "not_found",
            ErrorCode::AccessDenied => "access_denied",
            ErrorCode::Internal => "internal",
        }
    }
}

/// An event sent from the server to one or more connections.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum ServerEvent {
    /// Typing indicator change.
    Typing {
        conversation_id: ConversationId,
        user_id: UserId,
        is_typing: bool,
    },

    /// A new message in the room.
    NewMessage { data: MessagePayload },

    /// Unread counter for one participant of a conversation.
    UnreadUpdate {
        conversation_id: ConversationId,
        user_id: UserId,
        unread: u32,
    },

    /// Out-of-room notification on the per-user channel.
    Notification {
        #[serde(rename = "type")]
        kind: NotificationKind,
        conversation_id: ConversationId,
        from_user_id: UserId,
        message_id: MessageId,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        preview: Option<String>,
        sent_at: Timestamp,
    },

    MessageDelivered { data: DeliveryReceipt },

    MessageRead { data: ReadReceipt },

    MessageUpdated { data: EditedMessage },

    MessageDeleted { data: DeletedMessage },

    /// Direct reply to `reconnect`.
    ReconnectSuccess { missed_messages: Vec<MissedMessage> },

    /// Direct reply to `resume_conversation`.
    ResumeSuccess { conversation_id: ConversationId },

    /// A user came online or went offline.
    Presence {
        user_id: UserId,
        status: PresenceStatus,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        last_seen: Option<Timestamp>,
    },

    /// A request from this connection failed.
    Error {
        code: ErrorCode,
        message: String,
        /// The client event that failed. Renamed on the wire so it does
        /// not collide with the `event` tag.
        #[serde(
            rename = "source_event",
            default,
            skip_serializing_if = "Option::is_none"
        )]
        event: Option<String>,
    },
}

impl ServerEvent {
    /// The wire name of this event.
    #[must_use]
    pub fn name(&self) -> &'static str {
        match self {
            ServerEvent::Typing { .. } => "typing",
            ServerEvent::NewMessage { .. } => "new_message",
            ServerEvent::UnreadUpdate { .. } => "unread_update",
            ServerEvent::Notification { .. } => "notification",
            ServerEvent::MessageDelivered { .. } => "message_delivered",
            ServerEvent::MessageRead { .. } => "message_read",
            ServerEvent::MessageUpdated { .. } => "message_updated",
            ServerEvent::MessageDeleted { .. } => "message_deleted",
            ServerEvent::ReconnectSuccess { .. } => "reconnect_success",
            ServerEvent::ResumeSuccess { .. } => "resume_success",
            ServerEvent::Presence { .. } => "presence",
            ServerEvent::Error { .. } => "error",
        }
    }

    /// Create an error event.
    #[must_use]
    pub fn error(code: ErrorCode, message: impl Into<String>) -> Self {
        ServerEvent::Error {
            code,
            message: message.into(),
            event: None,
        }
    }

    /// Create an error event that names the offending client event.
    #[must_use]
    pub fn error_for(
        code: ErrorCode,
        message: impl Into<String>,
        event: impl Into<String>,
    ) -> Self {
        ServerEvent::Error {
            code,
            message: message.into(),
            event: Some(event.into()),
        }
    }

    /// Create an unread counter update.
    #[must_use]
    pub fn unread(conversation_id: ConversationId, user_id: UserId, unread: u32) -> Self {
        ServerEvent::UnreadUpdate {
            conversation_id,
            user_id,
            unread,
        }
    }
}

/// A versioned outbound frame.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Envelope {
    /// Protocol major version.
    pub v: u8,
    /// The event itself, flattened next to `v`.
    #[serde(flatten)]
    pub event: ServerEvent,
}

impl Envelope {
    /// Wrap an event in the current protocol version.
    #[must_use]
    pub fn new(event: ServerEvent) -> Self {
        Self {
            v: PROTOCOL_VERSION,
            event,
        }
    }
}

impl From<ServerEvent> for Envelope {
    fn from(event: ServerEvent) -> Self {
        Envelope::new(event)
    }
}
