//! Inbound client events.
//!
//! A client frame is an object tagged by its `event` field. The set of event
//! names is closed: [`EventKind`] enumerates it, and [`ClientEvent`] carries
//! the decoded fields for each kind.

use serde::{Deserialize, Serialize};

use crate::types::{lenient_timestamp, ConversationId, MessageId, Timestamp};

/// Event kinds a client may send on a conversation socket.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    TypingStart,
    TypingStop,
    SendMessage,
    MessageDelivered,
    MessageRead,
    MessageEdit,
    MessageDelete,
    Reconnect,
    ResumeConversation,
}

impl EventKind {
    /// Every kind, in wire order.
    pub const ALL: [EventKind; 9] = [
        EventKind::TypingStart,
        EventKind::TypingStop,
        EventKind::SendMessage,
        EventKind::MessageDelivered,
        EventKind::MessageRead,
        EventKind::MessageEdit,
        EventKind::MessageDelete,
        EventKind::Reconnect,
        EventKind::ResumeConversation,
    ];

    /// The wire name of this kind.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            EventKind::TypingStart => "typing_start",
            EventKind::TypingStop => "typing_stop",
            EventKind::SendMessage => "send_message",
            EventKind::MessageDelivered => "message_delivered",
            EventKind::MessageRead => "message_read",
            EventKind::MessageEdit => "message_edit",
            EventKind::MessageDelete => "message_delete",
            EventKind::Reconnect => "reconnect",
            EventKind::ResumeConversation => "resume_conversation",
        }
    }

    /// Look up a kind by its wire name.
    #[must_use]
    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|kind| kind.as_str() == name)
    }
}

impl std::fmt::Display for EventKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A decoded client event.
///
/// Unknown fields (including the envelope `v`) are ignored. Missing `content`
/// decodes as an empty string so that the handler can reject it as a
/// validation failure rather than a malformed frame.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum ClientEvent {
    /// The user started typing in the current conversation.
    TypingStart {},

    /// The user stopped typing.
    TypingStop {},

    /// Send a message to the other participant.
    SendMessage {
        #[serde(default)]
        content: String,
    },

    /// Acknowledge delivery of a message addressed to the caller.
    MessageDelivered { message_id: MessageId },

    /// Acknowledge that a message was read.
    MessageRead { message_id: MessageId },

    /// Replace the content of one of the caller's messages.
    MessageEdit {
        message_id: MessageId,
        #[serde(default)]
        content: String,
    },

    /// Delete one of the caller's messages.
    MessageDelete { message_id: MessageId },

    /// Ask for every message sent after the given instant.
    Reconnect {
        #[serde(with = "lenient_timestamp")]
        last_message_at: Timestamp,
    },

    /// Move this connection to another conversation.
    ResumeConversation { conversation_id: ConversationId },
}

impl ClientEvent {
    /// Get the kind of this event.
    #[must_use]
    pub fn kind(&self) -> EventKind {
        match self {
            ClientEvent::TypingStart {} => EventKind::TypingStart,
            ClientEvent::TypingStop {} => EventKind::TypingStop,
            ClientEvent::SendMessage { .. } => EventKind::SendMessage,
            ClientEvent::MessageDelivered { .. } => EventKind::MessageDelivered,
            ClientEvent::MessageRead { .. } => EventKind::MessageRead,
            ClientEvent::MessageEdit { .. } => EventKind::MessageEdit,
            ClientEvent::MessageDelete { .. } => EventKind::MessageDelete,
            ClientEvent::Reconnect { .. } => EventKind::Reconnect,
            ClientEvent::ResumeConversation { .. } => EventKind::ResumeConversation,
        }
    }

    /// Create a send_message event.
    #[must_use]
    pub fn send_message(content: impl Into<String>) -> Self {
        ClientEvent::SendMessage {
            content: content.into(),
        }
    }

    /// Create a typing event.
    #[must_use]
    pub fn typing(is_typing: bool) -> Self {
        if is_typing {
            ClientEvent::TypingStart {}
        } else {
            ClientEvent::TypingStop {}
        }
    }
}
