//! Conversation and message persistence.
//!
//! The realtime core only needs a narrow view of storage, expressed by
//! [`ConversationStore`]. [`MemoryStore`] implements it in process for tests
//! and for running the server without a database.

use async_trait::async_trait;
use chrono::Utc;
use murmur_protocol::{ConversationId, MessageId, MessagePayload, MissedMessage, Timestamp, UserId};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use thiserror::Error;
use tokio::sync::RwLock;
use uuid::Uuid;

/// Longest notification preview, in characters.
const PREVIEW_CHARS: usize = 64;

/// A two-party conversation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Conversation {
    pub id: ConversationId,
    pub user1_id: UserId,
    pub user2_id: UserId,
}

impl Conversation {
    #[must_use]
    pub fn new(id: ConversationId, user1_id: UserId, user2_id: UserId) -> Self {
        Self {
            id,
            user1_id,
            user2_id,
        }
    }

    /// Check if `user` is one of the two participants.
    #[must_use]
    pub fn includes(&self, user: UserId) -> bool {
        self.user1_id == user || self.user2_id == user
    }

    /// The participant that is not `user`.
    #[must_use]
    pub fn other_participant(&self, user: UserId) -> Option<UserId> {
        if self.user1_id == user {
            Some(self.user2_id)
        } else if self.user2_id == user {
            Some(self.user1_id)
        } else {
            None
        }
    }
}

/// Delivery state of a message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageStatus {
    Sent,
    Delivered,
    Read,
}

/// A persisted message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoredMessage {
    pub id: MessageId,
    pub conversation_id: ConversationId,
    pub sender_id: UserId,
    pub receiver_id: UserId,
    pub content: String,
    pub status: MessageStatus,
    pub is_deleted: bool,
    pub sent_at: Timestamp,
    pub delivered_at: Option<Timestamp>,
    pub read_at: Option<Timestamp>,
    pub edited_at: Option<Timestamp>,
}

impl StoredMessage {
    /// The message as broadcast in `new_message`.
    #[must_use]
    pub fn payload(&self) -> MessagePayload {
        MessagePayload {
            id: self.id,
            conversation_id: self.conversation_id,
            sender_id: self.sender_id,
            receiver_id: self.receiver_id,
            content: self.content.clone(),
            sent_at: self.sent_at,
        }
    }

    /// The message as replayed in `reconnect_success`.
    #[must_use]
    pub fn missed(&self) -> MissedMessage {
        MissedMessage {
            id: self.id,
            conversation_id: self.conversation_id,
            sender_id: self.sender_id,
            content: self.content.clone(),
            sent_at: self.sent_at,
        }
    }

    /// A short excerpt for notifications.
    #[must_use]
    pub fn preview(&self) -> String {
        self.content.chars().take(PREVIEW_CHARS).collect()
    }
}

/// Store errors.
#[derive(Debug, Error)]
pub enum StoreError {
    /// The conversation or message does not exist.
    #[error("{0} not found")]
    NotFound(&'static str),

    /// The user may not perform this operation.
    #[error("Forbidden: {0}")]
    Forbidden(&'static str),

    /// The input was rejected.
    #[error("Invalid input: {0}")]
    Validation(String),

    /// The backend could not be reached.
    #[error("Store unavailable: {0}")]
    Unavailable(String),
}

/// Persistence operations used by the realtime core.
///
/// Every method is a single transaction that either succeeds or fails with a
/// [`StoreError`].
#[async_trait]
pub trait ConversationStore: Send + Sync + 'static {
    async fn get_conversation(&self, id: ConversationId) -> Result<Conversation, StoreError>;

    /// Check if `user` may open `conversation`.
    fn user_can_access(&self, conversation: &Conversation, user: UserId) -> bool {
        conversation.includes(user)
    }

    async fn get_message(&self, id: MessageId) -> Result<StoredMessage, StoreError>;

    /// Persist a new message from `sender` to the other participant.
    async fn send_message(
        &self,
        conversation: &Conversation,
        sender: UserId,
        content: &str,
    ) -> Result<StoredMessage, StoreError>;

    /// Mark a message delivered. Only its receiver may do this.
    async fn mark_delivered(&self, id: MessageId, user: UserId)
        -> Result<StoredMessage, StoreError>;

    /// Mark a message read. Any participant may do this.
    async fn mark_read(&self, id: MessageId, user: UserId) -> Result<StoredMessage, StoreError>;

    /// Replace a message's content. Only its sender may do this.
    async fn edit_message(
        &self,
        id: MessageId,
        user: UserId,
        content: &str,
    ) -> Result<StoredMessage, StoreError>;

    /// Soft-delete a message. Only its sender may do this.
    async fn delete_message(&self, id: MessageId, user: UserId)
        -> Result<StoredMessage, StoreError>;

    /// Messages sent to or by `user` after `since`, oldest first.
    async fn messages_since(
        &self,
        user: UserId,
        since: Timestamp,
    ) -> Result<Vec<StoredMessage>, StoreError>;

    async fn increment_unread(
        &self,
        conversation: ConversationId,
        user: UserId,
    ) -> Result<u32, StoreError>;

    async fn reset_unread(&self, conversation: ConversationId, user: UserId)
        -> Result<(), StoreError>;

    async fn unread(&self, conversation: ConversationId, user: UserId) -> Result<u32, StoreError>;

    async fn touch_last_seen(&self, user: UserId, at: Timestamp) -> Result<(), StoreError>;
}

#[derive(Debug, Default)]
struct MemoryState {
    conversations: HashMap<ConversationId, Conversation>,
    messages: HashMap<MessageId, StoredMessage>,
    unread: HashMap<(ConversationId, UserId), u32>,
    last_seen: HashMap<UserId, Timestamp>,
}

impl MemoryState {
    fn message_mut(&mut self, id: MessageId) -> Result<&mut StoredMessage, StoreError> {
        self.messages
            .get_mut(&id)
            .ok_or(StoreError::NotFound("message"))
    }
}

/// In-process [`ConversationStore`].
#[derive(Debug, Default)]
pub struct MemoryStore {
    state: RwLock<MemoryState>,
}

impl MemoryStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a store holding `conversations`.
    #[must_use]
    pub fn with_conversations(conversations: impl IntoIterator<Item = Conversation>) -> Self {
        let state = MemoryState {
            conversations: conversations.into_iter().map(|c| (c.id, c)).collect(),
            ..MemoryState::default()
        };
        Self {
            state: RwLock::new(state),
        }
    }

    pub async fn insert_conversation(&self, conversation: Conversation) {
        self.state
            .write()
            .await
            .conversations
            .insert(conversation.id, conversation);
    }

    /// When `user` was last confirmed offline.
    pub async fn last_seen(&self, user: UserId) -> Option<Timestamp> {
        self.state.read().await.last_seen.get(&user).copied()
    }

    /// Number of stored messages, deleted ones included.
    pub async fn message_count(&self) -> usize {
        self.state.read().await.messages.len()
    }
}

#[async_trait]
impl ConversationStore for MemoryStore {
    async fn get_conversation(&self, id: ConversationId) -> Result<Conversation, StoreError> {
        self.state
            .read()
            .await
            .conversations
            .get(&id)
            .cloned()
            .ok_or(StoreError::NotFound("conversation"))
    }

    async fn get_message(&self, id: MessageId) -> Result<StoredMessage, StoreError> {
        self.state
            .read()
            .await
            .messages
            .get(&id)
            .cloned()
            .ok_or(StoreError::NotFound("message"))
    }

    async fn send_message(
        &self,
        conversation: &Conversation,
        sender: UserId,
        content: &str,
    ) -> Result<StoredMessage, StoreError> {
        if content.trim().is_empty() {
            return Err(StoreError::Validation("message content cannot be empty".into()));
        }
        let receiver = conversation
            .other_participant(sender)
            .ok_or(StoreError::Forbidden("sender is not a participant"))?;

        let message = StoredMessage {
            id: Uuid::new_v4(),
            conversation_id: conversation.id,
            sender_id: sender,
            receiver_id: receiver,
            content: content.to_string(),
            status: MessageStatus::Sent,
            is_deleted: false,
            sent_at: Utc::now(),
            delivered_at: None,
            read_at: None,
            edited_at: None,
        };

        self.state
            .write()
            .await
            .messages
            .insert(message.id, message.clone());
        Ok(message)
    }

    async fn mark_delivered(
        &self,
        id: MessageId,
        user: UserId,
    ) -> Result<StoredMessage, StoreError> {
        let mut state = self.state.write().await;
        let message = state.message_mut(id)?;
        if message.receiver_id != user {
            return Err(StoreError::Forbidden("only the receiver can acknowledge delivery"));
        }
        message.delivered_at = Some(Utc::now());
        if message.status == MessageStatus::Sent {
            message.status = MessageStatus::Delivered;
        }
        Ok(message.clone())
    }

    async fn mark_read(&self, id: MessageId, user: UserId) -> Result<StoredMessage, StoreError> {
        let mut state = self.state.write().await;
        let message = state.message_mut(id)?;
        if message.receiver_id != user && message.sender_id != user {
            return Err(StoreError::Forbidden("not a participant"));
        }
        message.status = MessageStatus::Read;
        message.read_at = Some(Utc::now());
        Ok(message.clone())
    }

    async fn edit_message(
        &self,
        id: MessageId,
        user: UserId,
        content: &str,
    ) -> Result<StoredMessage, StoreError> {
        if content.trim().is_empty() {
            return Err(StoreError::Validation("message content cannot be empty".into()));
        }
        let mut state = self.state.write().await;
        let message = state.message_mut(id)?;
        if message.sender_id != user {
            return Err(StoreError::Forbidden("only the sender can edit"));
        }
        if message.is_deleted {
            return Err(StoreError::Validation("message is deleted".into()));
        }
        message.content = content.to_string();
        message.edited_at = Some(Utc::now());
        Ok(message.clone())
    }

    async fn delete_message(
        &self,
        id: MessageId,
        user: UserId,
    ) -> Result<StoredMessage, StoreError> {
        let mut state = self.state.write().await;
        let message = state.message_mut(id)?;
        if message.sender_id != user {
            return Err(StoreError::Forbidden("only the sender can delete"));
        }
        message.is_deleted = true;
        message.edited_at = Some(Utc::now());
        Ok(message.clone())
    }

    async fn messages_since(
        &self,
        user: UserId,
        since: Timestamp,
    ) -> Result<Vec<StoredMessage>, StoreError> {
        let state = self.state.read().await;
        let mut missed: Vec<StoredMessage> = state
            .messages
            .values()
            .filter(|m| !m.is_deleted && m.sent_at > since)
            .filter(|m| m.receiver_id == user || m.sender_id == user)
            .cloned()
            .collect();
        missed.sort_by_key(|m| m.sent_at);
        Ok(missed)
    }

    async fn increment_unread(
        &self,
        conversation: ConversationId,
        user: UserId,
    ) -> Result<u32, StoreError> {
        let mut state = self.state.write().await;
        let count = state.unread.entry((conversation, user)).or_insert(0);
        *count = count.saturating_add(1);
        Ok(*count)
    }

    async fn reset_unread(
        &self,
        conversation: ConversationId,
        user: UserId,
    ) -> Result<(), StoreError> {
        self.state
            .write()
            .await
            .unread
            .insert((conversation, user), 0);
        Ok(())
    }

    async fn unread(&self, conversation: ConversationId, user: UserId) -> Result<u32, StoreError> {
        Ok(self
            .state
            .read()
            .await
            .unread
            .get(&(conversation, user))
            .copied()
            .unwrap_or(0))
    }

    async fn touch_last_seen(&self, user: UserId, at: Timestamp) -> Result<(), StoreError> {
        self.state.write().await.last_seen.insert(user, at);
        Ok(())
    }
}
