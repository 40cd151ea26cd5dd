//! Fixtures shared by handler tests.

use async_trait::async_trait;
use murmur_core::{NotificationSubscription, PresenceTransition};
use murmur_protocol::{ClientEvent, ConversationId, MessageId, ServerEvent, Timestamp, UserId};
use murmur_transport::{ConnectionHandle, Outbound, OutboundReceiver};
use std::sync::Arc;
use tokio::sync::mpsc;
use uuid::Uuid;

use crate::auth::StaticTokenVerifier;
use crate::config::Config;
use crate::dispatch::{handle_frame, ConnectionContext, Flow};
use crate::state::AppState;
use crate::store::{Conversation, ConversationStore, MemoryStore, StoreError, StoredMessage};

/// Two users sharing one conversation, backed by a [`MemoryStore`].
pub(crate) struct Fixture {
    pub state: Arc<AppState>,
    pub store: Arc<MemoryStore>,
    pub conversation: Conversation,
    pub alice: UserId,
    pub bob: UserId,
    _transitions: mpsc::UnboundedReceiver<PresenceTransition>,
}

impl Fixture {
    pub fn new() -> Self {
        Self::with_config(Config::default())
    }

    pub fn with_config(config: Config) -> Self {
        let alice = Uuid::new_v4();
        let bob = Uuid::new_v4();
        let conversation = Conversation::new(Uuid::new_v4(), alice, bob);
        let store = Arc::new(MemoryStore::with_conversations([conversation.clone()]));
        let (state, transitions) = AppState::new(
            config,
            store.clone(),
            Arc::new(StaticTokenVerifier::default()),
        );
        Self {
            state,
            store,
            conversation,
            alice,
            bob,
            _transitions: transitions,
        }
    }

    /// Open a chat connection for `user` in the fixture conversation.
    pub fn chat(&self, user: UserId) -> Client {
        let (handle, rx) = ConnectionHandle::channel(user, 64);
        let admission = self.state.hub.admit(handle);
        Client {
            ctx: ConnectionContext::enter(admission, self.conversation.clone()),
            rx,
        }
    }

    /// Open a notification connection for `user`.
    pub fn notifications(&self, user: UserId) -> Notifications {
        let (handle, rx) = ConnectionHandle::channel(user, 64);
        Notifications {
            _subscription: self.state.hub.subscribe_notifications(handle),
            rx,
        }
    }

    /// Persist a message without broadcasting it.
    pub async fn seed_message(&self, sender: UserId, content: &str) -> StoredMessage {
        self.store
            .send_message(&self.conversation, sender, content)
            .await
            .unwrap()
    }

    /// The most recent message in the fixture conversation.
    pub async fn last_message(&self) -> StoredMessage {
        let since = chrono::DateTime::<chrono::Utc>::MIN_UTC;
        self.store
            .messages_since(self.alice, since)
            .await
            .unwrap()
            .into_iter()
            .filter(|m| m.conversation_id == self.conversation.id)
            .last()
            .unwrap()
    }

    /// Add another conversation to the store.
    pub async fn extra_conversation(&self, user1: UserId, user2: UserId) -> Conversation {
        let conversation = Conversation::new(Uuid::new_v4(), user1, user2);
        self.store.insert_conversation(conversation.clone()).await;
        conversation
    }
}

fn drain(rx: &mut OutboundReceiver) -> Vec<ServerEvent> {
    let mut events = Vec::new();
    while let Ok(frame) = rx.try_recv() {
        if let Outbound::Event(envelope) = frame {
            events.push(envelope.event.clone());
        }
    }
    events
}

/// An admitted chat connection and its outbound queue.
pub(crate) struct Client {
    pub ctx: ConnectionContext,
    pub rx: OutboundReceiver,
}

impl Client {
    pub async fn send(&mut self, fixture: &Fixture, event: ClientEvent) -> Flow {
        handle_frame(&fixture.state, &mut self.ctx, Ok(event)).await
    }

    pub fn drain(&mut self) -> Vec<ServerEvent> {
        drain(&mut self.rx)
    }
}

pub(crate) struct Notifications {
    _subscription: NotificationSubscription,
    rx: OutboundReceiver,
}

impl Notifications {
    pub fn drain(&mut self) -> Vec<ServerEvent> {
        drain(&mut self.rx)
    }
}

/// A store whose backend is gone. `messages_since` panics.
pub(crate) struct BrokenStore {
    pub conversation: Conversation,
}

fn offline<T>() -> Result<T, StoreError> {
    Err(StoreError::Unavailable("backend offline".into()))
}

#[async_trait]
impl ConversationStore for BrokenStore {
    async fn get_conversation(&self, _id: ConversationId) -> Result<Conversation, StoreError> {
        Ok(self.conversation.clone())
    }

    async fn get_message(&self, _id: MessageId) -> Result<StoredMessage, StoreError> {
        offline()
    }

    async fn send_message(
        &self,
        _conversation: &Conversation,
        _sender: UserId,
        _content: &str,
    ) -> Result<StoredMessage, StoreError> {
        offline()
    }

    async fn mark_delivered(
        &self,
        _id: MessageId,
        _user: UserId,
    ) -> Result<StoredMessage, StoreError> {
        offline()
    }

    async fn mark_read(&self, _id: MessageId, _user: UserId) -> Result<StoredMessage, StoreError> {
        offline()
    }

    async fn edit_message(
        &self,
        _id: MessageId,
        _user: UserId,
        _content: &str,
    ) -> Result<StoredMessage, StoreError> {
        offline()
    }

    async fn delete_message(
        &self,
        _id: MessageId,
        _user: UserId,
    ) -> Result<StoredMessage, StoreError> {
        offline()
    }

    async fn messages_since(
        &self,
        _user: UserId,
        _since: Timestamp,
    ) -> Result<Vec<StoredMessage>, StoreError> {
        panic!("corrupt message index");
    }

    async fn increment_unread(&self, _c: ConversationId, _u: UserId) -> Result<u32, StoreError> {
        offline()
    }

    async fn reset_unread(&self, _c: ConversationId, _u: UserId) -> Result<(), StoreError> {
        offline()
    }

    async fn unread(&self, _c: ConversationId, _u: UserId) -> Result<u32, StoreError> {
        offline()
    }

    async fn touch_last_seen(&self, _user: UserId, _at: Timestamp) -> Result<(), StoreError> {
        offline()
    }
}
