//! Shared server state.

use murmur_core::{Hub, PresenceTransition};
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::info;

use crate::auth::{AuthVerifier, StaticTokenVerifier};
use crate::config::Config;
use crate::store::{ConversationStore, MemoryStore};

/// State shared by every connection task.
pub struct AppState {
    /// Live connections, presence and fan-out.
    pub hub: Hub,
    /// Conversation and message persistence.
    pub store: Arc<dyn ConversationStore>,
    /// Bearer token verification.
    pub auth: Arc<dyn AuthVerifier>,
    /// Server configuration.
    pub config: Config,
}

impl AppState {
    /// Create state over the given collaborators.
    ///
    /// Returns the state and the presence transition stream, which must be
    /// handed to [`spawn_presence_fanout`](crate::handlers::spawn_presence_fanout).
    #[must_use]
    pub fn new(
        config: Config,
        store: Arc<dyn ConversationStore>,
        auth: Arc<dyn AuthVerifier>,
    ) -> (Arc<Self>, mpsc::UnboundedReceiver<PresenceTransition>) {
        let (hub, transitions) = Hub::new(config.hub_config());
        let state = Arc::new(Self {
            hub,
            store,
            auth,
            config,
        });
        (state, transitions)
    }

    /// Create state backed by the in-memory store and the configured tokens.
    #[must_use]
    pub fn from_config(config: Config) -> (Arc<Self>, mpsc::UnboundedReceiver<PresenceTransition>) {
        let store = MemoryStore::with_conversations(config.seed_conversations());
        let verifier = config
            .auth
            .tokens
            .iter()
            .fold(StaticTokenVerifier::default(), |v, entry| {
                v.with_token(entry.token.clone(), entry.user_id)
            });

        info!(
            conversations = config.seed.conversations.len(),
            tokens = config.auth.tokens.len(),
            "Using in-memory store"
        );

        Self::new(config, Arc::new(store), Arc::new(verifier))
    }
}
