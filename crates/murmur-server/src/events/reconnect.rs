//! Missed message replay and moving between conversations.

use murmur_protocol::{ConversationId, ServerEvent, Timestamp};
use tracing::debug;

use crate::dispatch::ConnectionContext;
use crate::error::HandlerError;
use crate::state::AppState;

/// Reply with every message sent to or by the caller after `since`.
pub async fn handle_reconnect(
    state: &AppState,
    ctx: &ConnectionContext,
    since: Timestamp,
) -> Result<(), HandlerError> {
    let missed = state.store.messages_since(ctx.user_id(), since).await?;
    debug!(
        connection = %ctx.handle().id(),
        %since,
        missed = missed.len(),
        "Replaying missed messages"
    );

    state.hub.broadcaster().reply(
        ctx.handle(),
        ServerEvent::ReconnectSuccess {
            missed_messages: missed.iter().map(|m| m.missed()).collect(),
        },
    );
    Ok(())
}

/// Move this connection into another conversation's room.
pub async fn handle_resume_conversation(
    state: &AppState,
    ctx: &mut ConnectionContext,
    conversation_id: ConversationId,
) -> Result<(), HandlerError> {
    let user = ctx.user_id();
    let conversation = state.store.get_conversation(conversation_id).await?;
    if !state.store.user_can_access(&conversation, user) {
        return Err(HandlerError::AccessDenied(
            "not a participant in this conversation".into(),
        ));
    }

    ctx.switch_to(conversation);
    state.store.reset_unread(conversation_id, user).await?;

    super::to_room(
        state,
        conversation_id,
        ServerEvent::unread(conversation_id, user, 0),
    );
    state.hub.broadcaster().reply(
        ctx.handle(),
        ServerEvent::ResumeSuccess { conversation_id },
    );
    Ok(())
}

#[cfg(test)]
mod tests {
    use crate::store::ConversationStore;
    use crate::testing::Fixture;
    use chrono::{Duration, Utc};
    use murmur_protocol::{ClientEvent, ErrorCode, ServerEvent};
    use uuid::Uuid;

    #[tokio::test]
    async fn test_reconnect_replies_only_to_caller() {
        let fixture = Fixture::new();
        let since = Utc::now() - Duration::seconds(5);
        let first = fixture.seed_message(fixture.alice, "one").await;
        let second = fixture.seed_message(fixture.bob, "two").await;
        let mut alice = fixture.chat(fixture.alice);
        let mut bob = fixture.chat(fixture.bob);

        alice
            .send(&fixture, ClientEvent::Reconnect { last_message_at: since })
            .await;

        let replies = alice.drain();
        let [ServerEvent::ReconnectSuccess { missed_messages }] = &replies[..] else {
            panic!("expected reconnect_success, got {replies:?}");
        };
        let ids: Vec<_> = missed_messages.iter().map(|m| m.id).collect();
        assert_eq!(ids.len(), 2);
        assert!(ids.contains(&first.id) && ids.contains(&second.id));
        assert!(bob.drain().is_empty());
    }

    #[tokio::test]
    async fn test_resume_moves_rooms_and_clears_unread() {
        let fixture = Fixture::new();
        let other = fixture.extra_conversation(fixture.alice, fixture.bob).await;
        fixture.store.increment_unread(other.id, fixture.alice).await.unwrap();

        let mut alice = fixture.chat(fixture.alice);
        let mut bob = fixture.chat(fixture.bob);

        alice
            .send(
                &fixture,
                ClientEvent::ResumeConversation {
                    conversation_id: other.id,
                },
            )
            .await;

        let replies = alice.drain();
        assert!(matches!(
            &replies[..],
            [
                ServerEvent::UnreadUpdate { unread: 0, .. },
                ServerEvent::ResumeSuccess { conversation_id },
            ] if *conversation_id == other.id
        ));
        assert_eq!(alice.ctx.room(), other.id);
        assert_eq!(
            fixture.state.hub.registry().rooms_of(alice.ctx.handle().id()),
            vec![other.id]
        );
        assert!(!fixture
            .state
            .hub
            .registry()
            .is_user_in_room(fixture.alice, fixture.conversation.id));
        assert_eq!(fixture.store.unread(other.id, fixture.alice).await.unwrap(), 0);

        // Bob stayed in the first room and sees none of it.
        assert!(bob.drain().is_empty());
    }

    #[tokio::test]
    async fn test_resume_foreign_conversation_is_denied() {
        let fixture = Fixture::new();
        let foreign = fixture.extra_conversation(Uuid::new_v4(), Uuid::new_v4()).await;
        let mut alice = fixture.chat(fixture.alice);

        alice
            .send(
                &fixture,
                ClientEvent::ResumeConversation {
                    conversation_id: foreign.id,
                },
            )
            .await;

        assert!(matches!(
            &alice.drain()[..],
            [ServerEvent::Error { code: ErrorCode::AccessDenied, .. }]
        ));
        assert_eq!(alice.ctx.room(), fixture.conversation.id);
    }

    #[tokio::test]
    async fn test_resume_unknown_conversation_is_not_found() {
        let fixture = Fixture::new();
        let mut alice = fixture.chat(fixture.alice);

        alice
            .send(
                &fixture,
                ClientEvent::ResumeConversation {
                    conversation_id: Uuid::new_v4(),
                },
            )
            .await;

        assert!(matches!(
            &alice.drain()[..],
            [ServerEvent::Error { code: ErrorCode::NotFound, .. }]
        ));
    }
}
