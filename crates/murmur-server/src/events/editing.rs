//! Editing and deleting messages.

use chrono::Utc;
use murmur_protocol::{DeletedMessage, EditedMessage, MessageId, NotificationKind, ServerEvent};

use crate::dispatch::ConnectionContext;
use crate::error::HandlerError;
use crate::state::AppState;
use crate::store::StoredMessage;

/// Load a message the caller sent in the current conversation.
async fn own_message(
    state: &AppState,
    ctx: &ConnectionContext,
    message_id: MessageId,
) -> Result<StoredMessage, HandlerError> {
    let message = super::message_in_conversation(state, ctx, message_id).await?;
    if message.sender_id != ctx.user_id() {
        return Err(HandlerError::AccessDenied(
            "only the sender can change a message".into(),
        ));
    }
    Ok(message)
}

pub async fn handle_edit_message(
    state: &AppState,
    ctx: &ConnectionContext,
    message_id: MessageId,
    content: &str,
) -> Result<(), HandlerError> {
    let message = own_message(state, ctx, message_id).await?;
    if message.is_deleted {
        return Err(HandlerError::Validation("message is deleted".into()));
    }
    if content.trim().is_empty() {
        return Err(HandlerError::Validation(
            "message content cannot be empty".into(),
        ));
    }

    let updated = state
        .store
        .edit_message(message.id, ctx.user_id(), content)
        .await?;
    let edited_at = updated.edited_at.unwrap_or_else(Utc::now);

    super::to_room(
        state,
        ctx.room(),
        ServerEvent::MessageUpdated {
            data: EditedMessage {
                id: updated.id,
                content: updated.content.clone(),
                edited_at,
            },
        },
    );
    super::notify_if_absent(
        state,
        ctx.room(),
        updated.receiver_id,
        ServerEvent::Notification {
            kind: NotificationKind::MessageEdited,
            conversation_id: ctx.room(),
            from_user_id: ctx.user_id(),
            message_id: updated.id,
            preview: Some(updated.preview()),
            sent_at: edited_at,
        },
    );
    Ok(())
}

pub async fn handle_delete_message(
    state: &AppState,
    ctx: &ConnectionContext,
    message_id: MessageId,
) -> Result<(), HandlerError> {
    let message = own_message(state, ctx, message_id).await?;

    let updated = state
        .store
        .delete_message(message.id, ctx.user_id())
        .await?;
    let deleted_at = updated.edited_at.unwrap_or_else(Utc::now);

    super::to_room(
        state,
        ctx.room(),
        ServerEvent::MessageDeleted {
            data: DeletedMessage {
                id: updated.id,
                deleted_at,
            },
        },
    );
    super::notify_if_absent(
        state,
        ctx.room(),
        updated.receiver_id,
        ServerEvent::Notification {
            kind: NotificationKind::MessageDeleted,
            conversation_id: ctx.room(),
            from_user_id: ctx.user_id(),
            message_id: updated.id,
            preview: None,
            sent_at: deleted_at,
        },
    );
    Ok(())
}

#[cfg(test)]
mod tests {
    use crate::store::ConversationStore;
    use crate::testing::Fixture;
    use murmur_protocol::{ClientEvent, ErrorCode, NotificationKind, ServerEvent};

    #[tokio::test]
    async fn test_edit_by_sender() {
        let fixture = Fixture::new();
        let mut alice = fixture.chat(fixture.alice);
        let mut bob_notes = fixture.notifications(fixture.bob);
        let message = fixture.seed_message(fixture.alice, "helo").await;

        alice
            .send(
                &fixture,
                ClientEvent::MessageEdit {
                    message_id: message.id,
                    content: "hello".into(),
                },
            )
            .await;

        assert!(matches!(
            &alice.drain()[..],
            [ServerEvent::MessageUpdated { data }] if data.content == "hello"
        ));
        assert!(matches!(
            &bob_notes.drain()[..],
            [ServerEvent::Notification {
                kind: NotificationKind::MessageEdited,
                preview: Some(p),
                ..
            }] if p == "hello"
        ));
    }

    #[tokio::test]
    async fn test_edit_by_receiver_is_denied() {
        let fixture = Fixture::new();
        let mut bob = fixture.chat(fixture.bob);
        let message = fixture.seed_message(fixture.alice, "hi").await;

        bob.send(
            &fixture,
            ClientEvent::MessageEdit {
                message_id: message.id,
                content: "mine now".into(),
            },
        )
        .await;

        assert!(matches!(
            &bob.drain()[..],
            [ServerEvent::Error { code: ErrorCode::AccessDenied, .. }]
        ));
        let stored = fixture.store.get_message(message.id).await.unwrap();
        assert_eq!(stored.content, "hi");
    }

    #[tokio::test]
    async fn test_delete_notifies_absent_receiver() {
        let fixture = Fixture::new();
        let mut alice = fixture.chat(fixture.alice);
        let mut bob_notes = fixture.notifications(fixture.bob);
        let message = fixture.seed_message(fixture.alice, "never mind").await;

        alice
            .send(&fixture, ClientEvent::MessageDelete { message_id: message.id })
            .await;

        assert!(matches!(
            &alice.drain()[..],
            [ServerEvent::MessageDeleted { data }] if data.id == message.id
        ));
        let notes = bob_notes.drain();
        assert!(matches!(
            &notes[..],
            [ServerEvent::Notification {
                kind: NotificationKind::MessageDeleted,
                preview: None,
                message_id,
                from_user_id,
                ..
            }] if *message_id == message.id && *from_user_id == fixture.alice
        ));
    }

    #[tokio::test]
    async fn test_delete_then_edit_is_rejected() {
        let fixture = Fixture::new();
        let mut alice = fixture.chat(fixture.alice);
        let mut bob = fixture.chat(fixture.bob);
        let mut bob_notes = fixture.notifications(fixture.bob);
        let message = fixture.seed_message(fixture.alice, "oops").await;

        alice
            .send(&fixture, ClientEvent::MessageDelete { message_id: message.id })
            .await;
        assert!(matches!(
            &bob.drain()[..],
            [ServerEvent::MessageDeleted { data }] if data.id == message.id
        ));
        // Bob is in the room, so no notification.
        assert!(bob_notes.drain().is_empty());

        alice
            .send(
                &fixture,
                ClientEvent::MessageEdit {
                    message_id: message.id,
                    content: "fixed".into(),
                },
            )
            .await;
        let replies = alice.drain();
        assert!(matches!(
            replies.last(),
            Some(ServerEvent::Error { code: ErrorCode::Validation, .. })
        ));
        assert!(bob.drain().is_empty());
    }
}
