//! Sending messages.

use murmur_protocol::{NotificationKind, ServerEvent};
use tracing::debug;

use crate::dispatch::ConnectionContext;
use crate::error::HandlerError;
use crate::state::AppState;

/// Persist a message, bump the receiver's unread counter and fan out.
///
/// # Errors
///
/// Returns [`HandlerError::Validation`] for blank content; nothing is
/// persisted or broadcast in that case.
pub async fn handle_send_message(
    state: &AppState,
    ctx: &ConnectionContext,
    content: &str,
) -> Result<(), HandlerError> {
    if content.trim().is_empty() {
        return Err(HandlerError::Validation(
            "message content cannot be empty".into(),
        ));
    }

    let room = ctx.room();
    let message = state
        .store
        .send_message(ctx.conversation(), ctx.user_id(), content)
        .await?;
    let receiver = message.receiver_id;
    let unread = state.store.increment_unread(room, receiver).await?;

    let delivered = super::to_room(
        state,
        room,
        ServerEvent::NewMessage {
            data: message.payload(),
        },
    );
    super::to_room(state, room, ServerEvent::unread(room, receiver, unread));

    let absent = super::notify_if_absent(
        state,
        room,
        receiver,
        ServerEvent::Notification {
            kind: NotificationKind::Message,
            conversation_id: room,
            from_user_id: message.sender_id,
            message_id: message.id,
            preview: Some(message.preview()),
            sent_at: message.sent_at,
        },
    );

    debug!(
        message = %message.id,
        %room,
        delivered,
        receiver_absent = absent,
        unread,
        "Message sent"
    );
    Ok(())
}
