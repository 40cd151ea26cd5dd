//! Delivery and read receipts.

use chrono::Utc;
use murmur_protocol::{DeliveryReceipt, MessageId, NotificationKind, ReadReceipt, ServerEvent};

use crate::dispatch::ConnectionContext;
use crate::error::HandlerError;
use crate::state::AppState;

/// Mark a message delivered. Only its receiver may do this.
pub async fn handle_message_delivered(
    state: &AppState,
    ctx: &ConnectionContext,
    message_id: MessageId,
) -> Result<(), HandlerError> {
    let message = super::message_in_conversation(state, ctx, message_id).await?;
    if message.receiver_id != ctx.user_id() {
        return Err(HandlerError::AccessDenied(
            "only the receiver can acknowledge delivery".into(),
        ));
    }

    let updated = state.store.mark_delivered(message.id, ctx.user_id()).await?;
    super::to_room(
        state,
        ctx.room(),
        ServerEvent::MessageDelivered {
            data: DeliveryReceipt {
                message_id: updated.id,
                delivered_at: updated.delivered_at.unwrap_or_else(Utc::now),
            },
        },
    );
    Ok(())
}

/// Mark a message read and clear the caller's unread counter.
///
/// With `receipts.read_requires_receiver` set only the receiver may do this;
/// otherwise any participant may.
pub async fn handle_message_read(
    state: &AppState,
    ctx: &ConnectionContext,
    message_id: MessageId,
) -> Result<(), HandlerError> {
    let user = ctx.user_id();
    let room = ctx.room();
    let message = super::message_in_conversation(state, ctx, message_id).await?;

    if state.config.receipts.read_requires_receiver && message.receiver_id != user {
        return Err(HandlerError::AccessDenied(
            "only the receiver can mark a message read".into(),
        ));
    }

    let updated = state.store.mark_read(message.id, user).await?;
    state.store.reset_unread(room, user).await?;
    let read_at = updated.read_at.unwrap_or_else(Utc::now);

    super::to_room(
        state,
        room,
        ServerEvent::MessageRead {
            data: ReadReceipt {
                message_id: updated.id,
                read_at,
            },
        },
    );
    super::to_room(state, room, ServerEvent::unread(room, user, 0));

    if updated.sender_id != user {
        super::notify_if_absent(
            state,
            room,
            updated.sender_id,
            ServerEvent::Notification {
                kind: NotificationKind::MessageRead,
                conversation_id: room,
                from_user_id: user,
                message_id: updated.id,
                preview: None,
                sent_at: read_at,
            },
        );
    }
    Ok(())
}
