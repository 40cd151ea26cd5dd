//! Event handlers, one module per event family.
//!
//! Handlers validate, persist through the store, then fan out through the
//! hub's broadcaster. They return a [`HandlerError`] instead of replying
//! themselves; the dispatcher reports it to the caller.

pub mod editing;
pub mod messaging;
pub mod receipts;
pub mod reconnect;
pub mod typing;

use murmur_core::RoomId;
use murmur_protocol::{MessageId, ServerEvent, UserId};

use crate::dispatch::ConnectionContext;
use crate::error::HandlerError;
use crate::metrics;
use crate::state::AppState;
use crate::store::StoredMessage;

/// Broadcast to a room and count the deliveries.
pub(crate) fn to_room(state: &AppState, room: RoomId, event: ServerEvent) -> usize {
    let delivered = state.hub.broadcaster().to_room(room, event);
    metrics::record_deliveries(delivered);
    delivered
}

/// Send on `user`'s notification channel unless one of their connections is
/// inside `room`.
///
/// Returns `true` if the user was absent.
pub(crate) fn notify_if_absent(
    state: &AppState,
    room: RoomId,
    user: UserId,
    event: ServerEvent,
) -> bool {
    if state.hub.registry().is_user_in_room(user, room) {
        return false;
    }
    let delivered = state.hub.broadcaster().notify(user, event);
    metrics::record_deliveries(delivered);
    true
}

/// Load a message that belongs to the connection's current conversation.
///
/// A message from any other conversation is reported as not found.
pub(crate) async fn message_in_conversation(
    state: &AppState,
    ctx: &ConnectionContext,
    id: MessageId,
) -> Result<StoredMessage, HandlerError> {
    let message = state.store.get_message(id).await?;
    if message.conversation_id != ctx.room() {
        return Err(HandlerError::NotFound("message"));
    }
    Ok(message)
}
