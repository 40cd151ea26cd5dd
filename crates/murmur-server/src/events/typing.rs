//! Typing indicators. Nothing is persisted.

use murmur_protocol::ServerEvent;

use crate::dispatch::ConnectionContext;
use crate::error::HandlerError;
use crate::state::AppState;

pub fn handle_typing(
    state: &AppState,
    ctx: &ConnectionContext,
    is_typing: bool,
) -> Result<(), HandlerError> {
    super::to_room(
        state,
        ctx.room(),
        ServerEvent::Typing {
            conversation_id: ctx.room(),
            user_id: ctx.user_id(),
            is_typing,
        },
    );
    Ok(())
}
