//! Event dispatch.
//!
//! The receive loop of each chat connection hands every decoded frame to
//! [`handle_frame`] and waits for it before reading the next one, so a
//! client's events are handled in the order it sent them.

use futures_util::FutureExt;
use murmur_core::{Admission, RoomId};
use murmur_protocol::{ClientEvent, ErrorCode, ProtocolError, ServerEvent, UserId};
use murmur_transport::ConnectionHandle;
use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::time::Instant;
use tracing::{debug, error, warn};

use crate::error::HandlerError;
use crate::events::{editing, messaging, receipts, reconnect, typing};
use crate::metrics;
use crate::state::AppState;
use crate::store::Conversation;

/// Per-connection state seen by handlers.
///
/// Owns the connection's [`Admission`], so dropping the context tears the
/// connection down.
#[derive(Debug)]
pub struct ConnectionContext {
    admission: Admission,
    conversation: Conversation,
}

impl ConnectionContext {
    /// Put an admitted connection inside `conversation`'s room.
    #[must_use]
    pub fn enter(admission: Admission, conversation: Conversation) -> Self {
        admission.join(conversation.id);
        Self {
            admission,
            conversation,
        }
    }

    #[must_use]
    pub fn handle(&self) -> &ConnectionHandle {
        self.admission.handle()
    }

    #[must_use]
    pub fn user_id(&self) -> UserId {
        self.admission.user_id()
    }

    #[must_use]
    pub fn conversation(&self) -> &Conversation {
        &self.conversation
    }

    /// The room this connection is in.
    #[must_use]
    pub fn room(&self) -> RoomId {
        self.conversation.id
    }

    /// Move to another conversation. A connection is in one room at a time.
    pub(crate) fn switch_to(&mut self, conversation: Conversation) {
        self.admission.move_to(conversation.id);
        self.conversation = conversation;
    }
}

/// What the receive loop should do after a frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Flow {
    Continue,
    Close,
}

/// Handle one inbound frame.
///
/// Decode failures and handler errors are reported to this connection only.
/// A handler that fails fatally or panics closes this connection and nothing
/// else.
pub async fn handle_frame(
    state: &AppState,
    ctx: &mut ConnectionContext,
    frame: Result<ClientEvent, ProtocolError>,
) -> Flow {
    let connection = ctx.handle().id();

    let event = match frame {
        Ok(event) => event,
        Err(e) => {
            warn!(%connection, error = %e, "Rejected frame");
            let reply = match e.event_name() {
                Some(name) => ServerEvent::error_for(e.code(), e.to_string(), name),
                None => ServerEvent::error(e.code(), e.to_string()),
            };
            report(state, ctx, e.code(), reply);
            return Flow::Continue;
        }
    };

    let kind = event.kind();
    metrics::record_event(kind.as_str());
    debug!(%connection, event = %kind, "Dispatching");

    let start = Instant::now();
    let outcome = AssertUnwindSafe(dispatch(state, ctx, event))
        .catch_unwind()
        .await;
    metrics::record_latency(start.elapsed().as_secs_f64());

    match outcome {
        Ok(Ok(())) => Flow::Continue,
        Ok(Err(e)) => {
            let code = e.code();
            report(
                state,
                ctx,
                code,
                ServerEvent::error_for(code, e.to_string(), kind.as_str()),
            );
            if e.is_fatal() {
                error!(
                    %connection,
                    event = %kind,
                    error = %e,
                    "Handler failed, closing connection"
                );
                Flow::Close
            } else {
                debug!(%connection, event = %kind, error = %e, "Handler rejected event");
                Flow::Continue
            }
        }
        Err(panic) => {
            error!(
                %connection,
                event = %kind,
                panic = panic_message(panic.as_ref()),
                "Handler panicked, closing connection"
            );
            report(
                state,
                ctx,
                ErrorCode::Internal,
                ServerEvent::error_for(ErrorCode::Internal, "internal error", kind.as_str()),
            );
            Flow::Close
        }
    }
}

/// Route an event to its handler.
///
/// # Errors
///
/// Returns the handler's error.
pub async fn dispatch(
    state: &AppState,
    ctx: &mut ConnectionContext,
    event: ClientEvent,
) -> Result<(), HandlerError> {
    match event {
        ClientEvent::TypingStart {} => typing::handle_typing(state, ctx, true),
        ClientEvent::TypingStop {} => typing::handle_typing(state, ctx, false),
        ClientEvent::SendMessage { content } => {
            messaging::handle_send_message(state, ctx, &content).await
        }
        ClientEvent::MessageDelivered { message_id } => {
            receipts::handle_message_delivered(state, ctx, message_id).await
        }
        ClientEvent::MessageRead { message_id } => {
            receipts::handle_message_read(state, ctx, message_id).await
        }
        ClientEvent::MessageEdit {
            message_id,
            content,
        } => editing::handle_edit_message(state, ctx, message_id, &content).await,
        ClientEvent::MessageDelete { message_id } => {
            editing::handle_delete_message(state, ctx, message_id).await
        }
        ClientEvent::Reconnect { last_message_at } => {
            reconnect::handle_reconnect(state, ctx, last_message_at).await
        }
        ClientEvent::ResumeConversation { conversation_id } => {
            reconnect::handle_resume_conversation(state, ctx, conversation_id).await
        }
    }
}

fn report(state: &AppState, ctx: &ConnectionContext, code: ErrorCode, reply: ServerEvent) {
    metrics::record_error(code.as_str());
    state.hub.broadcaster().reply(ctx.handle(), reply);
}

fn panic_message(payload: &(dyn Any + Send)) -> &str {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.as_str()
    } else {
        "unknown panic"
    }
}
