//! WebSocket framing.
//!
//! Maps murmur envelopes onto axum WebSocket messages and runs the writer
//! task that owns the sending half of a socket.

use axum::extract::ws::Message;
use futures_util::{Sink, SinkExt};
use murmur_protocol::{codec, ClientEvent, Envelope, ProtocolError};
use serde::Deserialize;
use std::fmt::Display;
use tracing::{debug, warn};

use crate::connection::{CloseSignal, ConnectionId, Outbound, OutboundReceiver};

/// Serialization used for outbound frames on one connection.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Encoding {
    /// JSON in text frames.
    #[default]
    Json,
    /// MessagePack in binary frames.
    #[serde(rename = "msgpack")]
    MessagePack,
}

/// Encode an envelope as a WebSocket message.
///
/// # Errors
///
/// Returns an error if serialization fails.
pub fn encode(envelope: &Envelope, encoding: Encoding) -> Result<Message, ProtocolError> {
    match encoding {
        Encoding::Json => codec::encode_json(envelope).map(Message::Text),
        Encoding::MessagePack => {
            codec::encode_msgpack(envelope).map(|b| Message::Binary(b.to_vec()))
        }
    }
}

/// What an inbound WebSocket message turned out to be.
#[derive(Debug)]
pub enum Inbound {
    /// A client event, or the reason it could not be decoded.
    Event(Result<ClientEvent, ProtocolError>),
    /// The peer answered a ping.
    Pong,
    /// The peer is closing the socket.
    Close,
    /// Control traffic with nothing to do.
    Ignored,
}

/// Classify an inbound WebSocket message.
#[must_use]
pub fn decode(message: &Message) -> Inbound {
    match message {
        Message::Text(text) => Inbound::Event(codec::decode_text(text)),
        Message::Binary(data) => Inbound::Event(codec::decode_binary(data)),
        Message::Pong(_) => Inbound::Pong,
        Message::Close(_) => Inbound::Close,
        Message::Ping(_) => Inbound::Ignored,
    }
}

/// Drain a connection's outbound queue into the socket.
///
/// This is the only task that writes to the socket. It exits when the queue
/// yields [`Outbound::Close`], when every sender is gone, when a write fails,
/// or when an envelope cannot be encoded. On exit the close signal is
/// triggered so the receive loop tears the connection down.
pub async fn write_loop<S>(
    mut sink: S,
    mut rx: OutboundReceiver,
    encoding: Encoding,
    close: CloseSignal,
    connection: ConnectionId,
) where
    S: Sink<Message> + Unpin,
    S::Error: Display,
{
    while let Some(frame) = rx.recv().await {
        let message = match frame {
            Outbound::Event(envelope) => match encode(&envelope, encoding) {
                Ok(message) => message,
                Err(e) => {
                    warn!(
                        %connection,
                        event = envelope.event.name(),
                        error = %e,
                        "Failed to encode frame"
                    );
                    break;
                }
            },
            Outbound::Ping(payload) => Message::Ping(payload),
            Outbound::Close => {
                let _ = sink.send(Message::Close(None)).await;
                break;
            }
        };

        if let Err(e) = sink.send(message).await {
            debug!(%connection, error = %e, "Socket write failed");
            break;
        }
    }

    rx.close();
    close.trigger();
    debug!(%connection, "Writer stopped");
}
