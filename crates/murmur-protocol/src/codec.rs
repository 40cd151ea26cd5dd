//! Codec for encoding and decoding murmur frames.
//!
//! Text WebSocket frames carry JSON, binary frames carry MessagePack. Both
//! decode through a `serde_json::Value` so that the event name can be checked
//! against [`EventKind`] before the fields are parsed.

use bytes::Bytes;
use serde::Serialize;
use serde_json::Value;
use thiserror::Error;

use crate::events::{ClientEvent, EventKind};
use crate::outbound::{Envelope, ErrorCode};
use crate::version;

/// Protocol errors that can occur during encoding/decoding.
#[derive(Debug, Error)]
pub enum ProtocolError {
    /// The frame names an event this server does not handle.
    #[error("Unknown event: {0}")]
    UnknownEvent(String),

    /// The frame has no string `event` field.
    #[error("Frame has no event name")]
    MissingEvent,

    /// The event name is known but its fields do not parse.
    #[error("Malformed {kind} event: {reason}")]
    Malformed { kind: EventKind, reason: String },

    /// The frame names an incompatible protocol version.
    #[error("Unsupported protocol version: {0}")]
    UnsupportedVersion(u64),

    /// JSON encoding or decoding error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// MessagePack encoding error.
    #[error("Encoding error: {0}")]
    Encode(#[from] rmp_serde::encode::Error),

    /// MessagePack decoding error.
    #[error("Decoding error: {0}")]
    Decode(#[from] rmp_serde::decode::Error),

    /// Invalid frame data.
    #[error("Invalid frame: {0}")]
    Invalid(String),
}

impl ProtocolError {
    /// The error code reported to the client for this failure.
    #[must_use]
    pub fn code(&self) -> ErrorCode {
        match self {
            ProtocolError::UnknownEvent(_) => ErrorCode::UnknownEvent,
            ProtocolError::UnsupportedVersion(_) => ErrorCode::UnsupportedVersion,
            ProtocolError::Encode(_) => ErrorCode::Internal,
            _ => ErrorCode::MalformedEvent,
        }
    }

    /// The client event name this error refers to, when known.
    #[must_use]
    pub fn event_name(&self) -> Option<String> {
        match self {
            ProtocolError::UnknownEvent(name) => Some(name.clone()),
            ProtocolError::Malformed { kind, .. } => Some(kind.as_str().to_string()),
            _ => None,
        }
    }
}

/// Decode a JSON text frame.
///
/// # Errors
///
/// Returns an error if the text is not JSON or does not describe a known event.
pub fn decode_text(text: &str) -> Result<ClientEvent, ProtocolError> {
    let value: Value = serde_json::from_str(text)?;
    decode_value(value)
}

/// Decode a MessagePack binary frame.
///
/// # Errors
///
/// Returns an error if the data is not MessagePack or does not describe a known event.
pub fn decode_binary(data: &[u8]) -> Result<ClientEvent, ProtocolError> {
    let value: Value = rmp_serde::from_slice(data)?;
    decode_value(value)
}

/// Decode an already parsed frame.
///
/// # Errors
///
/// Returns an error if the value is not an object, names an unknown event or
/// an incompatible version, or its fields do not match the event.
pub fn decode_value(value: Value) -> Result<ClientEvent, ProtocolError> {
    let object = value
        .as_object()
        .ok_or_else(|| ProtocolError::Invalid("expected an object".into()))?;

    if let Some(v) = object.get("v") {
        let v = v
            .as_u64()
            .ok_or_else(|| ProtocolError::Invalid("`v` must be an unsigned integer".into()))?;
        if !version::is_supported(v) {
            return Err(ProtocolError::UnsupportedVersion(v));
        }
    }

    let name = object
        .get("event")
        .and_then(Value::as_str)
        .ok_or(ProtocolError::MissingEvent)?;
    let kind =
        EventKind::from_name(name).ok_or_else(|| ProtocolError::UnknownEvent(name.to_string()))?;

    serde_json::from_value(value).map_err(|e| ProtocolError::Malformed {
        kind,
        reason: e.to_string(),
    })
}

/// Encode an envelope as a JSON text frame.
///
/// # Errors
///
/// Returns an error if serialization fails.
pub fn encode_json(envelope: &Envelope) -> Result<String, ProtocolError> {
    Ok(serde_json::to_string(envelope)?)
}

/// Encode an envelope as a MessagePack binary frame.
///
/// Structs are written as named maps and identifiers as strings, so the
/// shape matches the JSON encoding.
///
/// # Errors
///
/// Returns an error if serialization fails.
pub fn encode_msgpack(envelope: &Envelope) -> Result<Bytes, ProtocolError> {
    let mut buf = Vec::with_capacity(128);
    let mut serializer = rmp_serde::Serializer::new(&mut buf)
        .with_struct_map()
        .with_human_readable();
    envelope.serialize(&mut serializer)?;
    Ok(Bytes::from(buf))
}
