//! Identifier aliases and timestamp helpers shared by the wire types.

use chrono::{DateTime, NaiveDateTime, Utc};
use uuid::Uuid;

/// A user identity, as resolved by the auth verifier.
pub type UserId = Uuid;

/// A two-party conversation identifier. Doubles as the room id.
pub type ConversationId = Uuid;

/// A persisted message identifier.
pub type MessageId = Uuid;

/// Wall-clock timestamp used on the wire.
pub type Timestamp = DateTime<Utc>;

/// Parse a client supplied timestamp.
///
/// Accepts RFC 3339, `YYYY-MM-DD HH:MM:SS[.fff][+HH:MM]`, and the bare
/// `YYYY-MM-DD HH:MM:SS` form, which is taken as UTC.
///
/// # Errors
///
/// Returns a description of the input if no format matches.
pub fn parse_timestamp(raw: &str) -> Result<Timestamp, String> {
    let raw = raw.trim();
    if let Ok(ts) = DateTime::parse_from_rfc3339(raw) {
        return Ok(ts.with_timezone(&Utc));
    }
    if let Ok(ts) = DateTime::parse_from_str(raw, "%Y-%m-%d %H:%M:%S%.f%:z") {
        return Ok(ts.with_timezone(&Utc));
    }
    for format in ["%Y-%m-%d %H:%M:%S%.f", "%Y-%m-%d %H:%M:%S"] {
        if let Ok(naive) = NaiveDateTime::parse_from_str(raw, format) {
            return Ok(naive.and_utc());
        }
    }
    Err(format!("unrecognized timestamp: {raw:?}"))
}

/// Serde adapter for timestamps coming from clients.
pub mod lenient_timestamp {
    use super::{parse_timestamp, Timestamp};
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(ts: &Timestamp, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&ts.to_rfc3339())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Timestamp, D::Error> {
        let raw = String::deserialize(deserializer)?;
        parse_timestamp(&raw).map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_parse_rfc3339() {
        let ts = parse_timestamp("2024-03-01T10:15:00+02:00").unwrap();
        assert_eq!(ts, Utc.with_ymd_and_hms(2024, 3, 1, 8, 15, 0).unwrap());
    }

    #[test]
    fn test_parse_space_separated() {
        let ts = parse_timestamp("2024-03-01 10:15:00").unwrap();
        assert_eq!(ts, Utc.with_ymd_and_hms(2024, 3, 1, 10, 15, 0).unwrap());

        let with_offset = parse_timestamp("2024-03-01 10:15:00.250000+00:00").unwrap();
        assert_eq!(with_offset.timestamp(), ts.timestamp());
    }

    #[test]
    fn test_parse_rejects_garbage() {
        assert!(parse_timestamp("yesterday").is_err());
        assert!(parse_timestamp("").is_err());
    }
}
