//! Protocol versioning for murmur.
//!
//! Every outbound envelope carries the major version as `v`. Inbound frames may
//! carry it too; frames that name a different major version are rejected.

/// Current protocol major version.
pub const PROTOCOL_VERSION: u8 = 1;

/// Check whether an inbound `v` field names the version this build speaks.
#[must_use]
pub fn is_supported(v: u64) -> bool {
    v == u64::from(PROTOCOL_VERSION)
}
