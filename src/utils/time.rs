//! RFC 3339 (de)serialization for transcript timestamps.
//!
//! Use with `#[serde(with = "crate::utils::time")]`.  Timestamps are written in UTC, so any
//! offset is accepted; years outside 0000 through 9999 cannot be written.

use serde::{Deserialize, Deserializer, Serializer};
use time::{OffsetDateTime, UtcOffset};
use time::format_description::well_known::Rfc3339;

/// Parses an RFC 3339 string into an `OffsetDateTime`.
pub fn deserialize<'de, D>(deserializer: D) -> Result<OffsetDateTime, D::Error>
where
    D: Deserializer<'de>,
{
    let text = String::deserialize(deserializer)?;
    OffsetDateTime::parse(&text, &Rfc3339).map_err(serde::de::Error::custom)
}

/// Writes an `OffsetDateTime` as an RFC 3339 string in UTC.
pub fn serialize<S>(timestamp: &OffsetDateTime, serializer: S) -> Result<S::Ok, S::Error>
where
    S: Serializer,
{
    let text = timestamp
        .checked_to_offset(UtcOffset::UTC)
        .ok_or_else(|| serde::ser::Error::custom("timestamp out of range"))?
        .format(&Rfc3339)
        .map_err(serde::ser::Error::custom)?;
    serializer.serialize_str(&text)
}
