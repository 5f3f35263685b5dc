//! Synchronization watermark.

use crate::error::{ProtocolError, ProtocolResult};
use chrono::{DateTime, NaiveDate, NaiveDateTime, SecondsFormat, Utc};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;

/// A point on the server's write clock, in Unix milliseconds.
///
/// Every row written during ingestion is stamped with the server's current
/// watermark. A pull with `since = w` returns rows whose stamp is strictly
/// greater than `w`.
///
/// On the wire a watermark serializes as an integer number of milliseconds.
/// Decoding is lenient: integers, numeric strings, RFC 3339 timestamps,
/// naive `YYYY-MM-DDTHH:MM:SS` (read as UTC) and bare dates are accepted.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct Watermark(i64);

impl Watermark {
    /// The beginning of time; a pull from here is a full snapshot.
    pub const ORIGIN: Watermark = Watermark(0);

    /// Creates a watermark from Unix milliseconds.
    #[inline]
    #[must_use]
    pub const fn from_millis(millis: i64) -> Self {
        Self(millis)
    }

    /// Returns the watermark as Unix milliseconds.
    #[inline]
    #[must_use]
    pub const fn as_millis(&self) -> i64 {
        self.0
    }

    /// Reads the wall clock.
    #[must_use]
    pub fn now() -> Self {
        Self(Utc::now().timestamp_millis())
    }

    /// Returns the next watermark strictly after this one.
    #[must_use]
    pub const fn next(&self) -> Self {
        Self(self.0.saturating_add(1))
    }

    /// Renders the watermark as an RFC 3339 UTC timestamp with milliseconds.
    #[must_use]
    pub fn to_rfc3339(&self) -> String {
        DateTime::<Utc>::from_timestamp_millis(self.0)
            .unwrap_or_default()
            .to_rfc3339_opts(SecondsFormat::Millis, true)
    }

    /// Parses a textual watermark.
    pub fn parse(text: &str) -> ProtocolResult<Self> {
        let text = text.trim();
        if text.is_empty() {
            return Err(ProtocolError::InvalidWatermark("empty string".into()));
        }

        if let Ok(millis) = text.parse::<i64>() {
            return Ok(Self(millis));
        }

        if let Ok(dt) = DateTime::parse_from_rfc3339(text) {
            return Ok(Self(dt.timestamp_millis()));
        }

        for format in ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S%.f"] {
            if let Ok(naive) = NaiveDateTime::parse_from_str(text, format) {
                return Ok(Self(naive.and_utc().timestamp_millis()));
            }
        }

        if let Ok(date) = NaiveDate::parse_from_str(text, "%Y-%m-%d") {
            if let Some(midnight) = date.and_hms_opt(0, 0, 0) {
                return Ok(Self(midnight.and_utc().timestamp_millis()));
            }
        }

        Err(ProtocolError::InvalidWatermark(text.to_string()))
    }
}

impl fmt::Debug for Watermark {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Watermark({})", self.0)
    }
}

impl fmt::Display for Watermark {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_rfc3339())
    }
}

impl From<i64> for Watermark {
    fn from(millis: i64) -> Self {
        Self(millis)
    }
}

impl Serialize for Watermark {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_i64(self.0)
    }
}

#[derive(Deserialize)]
#[serde(untagged)]
enum WatermarkRepr {
    Millis(i64),
    Float(f64),
    Text(String),
}

impl<'de> Deserialize<'de> for Watermark {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        match WatermarkRepr::deserialize(deserializer)? {
            WatermarkRepr::Millis(millis) => Ok(Self(millis)),
            WatermarkRepr::Float(value) if value.is_finite() => Ok(Self(value as i64)),
            WatermarkRepr::Float(value) => Err(serde::de::Error::custom(format!(
                "invalid watermark: {value}"
            ))),
            WatermarkRepr::Text(text) => Self::parse(&text).map_err(serde::de::Error::custom),
        }
    }
}
