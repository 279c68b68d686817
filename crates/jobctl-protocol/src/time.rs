//! Time deltas and timestamps on the wire.
//!
//! Backends and callers disagree on how they spell time. A duration may
//! arrive as `600`, `600.0`, `"600"`, `"00:10:00"` or `"1-00:00:00"`; a
//! timestamp as `2024-01-15T10:30:00`, with fractional seconds, or with a
//! UTC offset. The helpers here accept all of them and always emit one
//! canonical form.

use std::time::Duration;

use chrono::{DateTime, NaiveDateTime};
use serde::{Deserialize, Deserializer, Serializer};

use crate::error::CodecError;

/// Layout of timestamps in flat records: `YYYY-MM-DD HH:MM:SS`.
pub const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// Layout of timestamps inside status snapshots.
pub const ISO_TIMESTAMP_FORMAT: &str = "%Y-%m-%dT%H:%M:%S";

const NAIVE_LAYOUTS: [&str; 4] = [
    "%Y-%m-%dT%H:%M:%S%.f",
    "%Y-%m-%dT%H:%M:%S",
    "%Y-%m-%d %H:%M:%S%.f",
    "%Y-%m-%d %H:%M:%S",
];

/// Number-or-string wire value.
#[derive(Deserialize)]
#[serde(untagged)]
enum Lenient {
    Int(i64),
    Float(f64),
    Text(String),
}

/// Parse a `[D-]HH:MM:SS` or `MM:SS` clock value into seconds.
pub fn parse_clock(value: &str) -> Option<u64> {
    let (days, rest) = match value.split_once('-') {
        Some((days, rest)) => (days.parse::<u64>().ok()?, rest),
        None => (0, value),
    };

    let parts = rest
        .split(':')
        .map(|p| p.parse::<u64>())
        .collect::<Result<Vec<_>, _>>()
        .ok()?;

    let (h, m, s) = match parts.as_slice() {
        [h, m, s] => (*h, *m, *s),
        [m, s] => (0, *m, *s),
        _ => return None,
    };

    days.checked_mul(86_400)?
        .checked_add(h.checked_mul(3600)?)?
        .checked_add(m.checked_mul(60)?)?
        .checked_add(s)
}

fn seconds_to_duration(seconds: f64) -> Option<Duration> {
    if seconds >= 0.0 {
        Duration::try_from_secs_f64(seconds).ok()
    } else {
        None
    }
}

/// Parse a duration given either as seconds or as a clock value.
pub fn parse_duration(value: &str) -> Result<Duration, CodecError> {
    let trimmed = value.trim();
    if let Ok(seconds) = trimmed.parse::<f64>() {
        return seconds_to_duration(seconds)
            .ok_or_else(|| CodecError::InvalidDuration(value.to_string()));
    }
    parse_clock(trimmed)
        .map(Duration::from_secs)
        .ok_or_else(|| CodecError::InvalidDuration(value.to_string()))
}

/// Parse a whole-seconds counter, truncating fractional values.
pub fn parse_seconds(value: &str) -> Result<i64, CodecError> {
    let trimmed = value.trim();
    if let Ok(seconds) = trimmed.parse::<i64>() {
        return Ok(seconds);
    }
    if let Ok(seconds) = trimmed.parse::<f64>() {
        if seconds.is_finite() {
            return Ok(seconds.trunc() as i64);
        }
    }
    parse_clock(trimmed)
        .and_then(|s| i64::try_from(s).ok())
        .ok_or_else(|| CodecError::InvalidSeconds(value.to_string()))
}

/// Parse a timestamp in any accepted layout. Offsets are dropped after
/// converting to the wall-clock time they name.
pub fn parse_timestamp(value: &str) -> Result<NaiveDateTime, CodecError> {
    let trimmed = value.trim();
    for layout in NAIVE_LAYOUTS {
        if let Ok(ts) = NaiveDateTime::parse_from_str(trimmed, layout) {
            return Ok(ts);
        }
    }
    DateTime::parse_from_rfc3339(trimmed)
        .map(|dt| dt.naive_local())
        .map_err(|_| CodecError::InvalidTimestamp(value.to_string()))
}

/// Format a timestamp as `YYYY-MM-DD HH:MM:SS`.
pub fn format_timestamp(ts: &NaiveDateTime) -> String {
    ts.format(TIMESTAMP_FORMAT).to_string()
}

/// Serde adapter: `Duration` as float seconds, lenient on input.
pub mod duration_secs {
    use super::*;

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_f64(value.as_secs_f64())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        let parsed = match Lenient::deserialize(deserializer)? {
            Lenient::Int(n) => u64::try_from(n).ok().map(Duration::from_secs),
            Lenient::Float(f) => seconds_to_duration(f),
            Lenient::Text(s) => parse_duration(&s).ok(),
        };
        parsed.ok_or_else(|| serde::de::Error::custom("duration must be non-negative seconds or [D-]HH:MM:SS"))
    }
}

/// Serde adapter: integer seconds, coerced from floats and numeric strings.
pub mod lenient_secs {
    use super::*;

    pub fn serialize<S: Serializer>(value: &i64, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_i64(*value)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<i64, D::Error> {
        coerce(Lenient::deserialize(deserializer)?).map_err(serde::de::Error::custom)
    }

    pub(super) fn coerce(value: Lenient) -> Result<i64, CodecError> {
        match value {
            Lenient::Int(n) => Ok(n),
            Lenient::Float(f) if f.is_finite() => Ok(f.trunc() as i64),
            Lenient::Float(f) => Err(CodecError::InvalidSeconds(f.to_string())),
            Lenient::Text(s) => parse_seconds(&s),
        }
    }
}

/// Serde adapter: optional integer seconds.
pub mod opt_lenient_secs {
    use super::*;

    pub fn serialize<S: Serializer>(value: &Option<i64>, serializer: S) -> Result<S::Ok, S::Error> {
        match value {
            Some(v) => serializer.serialize_some(v),
            None => serializer.serialize_none(),
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Option<i64>, D::Error> {
        Option::<Lenient>::deserialize(deserializer)?
            .map(lenient_secs::coerce)
            .transpose()
            .map_err(serde::de::Error::custom)
    }
}

/// Serde adapter: optional timestamp, ISO-8601 on output.
pub mod opt_timestamp {
    use super::*;

    pub fn serialize<S: Serializer>(
        value: &Option<NaiveDateTime>,
        serializer: S,
    ) -> Result<S::Ok, S::Error> {
        match value {
            Some(ts) => serializer.serialize_str(&ts.format(ISO_TIMESTAMP_FORMAT).to_string()),
            None => serializer.serialize_none(),
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(
        deserializer: D,
    ) -> Result<Option<NaiveDateTime>, D::Error> {
        Option::<String>::deserialize(deserializer)?
            .map(|s| parse_timestamp(&s))
            .transpose()
            .map_err(serde::de::Error::custom)
    }
}
