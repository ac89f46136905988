//! Client wall-clock timestamps.
//!
//! Clients send and receive times as `YYYY/MM/DD hh:mm:ss` in the meeting's
//! local time zone, with no offset in the string itself. The offset is a
//! deployment setting, so parsing and formatting always take a
//! [`FixedOffset`].

use chrono::{DateTime, FixedOffset, NaiveDateTime, TimeZone, Utc};
use thiserror::Error;

/// `strftime` layout of client timestamps.
pub const LOCAL_TIMESTAMP_LAYOUT: &str = "%Y/%m/%d %H:%M:%S";

/// Offset used when none is configured (Asia/Tokyo, UTC+9).
pub const DEFAULT_UTC_OFFSET_MINUTES: i32 = 9 * 60;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum TimestampError {
    #[error("timestamp '{0}' does not match YYYY/MM/DD hh:mm:ss")]
    Layout(String),

    #[error("offset of {0} minutes is out of range")]
    Offset(i32),

    #[error("timestamp '{0}' does not exist in the configured offset")]
    Ambiguous(String),
}

/// Build a [`FixedOffset`] east of UTC from a minute count.
pub fn offset_from_minutes(minutes: i32) -> Result<FixedOffset, TimestampError> {
    minutes
        .checked_mul(60)
        .and_then(FixedOffset::east_opt)
        .ok_or(TimestampError::Offset(minutes))
}

/// Parse a client timestamp interpreted in `offset`, returning UTC.
pub fn parse_local(value: &str, offset: FixedOffset) -> Result<DateTime<Utc>, TimestampError> {
    let naive = NaiveDateTime::parse_from_str(value.trim(), LOCAL_TIMESTAMP_LAYOUT)
        .map_err(|_| TimestampError::Layout(value.to_string()))?;

    offset
        .from_local_datetime(&naive)
        .single()
        .map(|local| local.with_timezone(&Utc))
        .ok_or_else(|| TimestampError::Ambiguous(value.to_string()))
}

/// Format a UTC instant in the client layout for `offset`.
#[must_use]
pub fn format_local(instant: DateTime<Utc>, offset: FixedOffset) -> String {
    instant
        .with_timezone(&offset)
        .format(LOCAL_TIMESTAMP_LAYOUT)
        .to_string()
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use chrono::Timelike;

    fn tokyo() -> FixedOffset {
        offset_from_minutes(DEFAULT_UTC_OFFSET_MINUTES).unwrap()
    }

    #[test]
    fn test_parse_local_applies_offset() {
        let parsed = parse_local("2024/04/01 10:30:00", tokyo()).unwrap();

        assert_eq!(parsed.hour(), 1);
        assert_eq!(parsed.minute(), 30);
        assert_eq!(format_local(parsed, tokyo()), "2024/04/01 10:30:00");
    }

    #[test]
    fn test_parse_local_rejects_other_layouts() {
        let result = parse_local("2024-04-01T10:30:00", tokyo());
        assert!(matches!(result, Err(TimestampError::Layout(_))));

        let result = parse_local("", tokyo());
        assert!(matches!(result, Err(TimestampError::Layout(_))));
    }

    #[test]
    fn test_offset_out_of_range() {
        assert_eq!(
            offset_from_minutes(24 * 60),
            Err(TimestampError::Offset(24 * 60))
        );
        assert!(offset_from_minutes(-5 * 60).is_ok());
    }
}
