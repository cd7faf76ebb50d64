//! Timestamp normalization.
//!
//! Upstream records carry timestamps in three shapes: nothing at all, an
//! all-digit string that is already epoch milliseconds, or a free-text
//! calendar date/time. The CRM expects epoch milliseconds (UTC) for every
//! date property, so everything is normalized here.

use chrono::{DateTime, NaiveDate, NaiveDateTime, TimeZone, Utc};
use chrono_tz::Tz;

/// Error type for timestamp normalization.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TimeParseError {
    /// Value is not empty, not numeric and not a recognized date/time layout
    #[error("Unrecognized date/time value: '{0}'")]
    Unrecognized(String),

    /// All-digit value that does not fit in an i64
    #[error("Epoch value out of range: '{0}'")]
    OutOfRange(String),

    /// Wall-clock time that does not exist in the zone (DST gap)
    #[error("Local time '{value}' does not exist in {zone}")]
    NonexistentLocalTime { value: String, zone: String },
}

/// Date/time layouts accepted for free-text values, tried in order.
///
/// Day-first slash dates follow the LMS export format (`24/11/2021, 14:53:44`).
const DATETIME_FORMATS: &[&str] = &[
    "%Y-%m-%dT%H:%M:%S",
    "%Y-%m-%d %H:%M:%S",
    "%Y-%m-%dT%H:%M:%S%.f",
    "%Y-%m-%dT%H:%M",
    "%Y-%m-%d %H:%M:%S%.f",
    "%Y-%m-%d %H:%M",
    "%d/%m/%Y, %H:%M:%S",
    "%d/%m/%Y %H:%M:%S",
    "%d/%m/%Y, %H:%M",
    "%d/%m/%Y %H:%M",
];

const DATE_FORMATS: &[&str] = &["%Y-%m-%d", "%d/%m/%Y"];

/// Normalize a raw upstream timestamp to epoch milliseconds (UTC).
///
/// - empty or whitespace-only: `Ok(None)`, excluded from comparisons
/// - all digits: already epoch milliseconds, returned as-is
/// - anything else: parsed as a calendar date/time; values without an offset
///   are taken as UTC
///
/// # Example
/// ```
/// use sync_core::to_unix_millis;
///
/// assert_eq!(to_unix_millis("").unwrap(), None);
/// assert_eq!(to_unix_millis("1700000000000").unwrap(), Some(1_700_000_000_000));
/// assert_eq!(to_unix_millis("2024-03-01T10:00:00").unwrap(), Some(1_709_287_200_000));
/// ```
pub fn to_unix_millis(raw: &str) -> Result<Option<i64>, TimeParseError> {
    let value = raw.trim();
    if value.is_empty() {
        return Ok(None);
    }

    if value.bytes().all(|b| b.is_ascii_digit()) {
        return value
            .parse::<i64>()
            .map(Some)
            .map_err(|_| TimeParseError::OutOfRange(value.to_string()));
    }

    if let Ok(dt) = DateTime::parse_from_rfc3339(value) {
        return Ok(Some(dt.with_timezone(&Utc).timestamp_millis()));
    }

    let naive = parse_naive(value)?;
    Ok(Some(naive.and_utc().timestamp_millis()))
}

/// [`to_unix_millis`] over an optional field.
pub fn opt_unix_millis(raw: Option<&str>) -> Result<Option<i64>, TimeParseError> {
    match raw {
        Some(value) => to_unix_millis(value),
        None => Ok(None),
    }
}

/// A live-session datetime resolved in its local zone.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionDateTime {
    /// The instant in epoch milliseconds (UTC)
    pub epoch_millis: i64,
    /// Wall-clock time with zone abbreviation, e.g. `18:30:00 EDT`
    pub session_time: String,
}

/// Interpret a wall-clock datetime in `zone` and convert it to UTC.
///
/// Values that already carry an offset keep their instant; only the
/// `session_time` string is rendered in `zone`. Ambiguous local times (the
/// repeated hour when DST ends) resolve to the later instant, i.e. standard
/// time.
pub fn localize_session_datetime(raw: &str, zone: Tz) -> Result<SessionDateTime, TimeParseError> {
    let value = raw.trim();

    let local = if let Ok(dt) = DateTime::parse_from_rfc3339(value) {
        dt.with_timezone(&zone)
    } else {
        let naive = parse_naive(value)?;
        zone.from_local_datetime(&naive)
            .latest()
            .ok_or_else(|| TimeParseError::NonexistentLocalTime {
                value: value.to_string(),
                zone: zone.name().to_string(),
            })?
    };

    Ok(SessionDateTime {
        epoch_millis: local.with_timezone(&Utc).timestamp_millis(),
        session_time: local.format("%H:%M:%S %Z").to_string(),
    })
}

/// Midnight UTC of `date` in epoch milliseconds (CRM date properties).
pub fn midnight_millis(date: NaiveDate) -> i64 {
    date.and_hms_opt(0, 0, 0)
        .map(|dt| dt.and_utc().timestamp_millis())
        .unwrap_or_default()
}

fn parse_naive(value: &str) -> Result<NaiveDateTime, TimeParseError> {
    for format in DATETIME_FORMATS {
        if let Ok(dt) = NaiveDateTime::parse_from_str(value, format) {
            return Ok(dt);
        }
    }
    for format in DATE_FORMATS {
        if let Ok(date) = NaiveDate::parse_from_str(value, format) {
            if let Some(dt) = date.and_hms_opt(0, 0, 0) {
                return Ok(dt);
            }
        }
    }
    Err(TimeParseError::Unrecognized(value.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_is_none() {
        assert_eq!(to_unix_millis("").unwrap(), None);
        assert_eq!(to_unix_millis("   ").unwrap(), None);
        assert_eq!(opt_unix_millis(None).unwrap(), None);
    }

    #[test]
    fn test_all_digits_are_millis() {
        assert_eq!(
            to_unix_millis("1700000000000").unwrap(),
            Some(1_700_000_000_000)
        );
        assert_eq!(to_unix_millis("0").unwrap(), Some(0));
    }

    #[test]
    fn test_digits_out_of_range() {
        let err = to_unix_millis("99999999999999999999999").unwrap_err();
        assert!(matches!(err, TimeParseError::OutOfRange(_)));
    }

    #[test]
    fn test_iso_datetime_without_offset_is_utc() {
        assert_eq!(
            to_unix_millis("2024-03-01T10:00:00").unwrap(),
            Some(1_709_287_200_000)
        );
        assert_eq!(
            to_unix_millis("2024-03-01 10:00:00").unwrap(),
            Some(1_709_287_200_000)
        );
    }

    #[test]
    fn test_rfc3339_with_offset() {
        assert_eq!(
            to_unix_millis("2024-03-01T12:00:00+02:00").unwrap(),
            Some(1_709_287_200_000)
        );
    }

    #[test]
    fn test_day_first_lms_format() {
        assert_eq!(
            to_unix_millis("01/03/2024, 10:00:00").unwrap(),
            Some(1_709_287_200_000)
        );
        assert_eq!(to_unix_millis("2024-03-01").unwrap(), Some(1_709_251_200_000));
    }

    #[test]
    fn test_unrecognized_text() {
        let err = to_unix_millis("next tuesday").unwrap_err();
        assert_eq!(err, TimeParseError::Unrecognized("next tuesday".to_string()));
    }

    #[test]
    fn test_localize_session_daylight_saving() {
        let session =
            localize_session_datetime("2024-07-10 18:30:00", chrono_tz::US::Eastern).unwrap();
        // 18:30 EDT == 22:30 UTC
        assert_eq!(session.epoch_millis, 1_720_650_600_000);
        assert_eq!(session.session_time, "18:30:00 EDT");
    }

    #[test]
    fn test_localize_session_standard_time() {
        let session =
            localize_session_datetime("2024-01-10 18:30:00", chrono_tz::US::Eastern).unwrap();
        assert_eq!(session.epoch_millis, 1_704_929_400_000);
        assert_eq!(session.session_time, "18:30:00 EST");
    }

    #[test]
    fn test_localize_session_nonexistent_time() {
        let err = localize_session_datetime("2024-03-10 02:30:00", chrono_tz::US::Eastern)
            .unwrap_err();
        assert!(matches!(err, TimeParseError::NonexistentLocalTime { .. }));
    }

    #[test]
    fn test_midnight_millis() {
        let date = NaiveDate::from_ymd_opt(2024, 3, 1).unwrap();
        assert_eq!(midnight_millis(date), 1_709_251_200_000);
    }
}
