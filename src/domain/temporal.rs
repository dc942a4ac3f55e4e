//! Temporal guard.
//!
//! Every reference time entering the engine carries an explicit UTC offset.
//! Ambiguous local times are rejected rather than interpreted.

use crate::domain::error::EventcastError;
use chrono::{DateTime, NaiveDate, Utc};

/// Earliest supported reference time (inclusive).
pub fn earliest_supported() -> DateTime<Utc> {
    DateTime::<Utc>::UNIX_EPOCH
}

/// Latest supported reference time (exclusive).
pub fn latest_supported() -> DateTime<Utc> {
    NaiveDate::from_ymd_opt(2200, 1, 1)
        .and_then(|d| d.and_hms_opt(0, 0, 0))
        .map(|dt| dt.and_utc())
        .unwrap_or(DateTime::<Utc>::MAX_UTC)
}

/// Parse an RFC 3339 timestamp with an explicit offset and normalize to UTC.
pub fn parse_timestamp(input: &str) -> Result<DateTime<Utc>, EventcastError> {
    let trimmed = input.trim();
    let parsed = DateTime::parse_from_rfc3339(trimmed).map_err(|e| {
        let reason = if looks_naive(trimmed) {
            "missing UTC offset (naive local time is ambiguous)".to_string()
        } else {
            e.to_string()
        };
        EventcastError::InvalidTimestamp {
            input: input.to_string(),
            reason,
        }
    })?;
    guard(parsed.with_timezone(&Utc))
}

fn looks_naive(input: &str) -> bool {
    chrono::NaiveDateTime::parse_from_str(input, "%Y-%m-%dT%H:%M:%S").is_ok()
        || chrono::NaiveDateTime::parse_from_str(input, "%Y-%m-%d %H:%M:%S").is_ok()
        || NaiveDate::parse_from_str(input, "%Y-%m-%d").is_ok()
}

/// Re-validate a reference time at a public entry point.
pub fn guard(ts: DateTime<Utc>) -> Result<DateTime<Utc>, EventcastError> {
    if ts < earliest_supported() || ts >= latest_supported() {
        return Err(EventcastError::InvalidTimestamp {
            input: ts.to_rfc3339(),
            reason: "outside supported range [1970-01-01, 2200-01-01)".into(),
        });
    }
    Ok(ts)
}

/// A record consulted for a decision at `as_of` must be strictly earlier.
pub fn ensure_before(
    record_time: DateTime<Utc>,
    as_of: DateTime<Utc>,
    what: &str,
) -> Result<(), EventcastError> {
    if record_time >= as_of {
        return Err(EventcastError::consistency(format!(
            "{what} at {} is not before as_of {}",
            record_time.to_rfc3339(),
            as_of.to_rfc3339()
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn parses_zulu() {
        let ts = parse_timestamp("2025-01-10T00:00:00Z").unwrap();
        assert_eq!(ts, Utc.with_ymd_and_hms(2025, 1, 10, 0, 0, 0).unwrap());
    }

    #[test]
    fn normalizes_offset_to_utc() {
        let ts = parse_timestamp("2025-01-10T02:30:00+02:30").unwrap();
        assert_eq!(ts, Utc.with_ymd_and_hms(2025, 1, 10, 0, 0, 0).unwrap());
    }

    #[test]
    fn rejects_naive_datetime() {
        let err = parse_timestamp("2025-01-10T00:00:00").unwrap_err();
        match err {
            EventcastError::InvalidTimestamp { reason, .. } => {
                assert!(reason.contains("missing UTC offset"));
            }
            other => panic!("expected InvalidTimestamp, got {other}"),
        }
    }

    #[test]
    fn rejects_date_only() {
        assert!(matches!(
            parse_timestamp("2025-01-10"),
            Err(EventcastError::InvalidTimestamp { .. })
        ));
    }

    #[test]
    fn rejects_garbage() {
        assert!(matches!(
            parse_timestamp("yesterday"),
            Err(EventcastError::InvalidTimestamp { .. })
        ));
    }

    #[test]
    fn guard_rejects_out_of_range() {
        let early = Utc.with_ymd_and_hms(1969, 12, 31, 23, 59, 59).unwrap();
        let late = Utc.with_ymd_and_hms(2200, 1, 1, 0, 0, 0).unwrap();
        assert!(guard(early).is_err());
        assert!(guard(late).is_err());
        assert!(guard(Utc.with_ymd_and_hms(2024, 6, 1, 0, 0, 0).unwrap()).is_ok());
    }

    #[test]
    fn ensure_before_is_strict() {
        let as_of = Utc.with_ymd_and_hms(2025, 1, 10, 0, 0, 0).unwrap();
        assert!(ensure_before(as_of - chrono::Duration::seconds(1), as_of, "price").is_ok());
        assert!(matches!(
            ensure_before(as_of, as_of, "price"),
            Err(EventcastError::ConsistencyViolation { .. })
        ));
    }
}
