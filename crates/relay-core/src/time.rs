//! Canonical timestamp formatting.
//!
//! Timestamps are stored as RFC 3339 text with millisecond precision and a
//! `Z` suffix, so lexical comparison in SQL matches chronological order.

use std::time::Duration;

use chrono::{DateTime, SecondsFormat, TimeDelta, Utc};

/// Format a UTC instant in the canonical stored form.
pub fn to_rfc3339(at: DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Millis, true)
}

/// The current instant in the canonical stored form.
pub fn now_rfc3339() -> String {
    to_rfc3339(Utc::now())
}

/// The instant `age` before `now`, saturating at the earliest representable
/// time.
pub fn before(now: DateTime<Utc>, age: Duration) -> DateTime<Utc> {
    TimeDelta::from_std(age)
        .ok()
        .and_then(|delta| now.checked_sub_signed(delta))
        .unwrap_or(DateTime::<Utc>::MIN_UTC)
}

/// [`before`] for whole days.
pub fn days_before(now: DateTime<Utc>, days: u32) -> DateTime<Utc> {
    before(now, Duration::from_secs(u64::from(days) * 86_400))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};

    #[test]
    fn millisecond_precision_with_z() {
        let at = Utc.with_ymd_and_hms(2024, 3, 1, 12, 0, 5).unwrap();
        assert_eq!(to_rfc3339(at), "2024-03-01T12:00:05.000Z");
    }

    #[test]
    fn lexical_order_matches_time_order() {
        let a = Utc.with_ymd_and_hms(2024, 3, 1, 9, 59, 59).unwrap();
        let b = a + Duration::milliseconds(1);
        let c = a + Duration::hours(2);
        assert!(to_rfc3339(a) < to_rfc3339(b));
        assert!(to_rfc3339(b) < to_rfc3339(c));
    }

    #[test]
    fn before_subtracts_and_saturates() {
        let at = Utc.with_ymd_and_hms(2024, 3, 1, 12, 0, 30).unwrap();
        assert_eq!(
            before(at, std::time::Duration::from_secs(30)),
            Utc.with_ymd_and_hms(2024, 3, 1, 12, 0, 0).unwrap()
        );
        assert_eq!(
            days_before(at, 1),
            Utc.with_ymd_and_hms(2024, 2, 29, 12, 0, 30).unwrap()
        );
        assert_eq!(
            before(at, std::time::Duration::MAX),
            DateTime::<Utc>::MIN_UTC
        );
    }
}
