//! Timestamp helpers.

use chrono::{DateTime, Duration, Utc};

/// Represents a timestamp that can be serialized/deserialized.
pub type Timestamp = DateTime<Utc>;

/// Returns the current UTC timestamp.
#[must_use]
pub fn now_utc() -> Timestamp {
    Utc::now()
}

/// Returns the current UTC time as `YYYY-MM-DDTHH:MM:SSZ`.
///
/// # Examples
///
/// ```
/// use repohealth::utils::iso_timestamp;
///
/// let ts = iso_timestamp();
/// assert!(ts.contains('T'));
/// assert!(ts.ends_with('Z'));
/// ```
#[must_use]
pub fn iso_timestamp() -> String {
    format_iso8601(&Utc::now())
}

/// Formats a timestamp as `YYYY-MM-DDTHH:MM:SSZ`.
#[must_use]
pub fn format_iso8601(dt: &Timestamp) -> String {
    dt.format("%Y-%m-%dT%H:%M:%SZ").to_string()
}

/// Describes how long ago `then` was, relative to `now`.
///
/// Anything more than a week old, or in the future, is shown as a date
/// (`05 Oct 23`).
#[must_use]
pub fn pretty_timedelta(then: &Timestamp, now: &Timestamp) -> String {
    let diff = *now - *then;
    if diff < Duration::zero() {
        return then.format("%d %b %y").to_string();
    }

    let days = diff.num_days();
    let seconds = (diff - Duration::days(days)).num_seconds();

    match (days, seconds) {
        (d, _) if d > 7 => then.format("%d %b %y").to_string(),
        (1, _) => "1 day ago".to_string(),
        (d, _) if d > 1 => format!("{d} days ago"),
        (_, s) if s <= 1 => "just now".to_string(),
        (_, s) if s < 120 => format!("{s} seconds ago"),
        (_, s) if s < 3600 => format!("{} minutes ago", s / 60),
        (_, s) if s < 7200 => "1 hour ago".to_string(),
        (_, s) => format!("{} hours ago", s / 3600),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn at(secs_ago: i64) -> (Timestamp, Timestamp) {
        let now = Utc.with_ymd_and_hms(2023, 10, 20, 12, 0, 0).unwrap();
        (now - Duration::seconds(secs_ago), now)
    }

    #[test]
    fn test_iso_timestamp_format() {
        let ts = iso_timestamp();
        assert_eq!(ts.len(), "2023-10-05T14:30:00Z".len());
        assert!(ts.ends_with('Z'));
    }

    #[test]
    fn test_pretty_timedelta_seconds_and_minutes() {
        let (then, now) = at(0);
        assert_eq!(pretty_timedelta(&then, &now), "just now");

        let (then, now) = at(45);
        assert_eq!(pretty_timedelta(&then, &now), "45 seconds ago");

        let (then, now) = at(5 * 60 + 10);
        assert_eq!(pretty_timedelta(&then, &now), "5 minutes ago");
    }

    #[test]
    fn test_pretty_timedelta_hours_and_days() {
        let (then, now) = at(3600 + 60);
        assert_eq!(pretty_timedelta(&then, &now), "1 hour ago");

        let (then, now) = at(5 * 3600);
        assert_eq!(pretty_timedelta(&then, &now), "5 hours ago");

        let (then, now) = at(26 * 3600);
        assert_eq!(pretty_timedelta(&then, &now), "1 day ago");

        let (then, now) = at(3 * 86400);
        assert_eq!(pretty_timedelta(&then, &now), "3 days ago");
    }

    #[test]
    fn test_pretty_timedelta_falls_back_to_date() {
        let (then, now) = at(10 * 86400);
        assert_eq!(pretty_timedelta(&then, &now), "10 Oct 23");

        let (then, now) = at(-60);
        assert_eq!(pretty_timedelta(&then, &now), "20 Oct 23");
    }
}
