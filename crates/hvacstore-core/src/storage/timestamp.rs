//! Timestamp formatting for auto-save naming
//!
//! Auto-save records are keyed by their creation instant. Colons are not
//! portable in file names, so the time part is stored with `-` separators.

use chrono::{DateTime, SecondsFormat, Utc};
use uuid::Uuid;

use crate::clock::Clock;

/// RFC 3339 with millisecond precision and a `Z` suffix
pub fn format_iso(instant: DateTime<Utc>) -> String {
    instant.to_rfc3339_opts(SecondsFormat::Millis, true)
}

/// Current clock reading formatted with [`format_iso`]
pub fn now_iso(clock: &dyn Clock) -> String {
    format_iso(clock.now())
}

pub fn parse_iso(timestamp: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(timestamp)
        .ok()
        .map(|dt| dt.with_timezone(&Utc))
}

/// Make a timestamp safe for use in a file name
pub fn sanitize(timestamp: &str) -> String {
    timestamp.replace(':', "-")
}

/// Reverse [`sanitize`]
///
/// Only the time part (after `T`) is rewritten, so the date separators
/// survive.
pub fn unsanitize(sanitized: &str) -> String {
    match sanitized.split_once('T') {
        Some((date, time)) => format!("{}T{}", date, time.replace('-', ":")),
        None => sanitized.to_string(),
    }
}

/// `<projectId>-<sanitized timestamp>`
pub fn auto_save_id(project_id: Uuid, timestamp: &str) -> String {
    format!("{}-{}", project_id, sanitize(timestamp))
}

/// Order timestamps newest first; unparseable ones sort last
pub fn cmp_newest_first(a: &str, b: &str) -> std::cmp::Ordering {
    parse_iso(b)
        .cmp(&parse_iso(a))
        .then_with(|| b.cmp(a))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sanitize_replaces_colons() {
        assert_eq!(
            sanitize("2024-03-05T14:30:15.123Z"),
            "2024-03-05T14-30-15.123Z"
        );
    }

    #[test]
    fn test_unsanitize_restores_time_part_only() {
        assert_eq!(
            unsanitize("2024-03-05T14-30-15.123Z"),
            "2024-03-05T14:30:15.123Z"
        );
        assert_eq!(unsanitize("no-time-part"), "no-time-part");
    }

    #[test]
    fn test_sanitize_unsanitize_inverse() {
        for ts in [
            "2024-01-01T00:00:00.000Z",
            "1999-12-31T23:59:59.999Z",
            "2030-06-15T08:05:09.010Z",
        ] {
            assert_eq!(unsanitize(&sanitize(ts)), ts);
        }
    }

    #[test]
    fn test_format_iso_millis() {
        let instant = parse_iso("2024-03-05T14:30:15.123456Z").unwrap();
        assert_eq!(format_iso(instant), "2024-03-05T14:30:15.123Z");
    }

    #[test]
    fn test_auto_save_id() {
        let id = Uuid::parse_str("6f1c2a3e-9b7d-4c1e-8f2a-0d3b4c5e6f70").unwrap();
        assert_eq!(
            auto_save_id(id, "2024-03-05T14:30:15.123Z"),
            "6f1c2a3e-9b7d-4c1e-8f2a-0d3b4c5e6f70-2024-03-05T14-30-15.123Z"
        );
    }

    #[test]
    fn test_cmp_newest_first() {
        let mut stamps = vec![
            "2024-01-01T00:00:01.000Z",
            "garbage",
            "2024-01-01T00:00:03.000Z",
            "2024-01-01T00:00:02.000Z",
        ];
        stamps.sort_by(|a, b| cmp_newest_first(a, b));
        assert_eq!(
            stamps,
            vec![
                "2024-01-01T00:00:03.000Z",
                "2024-01-01T00:00:02.000Z",
                "2024-01-01T00:00:01.000Z",
                "garbage",
            ]
        );
    }
}
