//! Timestamp conversion for persisted attributes

use chrono::{DateTime, FixedOffset, SecondsFormat, Utc};

/// chrono format of the legacy layout, without the trailing zone name
const LEGACY_FORMAT: &str = "%Y-%m-%d %H:%M:%S%.f %z";

/// Parse a timestamp written as `YYYY-MM-DD HH:MM:SS[.fffffffff] ±HHMM ZONE`
///
/// The zone name is informational only; the numeric offset wins.
pub fn parse_legacy(value: &str) -> Option<DateTime<FixedOffset>> {
    let parts: Vec<&str> = value.split_whitespace().collect();
    let (date, time, offset) = match parts.as_slice() {
        [date, time, offset] | [date, time, offset, _] => (*date, *time, *offset),
        _ => return None,
    };
    DateTime::parse_from_str(&format!("{} {} {}", date, time, offset), LEGACY_FORMAT).ok()
}

/// Render as RFC 3339 with whole seconds, `Z` for UTC
pub fn format_rfc3339(value: &DateTime<FixedOffset>) -> String {
    value.to_rfc3339_opts(SecondsFormat::Secs, true)
}

/// Render an API timestamp the way it is persisted
pub fn format_timestamp(value: &DateTime<Utc>) -> String {
    value.to_rfc3339_opts(SecondsFormat::Secs, true)
}

/// Convert a legacy timestamp to RFC 3339, or `None` if it is not in the legacy layout
pub fn legacy_to_rfc3339(value: &str) -> Option<String> {
    parse_legacy(value).map(|t| format_rfc3339(&t))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_legacy_utc() {
        assert_eq!(
            legacy_to_rfc3339("2006-01-02 15:04:05 +0000 UTC").as_deref(),
            Some("2006-01-02T15:04:05Z")
        );
    }

    #[test]
    fn test_legacy_keeps_offset_and_drops_fraction() {
        assert_eq!(
            legacy_to_rfc3339("2021-03-04 10:11:12.123456789 +0100 CET").as_deref(),
            Some("2021-03-04T10:11:12+01:00")
        );
        assert_eq!(
            legacy_to_rfc3339("2021-03-04 10:11:12 -0700 MST").as_deref(),
            Some("2021-03-04T10:11:12-07:00")
        );
    }

    #[test]
    fn test_rfc3339_is_not_legacy() {
        assert!(legacy_to_rfc3339("2006-01-02T15:04:05Z").is_none());
        assert!(legacy_to_rfc3339("").is_none());
        assert!(legacy_to_rfc3339("not a date at all").is_none());
    }
}
