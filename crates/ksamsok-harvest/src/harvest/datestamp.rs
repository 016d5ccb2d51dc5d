//! Lenient ISO-8601 parsing for OAI-PMH datestamps
//!
//! The protocol only allows `YYYY-MM-DD` and `YYYY-MM-DDThh:mm:ssZ`, but
//! sources send offsets, fractions and zone-less times as well. All of these
//! are accepted; zone-less values are taken as UTC.

use chrono::{DateTime, NaiveDate, NaiveDateTime, TimeZone, Utc};

const NAIVE_FORMATS: &[&str] = &[
    "%Y-%m-%dT%H:%M:%S%.f",
    "%Y-%m-%dT%H:%M",
    "%Y-%m-%d %H:%M:%S%.f",
];

const OFFSET_FORMATS: &[&str] = &["%Y-%m-%dT%H:%M:%S%.f%z", "%Y-%m-%dT%H:%M%:z"];

/// Parse a datestamp, returning `None` if no accepted form matches.
pub fn parse_datestamp(value: &str) -> Option<DateTime<Utc>> {
    let value = value.trim();
    if value.is_empty() {
        return None;
    }

    if let Ok(dt) = DateTime::parse_from_rfc3339(value) {
        return Some(dt.with_timezone(&Utc));
    }

    for format in OFFSET_FORMATS {
        if let Ok(dt) = DateTime::parse_from_str(value, format) {
            return Some(dt.with_timezone(&Utc));
        }
    }

    for format in NAIVE_FORMATS {
        if let Ok(naive) = NaiveDateTime::parse_from_str(value, format) {
            return Some(Utc.from_utc_datetime(&naive));
        }
    }

    NaiveDate::parse_from_str(value, "%Y-%m-%d")
        .ok()
        .and_then(|date| date.and_hms_opt(0, 0, 0))
        .map(|naive| Utc.from_utc_datetime(&naive))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn utc(y: i32, mo: u32, d: u32, h: u32, mi: u32, s: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(y, mo, d, h, mi, s).single().unwrap_or_default()
    }

    #[test]
    fn test_protocol_granularities() {
        assert_eq!(
            parse_datestamp("2020-01-01T00:00:00Z"),
            Some(utc(2020, 1, 1, 0, 0, 0))
        );
        assert_eq!(parse_datestamp("2020-01-01"), Some(utc(2020, 1, 1, 0, 0, 0)));
    }

    #[test]
    fn test_offsets_are_converted_to_utc() {
        assert_eq!(
            parse_datestamp("2021-06-15T12:30:00+02:00"),
            Some(utc(2021, 6, 15, 10, 30, 0))
        );
        assert_eq!(
            parse_datestamp("2021-06-15T12:30:00.250+0200"),
            parse_datestamp("2021-06-15T10:30:00.250Z")
        );
    }

    #[test]
    fn test_zone_less_values_are_utc() {
        assert_eq!(
            parse_datestamp(" 2019-12-31T23:59:59 "),
            Some(utc(2019, 12, 31, 23, 59, 59))
        );
        assert_eq!(
            parse_datestamp("2019-12-31T23:59"),
            Some(utc(2019, 12, 31, 23, 59, 0))
        );
    }

    #[test]
    fn test_garbage_is_rejected() {
        assert_eq!(parse_datestamp("not-a-date"), None);
        assert_eq!(parse_datestamp(""), None);
        assert_eq!(parse_datestamp("2020-13-01"), None);
    }
}
