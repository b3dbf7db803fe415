//! Timestamp formats used by source payloads and markers.

use time::format_description::FormatItem;
use time::format_description::well_known::Rfc3339;
use time::macros::format_description;
use time::{OffsetDateTime, PrimitiveDateTime, UtcOffset};

const QUERY_TIME: &[FormatItem<'static>] =
    format_description!("[year]-[month]-[day] [hour]:[minute]:[second].[subsecond digits:3]");
const NAIVE: &[FormatItem<'static>] =
    format_description!("[year]-[month]-[day] [hour]:[minute]:[second][optional [.[subsecond]]]");
const GENERALIZED: &[FormatItem<'static>] =
    format_description!("[year][month][day][hour][minute][second][optional [.[subsecond]]]");
const GENERALIZED_OUT: &[FormatItem<'static>] = format_description!("[year][month][day][hour][minute][second]Z");

/// Parse `yyyy-MM-dd HH:mm:ss.SSS X`, where `X` is `Z`, `±HH`, `±HHMM` or `±HH:MM`.
pub fn parse_query_time(value: &str) -> Option<OffsetDateTime> {
    let (datetime, zone) = value.trim().rsplit_once(' ')?;
    let datetime = PrimitiveDateTime::parse(datetime, QUERY_TIME).ok()?;
    Some(datetime.assume_offset(parse_zone(zone)?))
}

/// Format as `yyyy-MM-dd HH:mm:ss.SSS Z`, in UTC.
pub fn format_query_time(value: OffsetDateTime) -> Option<String> {
    let utc = value.to_offset(UtcOffset::UTC);
    Some(format!("{} Z", utc.format(QUERY_TIME).ok()?))
}

/// Parse a time marker column. RFC 3339, the payload query time format, and
/// a zone-less `YYYY-MM-DD HH:MM:SS[.fff]` (taken as UTC) are accepted.
pub fn parse_time_marker(value: &str) -> Option<OffsetDateTime> {
    let value = value.trim();
    OffsetDateTime::parse(value, &Rfc3339)
        .ok()
        .or_else(|| parse_query_time(value))
        .or_else(|| PrimitiveDateTime::parse(value, NAIVE).ok().map(PrimitiveDateTime::assume_utc))
}

/// Parse an LDAP generalized time such as `20240102030405Z`,
/// `20240102030405.5Z` or `20240102030405+0100`.
pub fn parse_generalized_time(value: &str) -> Option<OffsetDateTime> {
    let value = value.trim();
    let (datetime, offset) = if let Some(datetime) = value.strip_suffix(['Z', 'z']) {
        (datetime, UtcOffset::UTC)
    } else {
        let split = value.rfind(['+', '-'])?;
        (&value[..split], parse_zone(&value[split..])?)
    };
    // A comma is also a valid fraction separator.
    let datetime = datetime.replace(',', ".");
    Some(PrimitiveDateTime::parse(&datetime, GENERALIZED).ok()?.assume_offset(offset))
}

/// Format as `yyyyMMddHHmmssZ`, in UTC.
pub fn format_generalized_time(value: OffsetDateTime) -> Option<String> {
    value.to_offset(UtcOffset::UTC).format(GENERALIZED_OUT).ok()
}

/// Microseconds since the Unix epoch.
pub fn numeric_marker(value: OffsetDateTime) -> i64 {
    (value.unix_timestamp_nanos() / 1_000) as i64
}

/// Inverse of [`numeric_marker()`].
pub fn from_numeric_marker(micros: i64) -> Option<OffsetDateTime> {
    OffsetDateTime::from_unix_timestamp_nanos(i128::from(micros) * 1_000).ok()
}

fn parse_zone(zone: &str) -> Option<UtcOffset> {
    if zone.eq_ignore_ascii_case("z") {
        return Some(UtcOffset::UTC);
    }
    let (sign, rest) = match zone.as_bytes().first()? {
        b'+' => (1i8, &zone[1..]),
        b'-' => (-1i8, &zone[1..]),
        _ => return None,
    };
    let digits = rest.replace(':', "");
    if !digits.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    let (hours, minutes) = match digits.len() {
        2 => (digits.parse::<i8>().ok()?, 0),
        4 => (digits[..2].parse::<i8>().ok()?, digits[2..].parse::<i8>().ok()?),
        _ => return None,
    };
    UtcOffset::from_hms(sign * hours, sign * minutes, 0).ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;
    use time::macros::datetime;

    #[rstest]
    #[case("2024-05-06 07:08:09.123 Z", datetime!(2024-05-06 07:08:09.123 UTC))]
    #[case("2024-05-06 07:08:09.123 +02", datetime!(2024-05-06 07:08:09.123 +2))]
    #[case("2024-05-06 07:08:09.123 -0530", datetime!(2024-05-06 07:08:09.123 -5:30))]
    #[case("2024-05-06 07:08:09.123 +05:45", datetime!(2024-05-06 07:08:09.123 +5:45))]
    fn test_parse_query_time(#[case] input: &str, #[case] expected: OffsetDateTime) {
        assert_eq!(parse_query_time(input), Some(expected));
    }

    #[rstest]
    #[case("2024-05-06 07:08:09 Z")]
    #[case("2024-05-06 07:08:09.123")]
    #[case("2024-05-06 07:08:09.123 CET")]
    #[case("2024-05-06 07:08:09.123 +5")]
    #[case("")]
    fn test_parse_query_time_rejects(#[case] input: &str) {
        assert_eq!(parse_query_time(input), None);
    }

    #[test]
    fn test_format_query_time() {
        let formatted = format_query_time(datetime!(2024-05-06 09:08:09.123 +2)).unwrap();
        assert_eq!(formatted, "2024-05-06 07:08:09.123 Z");
        assert_eq!(parse_query_time(&formatted), Some(datetime!(2024-05-06 07:08:09.123 UTC)));
    }

    #[rstest]
    #[case("2024-05-06T07:08:09Z", datetime!(2024-05-06 07:08:09 UTC))]
    #[case("2024-05-06T07:08:09.5+01:00", datetime!(2024-05-06 07:08:09.5 +1))]
    #[case("2024-05-06 07:08:09.123 Z", datetime!(2024-05-06 07:08:09.123 UTC))]
    #[case("2024-05-06 07:08:09", datetime!(2024-05-06 07:08:09 UTC))]
    #[case("2024-05-06 07:08:09.250", datetime!(2024-05-06 07:08:09.25 UTC))]
    fn test_parse_time_marker(#[case] input: &str, #[case] expected: OffsetDateTime) {
        assert_eq!(parse_time_marker(input), Some(expected));
    }

    #[rstest]
    #[case("20240506070809Z", datetime!(2024-05-06 07:08:09 UTC))]
    #[case("20240506070809.5Z", datetime!(2024-05-06 07:08:09.5 UTC))]
    #[case("20240506070809+0100", datetime!(2024-05-06 07:08:09 +1))]
    fn test_parse_generalized_time(#[case] input: &str, #[case] expected: OffsetDateTime) {
        assert_eq!(parse_generalized_time(input), Some(expected));
    }

    #[test]
    fn test_format_generalized_time() {
        assert_eq!(format_generalized_time(datetime!(2024-05-06 09:08:09.9 +2)).unwrap(), "20240506070809Z");
    }

    #[test]
    fn test_numeric_marker() {
        let time = datetime!(2024-05-06 07:08:09.123456 UTC);
        let micros = numeric_marker(time);
        assert_eq!(micros, 1_714_979_289_123_456);
        assert_eq!(from_numeric_marker(micros), Some(time));
    }
}
