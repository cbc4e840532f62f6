// SPDX-License-Identifier: Apache-2.0

//! Multi-format timestamp parsing.
//!
//! Formats are tried in order:
//!
//! 1. `YYYY-MM-DD HH:MM:SS[.,]f+` where the fraction width sets its unit
//!    (1 digit tenths, 2 digits centiseconds, 3 digits milliseconds)
//! 2. RFC 3339 / ISO 8601 with an offset, or without one in the configured zone
//! 3. Common log format `DD/Mon/YYYY:HH:MM:SS +ZZZZ`
//! 4. Syslog `Mon DD HH:MM:SS`, in the current year
//! 5. Epoch seconds (10 digits) or milliseconds (13 digits)
//!
//! Times without an offset are interpreted in the configured fixed offset.

use chrono::{
    DateTime, Datelike, Duration, FixedOffset, NaiveDate, NaiveDateTime, NaiveTime, TimeZone, Utc,
};
use regex::Regex;
use std::sync::LazyLock;

static FORMAT_A: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^(\d{4})-(\d{2})-(\d{2}) (\d{2}):(\d{2}):(\d{2})(?:[.,](\d{1,9}))?$")
        .expect("valid regex")
});

/// Parse `text` into a UTC timestamp, `None` when no known format matches.
///
/// `now` is only used to pick the year for syslog timestamps.
pub fn parse_timestamp(text: &str, tz: FixedOffset, now: DateTime<Utc>) -> Option<DateTime<Utc>> {
    let text = text.trim();
    if text.is_empty() {
        return None;
    }

    parse_format_a(text, tz)
        .or_else(|| parse_iso(text, tz))
        .or_else(|| parse_clf(text))
        .or_else(|| parse_syslog(text, tz, now))
        .or_else(|| parse_epoch(text))
}

fn parse_format_a(text: &str, tz: FixedOffset) -> Option<DateTime<Utc>> {
    let caps = FORMAT_A.captures(text)?;
    let num = |i: usize| caps.get(i).and_then(|m| m.as_str().parse::<u32>().ok());

    let date = NaiveDate::from_ymd_opt(num(1)? as i32, num(2)?, num(3)?)?;
    let nanos = match caps.get(7) {
        None => 0,
        Some(frac) => {
            let digits = frac.as_str();
            let value: u32 = digits.parse().ok()?;
            value * 10u32.pow(9 - digits.len() as u32)
        }
    };
    let time = NaiveTime::from_hms_nano_opt(num(4)?, num(5)?, num(6)?, nanos)?;
    localize(NaiveDateTime::new(date, time), tz)
}

fn parse_iso(text: &str, tz: FixedOffset) -> Option<DateTime<Utc>> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(text) {
        return Some(dt.with_timezone(&Utc));
    }
    for fmt in ["%Y-%m-%dT%H:%M:%S%.f%z", "%Y-%m-%d %H:%M:%S%.f%:z", "%Y-%m-%d %H:%M:%S%.f%z"] {
        if let Ok(dt) = DateTime::parse_from_str(text, fmt) {
            return Some(dt.with_timezone(&Utc));
        }
    }
    NaiveDateTime::parse_from_str(text, "%Y-%m-%dT%H:%M:%S%.f")
        .ok()
        .and_then(|naive| localize(naive, tz))
}

fn parse_clf(text: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_str(text, "%d/%b/%Y:%H:%M:%S %z")
        .ok()
        .map(|dt| dt.with_timezone(&Utc))
}

fn parse_syslog(text: &str, tz: FixedOffset, now: DateTime<Utc>) -> Option<DateTime<Utc>> {
    let collapsed = text.split_whitespace().collect::<Vec<_>>().join(" ");
    let year = now.with_timezone(&tz).year();

    let parsed = NaiveDateTime::parse_from_str(
        &format!("{} {}", year, collapsed),
        "%Y %b %d %H:%M:%S",
    )
    .ok()
    .and_then(|naive| localize(naive, tz))?;

    // December lines read in early January belong to the previous year
    if parsed > now + Duration::days(1) {
        let naive = NaiveDateTime::parse_from_str(
            &format!("{} {}", year - 1, collapsed),
            "%Y %b %d %H:%M:%S",
        )
        .ok()?;
        return localize(naive, tz);
    }
    Some(parsed)
}

fn parse_epoch(text: &str) -> Option<DateTime<Utc>> {
    if !text.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    let value: i64 = text.parse().ok()?;
    match text.len() {
        10 => DateTime::from_timestamp(value, 0),
        13 => DateTime::from_timestamp_millis(value),
        _ => None,
    }
}

fn localize(naive: NaiveDateTime, tz: FixedOffset) -> Option<DateTime<Utc>> {
    tz.from_local_datetime(&naive)
        .single()
        .map(|dt| dt.with_timezone(&Utc))
}

/// Parse an offset such as `+05:30`, `-0800` or `UTC`
pub fn parse_offset(text: &str) -> Option<FixedOffset> {
    let text = text.trim();
    if text.eq_ignore_ascii_case("utc") || text.eq_ignore_ascii_case("z") || text.is_empty() {
        return FixedOffset::east_opt(0);
    }

    let (sign, rest) = match text.as_bytes().first()? {
        b'+' => (1, &text[1..]),
        b'-' => (-1, &text[1..]),
        _ => return None,
    };
    let digits: String = rest.chars().filter(|c| *c != ':').collect();
    if digits.len() != 4 || !digits.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    let hours: i32 = digits[..2].parse().ok()?;
    let minutes: i32 = digits[2..].parse().ok()?;
    if minutes >= 60 {
        return None;
    }
    FixedOffset::east_opt(sign * (hours * 3600 + minutes * 60))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn utc() -> FixedOffset {
        FixedOffset::east_opt(0).unwrap()
    }

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 6, 15, 12, 0, 0).unwrap()
    }

    fn parse(text: &str) -> Option<DateTime<Utc>> {
        parse_timestamp(text, utc(), now())
    }

    fn at(y: i32, mo: u32, d: u32, h: u32, mi: u32, s: u32, ms: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(y, mo, d, h, mi, s).unwrap() + Duration::milliseconds(ms as i64)
    }

    #[test]
    fn test_fraction_width_sets_unit() {
        assert_eq!(parse("2024-01-02 03:04:05.12"), Some(at(2024, 1, 2, 3, 4, 5, 120)));
        assert_eq!(parse("2024-01-02 03:04:05.123"), Some(at(2024, 1, 2, 3, 4, 5, 123)));
        assert_eq!(parse("2024-01-02 03:04:05,5"), Some(at(2024, 1, 2, 3, 4, 5, 500)));
        assert_eq!(parse("2024-01-02 03:04:05"), Some(at(2024, 1, 2, 3, 4, 5, 0)));
    }

    #[test]
    fn test_iso_with_offset() {
        assert_eq!(
            parse("2024-01-02T03:04:05.250+02:00"),
            Some(at(2024, 1, 2, 1, 4, 5, 250))
        );
        assert_eq!(parse("2024-01-02T03:04:05Z"), Some(at(2024, 1, 2, 3, 4, 5, 0)));
        assert_eq!(
            parse("2024-01-02T03:04:05+0100"),
            Some(at(2024, 1, 2, 2, 4, 5, 0))
        );
    }

    #[test]
    fn test_common_log_format() {
        assert_eq!(
            parse("10/Oct/2023:13:55:36 -0700"),
            Some(at(2023, 10, 10, 20, 55, 36, 0))
        );
    }

    #[test]
    fn test_syslog_uses_current_year() {
        assert_eq!(parse("Mar  5 08:09:10"), Some(at(2024, 3, 5, 8, 9, 10, 0)));
        assert_eq!(parse("Jun 14 23:00:00"), Some(at(2024, 6, 14, 23, 0, 0, 0)));
    }

    #[test]
    fn test_syslog_year_rollover() {
        let jan = Utc.with_ymd_and_hms(2025, 1, 1, 0, 5, 0).unwrap();
        assert_eq!(
            parse_timestamp("Dec 31 23:59:00", utc(), jan),
            Some(at(2024, 12, 31, 23, 59, 0, 0))
        );
    }

    #[test]
    fn test_epoch() {
        assert_eq!(parse("1700000000"), DateTime::from_timestamp(1_700_000_000, 0));
        assert_eq!(
            parse("1700000000123"),
            DateTime::from_timestamp_millis(1_700_000_000_123)
        );
        assert_eq!(parse("12345"), None);
    }

    #[test]
    fn test_naive_times_use_configured_offset() {
        let plus_two = FixedOffset::east_opt(2 * 3600).unwrap();
        assert_eq!(
            parse_timestamp("2024-01-02 03:04:05.000", plus_two, now()),
            Some(at(2024, 1, 2, 1, 4, 5, 0))
        );
    }

    #[test]
    fn test_unparsable() {
        assert_eq!(parse("not a time"), None);
        assert_eq!(parse(""), None);
        assert_eq!(parse("2024-13-45 99:99:99"), None);
    }

    #[test]
    fn test_parse_offset() {
        assert_eq!(parse_offset("UTC"), FixedOffset::east_opt(0));
        assert_eq!(parse_offset("+05:30"), FixedOffset::east_opt(5 * 3600 + 1800));
        assert_eq!(parse_offset("-0800"), FixedOffset::west_opt(8 * 3600));
        assert_eq!(parse_offset("05:30"), None);
        assert_eq!(parse_offset("+5"), None);
    }
}
