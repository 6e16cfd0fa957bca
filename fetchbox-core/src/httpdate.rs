//! HTTP date parsing and formatting.
//!
//! Parses the three date forms allowed by RFC 7231 §7.1.1.1 (IMF-fixdate,
//! the obsolete RFC 850 form, and asctime) and always formats IMF-fixdate.

use chrono::{DateTime, NaiveDateTime, Utc};

/// Parses an HTTP date header value.
///
/// Returns `None` when the value matches none of the three allowed forms.
pub fn parse_http_date(value: &[u8]) -> Option<DateTime<Utc>> {
    let s = std::str::from_utf8(value).ok()?.trim();

    // IMF-fixdate and most real-world traffic: "Sun, 06 Nov 1994 08:49:37 GMT"
    if let Ok(dt) = DateTime::parse_from_rfc2822(s) {
        return Some(dt.with_timezone(&Utc));
    }

    // RFC 850: "Sunday, 06-Nov-94 08:49:37 GMT"
    if let Some(rest) = s.split_once(", ").map(|(_, rest)| rest) {
        if let Ok(naive) = NaiveDateTime::parse_from_str(rest, "%d-%b-%y %H:%M:%S GMT") {
            return Some(naive.and_utc());
        }
    }

    // asctime: "Sun Nov  6 08:49:37 1994"
    if let Ok(naive) = NaiveDateTime::parse_from_str(s, "%a %b %e %H:%M:%S %Y") {
        return Some(naive.and_utc());
    }

    None
}

/// Formats a timestamp as an IMF-fixdate header value.
pub fn format_http_date(when: DateTime<Utc>) -> String {
    when.format("%a, %d %b %Y %H:%M:%S GMT").to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn parses_imf_fixdate() {
        let dt = parse_http_date(b"Sun, 06 Nov 1994 08:49:37 GMT").unwrap();
        assert_eq!(dt, Utc.with_ymd_and_hms(1994, 11, 6, 8, 49, 37).unwrap());
    }

    #[test]
    fn parses_asctime() {
        let dt = parse_http_date(b"Sun Nov  6 08:49:37 1994").unwrap();
        assert_eq!(dt, Utc.with_ymd_and_hms(1994, 11, 6, 8, 49, 37).unwrap());
    }

    #[test]
    fn round_trips_through_format() {
        let dt = Utc.with_ymd_and_hms(2024, 2, 29, 23, 59, 59).unwrap();
        let formatted = format_http_date(dt);
        assert_eq!(parse_http_date(formatted.as_bytes()).unwrap(), dt);
    }

    #[test]
    fn rejects_garbage() {
        assert!(parse_http_date(b"yesterday-ish").is_none());
        assert!(parse_http_date(b"").is_none());
    }
}
