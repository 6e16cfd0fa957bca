//! HTTP freshness rules.
//!
//! Implements the RFC 2616 §13.2.3 age computation and §13.2.4 expiration
//! heuristic used to decide whether a cached response may be served without
//! revalidation, plus the conditional-request header construction.

use bytes::Bytes;
use chrono::{DateTime, Duration, Utc};

use crate::headers::{parse_option_header, HeaderList};
use crate::httpdate::{format_http_date, parse_http_date};
use crate::meta::CacheMetaData;

/// Decides whether a cached response is still fresh at `now`.
///
/// When an explicit expiration date was recorded at store time it wins and
/// the heuristic never runs: fresh iff `now <= expiration_date`. Without one,
/// the §13.2.3 current-age computation runs against the stored `Age` and
/// `Date` headers, and a missing expiration is derived from `Last-Modified`
/// via the 10% heuristic.
pub fn response_is_fresh(meta: &CacheMetaData, now: DateTime<Utc>) -> bool {
    if let Some(expiration) = meta.expiration_date() {
        return now <= expiration;
    }

    let headers = meta.raw_headers();

    let age_value: i64 = headers
        .get(b"age")
        .and_then(|v| std::str::from_utf8(v).ok())
        .and_then(|v| v.trim().parse().ok())
        .unwrap_or(0);

    let date_header = match headers.get(b"date").and_then(|v| parse_http_date(v)) {
        Some(dt) => dt,
        // without an origin Date there is no freshness lifetime to compare
        None => return false,
    };

    // §13.2.3 with request_time == response_time == now: the response delay
    // and resident time collapse to zero.
    let apparent_age = (now - date_header).num_seconds().max(0);
    let current_age = apparent_age.max(age_value);

    // §13.2.4: derive a heuristic expiration from Last-Modified when none
    // was stored.
    let expiration = match meta.last_modified() {
        Some(last_modified) => {
            let tenth = (now - last_modified).num_seconds() / 10;
            last_modified + Duration::seconds(tenth)
        }
        None => return false,
    };

    let freshness_lifetime = (expiration - date_header).num_seconds();
    freshness_lifetime > current_age
}

/// Builds the conditional-request headers for revalidating `meta`.
///
/// `If-None-Match` is taken from the stored `ETag`, `If-Modified-Since` from
/// the recorded `Last-Modified` timestamp.
pub fn revalidation_headers(meta: &CacheMetaData) -> Vec<(Bytes, Bytes)> {
    let mut out = Vec::new();
    if let Some(etag) = meta.raw_headers().get(b"etag") {
        out.push((Bytes::from_static(b"If-None-Match"), etag.clone()));
    }
    if let Some(last_modified) = meta.last_modified() {
        out.push((
            Bytes::from_static(b"If-Modified-Since"),
            Bytes::from(format_http_date(last_modified)),
        ));
    }
    out
}

/// Returns `true` if the stored `Cache-Control` header carries
/// `must-revalidate`.
pub fn must_revalidate(headers: &HeaderList) -> bool {
    headers
        .get(b"cache-control")
        .map(|v| parse_option_header(v).contains_key("must-revalidate"))
        .unwrap_or(false)
}

/// Derives the expiration date a response's headers ask for.
///
/// `Cache-Control: max-age` wins over `Expires`, matching the store-time
/// behavior the freshness check relies on.
pub fn expiration_from_headers(headers: &HeaderList, now: DateTime<Utc>) -> Option<DateTime<Utc>> {
    if let Some(cc) = headers.get(b"cache-control") {
        let directives = parse_option_header(cc);
        if let Some(max_age) = directives.get("max-age") {
            if let Ok(secs) = max_age.parse::<i64>() {
                return Some(now + Duration::seconds(secs));
            }
        }
    }
    headers.get(b"expires").and_then(|v| parse_http_date(v))
}

/// Reads the `Last-Modified` header as a timestamp.
pub fn last_modified_from_headers(headers: &HeaderList) -> Option<DateTime<Utc>> {
    headers.get(b"last-modified").and_then(|v| parse_http_date(v))
}

#[cfg(test)]
mod tests {
    use super::*;
    use http::Uri;

    fn meta_with_headers(pairs: &[(&str, String)]) -> CacheMetaData {
        let url: Uri = "http://example.com/x".parse().unwrap();
        let mut meta = CacheMetaData::new(&url);
        for (name, value) in pairs {
            meta.raw_headers_mut()
                .append(Bytes::from(name.to_string()), Bytes::from(value.clone()));
        }
        meta
    }

    #[test]
    fn explicit_expiration_wins() {
        let now = Utc::now();
        let mut meta = meta_with_headers(&[]);
        meta.set_expiration_date(Some(now + Duration::seconds(60)));
        assert!(response_is_fresh(&meta, now));

        meta.set_expiration_date(Some(now - Duration::seconds(1)));
        assert!(!response_is_fresh(&meta, now));
    }

    #[test]
    fn heuristic_uses_last_modified_tenth() {
        let now = Utc::now();
        // modified 10 days ago, Date stamped now: heuristic lifetime is one
        // day, current age zero
        let mut meta = meta_with_headers(&[("date", format_http_date(now))]);
        meta.set_last_modified(Some(now - Duration::days(10)));
        assert!(response_is_fresh(&meta, now));

        // Date stamped two days ago: current age exceeds the one-day lifetime
        let mut meta =
            meta_with_headers(&[("date", format_http_date(now - Duration::days(2)))]);
        meta.set_last_modified(Some(now - Duration::days(10)));
        assert!(!response_is_fresh(&meta, now));
    }

    #[test]
    fn age_header_counts_against_freshness() {
        let now = Utc::now();
        let mut meta = meta_with_headers(&[
            ("date", format_http_date(now)),
            ("age", (2 * 86_400).to_string()),
        ]);
        meta.set_last_modified(Some(now - Duration::days(10)));
        assert!(!response_is_fresh(&meta, now));
    }

    #[test]
    fn missing_date_or_last_modified_is_stale() {
        let now = Utc::now();
        let mut meta = meta_with_headers(&[]);
        meta.set_last_modified(Some(now - Duration::days(10)));
        assert!(!response_is_fresh(&meta, now));

        let meta = meta_with_headers(&[("date", format_http_date(now))]);
        assert!(!response_is_fresh(&meta, now));
    }

    #[test]
    fn revalidation_headers_from_etag_and_last_modified() {
        let now = Utc::now();
        let mut meta = meta_with_headers(&[("ETag", "\"v1\"".to_string())]);
        meta.set_last_modified(Some(now - Duration::days(1)));

        let headers = revalidation_headers(&meta);
        assert_eq!(headers.len(), 2);
        assert_eq!(headers[0].0, Bytes::from_static(b"If-None-Match"));
        assert_eq!(headers[0].1, Bytes::from_static(b"\"v1\""));
        assert_eq!(headers[1].0, Bytes::from_static(b"If-Modified-Since"));
        assert!(parse_http_date(&headers[1].1).is_some());
    }

    #[test]
    fn max_age_beats_expires() {
        let now = Utc::now();
        let headers: HeaderList = vec![
            (
                Bytes::from_static(b"cache-control"),
                Bytes::from_static(b"max-age=60"),
            ),
            (
                Bytes::from_static(b"expires"),
                Bytes::from(format_http_date(now + Duration::seconds(3600))),
            ),
        ]
        .into_iter()
        .collect();

        let expiration = expiration_from_headers(&headers, now).unwrap();
        assert_eq!((expiration - now).num_seconds(), 60);
    }
}
