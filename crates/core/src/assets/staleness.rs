//! Minimal HTTP freshness check for unhashed cached assets.

use chrono::DateTime;
use http::header;

use crate::net::Response;

/// Whether a cached unhashed response should be revalidated.
///
/// `cached_at` is when the agent stored the response; the response's own
/// `Date` header stands in for it when absent. Anything that cannot be
/// evaluated counts as stale.
pub fn needs_revalidation(res: &Response, cached_at: Option<i64>, now: i64) -> bool {
    if let Some(cache_control) = res.header_str(&header::CACHE_CONTROL) {
        let Some(max_age) = max_age_secs(cache_control) else {
            return true;
        };
        let origin = match cached_at {
            Some(ts) => ts,
            None => match res.header_str(&header::DATE).and_then(parse_http_date) {
                Some(ts) => ts,
                None => return true,
            },
        };
        let age = now - origin;
        return age < 0 || age > max_age.saturating_mul(1000);
    }

    if res.headers.contains_key(header::EXPIRES) {
        return match res.header_str(&header::EXPIRES).and_then(parse_http_date) {
            Some(expires) => now > expires,
            None => true,
        };
    }

    true
}

/// `max-age` directive of a `Cache-Control` value, in seconds.
fn max_age_secs(cache_control: &str) -> Option<i64> {
    cache_control
        .split(',')
        .map(str::trim)
        .find_map(|directive| {
            let (name, value) = directive.split_once('=')?;
            name.trim()
                .eq_ignore_ascii_case("max-age")
                .then(|| value.trim().trim_matches('"').parse::<i64>().ok())
                .flatten()
        })
}

/// Epoch milliseconds of an IMF-fixdate (`Tue, 01 Jan 2030 00:00:00 GMT`).
pub fn parse_http_date(value: &str) -> Option<i64> {
    DateTime::parse_from_rfc2822(value.trim())
        .ok()
        .map(|d| d.timestamp_millis())
}

#[cfg(test)]
mod tests {
    use super::*;
    use http::header::HeaderValue;

    const MINUTE: i64 = 60_000;

    fn with(name: header::HeaderName, value: &'static str) -> Response {
        Response::with_content("x", "text/plain").with_header(name, HeaderValue::from_static(value))
    }

    #[test]
    fn test_max_age_against_stored_timestamp() {
        let res = with(header::CACHE_CONTROL, "public, max-age=60");
        assert!(!needs_revalidation(&res, Some(0), 30_000));
        assert!(!needs_revalidation(&res, Some(0), MINUTE));
        assert!(needs_revalidation(&res, Some(0), MINUTE + 1));
    }

    #[test]
    fn test_future_timestamp_is_stale() {
        let res = with(header::CACHE_CONTROL, "max-age=60");
        assert!(needs_revalidation(&res, Some(10_000), 0));
    }

    #[test]
    fn test_cache_control_without_max_age_is_stale() {
        let res = with(header::CACHE_CONTROL, "no-cache");
        assert!(needs_revalidation(&res, Some(0), 1));
    }

    #[test]
    fn test_falls_back_to_date_header() {
        let date = parse_http_date("Tue, 01 Jan 2030 00:00:00 GMT").unwrap();
        let res = with(header::CACHE_CONTROL, "max-age=60")
            .with_header(header::DATE, HeaderValue::from_static("Tue, 01 Jan 2030 00:00:00 GMT"));
        assert!(!needs_revalidation(&res, None, date + 1_000));
        assert!(needs_revalidation(&res, None, date + 2 * MINUTE));

        let undated = with(header::CACHE_CONTROL, "max-age=60");
        assert!(needs_revalidation(&undated, None, date));
    }

    #[test]
    fn test_expires() {
        let expires = parse_http_date("Tue, 01 Jan 2030 00:00:00 GMT").unwrap();
        let res = with(header::EXPIRES, "Tue, 01 Jan 2030 00:00:00 GMT");
        assert!(!needs_revalidation(&res, None, expires - 1));
        assert!(needs_revalidation(&res, None, expires + 1));

        let garbage = with(header::EXPIRES, "0");
        assert!(needs_revalidation(&garbage, None, 0));
    }

    #[test]
    fn test_no_headers_is_stale() {
        let res = Response::with_content("x", "text/plain");
        assert!(needs_revalidation(&res, Some(0), 0));
    }
}
