//! Conditional-request freshness.
//!
//! Compares a request's cache validators (`If-None-Match`,
//! `If-Modified-Since`) against the paired response's `ETag` and
//! `Last-Modified`. A request with no validators is never fresh, and
//! `Cache-Control: no-cache` on the request vetoes freshness outright.

use chrono::DateTime;
use hyper::header::{CACHE_CONTROL, ETAG, IF_MODIFIED_SINCE, IF_NONE_MATCH, LAST_MODIFIED};
use hyper::HeaderMap;

/// True when the response the client already holds is still usable.
pub fn fresh(req_headers: &HeaderMap, res_headers: &HeaderMap) -> bool {
    let modified_since = header_str(req_headers, IF_MODIFIED_SINCE);
    let none_match = header_str(req_headers, IF_NONE_MATCH);

    if modified_since.is_none() && none_match.is_none() {
        return false;
    }

    if let Some(cache_control) = header_str(req_headers, CACHE_CONTROL) {
        if has_no_cache_directive(cache_control) {
            return false;
        }
    }

    if let Some(none_match) = none_match {
        if none_match != "*" {
            let etag = match header_str(res_headers, ETAG) {
                Some(etag) => etag,
                None => return false,
            };
            if !etag_matches(none_match, etag) {
                return false;
            }
        }
    }

    if let Some(modified_since) = modified_since {
        let last_modified = header_str(res_headers, LAST_MODIFIED);
        let modified_stale = match (
            last_modified.and_then(parse_http_date),
            parse_http_date(modified_since),
        ) {
            (Some(last_modified), Some(modified_since)) => last_modified > modified_since,
            // Unparseable on either side counts as stale
            _ => true,
        };
        if modified_stale {
            return false;
        }
    }

    true
}

fn header_str(headers: &HeaderMap, name: hyper::header::HeaderName) -> Option<&str> {
    headers.get(name).and_then(|v| v.to_str().ok())
}

fn parse_http_date(value: &str) -> Option<i64> {
    DateTime::parse_from_rfc2822(value)
        .ok()
        .map(|dt| dt.timestamp())
}

/// `no-cache` must appear as its own directive, not as a substring of
/// another directive's value.
fn has_no_cache_directive(cache_control: &str) -> bool {
    cache_control
        .split(',')
        .any(|directive| directive.trim() == "no-cache")
}

/// Match an `If-None-Match` token list against a response `ETag`,
/// tolerating a weak prefix on either side.
fn etag_matches(none_match: &str, etag: &str) -> bool {
    parse_token_list(none_match).any(|token| {
        token == etag
            || token.strip_prefix("W/") == Some(etag)
            || etag.strip_prefix("W/") == Some(token)
    })
}

fn parse_token_list(value: &str) -> impl Iterator<Item = &str> {
    value.split(',').map(str::trim).filter(|t| !t.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;
    use hyper::header::HeaderValue;

    fn headers(pairs: &[(&'static str, &str)]) -> HeaderMap {
        let mut map = HeaderMap::new();
        for (name, value) in pairs {
            map.insert(
                hyper::header::HeaderName::from_static(name),
                HeaderValue::from_str(value).unwrap(),
            );
        }
        map
    }

    #[test]
    fn test_no_validators_is_stale() {
        assert!(!fresh(&HeaderMap::new(), &headers(&[("etag", "\"a\"")])));
    }

    #[test]
    fn test_etag_match() {
        let req = headers(&[("if-none-match", "\"a\"")]);
        let res = headers(&[("etag", "\"a\"")]);
        assert!(fresh(&req, &res));
    }

    #[test]
    fn test_etag_mismatch() {
        let req = headers(&[("if-none-match", "\"a\"")]);
        let res = headers(&[("etag", "\"b\"")]);
        assert!(!fresh(&req, &res));
    }

    #[test]
    fn test_etag_token_list() {
        let req = headers(&[("if-none-match", "\"a\", \"b\", \"c\"")]);
        let res = headers(&[("etag", "\"c\"")]);
        assert!(fresh(&req, &res));
    }

    #[test]
    fn test_etag_star_matches_anything() {
        let req = headers(&[("if-none-match", "*")]);
        let res = headers(&[("etag", "\"whatever\"")]);
        assert!(fresh(&req, &res));
        // Even with no response etag at all
        assert!(fresh(&req, &HeaderMap::new()));
    }

    #[test]
    fn test_weak_etag_matches_strong() {
        let req = headers(&[("if-none-match", "W/\"a\"")]);
        let res = headers(&[("etag", "\"a\"")]);
        assert!(fresh(&req, &res));

        let req = headers(&[("if-none-match", "\"a\"")]);
        let res = headers(&[("etag", "W/\"a\"")]);
        assert!(fresh(&req, &res));
    }

    #[test]
    fn test_none_match_without_response_etag() {
        let req = headers(&[("if-none-match", "\"a\"")]);
        assert!(!fresh(&req, &HeaderMap::new()));
    }

    #[test]
    fn test_modified_since_older_response_is_fresh() {
        let req = headers(&[("if-modified-since", "Sat, 01 Jan 2000 00:00:00 GMT")]);
        let res = headers(&[("last-modified", "Fri, 31 Dec 1999 23:59:59 GMT")]);
        assert!(fresh(&req, &res));
    }

    #[test]
    fn test_modified_since_newer_response_is_stale() {
        let req = headers(&[("if-modified-since", "Sat, 01 Jan 2000 00:00:00 GMT")]);
        let res = headers(&[("last-modified", "Sat, 01 Jan 2000 00:00:01 GMT")]);
        assert!(!fresh(&req, &res));
    }

    #[test]
    fn test_modified_since_equal_is_fresh() {
        let req = headers(&[("if-modified-since", "Sat, 01 Jan 2000 00:00:00 GMT")]);
        let res = headers(&[("last-modified", "Sat, 01 Jan 2000 00:00:00 GMT")]);
        assert!(fresh(&req, &res));
    }

    #[test]
    fn test_unparseable_dates_are_stale() {
        let req = headers(&[("if-modified-since", "not a date")]);
        let res = headers(&[("last-modified", "Sat, 01 Jan 2000 00:00:00 GMT")]);
        assert!(!fresh(&req, &res));

        let req = headers(&[("if-modified-since", "Sat, 01 Jan 2000 00:00:00 GMT")]);
        let res = headers(&[("last-modified", "garbage")]);
        assert!(!fresh(&req, &res));
    }

    #[test]
    fn test_no_cache_veto() {
        let req = headers(&[
            ("if-none-match", "\"a\""),
            ("cache-control", "no-cache"),
        ]);
        let res = headers(&[("etag", "\"a\"")]);
        assert!(!fresh(&req, &res));
    }

    #[test]
    fn test_no_cache_must_be_its_own_directive() {
        let req = headers(&[
            ("if-none-match", "\"a\""),
            ("cache-control", "max-age=0, private"),
        ]);
        let res = headers(&[("etag", "\"a\"")]);
        assert!(fresh(&req, &res));
    }

    #[test]
    fn test_both_validators_must_hold() {
        // Matching etag but newer last-modified: stale
        let req = headers(&[
            ("if-none-match", "\"a\""),
            ("if-modified-since", "Sat, 01 Jan 2000 00:00:00 GMT"),
        ]);
        let res = headers(&[
            ("etag", "\"a\""),
            ("last-modified", "Sun, 02 Jan 2000 00:00:00 GMT"),
        ]);
        assert!(!fresh(&req, &res));
    }
}
