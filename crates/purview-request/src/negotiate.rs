//! Content negotiation and media-type matching.
//!
//! A [`Negotiator`] snapshots the `Accept*` headers of one request and
//! answers "which of these candidates does the client prefer". Matching
//! follows the usual q-value rules: `q=0` excludes, wildcards are
//! supported, a more specific range beats a less specific one, and a
//! higher q beats both. An absent header accepts anything, so the first
//! candidate offered wins.
//!
//! [`type_is`] is the request-body counterpart: does the request's
//! `Content-Type` match one of the given patterns.

use hyper::header::{
    ACCEPT, ACCEPT_CHARSET, ACCEPT_ENCODING, ACCEPT_LANGUAGE, CONTENT_LENGTH, CONTENT_TYPE,
    TRANSFER_ENCODING,
};
use hyper::HeaderMap;
use mime::Mime;

/// Result of matching a request body's media type.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TypeIs {
    /// The content type matched; carries the candidate as given.
    Matched(String),
    /// The request has a body but its type matched nothing.
    Unmatched,
    /// The request carries no body at all.
    NoBody,
}

/// One parsed `Accept` media range.
#[derive(Debug, Clone)]
struct MediaRange {
    main: String,
    sub: String,
    q: f32,
    index: usize,
}

/// One parsed entry of a simple q-list header (encoding/charset/language).
#[derive(Debug, Clone)]
struct QItem {
    name: String,
    q: f32,
    index: usize,
}

/// Parsed view of a request's `Accept*` headers. `None` means the header
/// was absent, which accepts anything.
#[derive(Debug, Clone)]
pub struct Negotiator {
    media: Option<Vec<MediaRange>>,
    encodings: Option<Vec<QItem>>,
    charsets: Option<Vec<QItem>>,
    languages: Option<Vec<QItem>>,
}

impl Negotiator {
    pub fn new(headers: &HeaderMap) -> Self {
        Self {
            media: header_str(headers, ACCEPT).map(parse_media_ranges),
            encodings: header_str(headers, ACCEPT_ENCODING).map(parse_q_list),
            charsets: header_str(headers, ACCEPT_CHARSET).map(parse_q_list),
            languages: header_str(headers, ACCEPT_LANGUAGE).map(parse_q_list),
        }
    }

    /// Best media type among `provided`, which may be full types
    /// (`application/json`) or extension shorthands (`json`).
    pub fn media_type(&self, provided: &[&str]) -> Option<String> {
        let ranges = match &self.media {
            Some(ranges) => ranges,
            // No Accept header: the first candidate is acceptable as-is
            None => return provided.first().map(|s| s.to_string()),
        };

        let mut best: Option<(f32, u8, usize, usize)> = None;
        let mut best_candidate = None;
        for (ci, candidate) in provided.iter().enumerate() {
            let full = match expand_type(candidate) {
                Some(full) => full,
                None => continue,
            };
            let (main, sub) = match split_type(&full) {
                Some(parts) => parts,
                None => continue,
            };
            let mut candidate_best: Option<(f32, u8, usize)> = None;
            for range in ranges {
                let spec = match range_specificity(range, main, sub) {
                    Some(spec) => spec,
                    None => continue,
                };
                // The most specific matching range governs the quality
                let replace = match candidate_best {
                    Some((_, s, _)) => spec > s,
                    None => true,
                };
                if replace {
                    candidate_best = Some((range.q, spec, range.index));
                }
            }
            if let Some((q, spec, index)) = candidate_best {
                if q <= 0.0 {
                    continue;
                }
                let better = match best {
                    Some((bq, bspec, bindex, _)) => {
                        q > bq || (q == bq && (spec > bspec || (spec == bspec && index < bindex)))
                    }
                    None => true,
                };
                if better {
                    best = Some((q, spec, index, ci));
                    best_candidate = Some(candidate.to_string());
                }
            }
        }
        best_candidate
    }

    /// All acceptable media types, most preferred first.
    pub fn media_types(&self) -> Vec<String> {
        match &self.media {
            Some(ranges) => {
                let mut ranges: Vec<_> = ranges.iter().filter(|r| r.q > 0.0).collect();
                ranges.sort_by(|a, b| {
                    b.q.partial_cmp(&a.q)
                        .unwrap_or(std::cmp::Ordering::Equal)
                        .then(a.index.cmp(&b.index))
                });
                ranges
                    .iter()
                    .map(|r| format!("{}/{}", r.main, r.sub))
                    .collect()
            }
            None => vec!["*/*".to_string()],
        }
    }

    pub fn encoding(&self, provided: &[&str]) -> Option<String> {
        let items = match &self.encodings {
            Some(items) => items,
            None => return provided.first().map(|s| s.to_string()),
        };
        best_simple(items, provided, |candidate, items| {
            // identity is acceptable unless the header excluded it,
            // ranked below anything explicitly listed
            if candidate.eq_ignore_ascii_case("identity")
                && !items.iter().any(|i| i.name == "*" || i.name == "identity")
            {
                Some((0.001, 0, usize::MAX))
            } else {
                None
            }
        })
    }

    pub fn encodings(&self) -> Vec<String> {
        match &self.encodings {
            Some(items) => {
                let mut names = sorted_names(items);
                let mentioned = items
                    .iter()
                    .any(|i| i.name == "*" || i.name == "identity");
                if !mentioned {
                    names.push("identity".to_string());
                }
                names
            }
            None => vec!["*".to_string()],
        }
    }

    pub fn charset(&self, provided: &[&str]) -> Option<String> {
        let items = match &self.charsets {
            Some(items) => items,
            None => return provided.first().map(|s| s.to_string()),
        };
        best_simple(items, provided, |_, _| None)
    }

    pub fn charsets(&self) -> Vec<String> {
        match &self.charsets {
            Some(items) => sorted_names(items),
            None => vec!["*".to_string()],
        }
    }

    pub fn language(&self, provided: &[&str]) -> Option<String> {
        let items = match &self.languages {
            Some(items) => items,
            None => return provided.first().map(|s| s.to_string()),
        };
        let mut best: Option<(f32, u8, usize, usize)> = None;
        let mut best_candidate = None;
        for (ci, candidate) in provided.iter().enumerate() {
            let mut candidate_best: Option<(f32, u8, usize)> = None;
            for item in items {
                let spec = match language_specificity(&item.name, candidate) {
                    Some(spec) => spec,
                    None => continue,
                };
                let replace = match candidate_best {
                    Some((_, s, _)) => spec > s,
                    None => true,
                };
                if replace {
                    candidate_best = Some((item.q, spec, item.index));
                }
            }
            if let Some((q, spec, index)) = candidate_best {
                if q <= 0.0 {
                    continue;
                }
                let better = match best {
                    Some((bq, bspec, bindex, _)) => {
                        q > bq || (q == bq && (spec > bspec || (spec == bspec && index < bindex)))
                    }
                    None => true,
                };
                if better {
                    best = Some((q, spec, index, ci));
                    best_candidate = Some(candidate.to_string());
                }
            }
        }
        best_candidate
    }

    pub fn languages(&self) -> Vec<String> {
        match &self.languages {
            Some(items) => sorted_names(items),
            None => vec!["*".to_string()],
        }
    }
}

fn header_str(headers: &HeaderMap, name: hyper::header::HeaderName) -> Option<&str> {
    headers.get(name).and_then(|v| v.to_str().ok())
}

fn parse_media_ranges(value: &str) -> Vec<MediaRange> {
    value
        .split(',')
        .enumerate()
        .filter_map(|(index, part)| {
            let mut segments = part.split(';');
            let range = segments.next()?.trim().to_ascii_lowercase();
            let (main, sub) = split_type(&range)?;
            Some(MediaRange {
                main: main.to_string(),
                sub: sub.to_string(),
                q: parse_q(segments),
                index,
            })
        })
        .collect()
}

fn parse_q_list(value: &str) -> Vec<QItem> {
    value
        .split(',')
        .enumerate()
        .filter_map(|(index, part)| {
            let mut segments = part.split(';');
            let name = segments.next()?.trim().to_ascii_lowercase();
            if name.is_empty() {
                return None;
            }
            Some(QItem {
                name,
                q: parse_q(segments),
                index,
            })
        })
        .collect()
}

fn parse_q<'a>(segments: impl Iterator<Item = &'a str>) -> f32 {
    for segment in segments {
        if let Some((key, value)) = segment.split_once('=') {
            if key.trim().eq_ignore_ascii_case("q") {
                return value.trim().parse().map(|q: f32| q.clamp(0.0, 1.0)).unwrap_or(1.0);
            }
        }
    }
    1.0
}

fn split_type(value: &str) -> Option<(&str, &str)> {
    let (main, sub) = value.split_once('/')?;
    if main.is_empty() || sub.is_empty() {
        return None;
    }
    Some((main, sub))
}

/// How specifically a range matches `main/sub`: exact/exact > exact/* > */*.
/// `None` means no match.
fn range_specificity(range: &MediaRange, main: &str, sub: &str) -> Option<u8> {
    let main_spec = if range.main == main {
        2
    } else if range.main == "*" {
        0
    } else {
        return None;
    };
    let sub_spec = if range.sub == sub {
        1
    } else if range.sub == "*" {
        0
    } else {
        return None;
    };
    Some(main_spec + sub_spec)
}

/// Exact tag beats primary-tag prefix beats wildcard.
fn language_specificity(range: &str, candidate: &str) -> Option<u8> {
    if range.eq_ignore_ascii_case(candidate) {
        return Some(2);
    }
    let primary = candidate.split('-').next().unwrap_or(candidate);
    if range.eq_ignore_ascii_case(primary) {
        return Some(1);
    }
    if range == "*" {
        return Some(0);
    }
    None
}

/// Shared best-match loop for encoding/charset lists. `fallback` supplies
/// an implicit quality for candidates the header never mentions.
fn best_simple(
    items: &[QItem],
    provided: &[&str],
    fallback: impl Fn(&str, &[QItem]) -> Option<(f32, u8, usize)>,
) -> Option<String> {
    let mut best: Option<(f32, u8, usize, usize)> = None;
    let mut best_candidate = None;
    for (ci, candidate) in provided.iter().enumerate() {
        let lowered = candidate.to_ascii_lowercase();
        let mut candidate_best: Option<(f32, u8, usize)> = None;
        for item in items {
            let spec = if item.name == lowered {
                1
            } else if item.name == "*" {
                0
            } else {
                continue;
            };
            let replace = match candidate_best {
                Some((_, s, _)) => spec > s,
                None => true,
            };
            if replace {
                candidate_best = Some((item.q, spec, item.index));
            }
        }
        if candidate_best.is_none() {
            candidate_best = fallback(candidate, items);
        }
        if let Some((q, spec, index)) = candidate_best {
            if q <= 0.0 {
                continue;
            }
            let better = match best {
                Some((bq, bspec, bindex, _)) => {
                    q > bq || (q == bq && (spec > bspec || (spec == bspec && index < bindex)))
                }
                None => true,
            };
            if better {
                best = Some((q, spec, index, ci));
                best_candidate = Some(candidate.to_string());
            }
        }
    }
    best_candidate
}

fn sorted_names(items: &[QItem]) -> Vec<String> {
    let mut items: Vec<_> = items.iter().filter(|i| i.q > 0.0).collect();
    items.sort_by(|a, b| {
        b.q.partial_cmp(&a.q)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then(a.index.cmp(&b.index))
    });
    items.iter().map(|i| i.name.clone()).collect()
}

/// Resolve an extension shorthand to a full media type. Candidates that
/// already contain `/` (or a `+suffix` pattern) pass through.
fn expand_type(name: &str) -> Option<String> {
    if name.contains('/') {
        return Some(name.to_ascii_lowercase());
    }
    if let Some(suffix) = name.strip_prefix('+') {
        return Some(format!("*/*+{suffix}").to_ascii_lowercase());
    }
    let full = match name.to_ascii_lowercase().as_str() {
        "html" => "text/html",
        "text" | "txt" => "text/plain",
        "json" => "application/json",
        "xml" => "application/xml",
        "urlencoded" | "form" => "application/x-www-form-urlencoded",
        "multipart" => "multipart/*",
        "bin" => "application/octet-stream",
        _ => return None,
    };
    Some(full.to_string())
}

/// Whether the request carries a body at all: any `Transfer-Encoding`, or
/// a non-empty `Content-Length` (including `0`).
fn has_body(headers: &HeaderMap) -> bool {
    if headers.contains_key(TRANSFER_ENCODING) {
        return true;
    }
    match header_str(headers, CONTENT_LENGTH) {
        Some(len) => !len.is_empty(),
        None => false,
    }
}

/// Match the request's `Content-Type` against candidate patterns.
///
/// Candidates may be exact types, wildcards (`text/*`, `*/json`), suffix
/// patterns (`+json`, `application/*+json`), or extension shorthands.
/// With no candidates, a request with a parseable body type matches
/// itself. The first matching candidate is returned as given.
pub fn type_is(headers: &HeaderMap, candidates: &[&str]) -> TypeIs {
    if !has_body(headers) {
        return TypeIs::NoBody;
    }
    let content_type = match header_str(headers, CONTENT_TYPE) {
        Some(value) => value,
        None => return TypeIs::Unmatched,
    };
    let mime: Mime = match content_type.trim().parse() {
        Ok(mime) => mime,
        Err(_) => return TypeIs::Unmatched,
    };
    let actual = mime.essence_str().to_ascii_lowercase();
    let (main, sub) = match split_type(&actual) {
        Some(parts) => parts,
        None => return TypeIs::Unmatched,
    };

    if candidates.is_empty() {
        return TypeIs::Matched(actual.clone());
    }
    for candidate in candidates {
        let pattern = match expand_type(candidate) {
            Some(pattern) => pattern,
            None => continue,
        };
        let (pmain, psub) = match split_type(&pattern) {
            Some(parts) => parts,
            None => continue,
        };
        let main_ok = pmain == "*" || pmain == main;
        let sub_ok = psub == "*"
            || psub == sub
            || psub
                .strip_prefix("*+")
                .map(|suffix| sub.ends_with(&format!("+{suffix}")))
                .unwrap_or(false);
        if main_ok && sub_ok {
            return TypeIs::Matched(candidate.to_string());
        }
    }
    TypeIs::Unmatched
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
    fn test_media_type_exact_match() {
        let n = Negotiator::new(&headers(&[("accept", "application/json")]));
        assert_eq!(
            n.media_type(&["application/json"]),
            Some("application/json".to_string())
        );
        assert_eq!(n.media_type(&["text/html"]), None);
    }

    #[test]
    fn test_media_type_extension_shorthand() {
        let n = Negotiator::new(&headers(&[("accept", "application/json")]));
        assert_eq!(n.media_type(&["json"]), Some("json".to_string()));
        assert_eq!(n.media_type(&["html"]), None);
    }

    #[test]
    fn test_media_type_q_ordering() {
        let n = Negotiator::new(&headers(&[(
            "accept",
            "text/html;q=0.5, application/json;q=0.9",
        )]));
        assert_eq!(
            n.media_type(&["html", "json"]),
            Some("json".to_string())
        );
    }

    #[test]
    fn test_media_type_specific_beats_wildcard() {
        let n = Negotiator::new(&headers(&[("accept", "text/*, text/plain")]));
        assert_eq!(
            n.media_type(&["text/plain", "text/html"]),
            Some("text/plain".to_string())
        );
    }

    #[test]
    fn test_media_type_q_zero_excludes() {
        let n = Negotiator::new(&headers(&[("accept", "*/*, application/json;q=0")]));
        assert_eq!(n.media_type(&["application/json"]), None);
        assert_eq!(n.media_type(&["text/html"]), Some("text/html".to_string()));
    }

    #[test]
    fn test_media_type_missing_header_accepts_first() {
        let n = Negotiator::new(&HeaderMap::new());
        assert_eq!(n.media_type(&["html", "json"]), Some("html".to_string()));
        assert_eq!(n.media_type(&[]), None);
    }

    #[test]
    fn test_media_types_listing() {
        let n = Negotiator::new(&headers(&[(
            "accept",
            "text/html, application/json;q=0.5, text/plain;q=0",
        )]));
        assert_eq!(n.media_types(), vec!["text/html", "application/json"]);
    }

    #[test]
    fn test_media_types_missing_header() {
        let n = Negotiator::new(&HeaderMap::new());
        assert_eq!(n.media_types(), vec!["*/*"]);
    }

    #[test]
    fn test_encoding_preference() {
        let n = Negotiator::new(&headers(&[("accept-encoding", "gzip, br;q=0.9")]));
        assert_eq!(n.encoding(&["br", "gzip"]), Some("gzip".to_string()));
    }

    #[test]
    fn test_encoding_identity_implicitly_acceptable() {
        let n = Negotiator::new(&headers(&[("accept-encoding", "gzip")]));
        assert_eq!(n.encoding(&["identity"]), Some("identity".to_string()));
        // But ranked below an explicit listing
        assert_eq!(n.encoding(&["identity", "gzip"]), Some("gzip".to_string()));
    }

    #[test]
    fn test_encoding_identity_can_be_refused() {
        let n = Negotiator::new(&headers(&[("accept-encoding", "gzip, identity;q=0")]));
        assert_eq!(n.encoding(&["identity"]), None);
    }

    #[test]
    fn test_encodings_listing_appends_identity() {
        let n = Negotiator::new(&headers(&[("accept-encoding", "gzip, br;q=0.5")]));
        assert_eq!(n.encodings(), vec!["gzip", "br", "identity"]);
    }

    #[test]
    fn test_charset_match() {
        let n = Negotiator::new(&headers(&[("accept-charset", "utf-8, iso-8859-1;q=0.5")]));
        assert_eq!(
            n.charset(&["iso-8859-1", "utf-8"]),
            Some("utf-8".to_string())
        );
        assert_eq!(n.charset(&["koi8-r"]), None);
    }

    #[test]
    fn test_language_primary_tag_prefix() {
        let n = Negotiator::new(&headers(&[("accept-language", "en")]));
        assert_eq!(n.language(&["en-US"]), Some("en-US".to_string()));
        assert_eq!(n.language(&["fr"]), None);
    }

    #[test]
    fn test_language_q_ordering() {
        let n = Negotiator::new(&headers(&[("accept-language", "fr;q=0.8, en;q=0.9")]));
        assert_eq!(n.language(&["fr", "en"]), Some("en".to_string()));
    }

    #[test]
    fn test_type_is_no_body() {
        let map = headers(&[("content-type", "application/json")]);
        assert_eq!(type_is(&map, &["json"]), TypeIs::NoBody);
    }

    #[test]
    fn test_type_is_exact_and_shorthand() {
        let map = headers(&[
            ("content-type", "application/json"),
            ("content-length", "42"),
        ]);
        assert_eq!(
            type_is(&map, &["application/json"]),
            TypeIs::Matched("application/json".to_string())
        );
        assert_eq!(type_is(&map, &["json"]), TypeIs::Matched("json".to_string()));
        assert_eq!(type_is(&map, &["html"]), TypeIs::Unmatched);
    }

    #[test]
    fn test_type_is_wildcard_and_suffix() {
        let map = headers(&[
            ("content-type", "application/vnd.api+json; charset=utf-8"),
            ("content-length", "10"),
        ]);
        assert_eq!(
            type_is(&map, &["application/*"]),
            TypeIs::Matched("application/*".to_string())
        );
        assert_eq!(type_is(&map, &["+json"]), TypeIs::Matched("+json".to_string()));
        assert_eq!(
            type_is(&map, &["application/*+json"]),
            TypeIs::Matched("application/*+json".to_string())
        );
        assert_eq!(type_is(&map, &["application/json"]), TypeIs::Unmatched);
    }

    #[test]
    fn test_type_is_no_candidates_returns_type() {
        let map = headers(&[
            ("content-type", "text/html; charset=utf-8"),
            ("content-length", "5"),
        ]);
        assert_eq!(type_is(&map, &[]), TypeIs::Matched("text/html".to_string()));
    }

    #[test]
    fn test_type_is_zero_length_still_has_body() {
        let map = headers(&[
            ("content-type", "application/json"),
            ("content-length", "0"),
        ]);
        assert_eq!(type_is(&map, &["json"]), TypeIs::Matched("json".to_string()));
    }

    #[test]
    fn test_type_is_transfer_encoding_counts_as_body() {
        let map = headers(&[
            ("content-type", "application/json"),
            ("transfer-encoding", "chunked"),
        ]);
        assert_eq!(type_is(&map, &["json"]), TypeIs::Matched("json".to_string()));
    }
}
