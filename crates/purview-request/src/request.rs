//! The per-request facade.
//!
//! One [`RequestFacade`] is created per inbound request and discarded with
//! it. Every accessor is a pure (memoized) function of the raw request
//! state at the time of the read; none of them fail on malformed input.
//! The facade is exclusively owned by its request cycle, so the memo cells
//! use unsynchronized interior mutability and the type is `!Sync`.
//!
//! Memoization rules: the query cache is keyed by the exact raw query
//! string, so it survives `url` rewrites; the parsed URL, the negotiator,
//! and the resolved client IP are memoized once per facade lifetime.
//! Routing layers that reassign `url` or `method` do so before any of
//! those are first read.

use crate::config::ProxyConfig;
use crate::fresh;
use crate::negotiate::{self, Negotiator, TypeIs};
use crate::raw::RawRequest;
use crate::response::PairedResponse;
use hyper::header::{HeaderName, CONTENT_TYPE, HOST};
use hyper::{HeaderMap, Method, StatusCode, Version};
use mime::Mime;
use once_cell::unsync::OnceCell;
use serde_json::{json, Value};
use std::cell::{Ref, RefCell, RefMut};
use std::collections::BTreeMap;
use std::fmt;
use std::net::IpAddr;
use std::sync::Arc;
use tracing::debug;
use url::{form_urlencoded, Url};

// Static header names for the forwarded headers the trust chain consults
pub static X_FORWARDED_HOST: HeaderName = HeaderName::from_static("x-forwarded-host");
pub static X_FORWARDED_PROTO: HeaderName = HeaderName::from_static("x-forwarded-proto");

/// Parsed query string: key to one or more values, in document order per key.
pub type Query = BTreeMap<String, Vec<String>>;

/// Per-request view over a [`RawRequest`] plus the application's proxy
/// trust settings and the paired response handle.
pub struct RequestFacade {
    raw: RawRequest,
    trust: Arc<ProxyConfig>,
    response: RefCell<PairedResponse>,
    /// Target as captured at construction; survives `url` rewrites.
    original_target: String,
    url_memo: OnceCell<Option<Url>>,
    accept_memo: OnceCell<Negotiator>,
    ip_memo: RefCell<Option<String>>,
    query_cache: RefCell<Option<(String, Query)>>,
}

impl RequestFacade {
    pub fn new(raw: RawRequest, trust: Arc<ProxyConfig>) -> Self {
        Self::with_response(raw, trust, PairedResponse::default())
    }

    pub fn with_response(
        raw: RawRequest,
        trust: Arc<ProxyConfig>,
        response: PairedResponse,
    ) -> Self {
        let original_target = raw.target.clone();
        Self {
            raw,
            trust,
            response: RefCell::new(response),
            original_target,
            url_memo: OnceCell::new(),
            accept_memo: OnceCell::new(),
            ip_memo: RefCell::new(None),
            query_cache: RefCell::new(None),
        }
    }

    pub fn raw(&self) -> &RawRequest {
        &self.raw
    }

    pub fn response(&self) -> Ref<'_, PairedResponse> {
        self.response.borrow()
    }

    pub fn response_mut(&self) -> RefMut<'_, PairedResponse> {
        self.response.borrow_mut()
    }

    // ===== Header access =====

    pub fn headers(&self) -> &HeaderMap {
        &self.raw.headers
    }

    pub fn headers_mut(&mut self) -> &mut HeaderMap {
        &mut self.raw.headers
    }

    /// Replace the whole header mapping.
    pub fn set_headers(&mut self, headers: HeaderMap) {
        self.raw.headers = headers;
    }

    /// Case-insensitive single-header lookup. `referer` and `referrer`
    /// are interchangeable, preferring `referrer`. Returns `""` when the
    /// header is absent or not valid UTF-8.
    pub fn get(&self, field: &str) -> String {
        let lowered = field.to_ascii_lowercase();
        match lowered.as_str() {
            "referer" | "referrer" => {
                let value = self.header_string("referrer");
                if value.is_empty() {
                    self.header_string("referer")
                } else {
                    value
                }
            }
            _ => self.header_string(&lowered),
        }
    }

    fn header_string(&self, name: &str) -> String {
        self.raw
            .headers
            .get(name)
            .and_then(|v| v.to_str().ok())
            .unwrap_or("")
            .to_string()
    }

    // ===== Method and target =====

    pub fn method(&self) -> &Method {
        &self.raw.method
    }

    /// Mutation escape hatch for routing layers.
    pub fn set_method(&mut self, method: Method) {
        self.raw.method = method;
    }

    /// The request target string, e.g. `/users?page=2`.
    pub fn url(&self) -> &str {
        &self.raw.target
    }

    /// Mutation escape hatch for routing layers.
    pub fn set_url(&mut self, url: impl Into<String>) {
        self.raw.target = url.into();
    }

    /// The target as it arrived, before any rewriting.
    pub fn original_url(&self) -> &str {
        &self.original_target
    }

    // ===== URL decomposition =====

    pub fn path(&self) -> &str {
        match self.raw.target.split_once('?') {
            Some((path, _)) => path,
            None => &self.raw.target,
        }
    }

    /// Rewrite only the path portion, preserving the query string.
    /// No-op when the new path equals the current one.
    pub fn set_path(&mut self, path: &str) {
        if path == self.path() {
            return;
        }
        let querystring = self.querystring().to_string();
        self.raw.target = if querystring.is_empty() {
            path.to_string()
        } else {
            format!("{path}?{querystring}")
        };
    }

    pub fn querystring(&self) -> &str {
        match self.raw.target.split_once('?') {
            Some((_, querystring)) => querystring,
            None => "",
        }
    }

    /// Rewrite only the search portion, preserving the path. No-op when
    /// `?<querystring>` equals the current search.
    pub fn set_querystring(&mut self, querystring: &str) {
        if self.search() == format!("?{querystring}") {
            return;
        }
        let path = self.path().to_string();
        self.raw.target = if querystring.is_empty() {
            path
        } else {
            format!("{path}?{querystring}")
        };
    }

    /// `?`-prefixed query string, `""` when there is none.
    pub fn search(&self) -> String {
        let querystring = self.querystring();
        if querystring.is_empty() {
            String::new()
        } else {
            format!("?{querystring}")
        }
    }

    pub fn set_search(&mut self, search: &str) {
        self.set_querystring(search.trim_start_matches('?'));
    }

    /// Parsed query string, cached keyed by the exact raw query string so
    /// the cache can never go stale under `url` rewrites.
    pub fn query(&self) -> Query {
        let querystring = self.querystring().to_string();
        if let Some((key, cached)) = &*self.query_cache.borrow() {
            if *key == querystring {
                return cached.clone();
            }
        }
        let parsed: Query = form_urlencoded::parse(querystring.as_bytes()).fold(
            BTreeMap::new(),
            |mut map, (key, value)| {
                map.entry(key.into_owned())
                    .or_insert_with(Vec::new)
                    .push(value.into_owned());
                map
            },
        );
        *self.query_cache.borrow_mut() = Some((querystring, parsed.clone()));
        parsed
    }

    /// Serialize a query mapping back into the query string.
    pub fn set_query(&mut self, query: &Query) {
        let mut serializer = form_urlencoded::Serializer::new(String::new());
        for (key, values) in query {
            for value in values {
                serializer.append_pair(key, value);
            }
        }
        let querystring = serializer.finish();
        self.set_querystring(&querystring);
    }

    // ===== Host resolution =====

    /// Host (hostname:port) from the trust chain: `X-Forwarded-Host` when
    /// proxying is trusted, else the HTTP/2 `:authority`, else `Host`.
    /// Only the first comma-separated value counts.
    pub fn host(&self) -> String {
        let mut host = None;
        if self.trust.proxy {
            host = nonempty(self.header_string(X_FORWARDED_HOST.as_str()));
        }
        if host.is_none() && self.raw.version >= Version::HTTP_2 {
            host = self.raw.authority.clone().and_then(nonempty);
        }
        if host.is_none() {
            host = nonempty(self.header_string(HOST.as_str()));
        }
        match host {
            Some(host) => first_of_list(&host),
            None => String::new(),
        }
    }

    /// Host with any `:port` stripped. Bracketed IPv6 literals are split
    /// through the parsed URL, which understands them.
    pub fn hostname(&self) -> String {
        let host = self.host();
        if host.is_empty() {
            return String::new();
        }
        if host.starts_with('[') {
            return self
                .parsed_url()
                .and_then(|url| url.host_str())
                .unwrap_or("")
                .to_string();
        }
        host.split(':').next().unwrap_or("").to_string()
    }

    /// `protocol://host`, both from the trust chain.
    pub fn origin(&self) -> String {
        format!("{}://{}", self.protocol(), self.host())
    }

    /// Full request URL. Absolute targets pass through untouched.
    pub fn href(&self) -> String {
        if starts_with_scheme(&self.original_target) {
            return self.original_target.clone();
        }
        format!("{}{}", self.origin(), self.original_target)
    }

    /// Fully parsed absolute URL, memoized once per facade. Malformed
    /// input caches `None` instead of failing.
    pub fn parsed_url(&self) -> Option<&Url> {
        self.url_memo
            .get_or_init(|| {
                let href = self.href();
                match Url::parse(&href) {
                    Ok(url) => Some(url),
                    Err(err) => {
                        debug!(url = %href, error = %err, "request URL did not parse");
                        None
                    }
                }
            })
            .as_ref()
    }

    // ===== Protocol and client identity =====

    /// `https` when the transport is encrypted; otherwise the first
    /// `X-Forwarded-Proto` value when proxying is trusted; otherwise
    /// `http`.
    pub fn protocol(&self) -> String {
        if self.raw.socket.encrypted {
            return "https".to_string();
        }
        if !self.trust.proxy {
            return "http".to_string();
        }
        let forwarded = self.header_string(X_FORWARDED_PROTO.as_str());
        if forwarded.is_empty() {
            "http".to_string()
        } else {
            first_of_list(&forwarded)
        }
    }

    pub fn secure(&self) -> bool {
        self.protocol() == "https"
    }

    /// Client IP chain from the configured forwarded-for header, client
    /// first. Truncated to the last `max_ips_count` entries (closest to
    /// the server) when a maximum is configured. Empty unless proxying
    /// is trusted.
    pub fn ips(&self) -> Vec<String> {
        if !self.trust.proxy {
            return Vec::new();
        }
        let value = self.get(&self.trust.proxy_ip_header);
        if value.is_empty() {
            return Vec::new();
        }
        let mut ips: Vec<String> = value.split(',').map(|s| s.trim().to_string()).collect();
        let max = self.trust.max_ips_count;
        if max > 0 && ips.len() > max {
            ips = ips.split_off(ips.len() - max);
        }
        ips
    }

    /// Resolved client address: first of [`ips`](Self::ips), else the
    /// socket's remote address, else `""`. Memoized; settable.
    pub fn ip(&self) -> String {
        if let Some(ip) = &*self.ip_memo.borrow() {
            return ip.clone();
        }
        let ip = self
            .ips()
            .into_iter()
            .next()
            .filter(|ip| !ip.is_empty())
            .or_else(|| self.raw.socket.remote_addr.map(|addr| addr.to_string()))
            .unwrap_or_default();
        *self.ip_memo.borrow_mut() = Some(ip.clone());
        ip
    }

    pub fn set_ip(&mut self, ip: impl Into<String>) {
        *self.ip_memo.borrow_mut() = Some(ip.into());
    }

    /// Subdomains, widest first: hostname split on `.`, reversed, with
    /// the registered-domain parts dropped. Empty for IP literals.
    pub fn subdomains(&self) -> Vec<String> {
        let hostname = self.hostname();
        if hostname.parse::<IpAddr>().is_ok() {
            return Vec::new();
        }
        let mut parts: Vec<String> = hostname.split('.').map(str::to_string).collect();
        parts.reverse();
        parts
            .into_iter()
            .skip(self.trust.subdomain_offset)
            .collect()
    }

    // ===== Request semantics =====

    /// Cache freshness against the paired response. Only GET/HEAD can be
    /// fresh, and only for 2xx or 304 responses.
    pub fn fresh(&self) -> bool {
        if self.raw.method != Method::GET && self.raw.method != Method::HEAD {
            return false;
        }
        let response = self.response.borrow();
        if response.status.is_success() || response.status == StatusCode::NOT_MODIFIED {
            return fresh::fresh(&self.raw.headers, &response.headers);
        }
        false
    }

    pub fn stale(&self) -> bool {
        !self.fresh()
    }

    pub fn idempotent(&self) -> bool {
        matches!(
            self.raw.method,
            Method::GET
                | Method::HEAD
                | Method::PUT
                | Method::DELETE
                | Method::OPTIONS
                | Method::TRACE
        )
    }

    // ===== Body metadata =====

    /// `Content-Type` charset parameter, `""` on absence or parse failure.
    pub fn charset(&self) -> String {
        let value = self.header_string(CONTENT_TYPE.as_str());
        if value.is_empty() {
            return String::new();
        }
        value
            .parse::<Mime>()
            .ok()
            .and_then(|mime| mime.get_param(mime::CHARSET).map(|c| c.as_str().to_string()))
            .unwrap_or_default()
    }

    /// Parsed `Content-Length`. Absent when the header is missing or
    /// empty; anything else coerces numerically, truncating.
    pub fn length(&self) -> Option<u64> {
        let value = self.header_string("content-length");
        if value.is_empty() {
            return None;
        }
        Some(coerce_length(value.trim()))
    }

    /// MIME type portion of `Content-Type`, before any parameters.
    pub fn content_type(&self) -> String {
        let value = self.header_string(CONTENT_TYPE.as_str());
        if value.is_empty() {
            return String::new();
        }
        value.split(';').next().unwrap_or("").trim().to_string()
    }

    // ===== Content negotiation =====

    fn negotiator(&self) -> &Negotiator {
        self.accept_memo
            .get_or_init(|| Negotiator::new(&self.raw.headers))
    }

    /// Best media type among the candidates, `None` when nothing is
    /// mutually acceptable. Candidates may be extension shorthands.
    pub fn accepts(&self, types: &[&str]) -> Option<String> {
        self.negotiator().media_type(types)
    }

    /// All acceptable media types, most preferred first.
    pub fn accepted_types(&self) -> Vec<String> {
        self.negotiator().media_types()
    }

    pub fn accepts_encodings(&self, encodings: &[&str]) -> Option<String> {
        self.negotiator().encoding(encodings)
    }

    pub fn accepted_encodings(&self) -> Vec<String> {
        self.negotiator().encodings()
    }

    pub fn accepts_charsets(&self, charsets: &[&str]) -> Option<String> {
        self.negotiator().charset(charsets)
    }

    pub fn accepted_charsets(&self) -> Vec<String> {
        self.negotiator().charsets()
    }

    pub fn accepts_languages(&self, languages: &[&str]) -> Option<String> {
        self.negotiator().language(languages)
    }

    pub fn accepted_languages(&self) -> Vec<String> {
        self.negotiator().languages()
    }

    /// Match the request body's media type against candidate patterns.
    pub fn type_is(&self, types: &[&str]) -> TypeIs {
        negotiate::type_is(&self.raw.headers, types)
    }

    // ===== Diagnostics =====

    /// Structured snapshot limited to method, url, and headers.
    pub fn to_json(&self) -> Value {
        let mut header = serde_json::Map::new();
        for key in self.raw.headers.keys() {
            let values: Vec<&str> = self
                .raw
                .headers
                .get_all(key)
                .iter()
                .filter_map(|v| v.to_str().ok())
                .collect();
            let value = match values.as_slice() {
                [single] => Value::String((*single).to_string()),
                many => Value::Array(many.iter().map(|v| Value::String((*v).to_string())).collect()),
            };
            header.insert(key.as_str().to_string(), value);
        }
        json!({
            "method": self.raw.method.as_str(),
            "url": self.raw.target,
            "header": Value::Object(header),
        })
    }
}

impl fmt::Debug for RequestFacade {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RequestFacade")
            .field("method", &self.raw.method)
            .field("url", &self.raw.target)
            .field("header", &self.raw.headers)
            .finish()
    }
}

fn nonempty(value: String) -> Option<String> {
    if value.is_empty() {
        None
    } else {
        Some(value)
    }
}

/// First value of a comma-separated header list, trimmed.
fn first_of_list(value: &str) -> String {
    value.split(',').next().unwrap_or("").trim().to_string()
}

fn starts_with_scheme(target: &str) -> bool {
    let lowered: String = target.chars().take(8).collect::<String>().to_ascii_lowercase();
    lowered.starts_with("http://") || lowered.starts_with("https://")
}

/// Truncating numeric coercion: integer parse, then float truncation,
/// then 0 for anything unparseable.
fn coerce_length(value: &str) -> u64 {
    if let Ok(len) = value.parse::<u64>() {
        return len;
    }
    match value.parse::<f64>() {
        Ok(len) if len.is_finite() && len > 0.0 => len.trunc() as u64,
        _ => 0,
    }
}
