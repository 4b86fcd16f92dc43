//! The paired response handle.
//!
//! The facade only needs the response's status and headers, and only for
//! the freshness check; this is that minimal view.

use hyper::{HeaderMap, StatusCode};

#[derive(Debug, Clone, Default)]
pub struct PairedResponse {
    pub status: StatusCode,
    pub headers: HeaderMap,
}

impl PairedResponse {
    pub fn new(status: StatusCode) -> Self {
        Self {
            status,
            headers: HeaderMap::new(),
        }
    }

    pub fn with_header(mut self, name: &'static str, value: &str) -> Self {
        if let Ok(value) = value.parse() {
            self.headers
                .insert(hyper::header::HeaderName::from_static(name), value);
        }
        self
    }
}
