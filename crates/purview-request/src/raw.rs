//! The raw request handle the facade derives from.
//!
//! A [`RawRequest`] is a snapshot of one inbound request: method, original
//! target string, protocol version, headers, and the transport facts the
//! derivations need (TLS flag, peer address). The HTTP/2 `:authority`
//! pseudo-header is carried as its own field because `HeaderMap` cannot
//! hold pseudo-header names.

use hyper::http::request::Parts;
use hyper::{HeaderMap, Method, Request, Version};
use std::net::IpAddr;

/// Transport-layer facts about the connection that delivered the request.
#[derive(Debug, Clone, Default)]
pub struct SocketInfo {
    /// True when the connection itself is TLS.
    pub encrypted: bool,
    /// Peer address as reported by the socket, if known.
    pub remote_addr: Option<IpAddr>,
}

impl SocketInfo {
    pub fn new(encrypted: bool, remote_addr: Option<IpAddr>) -> Self {
        Self {
            encrypted,
            remote_addr,
        }
    }
}

/// Snapshot of one inbound request.
#[derive(Debug, Clone)]
pub struct RawRequest {
    pub method: Method,
    /// The request target as sent on the wire, e.g. `/users?page=2`.
    pub target: String,
    pub version: Version,
    pub headers: HeaderMap,
    /// HTTP/2 `:authority`, captured from the URI at construction.
    pub authority: Option<String>,
    pub socket: SocketInfo,
}

impl RawRequest {
    pub fn new(method: Method, target: impl Into<String>) -> Self {
        Self {
            method,
            target: target.into(),
            version: Version::HTTP_11,
            headers: HeaderMap::new(),
            authority: None,
            socket: SocketInfo::default(),
        }
    }

    /// Build from decomposed `http` request parts plus the transport facts.
    pub fn from_parts(parts: &Parts, socket: SocketInfo) -> Self {
        let target = parts
            .uri
            .path_and_query()
            .map(|pq| pq.as_str().to_string())
            .unwrap_or_else(|| "/".to_string());
        Self {
            method: parts.method.clone(),
            target,
            version: parts.version,
            headers: parts.headers.clone(),
            authority: parts.uri.authority().map(|a| a.as_str().to_string()),
            socket,
        }
    }

    /// Snapshot a full request without consuming it.
    pub fn from_request<B>(req: &Request<B>, socket: SocketInfo) -> Self {
        let target = req
            .uri()
            .path_and_query()
            .map(|pq| pq.as_str().to_string())
            .unwrap_or_else(|| "/".to_string());
        Self {
            method: req.method().clone(),
            target,
            version: req.version(),
            headers: req.headers().clone(),
            authority: req.uri().authority().map(|a| a.as_str().to_string()),
            socket,
        }
    }
}
