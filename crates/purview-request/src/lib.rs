//! Purview: a proxy-aware request facade for HTTP middleware stacks.
//!
//! One [`RequestFacade`] is created per inbound request. It wraps the raw
//! request handle plus the application's proxy-trust settings and exposes
//! derived, read-mostly views: header access, URL decomposition, forwarded
//! host/proto/ip resolution, content negotiation, and conditional-request
//! freshness. Derived accessors never fail; malformed input degrades to an
//! empty value.

pub mod config;
pub mod fresh;
pub mod negotiate;
pub mod raw;
pub mod request;
pub mod response;

pub use config::ProxyConfig;
pub use negotiate::{Negotiator, TypeIs};
pub use raw::{RawRequest, SocketInfo};
pub use request::{Query, RequestFacade};
pub use response::PairedResponse;
