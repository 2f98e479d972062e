//! Host and path matching.
//!
//! # Design Decisions
//! - Host matching is case-insensitive (RFC 9110), any `:port` is ignored
//! - Path matching is case-sensitive plain prefix matching
//! - No regex to guarantee O(n) matching

use axum::body::Body;
use axum::http::{header, Request};

/// Lowercase a Host header value and strip any `:port` suffix.
///
/// Bracketed IPv6 literals keep their brackets.
pub fn normalize_host(raw: &str) -> String {
    let raw = raw.trim();
    let host = if raw.starts_with('[') {
        match raw.find(']') {
            Some(end) => &raw[..=end],
            None => raw,
        }
    } else {
        raw.split(':').next().unwrap_or(raw)
    };
    host.to_ascii_lowercase()
}

/// Host a request is addressed to: the Host header, or the URI authority for
/// HTTP/2 requests that only carry `:authority`.
pub fn request_host(req: &Request<Body>) -> Option<String> {
    req.headers()
        .get(header::HOST)
        .and_then(|h| h.to_str().ok())
        .map(normalize_host)
        .or_else(|| req.uri().host().map(normalize_host))
}

/// Whether a configured path prefix matches the request path.
pub fn path_matches(prefix: &str, path: &str) -> bool {
    path.starts_with(prefix)
}
