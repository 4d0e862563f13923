//! Per-route middleware chain.
//!
//! Middleware is compiled by the translator into typed steps (header
//! names and values already parsed) and applied in declaration order to
//! each forwarded request.

use std::time::Duration;

use axum::http::{HeaderMap, HeaderName, HeaderValue};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Middleware {
    SetHeader(HeaderName, HeaderValue),
    RemoveHeader(HeaderName),
    StripPrefix(String),
    Timeout(Duration),
}

/// Request properties the middleware chain may rewrite.
#[derive(Debug)]
pub struct Forwarding {
    pub path: String,
    pub headers: HeaderMap,
    pub timeout: Duration,
}

pub fn apply_chain(chain: &[Middleware], fwd: &mut Forwarding) {
    for step in chain {
        match step {
            Middleware::SetHeader(name, value) => {
                fwd.headers.insert(name.clone(), value.clone());
            }
            Middleware::RemoveHeader(name) => {
                fwd.headers.remove(name);
            }
            Middleware::StripPrefix(prefix) => {
                fwd.path = strip_prefix(&fwd.path, prefix);
            }
            Middleware::Timeout(timeout) => fwd.timeout = *timeout,
        }
    }
}

/// Remove `prefix` from `path` on a segment boundary, keeping a leading `/`.
fn strip_prefix(path: &str, prefix: &str) -> String {
    let prefix = prefix.trim_end_matches('/');
    match path.strip_prefix(prefix) {
        Some(rest) if rest.is_empty() => "/".to_string(),
        Some(rest) if rest.starts_with('/') => rest.to_string(),
        _ => path.to_string(),
    }
}
