//! Dispatch of a single forwarded request to its upstream.
//!
//! The upstream URL's path acts as a prefix for the forwarded path, and
//! `:param` placeholders in it are filled from the route's captures. The
//! response body is collected in full before it is returned.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use axum::http::{HeaderMap, Method};
use bytes::Bytes;
use http_body_util::{BodyExt, Full};
use hyper::StatusCode;
use url::Url;

use crate::engine::http::HttpClient;

#[derive(Debug, thiserror::Error)]
pub enum ForwardError {
    #[error("upstream did not answer within {}ms", .0.as_millis())]
    Timeout(Duration),
    #[error("upstream request failed: {0}")]
    Upstream(String),
    #[error("could not build upstream request: {0}")]
    Request(String),
}

pub struct ForwardRequest<'a> {
    pub client: &'a HttpClient,
    pub method: Method,
    pub url: Url,
    pub headers: HeaderMap,
    pub body: Bytes,
    pub timeout: Duration,
    pub correlation_id: &'a str,
}

pub type UpstreamResponse = (StatusCode, HeaderMap, Bytes);

#[allow(clippy::cast_possible_truncation)]
pub async fn dispatch(req: ForwardRequest<'_>) -> Result<UpstreamResponse, ForwardError> {
    let start = Instant::now();

    let mut builder = hyper::Request::builder()
        .method(req.method)
        .uri(req.url.as_str());
    for (key, value) in &req.headers {
        builder = builder.header(key, value);
    }
    let request = builder
        .body(Full::new(req.body))
        .map_err(|e| ForwardError::Request(e.to_string()))?;

    let response = tokio::time::timeout(req.timeout, req.client.request(request))
        .await
        .map_err(|_| ForwardError::Timeout(req.timeout))?
        .map_err(|e| ForwardError::Upstream(e.to_string()))?;

    let status = response.status();
    let headers = response.headers().clone();
    let body = response
        .into_body()
        .collect()
        .await
        .map_err(|e| ForwardError::Upstream(format!("body read error: {e}")))?
        .to_bytes();

    tracing::info!(
        correlation_id = %req.correlation_id,
        target = %req.url,
        status = status.as_u16(),
        latency_ms = start.elapsed().as_millis() as u64,
        "upstream responded"
    );
    Ok((status, headers, body))
}

/// Build the upstream URL for a request path (after middleware) and query.
pub fn target_url(
    upstream: &Url,
    params: &HashMap<String, String>,
    path: &str,
    query: Option<&str>,
) -> Url {
    let prefix = substitute_params(upstream.path(), params);
    let mut url = upstream.clone();
    url.set_path(&format!("{}{path}", prefix.trim_end_matches('/')));
    url.set_query(query);
    url
}

/// Substitute `:param` placeholders in a path template.
/// Longer names go first so `:userId` is replaced before `:user`.
fn substitute_params(template: &str, params: &HashMap<String, String>) -> String {
    let mut result = template.to_string();
    let mut sorted_entries: Vec<(&str, &str)> = params
        .iter()
        .map(|(k, v)| (k.as_str(), v.as_str()))
        .collect();
    sorted_entries.sort_by_key(|(k, _)| std::cmp::Reverse(k.len()));

    for (key, value) in sorted_entries {
        result = result.replace(&format!(":{key}"), value);
    }
    result
}

#[cfg(test)]
mod tests {
    use super::*;

    fn params(pairs: &[(&str, &str)]) -> HashMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
            .collect()
    }

    #[test]
    fn longer_param_names_replaced_first() {
        let p = params(&[("id", "short"), ("item_id", "long")]);
        assert_eq!(substitute_params("/:item_id/:id", &p), "/long/short");
    }

    #[test]
    fn bare_upstream_keeps_request_path() {
        let upstream = Url::parse("http://10.0.0.1:9000").unwrap();
        let url = target_url(&upstream, &HashMap::new(), "/api/users", Some("page=2"));
        assert_eq!(url.as_str(), "http://10.0.0.1:9000/api/users?page=2");
    }

    #[test]
    fn upstream_path_prefixes_and_substitutes() {
        let upstream = Url::parse("http://backend/tenants/:tenant/").unwrap();
        let url = target_url(&upstream, &params(&[("tenant", "acme")]), "/orders", None);
        assert_eq!(url.as_str(), "http://backend/tenants/acme/orders");
    }

    #[test]
    fn port_is_not_mistaken_for_param() {
        let upstream = Url::parse("http://backend:9000/v1").unwrap();
        let url = target_url(&upstream, &params(&[("9000", "x")]), "/a", None);
        assert_eq!(url.as_str(), "http://backend:9000/v1/a");
    }
}
