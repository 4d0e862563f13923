//! Core HTTP request forwarding handler.
//!
//! [`forward_handler`] is the Axum fallback behind every listener. It
//! reads the current route table once per request (so a reload never
//! changes the table under an in-flight request), matches the request,
//! runs the route's middleware chain, and relays the upstream response.
//! Submodules handle route matching ([`routing`]), header construction
//! ([`headers`]), middleware ([`middleware`]), and upstream dispatch
//! ([`forward`]).

pub mod forward;
pub mod headers;
pub mod middleware;
pub mod routing;

use std::net::SocketAddr;
use std::sync::Arc;

use axum::body::Body;
use axum::extract::{ConnectInfo, State};
use axum::http::{HeaderMap, Method, StatusCode, Uri};
use axum::response::{IntoResponse, Response};

use crate::engine::http::ListenerContext;
use forward::{ForwardError, ForwardRequest};
use middleware::Forwarding;

pub async fn forward_handler(
    State(ctx): State<Arc<ListenerContext>>,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    method: Method,
    uri: Uri,
    req_headers: HeaderMap,
    body: Body,
) -> Response {
    let path = uri.path();
    let correlation_id = req_headers
        .get("x-correlation-id")
        .and_then(|v| v.to_str().ok())
        .map_or_else(|| uuid::Uuid::new_v4().to_string(), String::from);

    // Clone the Arc (cheap refcount bump) to release the RwLock before .await
    let table = Arc::clone(&*ctx.proxy.routes.read().await);

    let host = req_headers
        .get("host")
        .and_then(|v| v.to_str().ok())
        .or_else(|| uri.host());

    let Some((route_idx, params)) =
        routing::match_route(&table.routes, host, path, method.as_str())
    else {
        tracing::warn!(
            correlation_id = %correlation_id,
            method = %method,
            path = %path,
            "no route matched"
        );
        return StatusCode::NOT_FOUND.into_response();
    };
    let route = &table.routes[route_idx];

    let Ok(body) = axum::body::to_bytes(body, table.max_body_bytes).await else {
        tracing::warn!(
            correlation_id = %correlation_id,
            limit = table.max_body_bytes,
            "request body rejected"
        );
        return StatusCode::PAYLOAD_TOO_LARGE.into_response();
    };

    tracing::info!(
        correlation_id = %correlation_id,
        method = %method,
        path = %path,
        route = %route.matcher,
        "request received"
    );

    let client_ip = addr.ip().to_string();
    let mut fwd = Forwarding {
        path: path.to_string(),
        headers: headers::build_forwarded_headers(
            &req_headers,
            &client_ip,
            &route.upstream.url,
            ctx.scheme,
            &correlation_id,
        ),
        timeout: table.request_timeout,
    };
    middleware::apply_chain(&route.middleware, &mut fwd);

    let url = forward::target_url(&route.upstream.url, &params, &fwd.path, uri.query());
    let request = ForwardRequest {
        client: &ctx.proxy.http_client,
        method,
        url,
        headers: fwd.headers,
        body,
        timeout: fwd.timeout,
        correlation_id: &correlation_id,
    };

    match forward::dispatch(request).await {
        Ok((status, mut resp_headers, body_bytes)) => {
            headers::strip_response_hop_by_hop(&mut resp_headers);
            let mut builder = Response::builder().status(status);
            for (key, value) in &resp_headers {
                builder = builder.header(key, value);
            }
            builder
                .header("x-correlation-id", &correlation_id)
                .body(Body::from(body_bytes))
                .unwrap_or_else(|e| {
                    tracing::error!(
                        correlation_id = %correlation_id,
                        error = %e,
                        "failed to build response"
                    );
                    StatusCode::BAD_GATEWAY.into_response()
                })
        }
        Err(e) => {
            tracing::error!(
                correlation_id = %correlation_id,
                error = %e,
                "forwarding failed"
            );
            match e {
                ForwardError::Timeout(_) => StatusCode::GATEWAY_TIMEOUT.into_response(),
                ForwardError::Upstream(_) | ForwardError::Request(_) => {
                    StatusCode::BAD_GATEWAY.into_response()
                }
            }
        }
    }
}
