//! Field-level validators with human-readable errors.
//!
//! Each function checks one kind of value (bind address, port, HTTP
//! method, upstream URL, header) and returns `Ok` with the parsed value
//! or a message the translator attaches to the offending field path.
//! [`conflicting_binds`] implements the duplicate-listener rule and
//! [`format_validation_report`] renders a translated [`Configuration`]
//! for the `validate` command.

use std::net::{IpAddr, Ipv4Addr};

use axum::http::{HeaderName, HeaderValue};
use url::Url;

use super::{Configuration, ListenerKey};

pub const VALID_METHODS: &[&str] = &[
    "GET", "POST", "PUT", "DELETE", "PATCH", "HEAD", "OPTIONS", "*",
];

/// Parse a bind address: an IP literal or `localhost`.
pub fn validate_addr(addr: &str) -> Result<IpAddr, String> {
    let trimmed = addr.trim();
    if trimmed.is_empty() {
        return Err("address cannot be empty".into());
    }
    if trimmed.eq_ignore_ascii_case("localhost") {
        return Ok(IpAddr::V4(Ipv4Addr::LOCALHOST));
    }
    let unbracketed = trimmed
        .strip_prefix('[')
        .and_then(|s| s.strip_suffix(']'))
        .unwrap_or(trimmed);
    unbracketed
        .parse::<IpAddr>()
        .map_err(|_| format!("'{addr}' is not an IP address (hostnames other than 'localhost' are not bound)"))
}

pub fn validate_port(port: u64) -> Result<u16, String> {
    match u16::try_from(port) {
        Ok(p) if p > 0 => Ok(p),
        _ => Err(format!("port {port} is out of range (expected 1-65535)")),
    }
}

pub fn validate_port_text(port: &str) -> Result<u16, String> {
    let parsed = port
        .trim()
        .parse::<u64>()
        .map_err(|_| format!("'{port}' is not a port number"))?;
    validate_port(parsed)
}

/// Validate an HTTP method string. Returns the canonical uppercase form.
pub fn validate_method(method: &str) -> Result<String, String> {
    let upper = method.to_uppercase();
    if VALID_METHODS.contains(&upper.as_str()) {
        Ok(upper)
    } else {
        Err(format!("'{method}' is not a valid HTTP method"))
    }
}

/// Validate an upstream URL. `:param` placeholders are allowed in the path.
pub fn validate_upstream_url(url: &str) -> Result<Url, String> {
    let test_url = replace_params_for_validation(url);
    let parsed = Url::parse(&test_url).map_err(|_| format!("'{url}' is not a valid URL"))?;
    let scheme = parsed.scheme();
    if scheme != "http" && scheme != "https" {
        return Err(format!(
            "unsupported scheme '{scheme}' (expected http or https)"
        ));
    }
    if parsed.host_str().is_none() {
        return Err(format!("'{url}' has no host"));
    }
    // Keep the original text so placeholders survive for substitution.
    Url::parse(url).or(Ok(parsed))
}

/// True when `text` looks like an absolute URL rather than an upstream name.
#[must_use]
pub fn looks_like_url(text: &str) -> bool {
    text.contains("://")
}

pub fn validate_header_name(name: &str) -> Result<HeaderName, String> {
    HeaderName::from_bytes(name.as_bytes())
        .map_err(|_| format!("'{name}' is not a valid header name"))
}

pub fn validate_header_value(value: &str) -> Result<HeaderValue, String> {
    HeaderValue::from_str(value).map_err(|_| "header value contains invalid characters".to_string())
}

pub fn validate_host(host: &str) -> Result<String, String> {
    let host = host.trim();
    if host.is_empty() {
        return Err("host cannot be empty".into());
    }
    if host.contains('/') || host.contains(' ') {
        return Err(format!("'{host}' is not a valid host name"));
    }
    Ok(crate::proxy::routing::normalize_host(host))
}

/// Whether two listeners would contend for the same socket.
///
/// Equal addresses clash, and so does any address against the unspecified
/// address of the same family on the same port.
#[must_use]
pub fn conflicting_binds(a: &ListenerKey, b: &ListenerKey) -> bool {
    if a.port != b.port {
        return false;
    }
    if a.addr == b.addr {
        return true;
    }
    let same_family = a.addr.is_ipv4() == b.addr.is_ipv4();
    same_family && (a.addr.is_unspecified() || b.addr.is_unspecified())
}

/// Replace `:param` patterns with a valid placeholder for URL validation.
fn replace_params_for_validation(url: &str) -> String {
    let mut result = String::with_capacity(url.len());
    let mut chars = url.chars().peekable();
    while let Some(ch) = chars.next() {
        if ch == ':' && chars.peek().is_some_and(|c| c.is_alphabetic() || *c == '_') {
            result.push_str("_p");
            while chars
                .peek()
                .is_some_and(|c| c.is_alphanumeric() || *c == '_')
            {
                chars.next();
            }
        } else {
            result.push(ch);
        }
    }
    result
}

#[must_use]
pub fn format_validation_report(path: &str, config: &Configuration) -> String {
    let mut lines = vec![format!(
        "  {} listeners, {} routes (version {})\n",
        config.listeners.len(),
        config.routes.len(),
        config.version.short(),
    )];

    for listener in &config.listeners {
        let tls = if listener.tls.is_some() { " (tls)" } else { "" };
        lines.push(format!(
            "  {}://{}{tls}",
            listener.scheme.as_str(),
            listener.socket_addr()
        ));
    }

    for route in &config.routes {
        let upstream = route.upstream.name.as_ref().map_or_else(
            || route.upstream.url.to_string(),
            |name| format!("{name} ({})", route.upstream.url),
        );
        lines.push(format!("  {}  -> {upstream}", route.matcher));
        if !route.middleware.is_empty() {
            lines.push(format!("    middleware: {} steps", route.middleware.len()));
        }
    }

    format!("{} is valid\n{}", path, lines.join("\n"))
}
