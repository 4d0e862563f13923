//! Specificity-based route matching for incoming HTTP requests.
//!
//! Path patterns are compiled once by the translator into a
//! [`PathPattern`]. Each pattern has a static specificity: exact segments
//! score highest, parameterized segments (`:param`) lower, and wildcard
//! prefixes (`/prefix/*`) and the catch-all (`/*`) lowest. Because a
//! [`Configuration`]'s routes are already sorted by that score, the first
//! route that matches is the most specific one, and [`match_route`] can
//! stop there. Captured parameters are returned with the match.

use std::collections::HashMap;
use std::time::Duration;

use crate::config::{Configuration, Route};

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Segment {
    Literal(String),
    Param(String),
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum PathPattern {
    /// `/*` or `*`
    CatchAll,
    /// `/qa/*` matches `/qa/anything/deep`
    Prefix(Vec<String>),
    /// Exact or parameterized segments.
    Segments(Vec<Segment>),
}

impl PathPattern {
    /// Parse a path pattern. Returns a human-readable error on bad input.
    pub fn parse(pattern: &str) -> Result<Self, String> {
        if pattern.is_empty() {
            return Err("path cannot be empty".into());
        }
        if pattern == "/*" || pattern == "*" {
            return Ok(Self::CatchAll);
        }
        if !pattern.starts_with('/') {
            return Err(format!("path '{pattern}' must start with '/' or be '*'"));
        }

        if let Some(prefix) = pattern.strip_suffix("/*") {
            let segments: Vec<String> = split_segments(prefix).map(String::from).collect();
            if segments.iter().any(|s| s.starts_with(':') || s.contains('*')) {
                return Err("wildcard prefixes may only contain literal segments".into());
            }
            return Ok(Self::Prefix(segments));
        }

        let mut segments = Vec::new();
        let mut seen_params = Vec::new();
        for raw in split_segments(pattern) {
            if raw.contains('*') {
                return Err("'*' is only allowed as the final segment".into());
            }
            if let Some(name) = raw.strip_prefix(':') {
                if name.is_empty() || !name.chars().all(|c| c.is_alphanumeric() || c == '_') {
                    return Err(format!("'{raw}' is not a valid parameter name"));
                }
                if seen_params.contains(&name) {
                    return Err(format!("parameter ':{name}' appears more than once"));
                }
                seen_params.push(name);
                segments.push(Segment::Param(name.to_string()));
            } else {
                segments.push(Segment::Literal(raw.to_string()));
            }
        }
        Ok(Self::Segments(segments))
    }

    #[must_use]
    #[allow(clippy::cast_possible_truncation, clippy::cast_possible_wrap)]
    pub fn specificity(&self) -> i32 {
        match self {
            Self::CatchAll => 0,
            // Below an exact path of the same depth, which it also matches.
            Self::Prefix(prefix) => prefix.len() as i32 * 10 - 1,
            Self::Segments(segments) => segments
                .iter()
                .map(|s| match s {
                    Segment::Literal(_) => 10,
                    Segment::Param(_) => 5,
                })
                .sum(),
        }
    }

    /// Match request path segments, returning captured parameters.
    #[must_use]
    pub fn matches(&self, request: &[&str]) -> Option<HashMap<String, String>> {
        match self {
            Self::CatchAll => Some(HashMap::new()),
            Self::Prefix(prefix) => {
                let matched = request.len() >= prefix.len()
                    && prefix.iter().zip(request.iter()).all(|(r, q)| r == q);
                matched.then(HashMap::new)
            }
            Self::Segments(segments) => {
                if segments.len() != request.len() {
                    return None;
                }
                let mut params = HashMap::new();
                for (rs, qs) in segments.iter().zip(request.iter()) {
                    match rs {
                        Segment::Param(name) => {
                            params.insert(name.clone(), (*qs).to_string());
                        }
                        Segment::Literal(lit) if lit == qs => {}
                        Segment::Literal(_) => return None,
                    }
                }
                Some(params)
            }
        }
    }
}

impl std::fmt::Display for PathPattern {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::CatchAll => f.write_str("/*"),
            Self::Prefix(prefix) => {
                for seg in prefix {
                    write!(f, "/{seg}")?;
                }
                f.write_str("/*")
            }
            Self::Segments(segments) if segments.is_empty() => f.write_str("/"),
            Self::Segments(segments) => {
                for seg in segments {
                    match seg {
                        Segment::Literal(lit) => write!(f, "/{lit}")?,
                        Segment::Param(name) => write!(f, "/:{name}")?,
                    }
                }
                Ok(())
            }
        }
    }
}

fn split_segments(path: &str) -> impl Iterator<Item = &str> {
    path.split('/').filter(|s| !s.is_empty())
}

/// The routing state the engine serves from, swapped whole on commit.
#[derive(Debug, Clone)]
pub struct RouteTable {
    pub routes: Vec<Route>,
    pub request_timeout: Duration,
    pub max_body_bytes: usize,
}

impl RouteTable {
    #[must_use]
    pub fn from_config(config: &Configuration) -> Self {
        Self {
            routes: config.routes.clone(),
            request_timeout: config.options.request_timeout,
            max_body_bytes: config.options.max_body_bytes,
        }
    }

    #[must_use]
    pub fn empty() -> Self {
        Self {
            routes: Vec::new(),
            request_timeout: crate::config::DEFAULT_REQUEST_TIMEOUT,
            max_body_bytes: crate::config::DEFAULT_MAX_BODY_BYTES,
        }
    }
}

/// Find the first (most specific) route matching the request.
#[must_use]
pub fn match_route(
    routes: &[Route],
    host: Option<&str>,
    path: &str,
    method: &str,
) -> Option<(usize, HashMap<String, String>)> {
    let request_segments: Vec<&str> = split_segments(path).collect();
    let host = host.map(normalize_host);

    routes.iter().enumerate().find_map(|(idx, route)| {
        let matcher = &route.matcher;
        if let Some(ref want) = matcher.host {
            if host.as_deref() != Some(want.as_str()) {
                return None;
            }
        }
        if !method_matches(&matcher.methods, method) {
            return None;
        }
        matcher
            .path
            .matches(&request_segments)
            .map(|params| (idx, params))
    })
}

/// Lowercase a `Host` value and drop any port.
#[must_use]
pub fn normalize_host(host: &str) -> String {
    let host = host.trim();
    let without_port = if host.starts_with('[') {
        // IPv6 literal: keep through the closing bracket
        host.find(']').map_or(host, |end| &host[..=end])
    } else {
        host.rsplit_once(':').map_or(host, |(h, _)| h)
    };
    without_port.to_ascii_lowercase()
}

fn method_matches(methods: &[String], method: &str) -> bool {
    methods.is_empty() || methods.iter().any(|m| m.eq_ignore_ascii_case(method))
}
