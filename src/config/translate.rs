//! Raw config → normalized [`Configuration`].
//!
//! [`translate`] is pure: it expands `{env.NAME}` placeholders from the
//! given overlay, validates every field, collects all problems instead of
//! stopping at the first, and sorts routes most-specific first (ties keep
//! declaration order). TLS files are only referenced here; reading them is
//! the engine's job at bind time.

use std::cmp::Reverse;
use std::collections::{BTreeMap, HashMap};
use std::time::Duration;

use super::model::{MatchSpec, PortValue, RawConfig, RawMatch, RawMiddleware, RawOptions};
use super::sources::sha256_hex;
use super::validation::{
    conflicting_binds, looks_like_url, validate_addr, validate_header_name,
    validate_header_value, validate_host, validate_method, validate_port, validate_port_text,
    validate_upstream_url,
};
use super::{
    ConfigVersion, Configuration, GlobalOptions, ListenerKey, ListenerSpec, Route, RouteMatch,
    Scheme, TlsMaterial, Upstream, DEFAULT_MAX_BODY_BYTES, DEFAULT_REQUEST_TIMEOUT,
};
use crate::environment::EnvironmentOverlay;
use crate::error::{ProxyHostError, ValidationError};
use crate::proxy::middleware::Middleware;
use crate::proxy::routing::PathPattern;

/// Deserialize config text (JSON) into the raw model.
pub fn parse_config_text(text: &str) -> Result<RawConfig, ProxyHostError> {
    serde_json::from_str(text)
        .map_err(|e| ProxyHostError::invalid("(document)", format!("malformed config: {e}")))
}

pub fn translate(
    raw: &RawConfig,
    env: &EnvironmentOverlay,
) -> Result<Configuration, ProxyHostError> {
    let mut errors = Vec::new();

    let expanded = expand_placeholders(raw, env, &mut errors);
    let listeners = translate_listeners(&expanded, &mut errors);
    let upstreams = translate_upstreams(&expanded.upstreams, &mut errors);
    let mut routes = translate_routes(&expanded, &upstreams, &mut errors);
    let options = translate_options(&expanded.options, &mut errors);

    if !errors.is_empty() {
        return Err(ProxyHostError::ConfigValidation { errors });
    }

    // Stable: equal specificity keeps declaration order.
    routes.sort_by_key(|r| Reverse(r.matcher.specificity()));

    let canonical = serde_json::to_vec(&expanded).unwrap_or_default();
    Ok(Configuration {
        listeners,
        routes,
        options,
        version: ConfigVersion::Hash(sha256_hex(&canonical)),
    })
}

/// Return a copy of `raw` with every string field expanded.
fn expand_placeholders(
    raw: &RawConfig,
    env: &EnvironmentOverlay,
    errors: &mut Vec<ValidationError>,
) -> RawConfig {
    let mut expand = |field: String, value: &str| -> String {
        env.expand(value).unwrap_or_else(|message| {
            errors.push(ValidationError::new(field, message));
            value.to_string()
        })
    };

    let mut out = raw.clone();
    for (i, listener) in out.listeners.iter_mut().enumerate() {
        listener.addr = expand(format!("listeners[{i}].addr"), &listener.addr);
        if let PortValue::Text(ref text) = listener.port {
            listener.port = PortValue::Text(expand(format!("listeners[{i}].port"), text));
        }
        if let Some(ref mut tls) = listener.tls {
            tls.cert = expand(format!("listeners[{i}].tls.cert"), &tls.cert);
            tls.key = expand(format!("listeners[{i}].tls.key"), &tls.key);
        }
    }
    for (name, url) in &mut out.upstreams {
        *url = expand(format!("upstreams.{name}"), url);
    }
    for (i, route) in out.routes.iter_mut().enumerate() {
        route.upstream = expand(format!("routes[{i}].upstream"), &route.upstream);
        match route.matcher {
            RawMatch::Path(ref mut path) => {
                *path = expand(format!("routes[{i}].match"), path);
            }
            RawMatch::Detailed(ref mut spec) => {
                if let Some(ref mut host) = spec.host {
                    *host = expand(format!("routes[{i}].match.host"), host);
                }
                if let Some(ref mut path) = spec.path {
                    *path = expand(format!("routes[{i}].match.path"), path);
                }
            }
        }
        for (j, step) in route.middleware.iter_mut().enumerate() {
            if let RawMiddleware::SetHeader { ref mut value, .. } = step {
                *value = expand(format!("routes[{i}].middleware[{j}].value"), value);
            }
        }
    }
    out
}

fn translate_listeners(raw: &RawConfig, errors: &mut Vec<ValidationError>) -> Vec<ListenerSpec> {
    let mut listeners: Vec<(usize, ListenerSpec)> = Vec::new();

    for (i, listener) in raw.listeners.iter().enumerate() {
        let field = format!("listeners[{i}]");
        let before = errors.len();

        let addr = validate_addr(&listener.addr)
            .map_err(|m| errors.push(ValidationError::new(format!("{field}.addr"), m)))
            .ok();

        let port = match listener.port {
            PortValue::Number(n) => validate_port(n),
            PortValue::Text(ref text) => validate_port_text(text),
        }
        .map_err(|m| errors.push(ValidationError::new(format!("{field}.port"), m)))
        .ok();

        let tls = listener.tls.as_ref().and_then(|tls| {
            if tls.cert.trim().is_empty() || tls.key.trim().is_empty() {
                errors.push(ValidationError::new(
                    format!("{field}.tls"),
                    "both 'cert' and 'key' must be set",
                ));
                None
            } else {
                Some(TlsMaterial {
                    cert_path: tls.cert.clone().into(),
                    key_path: tls.key.clone().into(),
                })
            }
        });

        let scheme = match listener.scheme.as_deref().map(str::to_ascii_lowercase).as_deref() {
            None if listener.tls.is_some() => Scheme::Https,
            None | Some("http") => Scheme::Http,
            Some("https") => Scheme::Https,
            Some(other) => {
                errors.push(
                    ValidationError::new(
                        format!("{field}.scheme"),
                        format!("unsupported scheme '{other}'"),
                    )
                    .with_suggestion("expected \"http\" or \"https\""),
                );
                Scheme::Http
            }
        };

        match (scheme, listener.tls.is_some()) {
            (Scheme::Https, false) => errors.push(
                ValidationError::new(
                    format!("{field}.tls"),
                    "TLS material is required for https listeners",
                )
                .with_suggestion("add \"tls\": {\"cert\": ..., \"key\": ...}"),
            ),
            (Scheme::Http, true) if listener.scheme.is_some() => errors.push(
                ValidationError::new(
                    format!("{field}.scheme"),
                    "tls is configured but the scheme is 'http'",
                )
                .with_suggestion("use \"https\" or remove \"tls\""),
            ),
            _ => {}
        }

        let (Some(addr), Some(port)) = (addr, port) else {
            continue;
        };
        let key = ListenerKey { addr, port };

        if let Some((j, existing)) = listeners
            .iter()
            .find(|(_, existing)| conflicting_binds(&existing.key, &key))
        {
            errors.push(ValidationError::new(
                field.clone(),
                format!(
                    "binds {key} which conflicts with listeners[{j}] ({})",
                    existing.key
                ),
            ));
            continue;
        }

        if errors.len() == before {
            listeners.push((i, ListenerSpec { key, scheme, tls }));
        }
    }

    listeners.into_iter().map(|(_, spec)| spec).collect()
}

fn translate_upstreams(
    upstreams: &BTreeMap<String, String>,
    errors: &mut Vec<ValidationError>,
) -> HashMap<String, url::Url> {
    let mut resolved = HashMap::new();
    for (name, url) in upstreams {
        if name.is_empty() || looks_like_url(name) {
            errors.push(ValidationError::new(
                format!("upstreams.{name}"),
                "upstream names must be non-empty and cannot look like URLs",
            ));
            continue;
        }
        match validate_upstream_url(url) {
            Ok(parsed) => {
                resolved.insert(name.clone(), parsed);
            }
            Err(m) => errors.push(ValidationError::new(format!("upstreams.{name}"), m)),
        }
    }
    resolved
}

fn translate_routes(
    raw: &RawConfig,
    upstreams: &HashMap<String, url::Url>,
    errors: &mut Vec<ValidationError>,
) -> Vec<Route> {
    let mut routes: Vec<Route> = Vec::new();

    for (i, route) in raw.routes.iter().enumerate() {
        let field = format!("routes[{i}]");
        let before = errors.len();

        let matcher = translate_match(&route.matcher, &field, errors);

        let upstream = if looks_like_url(&route.upstream) {
            validate_upstream_url(&route.upstream)
                .map(|url| Upstream { name: None, url })
                .map_err(|m| errors.push(ValidationError::new(format!("{field}.upstream"), m)))
                .ok()
        } else if let Some(url) = upstreams.get(&route.upstream) {
            Some(Upstream {
                name: Some(route.upstream.clone()),
                url: url.clone(),
            })
        } else {
            let mut known: Vec<&str> = upstreams.keys().map(String::as_str).collect();
            known.sort_unstable();
            let suggestion = if known.is_empty() {
                "declare it under \"upstreams\" or use an absolute http(s) URL".to_string()
            } else {
                format!("known upstreams: {}", known.join(", "))
            };
            errors.push(
                ValidationError::new(
                    format!("{field}.upstream"),
                    format!("upstream '{}' does not resolve", route.upstream),
                )
                .with_suggestion(suggestion),
            );
            None
        };

        let middleware: Vec<Middleware> = route
            .middleware
            .iter()
            .enumerate()
            .filter_map(|(j, step)| {
                translate_middleware(step)
                    .map_err(|m| {
                        errors.push(ValidationError::new(format!("{field}.middleware[{j}]"), m));
                    })
                    .ok()
            })
            .collect();

        let (Some(matcher), Some(upstream)) = (matcher, upstream) else {
            continue;
        };

        if routes.iter().any(|r| r.matcher == matcher) {
            errors.push(ValidationError::new(
                format!("{field}.match"),
                format!("duplicate route match '{matcher}'"),
            ));
            continue;
        }

        if errors.len() == before {
            routes.push(Route {
                matcher,
                upstream,
                middleware,
                declared: i,
            });
        }
    }

    routes
}

fn translate_match(
    raw: &RawMatch,
    field: &str,
    errors: &mut Vec<ValidationError>,
) -> Option<RouteMatch> {
    let spec = match raw {
        RawMatch::Path(path) => MatchSpec {
            host: None,
            path: Some(path.clone()),
            methods: Vec::new(),
        },
        RawMatch::Detailed(spec) => spec.clone(),
    };
    let before = errors.len();

    let host = spec.host.as_deref().and_then(|h| {
        validate_host(h)
            .map_err(|m| errors.push(ValidationError::new(format!("{field}.match.host"), m)))
            .ok()
    });

    let raw_path = spec.path.as_deref().unwrap_or("/*");
    let path = PathPattern::parse(raw_path)
        .map_err(|m| {
            let mut err = ValidationError::new(format!("{field}.match"), m);
            if !raw_path.is_empty() && !raw_path.starts_with('/') && raw_path != "*" {
                err = err.with_suggestion(format!("did you mean '/{raw_path}'?"));
            }
            errors.push(err);
        })
        .ok();

    let mut methods = Vec::new();
    for method in &spec.methods {
        match validate_method(method) {
            Ok(m) if m == "*" => {
                methods.clear();
                break;
            }
            Ok(m) => {
                if !methods.contains(&m) {
                    methods.push(m);
                }
            }
            Err(m) => errors.push(ValidationError::new(format!("{field}.match.methods"), m)),
        }
    }
    methods.sort_unstable();

    if errors.len() != before {
        return None;
    }
    path.map(|path| RouteMatch {
        host,
        path,
        methods,
    })
}

fn translate_middleware(step: &RawMiddleware) -> Result<Middleware, String> {
    match step {
        RawMiddleware::SetHeader { name, value } => Ok(Middleware::SetHeader(
            validate_header_name(name)?,
            validate_header_value(value)?,
        )),
        RawMiddleware::RemoveHeader { name } => {
            Ok(Middleware::RemoveHeader(validate_header_name(name)?))
        }
        RawMiddleware::StripPrefix { prefix } => {
            if prefix.starts_with('/') && prefix.len() > 1 {
                Ok(Middleware::StripPrefix(prefix.clone()))
            } else {
                Err(format!("prefix '{prefix}' must start with '/' and name a segment"))
            }
        }
        RawMiddleware::Timeout { ms } if *ms > 0 => {
            Ok(Middleware::Timeout(Duration::from_millis(*ms)))
        }
        RawMiddleware::Timeout { .. } => Err("timeout must be greater than zero".into()),
    }
}

fn translate_options(raw: &RawOptions, errors: &mut Vec<ValidationError>) -> GlobalOptions {
    let mut positive = |name: &str, value: Option<u64>| -> Option<u64> {
        match value {
            Some(0) => {
                errors.push(ValidationError::new(
                    format!("options.{name}"),
                    "must be greater than zero",
                ));
                None
            }
            other => other,
        }
    };

    let drain_timeout = positive("drainTimeoutMs", raw.drain_timeout_ms).map(Duration::from_millis);
    let reload_timeout =
        positive("reloadTimeoutMs", raw.reload_timeout_ms).map(Duration::from_millis);
    let request_timeout = positive("requestTimeoutMs", raw.request_timeout_ms)
        .map_or(DEFAULT_REQUEST_TIMEOUT, Duration::from_millis);
    let max_body_bytes = positive("maxBodyBytes", raw.max_body_bytes)
        .map_or(DEFAULT_MAX_BODY_BYTES, |n| {
            usize::try_from(n).unwrap_or(usize::MAX)
        });

    GlobalOptions {
        drain_timeout,
        reload_timeout,
        request_timeout,
        max_body_bytes,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::proxy::routing::match_route;

    fn translate_json(json: &str) -> Result<Configuration, ProxyHostError> {
        translate(&parse_config_text(json).unwrap(), &EnvironmentOverlay::new())
    }

    fn fields(err: &ProxyHostError) -> Vec<String> {
        err.validation_errors()
            .iter()
            .map(|e| e.field.clone())
            .collect()
    }

    #[test]
    fn minimal_listener_config() {
        let config =
            translate_json(r#"{"listeners":[{"addr":"127.0.0.1","port":8080}],"routes":[]}"#)
                .unwrap();
        assert_eq!(config.listeners.len(), 1);
        assert_eq!(config.listeners[0].key.port, 8080);
        assert_eq!(config.listeners[0].scheme, Scheme::Http);
        assert!(config.routes.is_empty());
    }

    #[test]
    fn malformed_document_names_document() {
        let err = parse_config_text("{not json").unwrap_err();
        assert_eq!(fields(&err), vec!["(document)"]);
    }

    #[test]
    fn reports_every_offending_field() {
        let err = translate_json(
            r#"{"listeners":[
                {"addr":"nope","port":70000},
                {"addr":"127.0.0.1","port":9000,"scheme":"https"}
            ]}"#,
        )
        .unwrap_err();
        assert_eq!(
            fields(&err),
            vec!["listeners[0].addr", "listeners[0].port", "listeners[1].tls"]
        );
    }

    #[test]
    fn duplicate_binds_are_rejected() {
        let err = translate_json(
            r#"{"listeners":[
                {"addr":"0.0.0.0","port":8080},
                {"addr":"127.0.0.1","port":8080}
            ]}"#,
        )
        .unwrap_err();
        let errors = err.validation_errors();
        assert_eq!(errors[0].field, "listeners[1]");
        assert!(errors[0].message.contains("conflicts with listeners[0]"));
    }

    #[test]
    fn tls_implies_https_and_explicit_http_conflicts() {
        let config = translate_json(
            r#"{"listeners":[{"addr":"127.0.0.1","port":8443,"tls":{"cert":"c.pem","key":"k.pem"}}]}"#,
        )
        .unwrap();
        assert_eq!(config.listeners[0].scheme, Scheme::Https);

        let err = translate_json(
            r#"{"listeners":[{"addr":"127.0.0.1","port":8443,"scheme":"http","tls":{"cert":"c.pem","key":"k.pem"}}]}"#,
        )
        .unwrap_err();
        assert_eq!(fields(&err), vec!["listeners[0].scheme"]);
    }

    #[test]
    fn upstream_names_must_resolve() {
        let err = translate_json(
            r#"{"upstreams":{"api":"http://10.0.0.1:9000"},
                "routes":[{"match":"/a","upstream":"missing"}]}"#,
        )
        .unwrap_err();
        let errors = err.validation_errors();
        assert_eq!(errors[0].field, "routes[0].upstream");
        assert_eq!(errors[0].suggestion.as_deref(), Some("known upstreams: api"));

        let config = translate_json(
            r#"{"upstreams":{"api":"http://10.0.0.1:9000"},
                "routes":[{"match":"/a","upstream":"api"}]}"#,
        )
        .unwrap();
        assert_eq!(config.routes[0].upstream.name.as_deref(), Some("api"));
        assert_eq!(config.routes[0].upstream.url.as_str(), "http://10.0.0.1:9000/");
    }

    #[test]
    fn routes_sorted_most_specific_first_ties_by_declaration() {
        let config = translate_json(
            r#"{"routes":[
                {"match":"/*","upstream":"http://a:1"},
                {"match":"/api/*","upstream":"http://b:1"},
                {"match":"/x/:id","upstream":"http://c:1"},
                {"match":"/y/:id","upstream":"http://d:1"},
                {"match":"/api/users/me","upstream":"http://e:1"}
            ]}"#,
        )
        .unwrap();
        let order: Vec<usize> = config.routes.iter().map(|r| r.declared).collect();
        assert_eq!(order, vec![4, 2, 3, 1, 0]);
    }

    #[test]
    fn exact_path_wins_over_earlier_prefix_of_same_depth() {
        let config = translate_json(
            r#"{"routes":[
                {"match":"/a/*","upstream":"http://prefix:1"},
                {"match":"/a","upstream":"http://exact:1"}
            ]}"#,
        )
        .unwrap();
        let (index, _) = match_route(&config.routes, Some("example.com"), "/a", "GET").unwrap();
        assert_eq!(config.routes[index].upstream.url.as_str(), "http://exact:1/");

        let (index, _) = match_route(&config.routes, Some("example.com"), "/a/b", "GET").unwrap();
        assert_eq!(config.routes[index].upstream.url.as_str(), "http://prefix:1/");
    }

    #[test]
    fn duplicate_match_is_rejected() {
        let err = translate_json(
            r#"{"routes":[
                {"match":"/a","upstream":"http://a:1"},
                {"match":{"path":"/a"},"upstream":"http://b:1"}
            ]}"#,
        )
        .unwrap_err();
        assert_eq!(fields(&err), vec!["routes[1].match"]);
    }

    #[test]
    fn path_suggestion() {
        let err =
            translate_json(r#"{"routes":[{"match":"api","upstream":"http://a:1"}]}"#).unwrap_err();
        assert_eq!(
            err.validation_errors()[0].suggestion.as_deref(),
            Some("did you mean '/api'?")
        );
    }

    #[test]
    fn middleware_is_validated() {
        let err = translate_json(
            r#"{"routes":[{"match":"/a","upstream":"http://a:1","middleware":[
                {"type":"set_header","name":"bad header","value":"v"},
                {"type":"strip_prefix","prefix":"api"},
                {"type":"timeout","ms":0}
            ]}]}"#,
        )
        .unwrap_err();
        assert_eq!(
            fields(&err),
            vec![
                "routes[0].middleware[0]",
                "routes[0].middleware[1]",
                "routes[0].middleware[2]"
            ]
        );
    }

    #[test]
    fn placeholders_resolve_from_overlay() {
        let raw = parse_config_text(
            r#"{"listeners":[{"addr":"{env.BIND}","port":"{env.PORT}"}],
                "routes":[{"match":"/*","upstream":"http://{env.BACKEND}"}]}"#,
        )
        .unwrap();
        let env: EnvironmentOverlay = [
            ("BIND".to_string(), "127.0.0.1".to_string()),
            ("PORT".to_string(), "8181".to_string()),
            ("BACKEND".to_string(), "10.1.2.3:9000".to_string()),
        ]
        .into_iter()
        .collect();

        let config = translate(&raw, &env).unwrap();
        assert_eq!(config.listeners[0].key.port, 8181);
        assert_eq!(config.routes[0].upstream.url.as_str(), "http://10.1.2.3:9000/");

        let err = translate(&raw, &EnvironmentOverlay::new()).unwrap_err();
        assert!(fields(&err).contains(&"listeners[0].port".to_string()));
    }

    #[test]
    fn placeholders_resolve_in_detailed_match_path() {
        let raw = parse_config_text(
            r#"{"routes":[{"match":{"host":"{env.HOST}","path":"/{env.TENANT}/*"},
                           "upstream":"http://a:1"}]}"#,
        )
        .unwrap();
        let env: EnvironmentOverlay = [
            ("HOST".to_string(), "api.example.com".to_string()),
            ("TENANT".to_string(), "acme".to_string()),
        ]
        .into_iter()
        .collect();

        let config = translate(&raw, &env).unwrap();
        assert_eq!(config.routes[0].matcher.path.to_string(), "/acme/*");
        assert!(match_route(&config.routes, Some("api.example.com"), "/acme/x", "GET").is_some());

        let err = translate(&raw, &EnvironmentOverlay::new()).unwrap_err();
        assert!(fields(&err).contains(&"routes[0].match.path".to_string()));
    }

    #[test]
    fn version_tracks_expanded_content() {
        let raw = parse_config_text(r#"{"listeners":[{"addr":"127.0.0.1","port":"{env.P}"}]}"#)
            .unwrap();
        let a: EnvironmentOverlay = [("P".to_string(), "8001".to_string())].into_iter().collect();
        let b: EnvironmentOverlay = [("P".to_string(), "8002".to_string())].into_iter().collect();
        let va = translate(&raw, &a).unwrap().version;
        assert_eq!(va, translate(&raw, &a).unwrap().version);
        assert_ne!(va, translate(&raw, &b).unwrap().version);
    }

    #[test]
    fn zero_options_are_rejected() {
        let err = translate_json(r#"{"options":{"drainTimeoutMs":0,"requestTimeoutMs":1500}}"#)
            .unwrap_err();
        assert_eq!(fields(&err), vec!["options.drainTimeoutMs"]);

        let config = translate_json(r#"{"options":{"requestTimeoutMs":1500}}"#).unwrap();
        assert_eq!(config.options.request_timeout, Duration::from_millis(1500));
        assert!(config.options.drain_timeout.is_none());
    }
}
