//! Serde data structures for the raw configuration document.
//!
//! Contains [`RawConfig`] (the root), [`RawListener`], [`RawRoute`],
//! [`RawMatch`], [`RawMiddleware`], and [`RawOptions`]. These mirror the
//! text accepted at the host boundary one to one; string fields may still
//! hold `{env.NAME}` placeholders. All structs use `deny_unknown_fields`
//! for strict parsing. The translator turns them into a typed
//! [`Configuration`](super::Configuration).

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

fn is_default_options(v: &RawOptions) -> bool {
    *v == RawOptions::default()
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct RawConfig {
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub listeners: Vec<RawListener>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub routes: Vec<RawRoute>,

    /// Named upstreams routes may refer to instead of a literal URL.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub upstreams: BTreeMap<String, String>,

    #[serde(default, skip_serializing_if = "is_default_options")]
    pub options: RawOptions,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct RawListener {
    pub addr: String,

    pub port: PortValue,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scheme: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tls: Option<RawTls>,
}

/// A port given either as a number or as text (typically a placeholder).
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(untagged)]
pub enum PortValue {
    Number(u64),
    Text(String),
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct RawTls {
    /// Path to a PEM certificate chain.
    pub cert: String,
    /// Path to a PEM private key.
    pub key: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct RawRoute {
    #[serde(rename = "match")]
    pub matcher: RawMatch,

    pub upstream: String,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub middleware: Vec<RawMiddleware>,
}

/// Match predicate: a bare path pattern, or a detailed predicate.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(untagged)]
pub enum RawMatch {
    Path(String),
    Detailed(MatchSpec),
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct MatchSpec {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub host: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub methods: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(tag = "type", rename_all = "snake_case", deny_unknown_fields)]
pub enum RawMiddleware {
    SetHeader { name: String, value: String },
    RemoveHeader { name: String },
    StripPrefix { prefix: String },
    Timeout { ms: u64 },
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(deny_unknown_fields, rename_all = "camelCase")]
pub struct RawOptions {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub drain_timeout_ms: Option<u64>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reload_timeout_ms: Option<u64>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub request_timeout_ms: Option<u64>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_body_bytes: Option<u64>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_document_is_a_config() {
        let config: RawConfig = serde_json::from_str("{}").unwrap();
        assert!(config.listeners.is_empty());
        assert!(config.routes.is_empty());
        assert_eq!(config.options, RawOptions::default());
    }

    #[test]
    fn match_accepts_bare_path_or_object() {
        let json = r#"{
            "routes": [
                {"match": "/api/*", "upstream": "http://a:80"},
                {"match": {"host": "example.com", "methods": ["GET"]}, "upstream": "b"}
            ]
        }"#;
        let config: RawConfig = serde_json::from_str(json).unwrap();
        assert_eq!(config.routes[0].matcher, RawMatch::Path("/api/*".into()));
        match &config.routes[1].matcher {
            RawMatch::Detailed(spec) => {
                assert_eq!(spec.host.as_deref(), Some("example.com"));
                assert_eq!(spec.methods, vec!["GET".to_string()]);
            }
            other => panic!("expected detailed match, got {other:?}"),
        }
    }

    #[test]
    fn port_accepts_number_or_placeholder() {
        let json = r#"{"listeners": [
            {"addr": "127.0.0.1", "port": 8080},
            {"addr": "127.0.0.1", "port": "{env.PORT}"}
        ]}"#;
        let config: RawConfig = serde_json::from_str(json).unwrap();
        assert_eq!(config.listeners[0].port, PortValue::Number(8080));
        assert_eq!(config.listeners[1].port, PortValue::Text("{env.PORT}".into()));
    }

    #[test]
    fn middleware_is_tagged_by_type() {
        let json = r#"{"match": "/", "upstream": "u", "middleware": [
            {"type": "strip_prefix", "prefix": "/api"},
            {"type": "timeout", "ms": 250}
        ]}"#;
        let route: RawRoute = serde_json::from_str(json).unwrap();
        assert_eq!(
            route.middleware,
            vec![
                RawMiddleware::StripPrefix {
                    prefix: "/api".into()
                },
                RawMiddleware::Timeout { ms: 250 },
            ]
        );
    }

    #[test]
    fn unknown_fields_are_rejected() {
        let result = serde_json::from_str::<RawConfig>(r#"{"listners": []}"#);
        assert!(result.is_err());

        let result = serde_json::from_str::<RawOptions>(r#"{"drainTimeout": 5}"#);
        assert!(result.is_err());
    }
}
