//! Configuration model, translation, validation, and diffing.
//!
//! [`Configuration`] is the immutable, normalized value every lifecycle
//! operation works with. It is produced only by [`translate`] from a
//! [`RawConfig`](model::RawConfig) plus the applied environment overlay.
//! Submodules provide the raw serde model, field validators, the
//! structural diff used by reloads, and file-backed config sources
//! behind the [`ConfigSource`] trait.

pub mod diff;
pub mod model;
pub mod sources;
pub mod translate;
pub mod validation;

use std::net::{IpAddr, SocketAddr};
use std::path::PathBuf;
use std::time::Duration;

use async_trait::async_trait;
use serde::Serialize;
use url::Url;

use crate::error::ProxyHostError;
use crate::proxy::middleware::Middleware;
use crate::proxy::routing::PathPattern;

pub use translate::{parse_config_text, translate};

pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_millis(5000);
pub const DEFAULT_MAX_BODY_BYTES: usize = 1_048_576;

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
#[non_exhaustive]
pub enum ConfigVersion {
    Hash(String),
}

impl ConfigVersion {
    #[must_use]
    pub fn as_str(&self) -> &str {
        match self {
            Self::Hash(h) => h,
        }
    }

    /// First eight hex digits, for logs and status output.
    #[must_use]
    pub fn short(&self) -> &str {
        let full = self.as_str();
        full.get(..8).unwrap_or(full)
    }
}

// async_trait is required here because ConfigSource is used as Box<dyn ConfigSource>
// and native async fn in traits does not support dyn dispatch.
#[async_trait]
pub trait ConfigSource: Send + Sync {
    fn name(&self) -> &'static str;
    /// Load the raw document and the version of its source bytes.
    async fn load(&self) -> Result<(model::RawConfig, ConfigVersion), ProxyHostError>;
    async fn has_changed(&self, current: &ConfigVersion) -> Result<bool, ProxyHostError>;
}

/// Identity of a listener: the address it binds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct ListenerKey {
    pub addr: IpAddr,
    pub port: u16,
}

impl ListenerKey {
    #[must_use]
    pub const fn socket_addr(&self) -> SocketAddr {
        SocketAddr::new(self.addr, self.port)
    }
}

impl std::fmt::Display for ListenerKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.socket_addr())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Scheme {
    Http,
    Https,
}

impl Scheme {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Http => "http",
            Self::Https => "https",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
pub struct TlsMaterial {
    pub cert_path: PathBuf,
    pub key_path: PathBuf,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
pub struct ListenerSpec {
    pub key: ListenerKey,
    pub scheme: Scheme,
    pub tls: Option<TlsMaterial>,
}

impl ListenerSpec {
    #[must_use]
    pub const fn socket_addr(&self) -> SocketAddr {
        self.key.socket_addr()
    }
}

/// Predicate a request must satisfy for a route to apply. Also the
/// route's identity when diffing two configurations.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RouteMatch {
    /// Lowercased host without port; `None` matches any host.
    pub host: Option<String>,
    pub path: PathPattern,
    /// Uppercased methods; empty matches any method.
    pub methods: Vec<String>,
}

impl RouteMatch {
    /// Static rank used to order routes most-specific first.
    #[must_use]
    pub fn specificity(&self) -> i32 {
        let host = if self.host.is_some() { 1000 } else { 0 };
        let methods = i32::from(!self.methods.is_empty());
        host + self.path.specificity() * 2 + methods
    }
}

impl std::fmt::Display for RouteMatch {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if let Some(ref host) = self.host {
            write!(f, "{host}")?;
        }
        write!(f, "{}", self.path)?;
        if !self.methods.is_empty() {
            write!(f, " [{}]", self.methods.join(","))?;
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Upstream {
    /// Name from `upstreams` when the route referenced one.
    pub name: Option<String>,
    pub url: Url,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Route {
    pub matcher: RouteMatch,
    pub upstream: Upstream,
    pub middleware: Vec<Middleware>,
    /// Position in the source document, the ordering tie-breaker.
    pub declared: usize,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GlobalOptions {
    pub drain_timeout: Option<Duration>,
    pub reload_timeout: Option<Duration>,
    pub request_timeout: Duration,
    pub max_body_bytes: usize,
}

impl Default for GlobalOptions {
    fn default() -> Self {
        Self {
            drain_timeout: None,
            reload_timeout: None,
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
            max_body_bytes: DEFAULT_MAX_BODY_BYTES,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Configuration {
    /// Listeners in declaration order.
    pub listeners: Vec<ListenerSpec>,
    /// Routes ordered most-specific first, ties in declaration order.
    pub routes: Vec<Route>,
    pub options: GlobalOptions,
    pub version: ConfigVersion,
}

impl Configuration {
    #[must_use]
    pub fn listener_keys(&self) -> Vec<ListenerKey> {
        self.listeners.iter().map(|l| l.key).collect()
    }

    #[must_use]
    pub fn listener(&self, key: &ListenerKey) -> Option<&ListenerSpec> {
        self.listeners.iter().find(|l| l.key == *key)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn version_short_form() {
        let version = ConfigVersion::Hash("0123456789abcdef".into());
        assert_eq!(version.short(), "01234567");
        assert_eq!(ConfigVersion::Hash("abc".into()).short(), "abc");
    }

    #[test]
    fn host_outranks_any_path() {
        let with_host = RouteMatch {
            host: Some("example.com".into()),
            path: PathPattern::parse("/*").unwrap(),
            methods: vec![],
        };
        let deep_path = RouteMatch {
            host: None,
            path: PathPattern::parse("/a/b/c/d").unwrap(),
            methods: vec!["GET".into()],
        };
        assert!(with_host.specificity() > deep_path.specificity());
    }

    #[test]
    fn listener_key_displays_socket_addr() {
        let key = ListenerKey {
            addr: "::1".parse().unwrap(),
            port: 8443,
        };
        assert_eq!(key.to_string(), "[::1]:8443");
    }
}
