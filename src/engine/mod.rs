//! The proxy engine boundary.
//!
//! The controller drives an engine through [`ProxyEngine`] in two phases:
//! [`bind`](ProxyEngine::bind) reserves a socket without serving on it,
//! and [`commit`](ProxyEngine::commit) installs a route table and starts
//! serving every pending listener. Splitting the two lets a reload reserve
//! all new sockets before any of them can observe a half-applied config,
//! and lets a failed step be undone by releasing what was reserved.
//!
//! [`HttpEngine`](http::HttpEngine) is the production implementation.

pub mod http;
pub mod tls;

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;

use crate::config::{ListenerKey, ListenerSpec};
use crate::error::ProxyHostError;
use crate::proxy::routing::RouteTable;

/// What happens to connections still open when the drain grace expires.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OnTimeout {
    /// Abort them.
    ForceClose,
    /// Let them finish in the background, detached from the listener.
    Detach,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DrainPolicy {
    pub grace: Duration,
    pub on_timeout: OnTimeout,
}

impl DrainPolicy {
    #[must_use]
    pub const fn force_close(grace: Duration) -> Self {
        Self {
            grace,
            on_timeout: OnTimeout::ForceClose,
        }
    }

    #[must_use]
    pub const fn detach(grace: Duration) -> Self {
        Self {
            grace,
            on_timeout: OnTimeout::Detach,
        }
    }
}

/// Outcome of releasing a set of listeners.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DrainReport {
    pub listeners: usize,
    /// Connections that completed within the grace period.
    pub drained: usize,
    pub forced: usize,
    pub detached: usize,
}

impl DrainReport {
    #[must_use]
    pub const fn timed_out(&self) -> bool {
        self.forced > 0 || self.detached > 0
    }

    pub fn absorb(&mut self, other: Self) {
        self.listeners += other.listeners;
        self.drained += other.drained;
        self.forced += other.forced;
        self.detached += other.detached;
    }
}

// async_trait is required because the controller holds Arc<dyn ProxyEngine>.
#[async_trait]
pub trait ProxyEngine: Send + Sync {
    /// Reserve the listener's socket (and load its TLS material) without
    /// accepting connections. Returns the bound address.
    async fn bind(&self, spec: &ListenerSpec) -> Result<SocketAddr, ProxyHostError>;

    /// Swap in `routes` and start serving every pending listener.
    /// In-flight requests finish against the table they started with.
    async fn commit(&self, routes: Arc<RouteTable>);

    /// Stop accepting on `keys` (pending or serving) and drain their
    /// connections against a single deadline. Unknown keys are ignored.
    async fn release(&self, keys: &[ListenerKey], policy: DrainPolicy) -> DrainReport;

    /// Every listener currently held, pending or serving.
    async fn listeners(&self) -> Vec<ListenerKey>;
}
