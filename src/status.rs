//! Read-only status snapshots.
//!
//! The controller publishes whole [`StatusRecord`]s into a
//! `tokio::sync::watch` channel at each commit point; readers copy the
//! latest record and compute uptime at query time. Reading never touches
//! the lifecycle lock, so status stays available while a drain or bind is
//! in progress (it reports the transitional state).

use std::time::Instant;

use serde::Serialize;
use tokio::sync::watch;

use crate::config::{ConfigVersion, ListenerKey};
use crate::error::{ErrorKind, ProxyHostError};
use crate::state::EngineState;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ErrorReport {
    pub kind: ErrorKind,
    pub message: String,
}

impl From<&ProxyHostError> for ErrorReport {
    fn from(err: &ProxyHostError) -> Self {
        Self {
            kind: err.kind(),
            message: err.to_string(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct StatusRecord {
    pub state: EngineState,
    pub active_listeners: Vec<ListenerKey>,
    pub running_since: Option<Instant>,
    pub last_error: Option<ErrorReport>,
    pub config_version: Option<ConfigVersion>,
}

impl Default for StatusRecord {
    fn default() -> Self {
        Self {
            state: EngineState::Stopped,
            active_listeners: Vec::new(),
            running_since: None,
            last_error: None,
            config_version: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ListenerAddr {
    pub addr: String,
    pub port: u16,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusSnapshot {
    pub state: EngineState,
    pub uptime_seconds: u64,
    pub active_listeners: Vec<ListenerAddr>,
    pub last_error: Option<ErrorReport>,
    pub config_version: Option<String>,
}

impl StatusSnapshot {
    #[must_use]
    pub fn from_record(record: &StatusRecord, now: Instant) -> Self {
        Self {
            state: record.state,
            uptime_seconds: record
                .running_since
                .map_or(0, |since| now.saturating_duration_since(since).as_secs()),
            active_listeners: record
                .active_listeners
                .iter()
                .map(|key| ListenerAddr {
                    addr: key.addr.to_string(),
                    port: key.port,
                })
                .collect(),
            last_error: record.last_error.clone(),
            config_version: record.config_version.as_ref().map(|v| v.as_str().to_string()),
        }
    }
}

pub struct StatusReporter {
    tx: watch::Sender<StatusRecord>,
}

impl Default for StatusReporter {
    fn default() -> Self {
        Self::new()
    }
}

impl StatusReporter {
    #[must_use]
    pub fn new() -> Self {
        let (tx, _) = watch::channel(StatusRecord::default());
        Self { tx }
    }

    /// Apply `update` to the record and publish it as one value.
    pub fn publish(&self, update: impl FnOnce(&mut StatusRecord)) {
        self.tx.send_modify(update);
    }

    #[must_use]
    pub fn snapshot(&self) -> StatusSnapshot {
        StatusSnapshot::from_record(&self.tx.borrow(), Instant::now())
    }

    #[must_use]
    pub fn subscribe(&self) -> watch::Receiver<StatusRecord> {
        self.tx.subscribe()
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;

    #[test]
    fn snapshot_serializes_boundary_schema() {
        let record = StatusRecord {
            state: EngineState::Running,
            active_listeners: vec![ListenerKey {
                addr: "127.0.0.1".parse().unwrap(),
                port: 8080,
            }],
            running_since: None,
            last_error: None,
            config_version: Some(ConfigVersion::Hash("abc123".into())),
        };
        let json = serde_json::to_value(StatusSnapshot::from_record(&record, Instant::now())).unwrap();
        assert_eq!(
            json,
            serde_json::json!({
                "state": "running",
                "uptimeSeconds": 0,
                "activeListeners": [{"addr": "127.0.0.1", "port": 8080}],
                "lastError": null,
                "configVersion": "abc123"
            })
        );
    }

    #[test]
    fn uptime_computed_at_query_time() {
        let since = Instant::now();
        let record = StatusRecord {
            state: EngineState::Running,
            running_since: Some(since),
            ..StatusRecord::default()
        };
        let later = since + Duration::from_secs(42);
        assert_eq!(StatusSnapshot::from_record(&record, later).uptime_seconds, 42);
    }

    #[tokio::test]
    async fn subscribers_see_published_records() {
        let reporter = StatusReporter::new();
        let mut rx = reporter.subscribe();
        reporter.publish(|r| r.state = EngineState::Starting);
        rx.changed().await.unwrap();
        assert_eq!(rx.borrow().state, EngineState::Starting);
        assert_eq!(reporter.snapshot().state, EngineState::Starting);
    }
}
