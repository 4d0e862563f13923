//! Lifecycle controller: the single owner of the engine state machine.
//!
//! A [`Controller`] wraps one [`ProxyEngine`] and serializes every
//! mutating operation behind one async mutex. Translation happens before
//! any transition, so an invalid config never moves the state. Each
//! operation publishes whole status records at its commit points and
//! emits a [`LifecycleEvent`] per transition.
//!
//! Reload applies a [`ConfigDiff`] step by step and records each step in a
//! journal. If a step fails or the reload window elapses, the journal is
//! replayed backwards (release what was bound, rebind what was released)
//! and the previous route table is recommitted. Only a rollback that
//! cannot restore a previous listener leaves the engine `Failed`.

use std::sync::Arc;
use std::time::{Duration, Instant};

use serde::Serialize;
use tokio::sync::{broadcast, watch, Mutex, MutexGuard};

use crate::config::diff::{ConfigDiff, DiffSummary};
use crate::config::model::RawConfig;
use crate::config::validation::conflicting_binds;
use crate::config::{translate, Configuration, ListenerKey, ListenerSpec};
use crate::engine::http::HttpEngine;
use crate::engine::{DrainPolicy, ProxyEngine};
use crate::environment::EnvironmentOverlay;
use crate::error::{ErrorKind, ProxyHostError};
use crate::events::{EventBus, EventLevel, LifecycleEvent};
use crate::proxy::routing::RouteTable;
use crate::state::{EngineState, Operation};
use crate::status::{ErrorReport, ListenerAddr, StatusRecord, StatusReporter, StatusSnapshot};

pub const DEFAULT_DRAIN_GRACE: Duration = Duration::from_secs(10);
pub const DEFAULT_RELOAD_TIMEOUT: Duration = Duration::from_secs(30);

/// What a lifecycle call does when another one is in flight.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum ContentionPolicy {
    /// Wait in FIFO order.
    #[default]
    Queue,
    /// Fail at once with a `Busy` state conflict.
    Reject,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ControllerSettings {
    pub drain_grace: Duration,
    pub reload_timeout: Duration,
    pub contention: ContentionPolicy,
}

impl Default for ControllerSettings {
    fn default() -> Self {
        Self {
            drain_grace: DEFAULT_DRAIN_GRACE,
            reload_timeout: DEFAULT_RELOAD_TIMEOUT,
            contention: ContentionPolicy::Queue,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StartOutcome {
    pub active_listeners: Vec<ListenerAddr>,
    pub config_version: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StopOutcome {
    pub drained_connections: usize,
    pub forced_connections: usize,
    /// Set when the drain grace expired and connections were force-closed.
    pub warning: Option<ErrorReport>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ReloadOutcome {
    pub diff: DiffSummary,
    pub active_listeners: Vec<ListenerAddr>,
    pub config_version: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EnvironmentOutcome {
    pub staged_keys: usize,
    /// The staged overlay is never applied to a running engine.
    pub applies_on_next_start: bool,
}

struct Inner {
    state: EngineState,
    active: Option<Arc<Configuration>>,
    staged_env: EnvironmentOverlay,
    /// Overlay the active configuration was translated with.
    applied_env: EnvironmentOverlay,
}

/// A step taken while applying a reload, undone in reverse on failure.
enum Step {
    Bound(ListenerKey),
    Released(ListenerSpec),
}

pub struct Controller {
    inner: Mutex<Inner>,
    engine: Arc<dyn ProxyEngine>,
    status: StatusReporter,
    events: EventBus,
    settings: ControllerSettings,
}

impl Controller {
    /// A controller driving a fresh [`HttpEngine`].
    #[must_use]
    pub fn new(settings: ControllerSettings) -> Self {
        Self::with_engine(Arc::new(HttpEngine::new()), settings)
    }

    #[must_use]
    pub fn with_engine(engine: Arc<dyn ProxyEngine>, settings: ControllerSettings) -> Self {
        Self {
            inner: Mutex::new(Inner {
                state: EngineState::Stopped,
                active: None,
                staged_env: EnvironmentOverlay::new(),
                applied_env: EnvironmentOverlay::new(),
            }),
            engine,
            status: StatusReporter::new(),
            events: EventBus::new(),
            settings,
        }
    }

    #[must_use]
    pub const fn settings(&self) -> &ControllerSettings {
        &self.settings
    }

    pub async fn start(&self, raw: &RawConfig) -> Result<StartOutcome, ProxyHostError> {
        let result = match self.acquire(Operation::Start).await {
            Ok(mut inner) => self.start_locked(&mut inner, raw).await,
            Err(e) => Err(e),
        };
        self.settle(Operation::Start, result)
    }

    pub async fn stop(&self) -> Result<StopOutcome, ProxyHostError> {
        let result = match self.acquire(Operation::Stop).await {
            Ok(mut inner) => self.stop_locked(&mut inner).await,
            Err(e) => Err(e),
        };
        self.settle(Operation::Stop, result)
    }

    pub async fn reload(&self, raw: &RawConfig) -> Result<ReloadOutcome, ProxyHostError> {
        let result = match self.acquire(Operation::Reload).await {
            Ok(mut inner) => self.reload_locked(&mut inner, raw).await,
            Err(e) => Err(e),
        };
        self.settle(Operation::Reload, result)
    }

    /// Merge `overlay` into the staged environment for the next start.
    pub async fn set_environment(
        &self,
        overlay: EnvironmentOverlay,
    ) -> Result<EnvironmentOutcome, ProxyHostError> {
        let result = self
            .stage_environment(Operation::SetEnvironment, overlay, |staged, overlay| {
                staged.merge(overlay);
            })
            .await;
        self.settle(Operation::SetEnvironment, result)
    }

    /// Replace the staged environment wholesale.
    pub async fn replace_environment(
        &self,
        overlay: EnvironmentOverlay,
    ) -> Result<EnvironmentOutcome, ProxyHostError> {
        let result = self
            .stage_environment(Operation::ReplaceEnvironment, overlay, |staged, overlay| {
                *staged = overlay;
            })
            .await;
        self.settle(Operation::ReplaceEnvironment, result)
    }

    /// Current status. Never waits on a lifecycle operation.
    #[must_use]
    pub fn status(&self) -> StatusSnapshot {
        self.status.snapshot()
    }

    #[must_use]
    pub fn watch_status(&self) -> watch::Receiver<StatusRecord> {
        self.status.subscribe()
    }

    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<LifecycleEvent> {
        self.events.subscribe()
    }

    /// Record a failure that happened before an operation reached the
    /// controller (for example, unparseable text at the host boundary).
    pub fn record_failure(&self, operation: Operation, err: &ProxyHostError) {
        tracing::warn!(operation = %operation, error = %err, "lifecycle operation rejected");
        if err.kind() != ErrorKind::StateConflictError {
            self.status.publish(|r| r.last_error = Some(err.into()));
        }
    }

    async fn acquire(&self, operation: Operation) -> Result<MutexGuard<'_, Inner>, ProxyHostError> {
        match self.settings.contention {
            ContentionPolicy::Queue => Ok(self.inner.lock().await),
            ContentionPolicy::Reject => self
                .inner
                .try_lock()
                .map_err(|_| ProxyHostError::Busy { operation }),
        }
    }

    fn settle<T>(
        &self,
        operation: Operation,
        result: Result<T, ProxyHostError>,
    ) -> Result<T, ProxyHostError> {
        if let Err(ref err) = result {
            self.record_failure(operation, err);
        }
        result
    }

    fn transition(
        &self,
        inner: &mut Inner,
        operation: Operation,
        to: EngineState,
        level: EventLevel,
        message: impl Into<String>,
        update: impl FnOnce(&mut StatusRecord),
    ) {
        let from = inner.state;
        inner.state = to;
        self.status.publish(|record| {
            record.state = to;
            update(record);
        });
        let message = message.into();
        match level {
            EventLevel::Info => {
                tracing::info!(operation = %operation, from = %from, to = %to, "{message}");
            }
            EventLevel::Warn => {
                tracing::warn!(operation = %operation, from = %from, to = %to, "{message}");
            }
            EventLevel::Error => {
                tracing::error!(operation = %operation, from = %from, to = %to, "{message}");
            }
        }
        self.events
            .emit(LifecycleEvent::new(operation, from, to, level, message));
    }

    async fn start_locked(
        &self,
        inner: &mut Inner,
        raw: &RawConfig,
    ) -> Result<StartOutcome, ProxyHostError> {
        if !inner.state.accepts(Operation::Start) {
            return Err(ProxyHostError::StateConflict {
                operation: Operation::Start,
                state: inner.state,
            });
        }
        let config = translate(raw, &inner.staged_env)?;
        let env = inner.staged_env.clone();
        let recovering = inner.state == EngineState::Failed;

        self.transition(
            inner,
            Operation::Start,
            EngineState::Starting,
            EventLevel::Info,
            format!("binding {} listener(s)", config.listeners.len()),
            |_| {},
        );

        if recovering {
            let leftovers = self.engine.listeners().await;
            if !leftovers.is_empty() {
                tracing::info!(listeners = leftovers.len(), "releasing listeners left by failure");
                self.engine
                    .release(&leftovers, DrainPolicy::force_close(Duration::ZERO))
                    .await;
            }
        }

        let mut bound = Vec::with_capacity(config.listeners.len());
        for spec in &config.listeners {
            match self.engine.bind(spec).await {
                Ok(addr) => {
                    tracing::debug!(addr = %addr, "listener reserved");
                    bound.push(spec.key);
                }
                Err(err) => {
                    self.engine
                        .release(&bound, DrainPolicy::force_close(Duration::ZERO))
                        .await;
                    let report = ErrorReport::from(&err);
                    self.transition(
                        inner,
                        Operation::Start,
                        EngineState::Failed,
                        EventLevel::Error,
                        err.to_string(),
                        |r| {
                            r.active_listeners.clear();
                            r.running_since = None;
                            r.config_version = None;
                            r.last_error = Some(report);
                        },
                    );
                    inner.active = None;
                    return Err(err);
                }
            }
        }

        self.engine
            .commit(Arc::new(RouteTable::from_config(&config)))
            .await;

        let outcome = StartOutcome {
            active_listeners: listener_addrs(&bound),
            config_version: config.version.as_str().to_string(),
        };
        let version = config.version.clone();
        inner.active = Some(Arc::new(config));
        inner.applied_env = env;

        self.transition(
            inner,
            Operation::Start,
            EngineState::Running,
            EventLevel::Info,
            format!("running config {}", version.short()),
            |r| {
                r.active_listeners = bound;
                r.running_since = Some(Instant::now());
                r.last_error = None;
                r.config_version = Some(version);
            },
        );
        Ok(outcome)
    }

    async fn stop_locked(&self, inner: &mut Inner) -> Result<StopOutcome, ProxyHostError> {
        if inner.state == EngineState::Stopped {
            tracing::debug!("stop requested while already stopped");
            return Ok(StopOutcome::default());
        }
        if !inner.state.accepts(Operation::Stop) {
            return Err(ProxyHostError::StateConflict {
                operation: Operation::Stop,
                state: inner.state,
            });
        }

        let grace = inner
            .active
            .as_ref()
            .and_then(|c| c.options.drain_timeout)
            .unwrap_or(self.settings.drain_grace);

        self.transition(
            inner,
            Operation::Stop,
            EngineState::Stopping,
            EventLevel::Info,
            format!("draining for up to {}ms", grace.as_millis()),
            |_| {},
        );

        let held = self.engine.listeners().await;
        let report = self
            .engine
            .release(&held, DrainPolicy::force_close(grace))
            .await;
        self.engine.commit(Arc::new(RouteTable::empty())).await;
        inner.active = None;

        let warning = report.timed_out().then(|| {
            ErrorReport::from(&ProxyHostError::Timeout {
                operation: Operation::Stop,
                after: grace,
            })
        });
        let (level, message) = if report.timed_out() {
            (
                EventLevel::Warn,
                format!(
                    "stopped; drain grace expired, {} connection(s) force-closed",
                    report.forced
                ),
            )
        } else {
            (
                EventLevel::Info,
                format!("stopped; {} connection(s) drained", report.drained),
            )
        };
        self.transition(inner, Operation::Stop, EngineState::Stopped, level, message, |r| {
            r.active_listeners.clear();
            r.running_since = None;
            r.config_version = None;
        });

        Ok(StopOutcome {
            drained_connections: report.drained,
            forced_connections: report.forced,
            warning,
        })
    }

    async fn reload_locked(
        &self,
        inner: &mut Inner,
        raw: &RawConfig,
    ) -> Result<ReloadOutcome, ProxyHostError> {
        if !inner.state.accepts(Operation::Reload) {
            return Err(ProxyHostError::StateConflict {
                operation: Operation::Reload,
                state: inner.state,
            });
        }
        let Some(previous) = inner.active.clone() else {
            return Err(ProxyHostError::Internal(
                "engine is running without an active configuration".into(),
            ));
        };

        let next = translate(raw, &inner.applied_env)?;
        let diff = ConfigDiff::between(&previous, &next);
        let window = next
            .options
            .reload_timeout
            .unwrap_or(self.settings.reload_timeout);
        let grace = next
            .options
            .drain_timeout
            .unwrap_or(self.settings.drain_grace);

        self.transition(
            inner,
            Operation::Reload,
            EngineState::Reloading,
            EventLevel::Info,
            format!(
                "applying config {} (+{} -{} ~{} ={} listeners)",
                next.version.short(),
                diff.listeners_added.len(),
                diff.listeners_removed.len(),
                diff.listeners_changed.len(),
                diff.listeners_unchanged.len()
            ),
            |_| {},
        );

        if diff.is_empty() {
            tracing::debug!(version = next.version.short(), "reload carries no changes");
        }

        let deadline = tokio::time::Instant::now() + window;
        let mut journal = Vec::new();
        let applied = self
            .apply_diff(&diff, grace, deadline, window, &mut journal)
            .await;

        if let Err(err) = applied {
            return Err(self.roll_back(inner, &previous, journal, err).await);
        }

        self.engine
            .commit(Arc::new(RouteTable::from_config(&next)))
            .await;

        let keys = next.listener_keys();
        let outcome = ReloadOutcome {
            diff: diff.summary(),
            active_listeners: listener_addrs(&keys),
            config_version: next.version.as_str().to_string(),
        };
        let version = next.version.clone();
        inner.active = Some(Arc::new(next));

        self.transition(
            inner,
            Operation::Reload,
            EngineState::Running,
            EventLevel::Info,
            format!("running config {}", version.short()),
            |r| {
                r.active_listeners = keys;
                r.last_error = None;
                r.config_version = Some(version);
            },
        );
        Ok(outcome)
    }

    async fn apply_diff(
        &self,
        diff: &ConfigDiff,
        grace: Duration,
        deadline: tokio::time::Instant,
        window: Duration,
        journal: &mut Vec<Step>,
    ) -> Result<(), ProxyHostError> {
        let expired = || ProxyHostError::Timeout {
            operation: Operation::Reload,
            after: window,
        };
        // Drains during a reload never outlive the reload window.
        let drain = || {
            let remaining = deadline.saturating_duration_since(tokio::time::Instant::now());
            DrainPolicy::detach(grace.min(remaining))
        };
        let check = || {
            if tokio::time::Instant::now() >= deadline {
                Err(expired())
            } else {
                Ok(())
            }
        };

        // A wildcard and a specific address on one port cannot be bound
        // together, so a removed listener that clashes with an added one
        // goes first.
        let (clashing, removed): (Vec<&ListenerSpec>, Vec<&ListenerSpec>) =
            diff.listeners_removed.iter().partition(|old| {
                diff.listeners_added
                    .iter()
                    .any(|new| conflicting_binds(&old.key, &new.key))
            });

        for old in clashing {
            check()?;
            self.release_for_reload(old, drain()).await;
            journal.push(Step::Released(old.clone()));
        }
        for spec in &diff.listeners_added {
            check()?;
            self.bind_before(spec, deadline, window).await?;
            journal.push(Step::Bound(spec.key));
        }
        for (old, new) in &diff.listeners_changed {
            check()?;
            self.release_for_reload(old, drain()).await;
            journal.push(Step::Released(old.clone()));
            self.bind_before(new, deadline, window).await?;
            journal.push(Step::Bound(new.key));
        }
        for old in removed {
            check()?;
            self.release_for_reload(old, drain()).await;
            journal.push(Step::Released(old.clone()));
        }
        check()
    }

    async fn release_for_reload(&self, spec: &ListenerSpec, policy: DrainPolicy) {
        let report = self.engine.release(&[spec.key], policy).await;
        if report.detached > 0 {
            tracing::warn!(
                addr = %spec.key,
                detached = report.detached,
                drained = report.drained,
                "connections left running past the reload drain"
            );
        }
    }

    async fn bind_before(
        &self,
        spec: &ListenerSpec,
        deadline: tokio::time::Instant,
        window: Duration,
    ) -> Result<(), ProxyHostError> {
        match tokio::time::timeout_at(deadline, self.engine.bind(spec)).await {
            Ok(bound) => bound.map(|_| ()),
            Err(_) => Err(ProxyHostError::Timeout {
                operation: Operation::Reload,
                after: window,
            }),
        }
    }

    /// Undo `journal` and return the error to report.
    async fn roll_back(
        &self,
        inner: &mut Inner,
        previous: &Arc<Configuration>,
        journal: Vec<Step>,
        cause: ProxyHostError,
    ) -> ProxyHostError {
        tracing::warn!(error = %cause, steps = journal.len(), "reload failed, rolling back");

        let mut unrestored = Vec::new();
        for step in journal.into_iter().rev() {
            match step {
                Step::Bound(key) => {
                    self.engine
                        .release(&[key], DrainPolicy::force_close(Duration::ZERO))
                        .await;
                }
                Step::Released(spec) => {
                    if let Err(e) = self.engine.bind(&spec).await {
                        tracing::error!(addr = %spec.key, error = %e, "rollback could not rebind listener");
                        unrestored.push(format!("{} ({e})", spec.key));
                    }
                }
            }
        }
        self.engine
            .commit(Arc::new(RouteTable::from_config(previous)))
            .await;

        if unrestored.is_empty() {
            let report = ErrorReport::from(&cause);
            self.transition(
                inner,
                Operation::Reload,
                EngineState::Running,
                EventLevel::Warn,
                format!("rolled back to config {}: {cause}", previous.version.short()),
                |r| r.last_error = Some(report),
            );
            return cause;
        }

        let fault = ProxyHostError::Internal(format!(
            "reload failed ({cause}) and rollback could not restore {}",
            unrestored.join(", ")
        ));
        let held = self.engine.listeners().await;
        let report = ErrorReport::from(&fault);
        inner.active = None;
        self.transition(
            inner,
            Operation::Reload,
            EngineState::Failed,
            EventLevel::Error,
            fault.to_string(),
            |r| {
                r.active_listeners = held;
                r.running_since = None;
                r.config_version = None;
                r.last_error = Some(report);
            },
        );
        fault
    }

    async fn stage_environment(
        &self,
        operation: Operation,
        overlay: EnvironmentOverlay,
        stage: impl FnOnce(&mut EnvironmentOverlay, EnvironmentOverlay),
    ) -> Result<EnvironmentOutcome, ProxyHostError> {
        overlay.validate()?;
        let mut inner = self.acquire(operation).await?;
        let written = overlay.len();
        stage(&mut inner.staged_env, overlay);

        let state = inner.state;
        let staged_keys = inner.staged_env.len();
        tracing::info!(operation = %operation, written, staged_keys, "environment staged");
        self.events.emit(LifecycleEvent::new(
            operation,
            state,
            state,
            EventLevel::Info,
            format!("{staged_keys} key(s) staged for the next start"),
        ));
        Ok(EnvironmentOutcome {
            staged_keys,
            applies_on_next_start: true,
        })
    }
}

fn listener_addrs(keys: &[ListenerKey]) -> Vec<ListenerAddr> {
    keys.iter()
        .map(|key| ListenerAddr {
            addr: key.addr.to_string(),
            port: key.port,
        })
        .collect()
}
