//! Text boundary for embedding hosts.
//!
//! Every lifecycle operation is exposed as text in, text out: config and
//! environment arrive as JSON text, results leave as a JSON object of the
//! form `{"ok": bool, "error": kind | null, ...}`. [`dispatch`] routes a
//! host method name to the matching operation. [`Bridge`] owns a
//! controller plus a multi-thread Tokio runtime for hosts that have no
//! async runtime of their own; it must not be driven from inside another
//! Tokio runtime.

use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use serde_json::{json, Map, Value};
use tokio::runtime::Runtime;

use crate::config::parse_config_text;
use crate::controller::{Controller, ControllerSettings};
use crate::environment::EnvironmentOverlay;
use crate::error::ProxyHostError;
use crate::events::LifecycleEvent;
use crate::state::Operation;

/// Config used when a host calls start or reload without one.
pub const EMPTY_CONFIG: &str = "{}";

pub async fn start(controller: &Controller, config_text: &str) -> String {
    let raw = match parse_config_text(config_text) {
        Ok(raw) => raw,
        Err(e) => return rejected(controller, Operation::Start, &e),
    };
    respond(controller.start(&raw).await)
}

pub async fn stop(controller: &Controller) -> String {
    respond(controller.stop().await)
}

pub async fn reload(controller: &Controller, config_text: &str) -> String {
    let raw = match parse_config_text(config_text) {
        Ok(raw) => raw,
        Err(e) => return rejected(controller, Operation::Reload, &e),
    };
    respond(controller.reload(&raw).await)
}

#[must_use]
pub fn status(controller: &Controller) -> String {
    serde_json::to_string(&controller.status()).unwrap_or_else(|e| internal_failure(&e))
}

pub async fn set_environment(controller: &Controller, env_text: &str) -> String {
    let overlay = match EnvironmentOverlay::parse(env_text) {
        Ok(overlay) => overlay,
        Err(e) => return rejected(controller, Operation::SetEnvironment, &e),
    };
    respond(controller.set_environment(overlay).await)
}

pub async fn replace_environment(controller: &Controller, env_text: &str) -> String {
    let overlay = match EnvironmentOverlay::parse(env_text) {
        Ok(overlay) => overlay,
        Err(e) => return rejected(controller, Operation::ReplaceEnvironment, &e),
    };
    respond(controller.replace_environment(overlay).await)
}

/// Route a host method call. `args` is the host's argument map; `config`
/// and `env` may be JSON text or an inline JSON object.
pub async fn dispatch(controller: &Controller, method: &str, args: &Value) -> String {
    match method {
        "start" => start(controller, &text_arg(args, "config", EMPTY_CONFIG)).await,
        "stop" => stop(controller).await,
        "reload" => reload(controller, &text_arg(args, "config", EMPTY_CONFIG)).await,
        "status" => status(controller),
        "setEnvironment" => set_environment(controller, &text_arg(args, "env", "{}")).await,
        "replaceEnvironment" => {
            replace_environment(controller, &text_arg(args, "env", "{}")).await
        }
        other => {
            tracing::warn!(method = other, "unknown bridge method");
            json!({
                "ok": false,
                "error": "NotImplemented",
                "message": format!("unknown method '{other}'"),
            })
            .to_string()
        }
    }
}

fn text_arg(args: &Value, key: &str, default: &str) -> String {
    match args.get(key) {
        Some(Value::String(text)) => text.clone(),
        Some(Value::Null) | None => default.to_string(),
        Some(inline) => inline.to_string(),
    }
}

fn respond<T: Serialize>(result: Result<T, ProxyHostError>) -> String {
    match result {
        Ok(outcome) => success(&outcome),
        Err(e) => failure(&e),
    }
}

fn rejected(controller: &Controller, operation: Operation, err: &ProxyHostError) -> String {
    controller.record_failure(operation, err);
    failure(err)
}

fn success<T: Serialize>(outcome: &T) -> String {
    let mut body = match serde_json::to_value(outcome) {
        Ok(Value::Object(map)) => map,
        Ok(_) => Map::new(),
        Err(e) => return internal_failure(&e),
    };
    body.insert("ok".into(), Value::Bool(true));
    body.insert("error".into(), Value::Null);
    Value::Object(body).to_string()
}

fn failure(err: &ProxyHostError) -> String {
    let details: Vec<Value> = err
        .validation_errors()
        .iter()
        .map(|e| {
            json!({
                "field": e.field,
                "message": e.message,
                "suggestion": e.suggestion,
            })
        })
        .collect();
    json!({
        "ok": false,
        "error": err.kind().as_str(),
        "message": err.to_string(),
        "details": details,
    })
    .to_string()
}

fn internal_failure(err: &serde_json::Error) -> String {
    failure(&ProxyHostError::Internal(format!(
        "could not encode result: {err}"
    )))
}

/// Owned controller handle with its own runtime.
///
/// Dropping the bridge stops the engine (best effort) and shuts the
/// runtime down.
pub struct Bridge {
    runtime: Option<Runtime>,
    controller: Arc<Controller>,
}

impl Bridge {
    pub fn new(settings: ControllerSettings) -> Result<Self, ProxyHostError> {
        let runtime = tokio::runtime::Builder::new_multi_thread()
            .enable_all()
            .thread_name("proxyhost")
            .build()?;
        let controller = {
            let _guard = runtime.enter();
            Arc::new(Controller::new(settings))
        };
        Ok(Self {
            runtime: Some(runtime),
            controller,
        })
    }

    #[must_use]
    pub const fn controller(&self) -> &Arc<Controller> {
        &self.controller
    }

    pub fn start(&self, config_text: &str) -> String {
        self.block_on(start(&self.controller, config_text))
    }

    pub fn stop(&self) -> String {
        self.block_on(stop(&self.controller))
    }

    pub fn reload(&self, config_text: &str) -> String {
        self.block_on(reload(&self.controller, config_text))
    }

    #[must_use]
    pub fn status(&self) -> String {
        status(&self.controller)
    }

    pub fn set_environment(&self, env_text: &str) -> String {
        self.block_on(set_environment(&self.controller, env_text))
    }

    pub fn replace_environment(&self, env_text: &str) -> String {
        self.block_on(replace_environment(&self.controller, env_text))
    }

    pub fn dispatch(&self, method: &str, args: &Value) -> String {
        self.block_on(dispatch(&self.controller, method, args))
    }

    #[must_use]
    pub fn subscribe(&self) -> tokio::sync::broadcast::Receiver<LifecycleEvent> {
        self.controller.subscribe()
    }

    /// Stop the engine and tear down the runtime. Returns the stop result.
    pub fn shutdown(mut self) -> String {
        self.teardown()
            .unwrap_or_else(|| failure(&ProxyHostError::Internal("bridge already shut down".into())))
    }

    fn block_on<F: std::future::Future<Output = String>>(&self, future: F) -> String {
        match self.runtime {
            Some(ref runtime) => runtime.block_on(future),
            None => failure(&ProxyHostError::Internal("bridge is shut down".into())),
        }
    }

    fn teardown(&mut self) -> Option<String> {
        let runtime = self.runtime.take()?;
        let result = runtime.block_on(stop(&self.controller));
        runtime.shutdown_timeout(Duration::from_secs(1));
        Some(result)
    }
}

impl Drop for Bridge {
    fn drop(&mut self) {
        if let Some(result) = self.teardown() {
            tracing::debug!(result = %result, "bridge dropped");
        }
    }
}
