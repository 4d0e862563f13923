//! Engine state machine vocabulary.
//!
//! [`EngineState`] is the single state value the controller owns;
//! [`Operation`] names the lifecycle calls that move it. The transition
//! rules live here so the controller, status reporter, and tests agree on
//! them.

use serde::Serialize;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum EngineState {
    Stopped,
    Starting,
    Running,
    Reloading,
    Stopping,
    Failed,
}

impl EngineState {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Stopped => "stopped",
            Self::Starting => "starting",
            Self::Running => "running",
            Self::Reloading => "reloading",
            Self::Stopping => "stopping",
            Self::Failed => "failed",
        }
    }

    /// Whether `operation` may begin from this state.
    ///
    /// `Stop` from `Stopped` is accepted as a no-op so repeated stops are
    /// idempotent.
    #[must_use]
    pub const fn accepts(self, operation: Operation) -> bool {
        match operation {
            Operation::Start => matches!(self, Self::Stopped | Self::Failed),
            Operation::Stop => matches!(self, Self::Running | Self::Failed | Self::Stopped),
            Operation::Reload => matches!(self, Self::Running),
            Operation::SetEnvironment | Operation::ReplaceEnvironment => true,
        }
    }
}

impl std::fmt::Display for EngineState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum Operation {
    Start,
    Stop,
    Reload,
    SetEnvironment,
    ReplaceEnvironment,
}

impl Operation {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Start => "start",
            Self::Stop => "stop",
            Self::Reload => "reload",
            Self::SetEnvironment => "setEnvironment",
            Self::ReplaceEnvironment => "replaceEnvironment",
        }
    }
}

impl std::fmt::Display for Operation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn start_only_from_idle_states() {
        assert!(EngineState::Stopped.accepts(Operation::Start));
        assert!(EngineState::Failed.accepts(Operation::Start));
        assert!(!EngineState::Running.accepts(Operation::Start));
        assert!(!EngineState::Reloading.accepts(Operation::Start));
    }

    #[test]
    fn reload_only_from_running() {
        for state in [
            EngineState::Stopped,
            EngineState::Starting,
            EngineState::Reloading,
            EngineState::Stopping,
            EngineState::Failed,
        ] {
            assert!(!state.accepts(Operation::Reload), "{state} accepted reload");
        }
        assert!(EngineState::Running.accepts(Operation::Reload));
    }

    #[test]
    fn stop_is_idempotent_from_stopped() {
        assert!(EngineState::Stopped.accepts(Operation::Stop));
        assert!(!EngineState::Starting.accepts(Operation::Stop));
    }

    #[test]
    fn serializes_lowercase() {
        assert_eq!(
            serde_json::to_string(&EngineState::Reloading).unwrap(),
            "\"reloading\""
        );
        assert_eq!(EngineState::Failed.to_string(), "failed");
    }
}
