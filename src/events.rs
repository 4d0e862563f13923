//! Push channel of lifecycle events.
//!
//! Every state transition, and every non-fatal warning (drain timeouts,
//! rollbacks), is broadcast as a [`LifecycleEvent`]. Hosts subscribe for a
//! log/event stream; with no subscribers events are simply dropped. A slow
//! subscriber lags rather than blocking the controller.

use std::time::{SystemTime, UNIX_EPOCH};

use serde::Serialize;
use tokio::sync::broadcast;

use crate::state::{EngineState, Operation};

const CHANNEL_CAPACITY: usize = 64;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum EventLevel {
    Info,
    Warn,
    Error,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LifecycleEvent {
    pub operation: Operation,
    pub from: EngineState,
    pub to: EngineState,
    pub level: EventLevel,
    pub message: String,
    pub timestamp_ms: u64,
}

impl LifecycleEvent {
    #[must_use]
    pub fn new(
        operation: Operation,
        from: EngineState,
        to: EngineState,
        level: EventLevel,
        message: impl Into<String>,
    ) -> Self {
        Self {
            operation,
            from,
            to,
            level,
            message: message.into(),
            timestamp_ms: now_ms(),
        }
    }
}

#[allow(clippy::cast_possible_truncation)]
fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map_or(0, |d| d.as_millis() as u64)
}

pub struct EventBus {
    tx: broadcast::Sender<LifecycleEvent>,
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

impl EventBus {
    #[must_use]
    pub fn new() -> Self {
        let (tx, _) = broadcast::channel(CHANNEL_CAPACITY);
        Self { tx }
    }

    pub fn emit(&self, event: LifecycleEvent) {
        let _ = self.tx.send(event);
    }

    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<LifecycleEvent> {
        self.tx.subscribe()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn subscribers_receive_events_in_order() {
        let bus = EventBus::new();
        let mut rx = bus.subscribe();
        bus.emit(LifecycleEvent::new(
            Operation::Start,
            EngineState::Stopped,
            EngineState::Starting,
            EventLevel::Info,
            "binding 1 listener",
        ));
        bus.emit(LifecycleEvent::new(
            Operation::Start,
            EngineState::Starting,
            EngineState::Running,
            EventLevel::Info,
            "running",
        ));
        assert_eq!(rx.recv().await.unwrap().to, EngineState::Starting);
        assert_eq!(rx.recv().await.unwrap().to, EngineState::Running);
    }

    #[test]
    fn emit_without_subscribers_is_silent() {
        EventBus::new().emit(LifecycleEvent::new(
            Operation::Stop,
            EngineState::Stopped,
            EngineState::Stopped,
            EventLevel::Info,
            "already stopped",
        ));
    }

    #[test]
    fn serializes_camel_case() {
        let event = LifecycleEvent::new(
            Operation::SetEnvironment,
            EngineState::Running,
            EngineState::Running,
            EventLevel::Info,
            "staged",
        );
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["operation"], "setEnvironment");
        assert!(json["timestampMs"].as_u64().unwrap() > 0);
    }
}
