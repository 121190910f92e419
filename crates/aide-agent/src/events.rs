use crate::AgentError;
use aide_llm::Timestamp;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};

pub type EventData = HashMap<String, Value>;

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    TurnStart,
    TurnEnd,
    TurnBusy,
    ToolCallEnd,
    GenerationStopped,
    SubagentStart,
    SubagentEnd,
    ProviderPreferenceCleared,
    RoutingFallback,
    Warning,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct AgentEvent {
    pub kind: EventKind,
    pub timestamp: Timestamp,
    pub session_id: String,
    pub data: EventData,
}

impl AgentEvent {
    pub fn new(kind: EventKind, session_id: impl Into<String>, timestamp: Timestamp) -> Self {
        Self {
            kind,
            timestamp,
            session_id: session_id.into(),
            data: EventData::new(),
        }
    }

    pub fn with(mut self, key: &str, value: impl Into<Value>) -> Self {
        self.data.insert(key.to_string(), value.into());
        self
    }
}

pub trait EventEmitter: Send + Sync {
    fn emit(&self, event: AgentEvent) -> Result<(), AgentError>;
}

/// Emits and logs a failed delivery instead of propagating it.
pub(crate) fn emit_best_effort(emitter: &dyn EventEmitter, event: AgentEvent) {
    let kind = event.kind.clone();
    if let Err(error) = emitter.emit(event) {
        tracing::warn!(kind = ?kind, error = %error, "event delivery failed");
    }
}

#[derive(Default)]
pub struct NoopEventEmitter;

impl EventEmitter for NoopEventEmitter {
    fn emit(&self, _event: AgentEvent) -> Result<(), AgentError> {
        Ok(())
    }
}

#[derive(Clone, Default)]
pub struct BufferedEventEmitter {
    inner: Arc<Mutex<Vec<AgentEvent>>>,
}

impl BufferedEventEmitter {
    pub fn snapshot(&self) -> Vec<AgentEvent> {
        let guard = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
        guard.clone()
    }

    pub fn kinds(&self) -> Vec<EventKind> {
        self.snapshot().into_iter().map(|event| event.kind).collect()
    }
}

impl EventEmitter for BufferedEventEmitter {
    fn emit(&self, event: AgentEvent) -> Result<(), AgentError> {
        let mut guard = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
        guard.push(event);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn buffered_event_emitter_stores_emitted_events() {
        let emitter = BufferedEventEmitter::default();
        emitter
            .emit(AgentEvent::new(EventKind::TurnStart, "s1", 1).with("request_id", "r1"))
            .expect("emit should succeed");

        let events = emitter.snapshot();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].kind, EventKind::TurnStart);
        assert_eq!(events[0].data["request_id"], "r1");
    }
}
