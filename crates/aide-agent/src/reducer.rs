//! Left fold of a provider event stream into a durable generation result.

use crate::tools::{ToolContext, ToolRegistry};
use crate::{Clock, ToolError};
use aide_llm::{
    PriceTable, ProviderError, StreamEvent, StreamEventStream, ToolCallRecord, ToolCallStatus,
    ToolResult, UsageTotals,
};
use futures::StreamExt;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, warn};

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct CompletedToolCall {
    pub name: String,
    pub input: Value,
    pub id: String,
}

/// Structured output consumed by persistence and conversation continuation.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReductionResult {
    pub text: String,
    pub completed_tool_calls: Vec<CompletedToolCall>,
    pub tool_results: Vec<ToolResult>,
    pub usage: UsageTotals,
    pub cost: f64,
    pub completed: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip)]
    pub provider_error: Option<ProviderError>,
    #[serde(skip)]
    pub tool_calls: Vec<ToolCallRecord>,
}

impl ReductionResult {
    /// Calls that reached a terminal status, for history.
    pub fn settled_tool_calls(&self) -> Vec<ToolCallRecord> {
        self.tool_calls
            .iter()
            .filter(|call| call.status.is_terminal())
            .cloned()
            .collect()
    }

    /// Appends a later run over the same conversation. Outcome and text come
    /// from `next`; calls, results, usage, and cost accumulate.
    pub fn followed_by(mut self, next: ReductionResult) -> ReductionResult {
        self.completed_tool_calls.extend(next.completed_tool_calls);
        self.tool_results.extend(next.tool_results);
        self.tool_calls.extend(next.tool_calls);
        self.usage += next.usage;
        ReductionResult {
            text: if next.text.is_empty() { self.text } else { next.text },
            completed_tool_calls: self.completed_tool_calls,
            tool_results: self.tool_results,
            usage: self.usage,
            cost: self.cost + next.cost,
            completed: next.completed,
            error: next.error,
            provider_error: next.provider_error,
            tool_calls: self.tool_calls,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Flow {
    Continue,
    Finished,
    Failed,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum StepOutcome {
    Finished,
    Failed,
    Cancelled,
}

pub struct StreamReducer {
    registry: ToolRegistry,
    pricing: PriceTable,
    model: String,
    context: ToolContext,
    clock: Arc<dyn Clock>,
    buffer: String,
    text: String,
    step_text: String,
    calls: Vec<ToolCallRecord>,
    index: HashMap<String, usize>,
    results: Vec<ToolResult>,
    usage: UsageTotals,
    cost: f64,
    error: Option<ProviderError>,
    step_call_mark: usize,
    step_result_mark: usize,
}

impl StreamReducer {
    /// `registry` must already be filtered for the running agent.
    pub fn new(
        registry: ToolRegistry,
        pricing: PriceTable,
        model: impl Into<String>,
        context: ToolContext,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            registry,
            pricing,
            model: model.into(),
            context,
            clock,
            buffer: String::new(),
            text: String::new(),
            step_text: String::new(),
            calls: Vec::new(),
            index: HashMap::new(),
            results: Vec::new(),
            usage: UsageTotals::default(),
            cost: 0.0,
            error: None,
            step_call_mark: 0,
            step_result_mark: 0,
        }
    }

    pub fn begin_step(&mut self, message_id: &str) {
        self.context.message_id = message_id.to_string();
        self.buffer.clear();
        self.step_text.clear();
        self.step_call_mark = self.calls.len();
        self.step_result_mark = self.results.len();
    }

    /// Drains one provider stream, stopping early on abort.
    pub async fn consume(&mut self, mut events: StreamEventStream) -> StepOutcome {
        let abort = self.context.abort.clone();
        loop {
            let event = tokio::select! {
                biased;
                _ = abort.cancelled() => {
                    self.fail(ProviderError::cancelled());
                    return StepOutcome::Cancelled;
                }
                event = events.next() => event,
            };
            let Some(event) = event else {
                self.fail(ProviderError::other("stream ended before finish"));
                return StepOutcome::Failed;
            };
            match self.apply(event).await {
                Flow::Continue => {}
                Flow::Finished => return StepOutcome::Finished,
                Flow::Failed => return StepOutcome::Failed,
            }
        }
    }

    pub async fn apply(&mut self, event: StreamEvent) -> Flow {
        match event {
            StreamEvent::Start | StreamEvent::StepStart | StreamEvent::ToolResult { .. } => {}
            StreamEvent::TextStart => self.buffer.clear(),
            StreamEvent::TextDelta { text } => self.buffer.push_str(&text),
            StreamEvent::TextEnd => {
                let text = self.buffer.trim().to_string();
                self.buffer.clear();
                self.step_text = text.clone();
                self.text = text;
            }
            StreamEvent::ToolInputStart { id, name } => {
                if !self.index.contains_key(&id) {
                    self.insert_pending(id, name);
                }
            }
            StreamEvent::ToolInputEnd { id } => {
                if let Some(&slot) = self.index.get(&id) {
                    self.calls[slot].advance(ToolCallStatus::Ready);
                }
            }
            StreamEvent::ToolCall { id, name, input } => self.execute(id, name, input).await,
            StreamEvent::StepFinish { usage } => {
                self.usage += &usage;
                self.cost += self.pricing.cost_for(&self.model, &usage);
            }
            StreamEvent::Finish => return Flow::Finished,
            StreamEvent::Error { error } => {
                self.fail(error);
                return Flow::Failed;
            }
        }
        Flow::Continue
    }

    /// Records a top-level failure. The first failure wins.
    pub fn fail(&mut self, error: ProviderError) {
        if self.error.is_none() {
            warn!(kind = %error.kind, error = %error.message, "generation failed");
            self.error = Some(error);
        }
    }

    pub fn step_text(&self) -> String {
        if self.step_text.is_empty() {
            self.buffer.trim().to_string()
        } else {
            self.step_text.clone()
        }
    }

    pub fn step_tool_calls(&self) -> Vec<ToolCallRecord> {
        self.calls[self.step_call_mark..]
            .iter()
            .filter(|call| call.status.is_terminal())
            .cloned()
            .collect()
    }

    pub fn step_results(&self) -> Vec<ToolResult> {
        self.results[self.step_result_mark..].to_vec()
    }

    pub fn into_result(self) -> ReductionResult {
        let text = if self.text.is_empty() {
            self.buffer.trim().to_string()
        } else {
            self.text
        };
        let completed_tool_calls = self
            .calls
            .iter()
            .filter(|call| call.status.is_terminal())
            .map(|call| CompletedToolCall {
                name: call.name.clone(),
                input: call.input.clone(),
                id: call.id.clone(),
            })
            .collect();
        ReductionResult {
            text,
            completed_tool_calls,
            tool_results: self.results,
            usage: self.usage,
            cost: self.cost,
            completed: self.error.is_none(),
            error: self.error.as_ref().map(|error| error.message.clone()),
            provider_error: self.error,
            tool_calls: self.calls,
        }
    }

    fn insert_pending(&mut self, id: String, name: String) -> usize {
        let slot = self.calls.len();
        self.index.insert(id.clone(), slot);
        self.calls
            .push(ToolCallRecord::pending(id, name, self.clock.now_millis()));
        slot
    }

    async fn execute(&mut self, id: String, name: String, input: Value) {
        let existing = self.index.get(&id).copied();
        let slot = match existing {
            Some(slot) if self.calls[slot].status.is_terminal() => {
                debug!(call_id = %id, tool = %name, "tool call already executed, ignoring");
                return;
            }
            Some(slot) => slot,
            None => self.insert_pending(id.clone(), name.clone()),
        };
        self.calls[slot].name = name.clone();
        self.calls[slot].input = input.clone();

        let Some(tool) = self.registry.get(&name).cloned() else {
            warn!(tool = %name, call_id = %id, "tool not available to this agent");
            self.settle(slot, Err(ToolError::NotFound(name)));
            return;
        };

        self.calls[slot].advance(ToolCallStatus::Running);
        debug!(tool = %name, call_id = %id, "invoking tool");
        let outcome = tool.invoke(input, self.context.clone()).await;
        if let Err(error) = &outcome {
            warn!(tool = %name, call_id = %id, error = %error, "tool call failed");
        }
        self.settle(slot, outcome);
    }

    fn settle(&mut self, slot: usize, outcome: Result<Value, ToolError>) {
        let ended_at = self.clock.now_millis();
        let call = &mut self.calls[slot];
        call.ended_at = Some(ended_at);
        let result = match outcome {
            Ok(value) => {
                call.advance(ToolCallStatus::Completed);
                call.result = Some(value.clone());
                value
            }
            Err(error) => {
                call.advance(ToolCallStatus::Error);
                call.error = Some(error.to_string());
                Value::String(error.to_string())
            }
        };
        self.results.push(ToolResult {
            id: call.id.clone(),
            name: call.name.clone(),
            result,
        });
    }
}
