//! Multi-step generation: one provider call per step, tools executed between steps.

use crate::events::{AgentEvent, EventEmitter, EventKind, emit_best_effort};
use crate::Clock;
use crate::guard::{IterationGuard, StopReason};
use crate::reducer::{ReductionResult, StepOutcome, StreamReducer};
use crate::tools::{ToolContext, ToolRegistry};
use aide_llm::{
    GenerationProvider, GenerationRequest, Message, PriceTable, ProviderError, Role,
    ToolCallRecord,
};
use std::sync::Arc;
use tracing::{debug, info};
use uuid::Uuid;

#[derive(Clone, Debug)]
pub struct GenerationParams {
    pub model: String,
    pub system_prompt: String,
    pub messages: Vec<Message>,
    /// Already filtered for the running agent.
    pub registry: ToolRegistry,
    pub temperature: Option<f32>,
    pub max_retries: u32,
    pub step_cap: usize,
    pub provider_preference: Option<String>,
    pub context: ToolContext,
}

#[derive(Clone, Debug)]
pub struct GenerationOutput {
    pub result: ReductionResult,
    /// Messages produced by this run, in order, ready to append to history.
    pub transcript: Vec<Message>,
    pub steps: usize,
    pub stop_reason: Option<StopReason>,
}

impl GenerationOutput {
    /// Joins a run that resumed from this run's transcript.
    pub fn followed_by(mut self, next: GenerationOutput) -> GenerationOutput {
        self.transcript.extend(next.transcript);
        GenerationOutput {
            result: self.result.followed_by(next.result),
            transcript: self.transcript,
            steps: self.steps + next.steps,
            stop_reason: next.stop_reason,
        }
    }

    /// Removes a trailing text-only assistant message left by a failed step.
    pub(crate) fn drop_unfinished_reply(&mut self) {
        let unfinished = self
            .transcript
            .last()
            .is_some_and(|message| message.role == Role::Assistant && message.tool_calls.is_empty());
        if unfinished {
            self.transcript.pop();
        }
    }
}

#[derive(Clone)]
pub struct GenerationLoop {
    provider: Arc<dyn GenerationProvider>,
    pricing: PriceTable,
    emitter: Arc<dyn EventEmitter>,
    clock: Arc<dyn Clock>,
}

impl GenerationLoop {
    pub fn new(
        provider: Arc<dyn GenerationProvider>,
        pricing: PriceTable,
        emitter: Arc<dyn EventEmitter>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            provider,
            pricing,
            emitter,
            clock,
        }
    }

    pub fn provider(&self) -> &Arc<dyn GenerationProvider> {
        &self.provider
    }

    /// Runs until a step ends without tool calls, a limit or guard stops the
    /// run, the provider fails, or the abort signal fires. Never fails itself;
    /// failures are carried in the result.
    pub async fn run(
        &self,
        params: GenerationParams,
        mut guard: Option<&mut IterationGuard>,
    ) -> GenerationOutput {
        let session_id = params.context.session_id.clone();
        let abort = params.context.abort.clone();
        let tools = params.registry.definitions();
        let mut reducer = StreamReducer::new(
            params.registry.clone(),
            self.pricing.clone(),
            params.model.clone(),
            params.context.clone(),
            self.clock.clone(),
        );
        let mut transcript: Vec<Message> = Vec::new();
        let mut steps = 0usize;
        let mut stop_reason = None;

        loop {
            if abort.is_aborted() {
                reducer.fail(ProviderError::cancelled());
                break;
            }
            if let Some(guard) = guard.as_deref_mut() {
                if guard.should_stop(steps) {
                    stop_reason = guard.stop_reason().cloned();
                    break;
                }
            }
            if steps >= params.step_cap {
                stop_reason = Some(StopReason::StepLimit {
                    max_steps: params.step_cap,
                });
                break;
            }

            let message_id = Uuid::new_v4().to_string();
            reducer.begin_step(&message_id);
            let mut messages = params.messages.clone();
            messages.extend(transcript.iter().cloned());
            let request = GenerationRequest {
                model: params.model.clone(),
                system_prompt: params.system_prompt.clone(),
                messages,
                tools: tools.clone(),
                temperature: params.temperature,
                max_retries: params.max_retries,
                step_cap: params.step_cap,
                provider_preference: params.provider_preference.clone(),
            };
            steps += 1;
            debug!(session_id = %session_id, step = steps, model = %params.model, "generation step");

            let outcome = match self.provider.stream(request).await {
                Ok(events) => reducer.consume(events).await,
                Err(error) => {
                    reducer.fail(error);
                    StepOutcome::Failed
                }
            };

            let text = reducer.step_text();
            let calls = reducer.step_tool_calls();
            let now = self.clock.now_millis();
            if !calls.is_empty() {
                let mut assistant = Message::assistant(text.clone(), calls.clone(), now);
                assistant.id = message_id;
                transcript.push(assistant);
                transcript.push(Message::tool(reducer.step_results(), now));
                for call in &calls {
                    emit_best_effort(
                        self.emitter.as_ref(),
                        AgentEvent::new(EventKind::ToolCallEnd, session_id.clone(), now)
                            .with("call_id", call.id.clone())
                            .with("tool", call.name.clone())
                            .with("status", call.status.as_str()),
                    );
                }
            } else if !text.is_empty() {
                let mut assistant = Message::assistant(text.clone(), Vec::new(), now);
                assistant.id = message_id;
                transcript.push(assistant);
            }

            if outcome != StepOutcome::Finished || calls.is_empty() {
                break;
            }
            if let Some(guard) = guard.as_deref_mut() {
                // Fingerprint first: an exact replay is a loop, not just a repeated name.
                guard.track_conversation_state(&step_fingerprint(&text, &calls));
                for call in &calls {
                    guard.record_tool_call(&call.name);
                }
            }
        }

        if let Some(reason) = &stop_reason {
            info!(session_id = %session_id, reason = reason.as_str(), steps, "generation stopped early");
            emit_best_effort(
                self.emitter.as_ref(),
                AgentEvent::new(
                    EventKind::GenerationStopped,
                    session_id.clone(),
                    self.clock.now_millis(),
                )
                    .with("reason", reason.as_str())
                    .with("steps", steps),
            );
        }

        GenerationOutput {
            result: reducer.into_result(),
            transcript,
            steps,
            stop_reason,
        }
    }
}

fn step_fingerprint(text: &str, calls: &[ToolCallRecord]) -> String {
    let mut content = text.to_string();
    for call in calls {
        content.push('\n');
        content.push_str(&call.name);
        content.push(' ');
        content.push_str(&call.input.to_string());
    }
    content
}
