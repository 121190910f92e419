//! Runs one delegated task in an isolated child session.

use crate::events::{AgentEvent, EventKind, emit_best_effort};
use crate::generation::{GenerationLoop, GenerationOutput, GenerationParams};
use crate::subagents::{AgentDefinition, ModelRouting};
use crate::tools::{ToolContext, ToolRegistry, filter_registry};
use crate::{AbortSignal, AgentConfig, AgentError, Collaborators, ConfigurationError};
use aide_llm::{Message, MessageMetadata, Timestamp, ToolCallRecord, push_message};
use aide_store::{SessionRecord, SubagentRunRecord};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};
use uuid::Uuid;

#[derive(Clone, Debug, Default)]
pub struct SubagentTask {
    pub subagent_name: String,
    pub task: String,
    pub parent_session_id: String,
    pub user_id: String,
    pub time: Timestamp,
    pub abort: AbortSignal,
}

/// Structured result of a delegation. Failures are reported here, never raised.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubagentOutcome {
    pub subagent_name: String,
    pub elapsed_ms: u64,
    pub result_text: String,
    pub tool_call_count: usize,
    /// Empty when the child session could not be created.
    pub child_session_id: String,
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

pub struct SubagentExecutor {
    collaborators: Collaborators,
    tools: ToolRegistry,
    config: AgentConfig,
    generation: GenerationLoop,
    routing: ModelRouting,
}

impl SubagentExecutor {
    /// `tools` is the full registry subagent permissions are filtered from.
    pub fn new(config: AgentConfig, collaborators: Collaborators, tools: ToolRegistry) -> Self {
        let generation = collaborators.generation_loop(&config);
        let routing = collaborators.model_routing(&config);
        Self {
            collaborators,
            tools,
            config,
            generation,
            routing,
        }
    }

    pub async fn execute(&self, task: SubagentTask) -> SubagentOutcome {
        let clock = self.collaborators.clock.clone();
        let started_at = clock.now_millis();
        info!(
            subagent = %task.subagent_name,
            parent_session_id = %task.parent_session_id,
            "delegating task"
        );
        emit_best_effort(
            self.collaborators.emitter.as_ref(),
            AgentEvent::new(EventKind::SubagentStart, task.parent_session_id.clone(), started_at)
                .with("subagent", task.subagent_name.clone()),
        );

        let outcome = match self.resolve_definition(&task.subagent_name) {
            Err(error) => self.failed(&task, started_at, String::new(), error.into()),
            Ok(definition) => match self.create_child(&task, &definition, started_at).await {
                Err(error) => self.failed(&task, started_at, String::new(), error),
                Ok(child_session_id) => {
                    self.run_child(&task, &definition, child_session_id, started_at)
                        .await
                }
            },
        };

        emit_best_effort(
            self.collaborators.emitter.as_ref(),
            AgentEvent::new(
                EventKind::SubagentEnd,
                task.parent_session_id.clone(),
                clock.now_millis(),
            )
            .with("subagent", outcome.subagent_name.clone())
            .with("child_session_id", outcome.child_session_id.clone())
            .with("success", outcome.success),
        );
        outcome
    }

    fn resolve_definition(&self, name: &str) -> Result<AgentDefinition, ConfigurationError> {
        let definition = self
            .collaborators
            .catalog
            .get(name)
            .ok_or_else(|| ConfigurationError::UnknownAgent(name.to_string()))?;
        if !definition.is_subagent() {
            return Err(ConfigurationError::Invalid(format!(
                "agent {name} is not a subagent"
            )));
        }
        Ok(definition)
    }

    async fn create_child(
        &self,
        task: &SubagentTask,
        definition: &AgentDefinition,
        started_at: Timestamp,
    ) -> Result<String, AgentError> {
        if task.task.trim().is_empty() {
            return Err(AgentError::InvalidInput("task text must not be empty".to_string()));
        }
        let child_session_id = Uuid::new_v4().to_string();
        self.collaborators
            .stores
            .sessions
            .create_session(SessionRecord::child(
                child_session_id.clone(),
                definition.name.clone(),
                task.parent_session_id.clone(),
                started_at,
            ))
            .await?;
        Ok(child_session_id)
    }

    async fn run_child(
        &self,
        task: &SubagentTask,
        definition: &AgentDefinition,
        child_session_id: String,
        started_at: Timestamp,
    ) -> SubagentOutcome {
        let run = SubagentRunRecord::started(
            Uuid::new_v4().to_string(),
            definition.name.clone(),
            child_session_id.clone(),
            task.parent_session_id.clone(),
            task.task.clone(),
            started_at,
        );
        self.put_run(run.clone()).await;

        let generated = self.generate(task, definition, &child_session_id).await;
        let finished_at = self.collaborators.clock.now_millis();
        match generated {
            Ok(output) => {
                self.append_exchange(
                    task,
                    definition,
                    &child_session_id,
                    &output.result.text,
                    output.result.settled_tool_calls(),
                )
                .await;
                let result = output.result;
                let success = result.completed;
                let record = if success {
                    run.complete(result.text.clone(), finished_at)
                } else {
                    run.fail(result.error.clone().unwrap_or_default(), finished_at)
                };
                self.put_run(record).await;
                SubagentOutcome {
                    subagent_name: definition.name.clone(),
                    elapsed_ms: finished_at.saturating_sub(started_at),
                    result_text: result.text,
                    tool_call_count: result.completed_tool_calls.len(),
                    child_session_id,
                    success,
                    error: result.error,
                }
            }
            Err(error) => {
                self.append_exchange(task, definition, &child_session_id, "", Vec::new())
                    .await;
                self.put_run(run.fail(error.to_string(), finished_at)).await;
                self.failed(task, started_at, child_session_id, error)
            }
        }
    }

    async fn generate(
        &self,
        task: &SubagentTask,
        definition: &AgentDefinition,
        child_session_id: &str,
    ) -> Result<GenerationOutput, AgentError> {
        let registry = filter_registry(&self.tools, &definition.permissions, true);
        let model = self.routing.resolve_model(definition).await?;
        let provider_preference = self
            .routing
            .resolve_preference(&model, child_session_id)
            .await;

        let params = GenerationParams {
            model,
            system_prompt: definition.instructions.clone(),
            messages: vec![Message::user(task.task.clone(), task.time)],
            registry,
            temperature: definition.temperature.or(self.config.default_temperature),
            max_retries: self.config.max_retries,
            step_cap: self.config.max_subagent_steps,
            provider_preference,
            context: ToolContext {
                session_id: child_session_id.to_string(),
                message_id: String::new(),
                user_id: task.user_id.clone(),
                time: task.time,
                abort: task.abort.clone(),
            },
        };
        Ok(self
            .routing
            .generate(&self.generation, params, Some(self.config.max_subagent_steps))
            .await)
    }

    /// Task as the user turn, result plus settled tool calls as the assistant
    /// turn. Appended for every child session, including failed runs.
    async fn append_exchange(
        &self,
        task: &SubagentTask,
        definition: &AgentDefinition,
        child_session_id: &str,
        text: &str,
        tool_calls: Vec<ToolCallRecord>,
    ) {
        let conversations = &self.collaborators.stores.conversations;
        let history = match conversations.get_history(child_session_id).await {
            Ok(history) => history,
            Err(error) => {
                warn!(child_session_id, error = %error, "child history unavailable");
                return;
            }
        };
        let metadata = MessageMetadata {
            delegated_to: Some(definition.name.clone()),
            mode: Some(definition.name.clone()),
        };
        let mut messages = history.messages;
        push_message(&mut messages, Message::user(task.task.clone(), task.time));
        push_message(
            &mut messages,
            Message::assistant(text, tool_calls, self.collaborators.clock.now_millis())
            .with_metadata(metadata),
        );
        if let Err(error) = conversations
            .replace_history(child_session_id, messages, history.version)
            .await
        {
            warn!(child_session_id, error = %error, "failed to persist child history");
        }
    }

    async fn put_run(&self, record: SubagentRunRecord) {
        let run_id = record.id.clone();
        if let Err(error) = self.collaborators.stores.runs.put_run(record).await {
            warn!(run_id = %run_id, error = %error, "failed to persist subagent run");
        }
    }

    fn failed(
        &self,
        task: &SubagentTask,
        started_at: Timestamp,
        child_session_id: String,
        error: AgentError,
    ) -> SubagentOutcome {
        warn!(subagent = %task.subagent_name, error = %error, "delegated task failed");
        SubagentOutcome {
            subagent_name: task.subagent_name.clone(),
            elapsed_ms: self
                .collaborators
                .clock
                .now_millis()
                .saturating_sub(started_at),
            result_text: String::new(),
            tool_call_count: 0,
            child_session_id,
            success: false,
            error: Some(error.to_string()),
        }
    }
}
