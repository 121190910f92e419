//! One inbound user turn: lock, load, generate, persist, release.

use crate::events::{AgentEvent, EventKind, emit_best_effort};
use crate::generation::{GenerationLoop, GenerationParams};
use crate::lock::{LockOutcome, SessionMutex};
use crate::reducer::ReductionResult;
use crate::subagents::{ModelRouting, SubagentExecutor, delegate_tool};
use crate::tools::{ToolContext, ToolRegistry, filter_registry};
use crate::{AbortSignal, AgentConfig, AgentError, Collaborators, ConfigurationError};
use aide_llm::{Message, MessageMetadata, Timestamp, push_message};
use aide_store::{SessionRecord, StoreError};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info};

#[derive(Clone, Debug, Default)]
pub struct TurnRequest {
    pub session_id: String,
    pub request_id: String,
    pub user_id: String,
    pub text: String,
    pub time: Timestamp,
    pub abort: AbortSignal,
}

impl TurnRequest {
    pub fn new(
        session_id: impl Into<String>,
        request_id: impl Into<String>,
        user_id: impl Into<String>,
        text: impl Into<String>,
        time: Timestamp,
    ) -> Self {
        Self {
            session_id: session_id.into(),
            request_id: request_id.into(),
            user_id: user_id.into(),
            text: text.into(),
            time,
            abort: AbortSignal::new(),
        }
    }

    pub fn with_abort(mut self, abort: AbortSignal) -> Self {
        self.abort = abort;
        self
    }
}

#[derive(Clone, Debug, PartialEq)]
pub enum TurnOutcome {
    Completed(ReductionResult),
    /// Another request holds the session.
    Busy {
        owner_request_id: String,
        expires_at: Timestamp,
    },
}

pub struct TurnRunner {
    config: AgentConfig,
    collaborators: Collaborators,
    registry: ToolRegistry,
    executor: Arc<SubagentExecutor>,
    mutex: SessionMutex,
    generation: GenerationLoop,
    routing: ModelRouting,
}

impl TurnRunner {
    /// `tools` are the domain tools; the delegation tool is added here.
    pub fn new(
        config: AgentConfig,
        collaborators: Collaborators,
        tools: ToolRegistry,
    ) -> Result<Self, AgentError> {
        config.validate()?;
        let executor = Arc::new(SubagentExecutor::new(
            config.clone(),
            collaborators.clone(),
            tools.clone(),
        ));
        let registry = tools.with_tool(delegate_tool(executor.clone()));
        let mutex = SessionMutex::new(
            collaborators.stores.locks.clone(),
            collaborators.clock.clone(),
        );
        let generation = collaborators.generation_loop(&config);
        let routing = collaborators.model_routing(&config);
        Ok(Self {
            config,
            collaborators,
            registry,
            executor,
            mutex,
            generation,
            routing,
        })
    }

    pub fn executor(&self) -> &Arc<SubagentExecutor> {
        &self.executor
    }

    pub fn registry(&self) -> &ToolRegistry {
        &self.registry
    }

    pub async fn run_turn(&self, request: TurnRequest) -> Result<TurnOutcome, AgentError> {
        if request.session_id.trim().is_empty() || request.request_id.trim().is_empty() {
            return Err(AgentError::InvalidInput(
                "session_id and request_id are required".to_string(),
            ));
        }
        if request.text.trim().is_empty() {
            return Err(AgentError::InvalidInput(
                "turn text must not be empty".to_string(),
            ));
        }

        let ttl = Duration::from_millis(self.config.lock_ttl_ms);
        if let LockOutcome::Busy {
            owner_request_id,
            expires_at,
        } = self
            .mutex
            .acquire(&request.session_id, &request.request_id, ttl)
            .await?
        {
            info!(
                session_id = %request.session_id,
                request_id = %request.request_id,
                owner = %owner_request_id,
                "session busy"
            );
            emit_best_effort(
                self.collaborators.emitter.as_ref(),
                AgentEvent::new(
                    EventKind::TurnBusy,
                    request.session_id.clone(),
                    self.collaborators.clock.now_millis(),
                )
                .with("request_id", request.request_id.clone())
                .with("owner_request_id", owner_request_id.clone()),
            );
            return Ok(TurnOutcome::Busy {
                owner_request_id,
                expires_at,
            });
        }

        let result = self.run_locked(&request).await;
        self.mutex
            .release(&request.session_id, &request.request_id)
            .await;
        result.map(TurnOutcome::Completed)
    }

    async fn run_locked(&self, request: &TurnRequest) -> Result<ReductionResult, AgentError> {
        let clock = &self.collaborators.clock;
        emit_best_effort(
            self.collaborators.emitter.as_ref(),
            AgentEvent::new(EventKind::TurnStart, request.session_id.clone(), clock.now_millis())
                .with("request_id", request.request_id.clone()),
        );

        self.ensure_session(request).await?;
        let definition = self
            .collaborators
            .catalog
            .get(&self.config.primary_agent)
            .ok_or_else(|| ConfigurationError::UnknownAgent(self.config.primary_agent.clone()))?;
        let conversations = &self.collaborators.stores.conversations;
        let history = conversations.get_history(&request.session_id).await?;
        let model = self.routing.resolve_model(&definition).await?;
        let provider_preference = self
            .routing
            .resolve_preference(&model, &request.session_id)
            .await;

        let mut messages = history.messages.clone();
        let user = Message::user(request.text.clone(), request.time).with_metadata(MessageMetadata {
            delegated_to: None,
            mode: Some(definition.name.clone()),
        });
        if !push_message(&mut messages, user) {
            debug!(session_id = %request.session_id, "duplicate user message not appended");
        }

        let params = GenerationParams {
            model,
            system_prompt: definition.instructions.clone(),
            messages: messages.clone(),
            registry: filter_registry(&self.registry, &definition.permissions, false),
            temperature: definition.temperature.or(self.config.default_temperature),
            max_retries: self.config.max_retries,
            step_cap: self.config.max_generation_steps,
            provider_preference,
            context: ToolContext {
                session_id: request.session_id.clone(),
                message_id: String::new(),
                user_id: request.user_id.clone(),
                time: request.time,
                abort: request.abort.clone(),
            },
        };
        let output = self.routing.generate(&self.generation, params, None).await;

        messages.extend(output.transcript);
        conversations
            .replace_history(&request.session_id, messages, history.version)
            .await?;

        info!(
            session_id = %request.session_id,
            request_id = %request.request_id,
            steps = output.steps,
            completed = output.result.completed,
            "turn finished"
        );
        emit_best_effort(
            self.collaborators.emitter.as_ref(),
            AgentEvent::new(EventKind::TurnEnd, request.session_id.clone(), clock.now_millis())
                .with("request_id", request.request_id.clone())
                .with("completed", output.result.completed)
                .with("steps", output.steps),
        );
        Ok(output.result)
    }

    async fn ensure_session(&self, request: &TurnRequest) -> Result<(), AgentError> {
        let sessions = &self.collaborators.stores.sessions;
        if sessions.get_session(&request.session_id).await?.is_some() {
            return Ok(());
        }
        let record = SessionRecord::root(
            request.session_id.clone(),
            self.config.primary_agent.clone(),
            request.time,
        );
        match sessions.create_session(record).await {
            Ok(()) | Err(StoreError::Conflict(_)) => Ok(()),
            Err(error) => Err(error.into()),
        }
    }
}
