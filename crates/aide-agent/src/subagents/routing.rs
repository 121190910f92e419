//! Model resolution, provider-preference validation, and the routing fallback.

use crate::events::{AgentEvent, EventEmitter, EventKind, emit_best_effort};
use crate::generation::{GenerationLoop, GenerationOutput, GenerationParams};
use crate::guard::IterationGuard;
use crate::subagents::AgentDefinition;
use crate::{AgentConfig, Clock, ConfigurationError};
use aide_llm::{GenerationProvider, ProviderError};
use aide_store::SettingsStore;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Routing for one generation task. `Locked` may fall back to `Automatic`
/// exactly once; `Automatic` is terminal.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum RoutingAttempt {
    Locked(String),
    Automatic,
}

impl RoutingAttempt {
    pub fn from_preference(preference: Option<String>) -> Self {
        match preference {
            Some(slug) => Self::Locked(slug),
            None => Self::Automatic,
        }
    }

    pub fn provider_preference(&self) -> Option<String> {
        match self {
            Self::Locked(slug) => Some(slug.clone()),
            Self::Automatic => None,
        }
    }

    /// The attempt to make after a run that ended with `failure`, if any.
    pub fn next(&self, failure: Option<&ProviderError>) -> Option<Self> {
        match (self, failure) {
            (Self::Locked(_), Some(error)) if error.is_routing_unavailable() => {
                Some(Self::Automatic)
            }
            _ => None,
        }
    }
}

#[derive(Clone)]
pub struct ModelRouting {
    settings: Arc<dyn SettingsStore>,
    provider: Arc<dyn GenerationProvider>,
    emitter: Arc<dyn EventEmitter>,
    clock: Arc<dyn Clock>,
    config: AgentConfig,
}

impl ModelRouting {
    pub fn new(
        settings: Arc<dyn SettingsStore>,
        provider: Arc<dyn GenerationProvider>,
        emitter: Arc<dyn EventEmitter>,
        clock: Arc<dyn Clock>,
        config: AgentConfig,
    ) -> Self {
        Self {
            settings,
            provider,
            emitter,
            clock,
            config,
        }
    }

    /// Pinned model first, then the stored default, then the configured
    /// default. Never guesses.
    pub async fn resolve_model(
        &self,
        definition: &AgentDefinition,
    ) -> Result<String, ConfigurationError> {
        if let Some(model) = definition.model.as_deref().filter(|m| !m.trim().is_empty()) {
            return Ok(model.to_string());
        }
        let stored = match self.settings.model_settings().await {
            Ok(settings) => settings.default_model,
            Err(error) => {
                warn!(agent = %definition.name, error = %error, "model settings unavailable");
                None
            }
        };
        stored
            .or_else(|| self.config.default_model.clone())
            .filter(|model| !model.trim().is_empty())
            .ok_or_else(|| ConfigurationError::UnresolvedModel(definition.name.clone()))
    }

    /// The stored provider preference for `model` if it is still usable.
    /// Unusable preferences are cleared and `None` is returned.
    pub async fn resolve_preference(&self, model: &str, session_id: &str) -> Option<String> {
        let settings = match self.settings.model_settings().await {
            Ok(settings) => settings,
            Err(error) => {
                warn!(model, error = %error, "provider preference unavailable, using automatic routing");
                return None;
            }
        };
        let slug = settings.provider_preference(model)?.to_string();

        if self.config.is_invalid_provider_slug(&slug) {
            self.clear_preference(model, &slug, session_id, "blocklisted")
                .await;
            return None;
        }
        match self.provider.endpoints_for_model(model).await {
            Ok(Some(endpoints)) if !endpoints.iter().any(|e| e.eq_ignore_ascii_case(&slug)) => {
                self.clear_preference(model, &slug, session_id, "not serving model")
                    .await;
                None
            }
            Ok(_) => Some(slug),
            Err(error) => {
                debug!(model, error = %error, "endpoint list unavailable, keeping preference");
                Some(slug)
            }
        }
    }

    /// Best effort: a failed write is logged and ignored.
    pub async fn clear_preference(&self, model: &str, slug: &str, session_id: &str, reason: &str) {
        info!(model, provider = slug, reason, "clearing provider preference");
        if let Err(error) = self.settings.set_provider_preference(model, None).await {
            warn!(model, provider = slug, error = %error, "failed to persist cleared provider preference");
        }
        emit_best_effort(
            self.emitter.as_ref(),
            AgentEvent::new(
                EventKind::ProviderPreferenceCleared,
                session_id,
                self.clock.now_millis(),
            )
                .with("model", model)
                .with("provider", slug)
                .with("reason", reason),
        );
    }

    /// Runs `params` under the routing state machine. A fresh guard with
    /// `guard_steps` is built for each attempt when set.
    ///
    /// When the pinned attempt already settled tool calls, the automatic
    /// attempt resumes from its transcript with the remaining step budget, so
    /// no call runs twice and the merged output keeps every result.
    pub async fn generate(
        &self,
        generation: &GenerationLoop,
        params: GenerationParams,
        guard_steps: Option<usize>,
    ) -> GenerationOutput {
        let mut attempt = RoutingAttempt::from_preference(params.provider_preference.clone());
        let mut params = params;
        let mut guard_steps = guard_steps;
        let mut earlier: Option<GenerationOutput> = None;
        loop {
            let mut guard = guard_steps.map(IterationGuard::new);
            let attempt_params = GenerationParams {
                provider_preference: attempt.provider_preference(),
                ..params.clone()
            };
            let output = generation.run(attempt_params, guard.as_mut()).await;
            let next = attempt.next(output.result.provider_error.as_ref());
            let mut output = match earlier.take() {
                Some(prior) => prior.followed_by(output),
                None => output,
            };
            let Some(next) = next else {
                return output;
            };
            if let RoutingAttempt::Locked(slug) = &attempt {
                warn!(
                    model = %params.model,
                    provider = %slug,
                    settled_tool_calls = output.result.tool_calls.len(),
                    "pinned provider unavailable, retrying with automatic routing"
                );
                self.clear_preference(&params.model, slug, &params.context.session_id, "routing unavailable")
                    .await;
                emit_best_effort(
                    self.emitter.as_ref(),
                    AgentEvent::new(
                        EventKind::RoutingFallback,
                        params.context.session_id.clone(),
                        self.clock.now_millis(),
                    )
                    .with("model", params.model.clone())
                    .with("provider", slug.clone()),
                );
            }
            if !output.result.tool_calls.is_empty() {
                output.drop_unfinished_reply();
                params.messages.extend(output.transcript.iter().cloned());
                params.step_cap = params.step_cap.saturating_sub(output.steps);
                guard_steps = guard_steps.map(|steps| steps.saturating_sub(output.steps));
                earlier = Some(output);
            }
            attempt = next;
        }
    }
}
