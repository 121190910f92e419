//! Scripted provider for exercising generation loops without a network.

use crate::errors::ProviderError;
use crate::provider::GenerationProvider;
use crate::stream::{StreamEvent, StreamEventStream};
use crate::types::{GenerationRequest, Usage};
use async_trait::async_trait;
use serde_json::Value;
use std::collections::VecDeque;
use std::sync::{Arc, Mutex, PoisonError};

pub type ScriptedStep = Result<Vec<StreamEvent>, ProviderError>;

/// Replays queued steps in order and records every request it receives.
#[derive(Clone, Default)]
pub struct ScriptedProvider {
    steps: Arc<Mutex<VecDeque<ScriptedStep>>>,
    requests: Arc<Mutex<Vec<GenerationRequest>>>,
    endpoints: Arc<Mutex<Option<Result<Vec<String>, ProviderError>>>>,
}

impl ScriptedProvider {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push_step(&self, step: ScriptedStep) -> &Self {
        self.steps
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push_back(step);
        self
    }

    pub fn set_endpoints(&self, endpoints: Result<Vec<String>, ProviderError>) {
        *self
            .endpoints
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = Some(endpoints);
    }

    pub fn requests(&self) -> Vec<GenerationRequest> {
        self.requests
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn remaining_steps(&self) -> usize {
        self.steps
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }
}

#[async_trait]
impl GenerationProvider for ScriptedProvider {
    fn name(&self) -> &str {
        "scripted"
    }

    async fn stream(&self, request: GenerationRequest) -> Result<StreamEventStream, ProviderError> {
        self.requests
            .lock()
            .map_err(|_| ProviderError::other("scripted requests mutex poisoned"))?
            .push(request);
        let step = self
            .steps
            .lock()
            .map_err(|_| ProviderError::other("scripted steps mutex poisoned"))?
            .pop_front()
            .ok_or_else(|| ProviderError::other("no scripted step queued"))?;
        let events = step?;
        Ok(Box::pin(futures::stream::iter(events)))
    }

    async fn endpoints_for_model(&self, _model: &str) -> Result<Option<Vec<String>>, ProviderError> {
        let endpoints = self
            .endpoints
            .lock()
            .map_err(|_| ProviderError::other("scripted endpoints mutex poisoned"))?
            .clone();
        endpoints.transpose()
    }
}

pub fn usage(input: u64, output: u64) -> Usage {
    Usage {
        input_tokens: Some(input),
        output_tokens: Some(output),
        ..Default::default()
    }
}

/// A complete step that only produces text.
pub fn text_step(text: &str, usage: Usage) -> Vec<StreamEvent> {
    vec![
        StreamEvent::Start,
        StreamEvent::StepStart,
        StreamEvent::TextStart,
        StreamEvent::text_delta(text),
        StreamEvent::TextEnd,
        StreamEvent::StepFinish { usage },
        StreamEvent::Finish,
    ]
}

/// A complete step that requests the given `(id, name, input)` tool calls.
pub fn tool_step(calls: Vec<(&str, &str, Value)>, usage: Usage) -> Vec<StreamEvent> {
    let mut events = vec![StreamEvent::Start, StreamEvent::StepStart];
    for (id, name, input) in calls {
        events.push(StreamEvent::ToolInputStart {
            id: id.to_string(),
            name: name.to_string(),
        });
        events.push(StreamEvent::ToolInputEnd { id: id.to_string() });
        events.push(StreamEvent::tool_call(id, name, input));
    }
    events.push(StreamEvent::StepFinish { usage });
    events.push(StreamEvent::Finish);
    events
}
