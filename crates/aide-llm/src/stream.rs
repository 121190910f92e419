//! Incremental generation events.

use crate::errors::ProviderError;
use crate::types::Usage;
use futures::Stream;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::pin::Pin;

/// One increment of a model's generation output, in arrival order.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum StreamEvent {
    Start,
    StepStart,
    TextStart,
    TextDelta { text: String },
    TextEnd,
    ToolInputStart { id: String, name: String },
    ToolInputEnd { id: String },
    ToolCall { id: String, name: String, input: Value },
    ToolResult { id: String },
    StepFinish { usage: Usage },
    Finish,
    Error { error: ProviderError },
}

impl StreamEvent {
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Start => "start",
            Self::StepStart => "step-start",
            Self::TextStart => "text-start",
            Self::TextDelta { .. } => "text-delta",
            Self::TextEnd => "text-end",
            Self::ToolInputStart { .. } => "tool-input-start",
            Self::ToolInputEnd { .. } => "tool-input-end",
            Self::ToolCall { .. } => "tool-call",
            Self::ToolResult { .. } => "tool-result",
            Self::StepFinish { .. } => "step-finish",
            Self::Finish => "finish",
            Self::Error { .. } => "error",
        }
    }

    pub fn text_delta(text: impl Into<String>) -> Self {
        Self::TextDelta { text: text.into() }
    }

    pub fn tool_call(id: impl Into<String>, name: impl Into<String>, input: Value) -> Self {
        Self::ToolCall {
            id: id.into(),
            name: name.into(),
            input,
        }
    }

    pub fn error(error: ProviderError) -> Self {
        Self::Error { error }
    }
}

pub type StreamEventStream = Pin<Box<dyn Stream<Item = StreamEvent> + Send>>;
