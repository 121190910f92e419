//! OpenAI-compatible chat-completions adapter with provider routing.
//!
//! Each `stream` call is one generation step. Provider preferences are sent as
//! an OpenRouter-style `provider` block with fallbacks disabled, so a pinned
//! slug without a serving endpoint fails loudly as `RoutingUnavailable`.

use crate::errors::{ProviderError, ProviderErrorKind};
use crate::provider::GenerationProvider;
use crate::stream::{StreamEvent, StreamEventStream};
use crate::types::{GenerationRequest, Message, Role, Usage};
use crate::utils::SseParser;
use async_trait::async_trait;
use futures::StreamExt;
use futures::channel::mpsc;
use serde_json::{Value, json};
use std::collections::HashMap;
use std::time::Duration;

#[derive(Clone, Debug, PartialEq)]
pub struct OpenAiCompatibleConfig {
    pub name: String,
    pub base_url: String,
    pub api_key: String,
    pub request_timeout: Duration,
}

impl OpenAiCompatibleConfig {
    pub fn openrouter(api_key: impl Into<String>) -> Self {
        Self {
            name: "openrouter".to_string(),
            base_url: "https://openrouter.ai/api/v1".to_string(),
            api_key: api_key.into(),
            request_timeout: Duration::from_secs(120),
        }
    }
}

#[derive(Clone, Debug)]
pub struct OpenAiCompatibleProvider {
    config: OpenAiCompatibleConfig,
    http: reqwest::Client,
}

impl OpenAiCompatibleProvider {
    pub fn new(config: OpenAiCompatibleConfig) -> Result<Self, ProviderError> {
        let http = reqwest::Client::builder()
            .timeout(config.request_timeout)
            .build()?;
        Ok(Self { config, http })
    }

    fn url(&self, path: &str) -> String {
        format!("{}/{}", self.config.base_url.trim_end_matches('/'), path)
    }

    async fn send_once(&self, body: &Value) -> Result<reqwest::Response, ProviderError> {
        let response = self
            .http
            .post(self.url("chat/completions"))
            .bearer_auth(&self.config.api_key)
            .json(body)
            .send()
            .await?;
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        let text = response.text().await.unwrap_or_default();
        Err(ProviderError::from_status(status.as_u16(), &text))
    }
}

fn retry_delay(attempt: u32) -> Duration {
    Duration::from_millis(250u64.saturating_mul(1 << attempt.min(5)))
}

#[async_trait]
impl GenerationProvider for OpenAiCompatibleProvider {
    fn name(&self) -> &str {
        &self.config.name
    }

    async fn stream(&self, request: GenerationRequest) -> Result<StreamEventStream, ProviderError> {
        let body = request_body(&request);
        tracing::debug!(
            provider = %self.config.name,
            model = %request.model,
            routing = request.provider_preference.as_deref().unwrap_or("auto"),
            "starting generation step"
        );
        let mut attempt = 0u32;
        let response = loop {
            match self.send_once(&body).await {
                Ok(response) => break response,
                Err(error) if error.is_transient() && attempt < request.max_retries => {
                    attempt += 1;
                    tracing::warn!(
                        model = %request.model,
                        kind = %error.kind,
                        attempt,
                        "transient generation failure, retrying"
                    );
                    tokio::time::sleep(retry_delay(attempt)).await;
                }
                Err(error) => {
                    tracing::warn!(model = %request.model, kind = %error.kind, "generation request rejected");
                    return Err(error);
                }
            }
        };

        let (sender, receiver) = mpsc::unbounded();
        let mut bytes = Box::pin(response.bytes_stream());
        tokio::spawn(async move {
            let mut parser = SseParser::new();
            let mut translator = ChunkTranslator::default();
            for event in translator.begin() {
                if sender.unbounded_send(event).is_err() {
                    return;
                }
            }
            let mut failed = false;
            'read: while let Some(chunk) = bytes.next().await {
                let chunk = match chunk {
                    Ok(chunk) => chunk,
                    Err(error) => {
                        let _ = sender.unbounded_send(StreamEvent::error(error.into()));
                        failed = true;
                        break;
                    }
                };
                for frame in parser.push_bytes(&chunk) {
                    if frame.is_done() {
                        break 'read;
                    }
                    let events = translator.translate(&frame.data);
                    let errored = events
                        .iter()
                        .any(|event| matches!(event, StreamEvent::Error { .. }));
                    for event in events {
                        if sender.unbounded_send(event).is_err() {
                            return;
                        }
                    }
                    if errored {
                        failed = true;
                        break 'read;
                    }
                }
            }
            if !failed {
                for event in translator.end() {
                    if sender.unbounded_send(event).is_err() {
                        return;
                    }
                }
            }
        });

        Ok(Box::pin(receiver))
    }

    async fn endpoints_for_model(&self, model: &str) -> Result<Option<Vec<String>>, ProviderError> {
        let response = self
            .http
            .get(self.url(&format!("models/{model}/endpoints")))
            .bearer_auth(&self.config.api_key)
            .send()
            .await?;
        if response.status() == reqwest::StatusCode::NOT_FOUND {
            return Ok(None);
        }
        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            return Err(ProviderError::from_status(status.as_u16(), &text));
        }
        let payload: Value = response.json().await?;
        Ok(Some(endpoint_slugs(&payload)))
    }
}

pub(crate) fn request_body(request: &GenerationRequest) -> Value {
    let mut messages = vec![json!({ "role": "system", "content": request.system_prompt })];
    for message in &request.messages {
        messages.extend(wire_messages(message));
    }

    let mut body = json!({
        "model": request.model,
        "messages": messages,
        "stream": true,
        "stream_options": { "include_usage": true },
    });
    if !request.tools.is_empty() {
        body["tools"] = Value::Array(
            request
                .tools
                .iter()
                .map(|tool| {
                    json!({
                        "type": "function",
                        "function": {
                            "name": tool.name,
                            "description": tool.description,
                            "parameters": tool.parameters,
                        }
                    })
                })
                .collect(),
        );
    }
    if let Some(temperature) = request.temperature {
        body["temperature"] = json!(temperature);
    }
    if let Some(slug) = &request.provider_preference {
        body["provider"] = json!({ "order": [slug], "allow_fallbacks": false });
    }
    body
}

fn wire_messages(message: &Message) -> Vec<Value> {
    match message.role {
        Role::User => vec![json!({ "role": "user", "content": message.text() })],
        Role::Assistant => {
            let mut wire = json!({ "role": "assistant", "content": message.text() });
            if !message.tool_calls.is_empty() {
                wire["tool_calls"] = Value::Array(
                    message
                        .tool_calls
                        .iter()
                        .map(|call| {
                            json!({
                                "id": call.id,
                                "type": "function",
                                "function": {
                                    "name": call.name,
                                    "arguments": call.input.to_string(),
                                }
                            })
                        })
                        .collect(),
                );
            }
            vec![wire]
        }
        Role::Tool => message
            .tool_results
            .iter()
            .map(|result| {
                let content = match &result.result {
                    Value::String(text) => text.clone(),
                    other => other.to_string(),
                };
                json!({ "role": "tool", "tool_call_id": result.id, "content": content })
            })
            .collect(),
    }
}

fn endpoint_slugs(payload: &Value) -> Vec<String> {
    let Some(endpoints) = payload
        .pointer("/data/endpoints")
        .and_then(Value::as_array)
    else {
        return Vec::new();
    };
    let mut slugs: Vec<String> = endpoints
        .iter()
        .filter_map(|endpoint| {
            endpoint
                .get("tag")
                .and_then(Value::as_str)
                .map(|tag| tag.split('/').next().unwrap_or(tag).to_string())
                .or_else(|| {
                    endpoint
                        .get("provider_name")
                        .and_then(Value::as_str)
                        .map(str::to_string)
                })
        })
        .map(|slug| slug.to_ascii_lowercase())
        .collect();
    slugs.sort();
    slugs.dedup();
    slugs
}

#[derive(Debug, Default)]
struct PartialToolCall {
    id: String,
    name: String,
    arguments: String,
}

/// Maps chat-completion chunks onto the abstract event sequence.
#[derive(Debug, Default)]
pub(crate) struct ChunkTranslator {
    text_open: bool,
    tool_calls: Vec<PartialToolCall>,
    /// Provider `index` to position in `tool_calls`, in arrival order.
    tool_slots: HashMap<u64, usize>,
    usage: Usage,
}

impl ChunkTranslator {
    pub(crate) fn begin(&mut self) -> Vec<StreamEvent> {
        vec![StreamEvent::Start, StreamEvent::StepStart]
    }

    pub(crate) fn translate(&mut self, data: &str) -> Vec<StreamEvent> {
        let chunk: Value = match serde_json::from_str(data) {
            Ok(chunk) => chunk,
            Err(error) => {
                return vec![StreamEvent::error(ProviderError::new(
                    ProviderErrorKind::Other,
                    format!("malformed stream chunk: {error}"),
                ))];
            }
        };

        if let Some(error) = chunk.get("error") {
            let message = error
                .get("message")
                .and_then(Value::as_str)
                .map(str::to_string)
                .unwrap_or_else(|| error.to_string());
            return vec![StreamEvent::error(ProviderError::from_message(message))];
        }

        let mut events = Vec::new();
        if let Some(delta) = chunk.pointer("/choices/0/delta") {
            if let Some(text) = delta.get("content").and_then(Value::as_str) {
                if !text.is_empty() {
                    if !self.text_open {
                        self.text_open = true;
                        events.push(StreamEvent::TextStart);
                    }
                    events.push(StreamEvent::text_delta(text));
                }
            }
            if let Some(calls) = delta.get("tool_calls").and_then(Value::as_array) {
                for call in calls {
                    events.extend(self.apply_tool_delta(call));
                }
            }
        }

        if let Some(usage) = chunk.get("usage").filter(|usage| !usage.is_null()) {
            self.usage = Usage {
                input_tokens: usage.get("prompt_tokens").and_then(Value::as_u64),
                output_tokens: usage.get("completion_tokens").and_then(Value::as_u64),
                reasoning_tokens: usage
                    .pointer("/completion_tokens_details/reasoning_tokens")
                    .and_then(Value::as_u64),
                cache_read_tokens: usage
                    .pointer("/prompt_tokens_details/cached_tokens")
                    .and_then(Value::as_u64),
                cache_write_tokens: usage
                    .pointer("/prompt_tokens_details/cache_write_tokens")
                    .and_then(Value::as_u64),
            };
        }
        events
    }

    fn apply_tool_delta(&mut self, call: &Value) -> Vec<StreamEvent> {
        let index = call
            .get("index")
            .and_then(Value::as_u64)
            .unwrap_or(self.tool_calls.len() as u64);
        let slot = match self.tool_slots.get(&index) {
            Some(&slot) => slot,
            None => {
                let slot = self.tool_calls.len();
                self.tool_calls.push(PartialToolCall::default());
                self.tool_slots.insert(index, slot);
                slot
            }
        };
        let mut events = Vec::new();
        let partial = &mut self.tool_calls[slot];
        let is_new = partial.id.is_empty();
        if let Some(id) = call.get("id").and_then(Value::as_str) {
            partial.id = id.to_string();
        }
        if let Some(name) = call.pointer("/function/name").and_then(Value::as_str) {
            partial.name.push_str(name);
        }
        if let Some(arguments) = call.pointer("/function/arguments").and_then(Value::as_str) {
            partial.arguments.push_str(arguments);
        }
        if is_new && !partial.id.is_empty() {
            events.push(StreamEvent::ToolInputStart {
                id: partial.id.clone(),
                name: partial.name.clone(),
            });
        }
        events
    }

    pub(crate) fn end(&mut self) -> Vec<StreamEvent> {
        let mut events = Vec::new();
        if self.text_open {
            self.text_open = false;
            events.push(StreamEvent::TextEnd);
        }
        self.tool_slots.clear();
        for call in self.tool_calls.drain(..).filter(|call| !call.id.is_empty()) {
            let input = if call.arguments.trim().is_empty() {
                json!({})
            } else {
                serde_json::from_str(&call.arguments).unwrap_or(Value::String(call.arguments))
            };
            events.push(StreamEvent::ToolInputEnd {
                id: call.id.clone(),
            });
            events.push(StreamEvent::ToolCall {
                id: call.id,
                name: call.name,
                input,
            });
        }
        events.push(StreamEvent::StepFinish {
            usage: std::mem::take(&mut self.usage),
        });
        events.push(StreamEvent::Finish);
        events
    }
}
