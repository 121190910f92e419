use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::ops::AddAssign;
use std::time::{SystemTime, UNIX_EPOCH};
use uuid::Uuid;

/// Milliseconds since the unix epoch.
pub type Timestamp = u64;

pub fn now_millis() -> Timestamp {
    let now = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default();
    now.as_millis() as Timestamp
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    User,
    Assistant,
    Tool,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ToolCallStatus {
    Pending,
    Ready,
    Running,
    Completed,
    Error,
}

impl ToolCallStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Ready => "ready",
            Self::Running => "running",
            Self::Completed => "completed",
            Self::Error => "error",
        }
    }

    fn rank(&self) -> u8 {
        match self {
            Self::Pending => 0,
            Self::Ready => 1,
            Self::Running => 2,
            Self::Completed | Self::Error => 3,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Error)
    }

    /// Transitions only move forward; terminal states are final.
    pub fn can_transition_to(&self, next: &ToolCallStatus) -> bool {
        if self.is_terminal() {
            return false;
        }
        if *next == ToolCallStatus::Error {
            return true;
        }
        next.rank() > self.rank()
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ToolCallRecord {
    pub id: String,
    pub name: String,
    pub input: Value,
    pub status: ToolCallStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub started_at: Option<Timestamp>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ended_at: Option<Timestamp>,
}

impl ToolCallRecord {
    pub fn pending(id: impl Into<String>, name: impl Into<String>, started_at: Timestamp) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            input: Value::Null,
            status: ToolCallStatus::Pending,
            result: None,
            error: None,
            started_at: Some(started_at),
            ended_at: None,
        }
    }

    /// Applies a forward transition. Returns false when the move is not allowed.
    pub fn advance(&mut self, next: ToolCallStatus) -> bool {
        if !self.status.can_transition_to(&next) {
            return false;
        }
        self.status = next;
        true
    }
}

/// Output of one tool call, produced for every call id that reached execution.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ToolResult {
    pub id: String,
    pub name: String,
    pub result: Value,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MessageMetadata {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub delegated_to: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mode: Option<String>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub id: String,
    pub role: Role,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tool_calls: Vec<ToolCallRecord>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tool_results: Vec<ToolResult>,
    pub timestamp: Timestamp,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<MessageMetadata>,
}

impl Message {
    fn with_role(role: Role, timestamp: Timestamp) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            role,
            content: None,
            tool_calls: Vec::new(),
            tool_results: Vec::new(),
            timestamp,
            metadata: None,
        }
    }

    pub fn user(content: impl Into<String>, timestamp: Timestamp) -> Self {
        let mut message = Self::with_role(Role::User, timestamp);
        message.content = Some(content.into());
        message
    }

    pub fn assistant(
        content: impl Into<String>,
        tool_calls: Vec<ToolCallRecord>,
        timestamp: Timestamp,
    ) -> Self {
        let content = content.into();
        let mut message = Self::with_role(Role::Assistant, timestamp);
        message.content = (!content.is_empty()).then_some(content);
        message.tool_calls = tool_calls;
        message
    }

    pub fn tool(tool_results: Vec<ToolResult>, timestamp: Timestamp) -> Self {
        let mut message = Self::with_role(Role::Tool, timestamp);
        message.tool_results = tool_results;
        message
    }

    pub fn with_metadata(mut self, metadata: MessageMetadata) -> Self {
        self.metadata = Some(metadata);
        self
    }

    pub fn text(&self) -> &str {
        self.content.as_deref().unwrap_or_default()
    }
}

/// Appends `message` unless it repeats the previous user message verbatim.
///
/// Returns whether the message was appended.
pub fn push_message(history: &mut Vec<Message>, message: Message) -> bool {
    if message.role == Role::User {
        if let Some(last) = history.last() {
            if last.role == Role::User && last.content == message.content {
                return false;
            }
        }
    }
    history.push(message);
    true
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ToolDefinition {
    pub name: String,
    pub description: String,
    pub parameters: Value,
}

/// Token usage reported by one `step-finish` event. Providers omit fields they
/// do not track.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Usage {
    #[serde(default)]
    pub input_tokens: Option<u64>,
    #[serde(default)]
    pub output_tokens: Option<u64>,
    #[serde(default)]
    pub reasoning_tokens: Option<u64>,
    #[serde(default)]
    pub cache_read_tokens: Option<u64>,
    #[serde(default)]
    pub cache_write_tokens: Option<u64>,
}

/// Running token totals for one generation run.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UsageTotals {
    pub input_tokens: u64,
    pub output_tokens: u64,
    pub reasoning_tokens: u64,
    pub cache_read_tokens: u64,
    pub cache_write_tokens: u64,
}

impl UsageTotals {
    pub fn total_tokens(&self) -> u64 {
        self.input_tokens + self.output_tokens
    }
}

impl AddAssign<&Usage> for UsageTotals {
    fn add_assign(&mut self, usage: &Usage) {
        self.input_tokens += usage.input_tokens.unwrap_or(0);
        self.output_tokens += usage.output_tokens.unwrap_or(0);
        self.reasoning_tokens += usage.reasoning_tokens.unwrap_or(0);
        self.cache_read_tokens += usage.cache_read_tokens.unwrap_or(0);
        self.cache_write_tokens += usage.cache_write_tokens.unwrap_or(0);
    }
}

impl AddAssign for UsageTotals {
    fn add_assign(&mut self, other: UsageTotals) {
        self.input_tokens += other.input_tokens;
        self.output_tokens += other.output_tokens;
        self.reasoning_tokens += other.reasoning_tokens;
        self.cache_read_tokens += other.cache_read_tokens;
        self.cache_write_tokens += other.cache_write_tokens;
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct GenerationRequest {
    pub model: String,
    pub system_prompt: String,
    pub messages: Vec<Message>,
    pub tools: Vec<ToolDefinition>,
    pub temperature: Option<f32>,
    pub max_retries: u32,
    pub step_cap: usize,
    pub provider_preference: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_transitions_only_move_forward() {
        assert!(ToolCallStatus::Pending.can_transition_to(&ToolCallStatus::Ready));
        assert!(ToolCallStatus::Pending.can_transition_to(&ToolCallStatus::Running));
        assert!(ToolCallStatus::Ready.can_transition_to(&ToolCallStatus::Running));
        assert!(ToolCallStatus::Running.can_transition_to(&ToolCallStatus::Completed));
        assert!(ToolCallStatus::Running.can_transition_to(&ToolCallStatus::Error));
        assert!(!ToolCallStatus::Running.can_transition_to(&ToolCallStatus::Pending));
        assert!(!ToolCallStatus::Completed.can_transition_to(&ToolCallStatus::Error));
        assert!(!ToolCallStatus::Error.can_transition_to(&ToolCallStatus::Completed));
    }

    #[test]
    fn duplicate_consecutive_user_message_is_not_appended() {
        let mut history = Vec::new();
        assert!(push_message(&mut history, Message::user("add milk", 1)));
        assert!(!push_message(&mut history, Message::user("add milk", 2)));
        assert!(push_message(
            &mut history,
            Message::assistant("done", Vec::new(), 3)
        ));
        assert!(push_message(&mut history, Message::user("add milk", 4)));
        assert_eq!(history.len(), 3);
    }

    #[test]
    fn usage_totals_treat_missing_fields_as_zero() {
        let mut totals = UsageTotals::default();
        totals += &Usage {
            input_tokens: Some(10),
            output_tokens: None,
            cache_read_tokens: Some(4),
            ..Default::default()
        };
        totals += &Usage {
            input_tokens: Some(5),
            output_tokens: Some(7),
            ..Default::default()
        };
        assert_eq!(totals.input_tokens, 15);
        assert_eq!(totals.output_tokens, 7);
        assert_eq!(totals.cache_read_tokens, 4);
        assert_eq!(totals.cache_write_tokens, 0);
        assert_eq!(totals.total_tokens(), 22);
    }

    #[test]
    fn empty_assistant_text_is_stored_as_none() {
        let message = Message::assistant("", Vec::new(), 1);
        assert_eq!(message.content, None);
        assert_eq!(message.text(), "");
    }
}
