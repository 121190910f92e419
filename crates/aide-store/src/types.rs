use aide_llm::{Message, Timestamp};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

pub type SessionId = String;

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionRecord {
    pub id: SessionId,
    pub active_mode: String,
    /// Set only for isolated child sessions created by delegation.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent_session_id: Option<SessionId>,
    pub created_at: Timestamp,
}

impl SessionRecord {
    pub fn root(id: impl Into<String>, active_mode: impl Into<String>, created_at: Timestamp) -> Self {
        Self {
            id: id.into(),
            active_mode: active_mode.into(),
            parent_session_id: None,
            created_at,
        }
    }

    pub fn child(
        id: impl Into<String>,
        active_mode: impl Into<String>,
        parent_session_id: impl Into<String>,
        created_at: Timestamp,
    ) -> Self {
        Self {
            id: id.into(),
            active_mode: active_mode.into(),
            parent_session_id: Some(parent_session_id.into()),
            created_at,
        }
    }

    pub fn is_child(&self) -> bool {
        self.parent_session_id.is_some()
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct LockRecord {
    pub owner_request_id: String,
    pub expires_at: Timestamp,
}

impl LockRecord {
    pub fn is_expired(&self, now: Timestamp) -> bool {
        self.expires_at < now
    }
}

/// Conversation history plus the version it was read at.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct History {
    pub messages: Vec<Message>,
    pub version: u64,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    Running,
    Completed,
    Failed,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubagentRunRecord {
    pub id: String,
    pub subagent_name: String,
    pub child_session_id: SessionId,
    pub parent_session_id: SessionId,
    pub task: String,
    pub status: RunStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub started_at: Timestamp,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<Timestamp>,
}

impl SubagentRunRecord {
    pub fn started(
        id: impl Into<String>,
        subagent_name: impl Into<String>,
        child_session_id: impl Into<String>,
        parent_session_id: impl Into<String>,
        task: impl Into<String>,
        started_at: Timestamp,
    ) -> Self {
        Self {
            id: id.into(),
            subagent_name: subagent_name.into(),
            child_session_id: child_session_id.into(),
            parent_session_id: parent_session_id.into(),
            task: task.into(),
            status: RunStatus::Running,
            result: None,
            error: None,
            started_at,
            completed_at: None,
        }
    }

    pub fn complete(mut self, result: impl Into<String>, completed_at: Timestamp) -> Self {
        self.status = RunStatus::Completed;
        self.result = Some(result.into());
        self.completed_at = Some(completed_at);
        self
    }

    pub fn fail(mut self, error: impl Into<String>, completed_at: Timestamp) -> Self {
        self.status = RunStatus::Failed;
        self.error = Some(error.into());
        self.completed_at = Some(completed_at);
        self
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModelSettings {
    #[serde(default)]
    pub default_model: Option<String>,
    /// Upstream provider slug pinned per model id.
    #[serde(default)]
    pub provider_preferences: BTreeMap<String, String>,
}

impl ModelSettings {
    pub fn provider_preference(&self, model: &str) -> Option<&str> {
        self.provider_preferences.get(model).map(String::as_str)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lock_expires_strictly_after_deadline() {
        let lock = LockRecord {
            owner_request_id: "req-1".to_string(),
            expires_at: 100,
        };
        assert!(!lock.is_expired(99));
        assert!(!lock.is_expired(100));
        assert!(lock.is_expired(101));
    }

    #[test]
    fn run_record_completion_sets_terminal_fields() {
        let run = SubagentRunRecord::started("run-1", "researcher", "child", "parent", "find", 5)
            .complete("found it", 9);
        assert_eq!(run.status, RunStatus::Completed);
        assert_eq!(run.result.as_deref(), Some("found it"));
        assert_eq!(run.completed_at, Some(9));
        assert_eq!(run.error, None);
    }
}
