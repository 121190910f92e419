//! Tools as a spec plus an invocation function, held in immutable registries.

mod filter;
mod registry;

pub use filter::{DELEGATION_TOOL, PermissionMap, filter_registry};
pub use registry::{RegisteredTool, ToolFuture, ToolHandler, ToolRegistry};

use crate::{AbortSignal, ToolError};
use aide_llm::{Timestamp, ToolDefinition};
use serde::{Deserialize, Serialize};
use serde_json::Value;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SideEffect {
    ReadOnly,
    Mutating,
    /// Invokes another agent.
    Delegation,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ToolSpec {
    pub name: String,
    pub description: String,
    pub parameters: Value,
    pub side_effect: SideEffect,
}

impl ToolSpec {
    pub fn definition(&self) -> ToolDefinition {
        ToolDefinition {
            name: self.name.clone(),
            description: self.description.clone(),
            parameters: self.parameters.clone(),
        }
    }
}

/// Ambient values handed to every tool invocation.
#[derive(Clone, Debug, Default)]
pub struct ToolContext {
    pub session_id: String,
    pub message_id: String,
    pub user_id: String,
    pub time: Timestamp,
    pub abort: AbortSignal,
}

pub(crate) fn required_string_argument(arguments: &Value, key: &str) -> Result<String, ToolError> {
    let Some(value) = arguments.get(key) else {
        return Err(ToolError::InvalidInput(format!(
            "missing required argument '{key}'"
        )));
    };
    match value.as_str() {
        Some(value) if !value.trim().is_empty() => Ok(value.to_string()),
        Some(_) => Err(ToolError::InvalidInput(format!(
            "argument '{key}' must not be empty"
        ))),
        None => Err(ToolError::InvalidInput(format!(
            "argument '{key}' must be a string"
        ))),
    }
}
