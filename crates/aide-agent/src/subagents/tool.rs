use super::{SubagentExecutor, SubagentTask};
use crate::ToolError;
use crate::tools::{
    DELEGATION_TOOL, RegisteredTool, SideEffect, ToolSpec, required_string_argument,
};
use serde_json::json;
use std::sync::Arc;

/// Exposes `executor` to a primary agent. A failed delegation is still a
/// successful tool call whose output carries `success: false`.
pub fn delegate_tool(executor: Arc<SubagentExecutor>) -> RegisteredTool {
    RegisteredTool::from_fn(
        ToolSpec {
            name: DELEGATION_TOOL.to_string(),
            description: "Hand a self-contained task to a named subagent and get its result."
                .to_string(),
            parameters: json!({
                "type": "object",
                "required": ["subagent", "task"],
                "properties": {
                    "subagent": { "type": "string" },
                    "task": { "type": "string" }
                },
                "additionalProperties": false
            }),
            side_effect: SideEffect::Delegation,
        },
        move |input, context| {
            let executor = executor.clone();
            async move {
                let task = SubagentTask {
                    subagent_name: required_string_argument(&input, "subagent")?,
                    task: required_string_argument(&input, "task")?,
                    parent_session_id: context.session_id,
                    user_id: context.user_id,
                    time: context.time,
                    abort: context.abort,
                };
                let outcome = executor.execute(task).await;
                serde_json::to_value(outcome).map_err(|err| ToolError::Execution(err.to_string()))
            }
        },
    )
}
