use super::{SideEffect, ToolRegistry};
use std::collections::BTreeMap;

/// Name of the tool that hands a task to another agent.
pub const DELEGATION_TOOL: &str = "delegate_task";

pub type PermissionMap = BTreeMap<String, bool>;

/// Tools of `full` explicitly granted by `permissions`.
///
/// For subagents every delegation tool is dropped even when granted.
pub fn filter_registry(
    full: &ToolRegistry,
    permissions: &PermissionMap,
    is_subagent: bool,
) -> ToolRegistry {
    ToolRegistry::from_tools(
        full.iter()
            .filter(|tool| permissions.get(tool.name()).copied().unwrap_or(false))
            .filter(|tool| !(is_subagent && is_delegation(tool.name(), tool.side_effect())))
            .cloned(),
    )
}

fn is_delegation(name: &str, side_effect: SideEffect) -> bool {
    side_effect == SideEffect::Delegation || name == DELEGATION_TOOL
}
