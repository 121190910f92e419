use super::{SideEffect, ToolContext, ToolSpec};
use crate::ToolError;
use aide_llm::ToolDefinition;
use serde_json::Value;
use std::collections::BTreeMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

pub type ToolFuture = Pin<Box<dyn Future<Output = Result<Value, ToolError>> + Send>>;
pub type ToolHandler = Arc<dyn Fn(Value, ToolContext) -> ToolFuture + Send + Sync>;

#[derive(Clone)]
pub struct RegisteredTool {
    pub spec: ToolSpec,
    pub handler: ToolHandler,
}

impl RegisteredTool {
    pub fn new(spec: ToolSpec, handler: ToolHandler) -> Self {
        Self { spec, handler }
    }

    pub fn from_fn<F, Fut>(spec: ToolSpec, f: F) -> Self
    where
        F: Fn(Value, ToolContext) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Value, ToolError>> + Send + 'static,
    {
        let handler: ToolHandler =
            Arc::new(move |input: Value, context: ToolContext| -> ToolFuture {
                Box::pin(f(input, context))
            });
        Self::new(spec, handler)
    }

    pub fn name(&self) -> &str {
        &self.spec.name
    }

    pub fn side_effect(&self) -> SideEffect {
        self.spec.side_effect
    }

    pub fn invoke(&self, input: Value, context: ToolContext) -> ToolFuture {
        (self.handler)(input, context)
    }
}

impl std::fmt::Debug for RegisteredTool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RegisteredTool")
            .field("spec", &self.spec)
            .finish_non_exhaustive()
    }
}

/// Name-keyed tool map. Never mutated in place; derivations return new registries.
#[derive(Clone, Debug, Default)]
pub struct ToolRegistry {
    tools: Arc<BTreeMap<String, RegisteredTool>>,
}

impl ToolRegistry {
    pub fn from_tools(tools: impl IntoIterator<Item = RegisteredTool>) -> Self {
        let tools = tools
            .into_iter()
            .map(|tool| (tool.spec.name.clone(), tool))
            .collect();
        Self {
            tools: Arc::new(tools),
        }
    }

    /// A new registry with `tool` added or replaced.
    pub fn with_tool(&self, tool: RegisteredTool) -> Self {
        let mut tools = (*self.tools).clone();
        tools.insert(tool.spec.name.clone(), tool);
        Self {
            tools: Arc::new(tools),
        }
    }

    pub fn get(&self, name: &str) -> Option<&RegisteredTool> {
        self.tools.get(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.tools.contains_key(name)
    }

    pub fn iter(&self) -> impl Iterator<Item = &RegisteredTool> {
        self.tools.values()
    }

    pub fn names(&self) -> Vec<String> {
        self.tools.keys().cloned().collect()
    }

    pub fn definitions(&self) -> Vec<ToolDefinition> {
        self.tools.values().map(|tool| tool.spec.definition()).collect()
    }

    pub fn len(&self) -> usize {
        self.tools.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn echo(name: &str) -> RegisteredTool {
        RegisteredTool::from_fn(
            ToolSpec {
                name: name.to_string(),
                description: format!("{name} tool"),
                parameters: json!({"type": "object"}),
                side_effect: SideEffect::ReadOnly,
            },
            |input, _context| async move { Ok(input) },
        )
    }

    #[test]
    fn with_tool_leaves_source_registry_untouched() {
        let base = ToolRegistry::from_tools([echo("b"), echo("a")]);
        let extended = base.with_tool(echo("c"));
        assert_eq!(base.names(), vec!["a", "b"]);
        assert_eq!(extended.names(), vec!["a", "b", "c"]);
        assert_eq!(extended.definitions()[2].name, "c");
    }

    #[tokio::test(flavor = "current_thread")]
    async fn invoke_runs_handler_with_input() {
        let registry = ToolRegistry::from_tools([echo("a")]);
        let output = registry
            .get("a")
            .expect("tool registered")
            .invoke(json!({"x": 1}), ToolContext::default())
            .await
            .expect("echo succeeds");
        assert_eq!(output, json!({"x": 1}));
    }
}
