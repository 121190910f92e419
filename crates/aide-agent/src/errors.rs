use aide_llm::ProviderError;
use aide_store::StoreError;
use thiserror::Error;

/// Top-level error type for the aide-agent crate.
#[derive(Debug, Error)]
pub enum AgentError {
    #[error(transparent)]
    Configuration(#[from] ConfigurationError),
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error(transparent)]
    Provider(#[from] ProviderError),
    #[error("invalid input: {0}")]
    InvalidInput(String),
}

/// Fatal for the task that hit it. Never retried.
#[derive(Clone, Debug, PartialEq, Eq, Error)]
pub enum ConfigurationError {
    #[error("unknown agent: {0}")]
    UnknownAgent(String),
    #[error("no model configured for agent {0}")]
    UnresolvedModel(String),
    #[error("built-in agent {0} cannot be removed or replaced")]
    BuiltinRemoval(String),
    #[error("subagent {0} cannot be granted delegation")]
    DelegationGrant(String),
    #[error("invalid configuration: {0}")]
    Invalid(String),
}

/// Failure of a single tool invocation. Recorded on that call only.
#[derive(Clone, Debug, PartialEq, Eq, Error)]
pub enum ToolError {
    #[error("tool not found: {0}")]
    NotFound(String),
    #[error("invalid tool input: {0}")]
    InvalidInput(String),
    #[error("tool execution failed: {0}")]
    Execution(String),
}
