//! Versioned table of agent definitions, injected at construction.

use crate::ConfigurationError;
use crate::tools::{DELEGATION_TOOL, PermissionMap};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::{PoisonError, RwLock};

pub const LIST_TASKS_TOOL: &str = "list_tasks";
pub const CREATE_TASK_TOOL: &str = "create_task";
pub const UPDATE_TASK_TOOL: &str = "update_task";
pub const DELETE_TASK_TOOL: &str = "delete_task";
pub const LIST_EVENTS_TOOL: &str = "list_events";
pub const CREATE_EVENT_TOOL: &str = "create_event";
pub const UPDATE_EVENT_TOOL: &str = "update_event";
pub const DELETE_EVENT_TOOL: &str = "delete_event";

pub const ASSISTANT_AGENT: &str = "assistant";
pub const RESEARCHER_AGENT: &str = "researcher";
pub const SCHEDULER_AGENT: &str = "scheduler";

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AgentKind {
    Primary,
    Subagent,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct AgentDefinition {
    pub name: String,
    pub description: String,
    pub kind: AgentKind,
    #[serde(default)]
    pub permissions: PermissionMap,
    #[serde(default)]
    pub temperature: Option<f32>,
    /// Pinned model. Falls back to the configured default when unset.
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub instructions: String,
    #[serde(default)]
    pub builtin: bool,
}

impl AgentDefinition {
    pub fn subagent(
        name: impl Into<String>,
        description: impl Into<String>,
        granted: &[&str],
    ) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            kind: AgentKind::Subagent,
            permissions: grant(granted),
            temperature: None,
            model: None,
            instructions: String::new(),
            builtin: false,
        }
    }

    pub fn with_instructions(mut self, instructions: impl Into<String>) -> Self {
        self.instructions = instructions.into();
        self
    }

    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = Some(model.into());
        self
    }

    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = Some(temperature);
        self
    }

    pub fn is_subagent(&self) -> bool {
        self.kind == AgentKind::Subagent
    }

    pub fn grants(&self, tool: &str) -> bool {
        self.permissions.get(tool).copied().unwrap_or(false)
    }
}

fn grant(tools: &[&str]) -> PermissionMap {
    tools.iter().map(|tool| (tool.to_string(), true)).collect()
}

pub fn builtin_agents() -> Vec<AgentDefinition> {
    let read_only = [LIST_TASKS_TOOL, LIST_EVENTS_TOOL];
    let all_domain = [
        LIST_TASKS_TOOL,
        CREATE_TASK_TOOL,
        UPDATE_TASK_TOOL,
        DELETE_TASK_TOOL,
        LIST_EVENTS_TOOL,
        CREATE_EVENT_TOOL,
        UPDATE_EVENT_TOOL,
        DELETE_EVENT_TOOL,
    ];
    let mut primary_tools = all_domain.to_vec();
    primary_tools.push(DELEGATION_TOOL);

    vec![
        AgentDefinition {
            name: ASSISTANT_AGENT.to_string(),
            description: "Primary assistant for tasks and calendar.".to_string(),
            kind: AgentKind::Primary,
            permissions: grant(&primary_tools),
            temperature: None,
            model: None,
            instructions: "You manage the user's tasks and calendar.".to_string(),
            builtin: true,
        },
        AgentDefinition {
            builtin: true,
            ..AgentDefinition::subagent(
                RESEARCHER_AGENT,
                "Looks things up without changing anything.",
                &read_only,
            )
            .with_instructions("Answer the task using read-only lookups.")
        },
        AgentDefinition {
            builtin: true,
            ..AgentDefinition::subagent(
                SCHEDULER_AGENT,
                "Creates and rearranges tasks and events.",
                &all_domain,
            )
            .with_instructions("Carry out the scheduling task, then summarise the changes.")
        },
    ]
}

#[derive(Debug, Default)]
struct CatalogState {
    version: u64,
    agents: BTreeMap<String, AgentDefinition>,
}

#[derive(Debug, Default)]
pub struct SubagentCatalog {
    state: RwLock<CatalogState>,
}

impl SubagentCatalog {
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn with_builtins() -> Self {
        let agents = builtin_agents()
            .into_iter()
            .map(|agent| (agent.name.clone(), agent))
            .collect();
        Self {
            state: RwLock::new(CatalogState { version: 1, agents }),
        }
    }

    pub fn version(&self) -> u64 {
        self.read(|state| state.version)
    }

    pub fn get(&self, name: &str) -> Option<AgentDefinition> {
        self.read(|state| state.agents.get(name).cloned())
    }

    pub fn list(&self) -> Vec<AgentDefinition> {
        self.read(|state| state.agents.values().cloned().collect())
    }

    pub fn subagents(&self) -> Vec<AgentDefinition> {
        self.read(|state| {
            state
                .agents
                .values()
                .filter(|agent| agent.is_subagent())
                .cloned()
                .collect()
        })
    }

    /// Adds or replaces a user-defined agent and returns the new version.
    pub fn register(&self, mut definition: AgentDefinition) -> Result<u64, ConfigurationError> {
        if definition.name.trim().is_empty() {
            return Err(ConfigurationError::Invalid(
                "agent name must not be empty".to_string(),
            ));
        }
        if definition.is_subagent() && definition.grants(DELEGATION_TOOL) {
            return Err(ConfigurationError::DelegationGrant(definition.name));
        }
        definition.builtin = false;

        let mut state = self.state.write().unwrap_or_else(PoisonError::into_inner);
        if state
            .agents
            .get(&definition.name)
            .is_some_and(|existing| existing.builtin)
        {
            return Err(ConfigurationError::BuiltinRemoval(definition.name));
        }
        tracing::info!(agent = %definition.name, "registered agent definition");
        state.agents.insert(definition.name.clone(), definition);
        state.version += 1;
        Ok(state.version)
    }

    pub fn remove(&self, name: &str) -> Result<u64, ConfigurationError> {
        let mut state = self.state.write().unwrap_or_else(PoisonError::into_inner);
        match state.agents.get(name) {
            None => return Err(ConfigurationError::UnknownAgent(name.to_string())),
            Some(existing) if existing.builtin => {
                return Err(ConfigurationError::BuiltinRemoval(name.to_string()));
            }
            Some(_) => {}
        }
        state.agents.remove(name);
        state.version += 1;
        Ok(state.version)
    }

    fn read<T>(&self, f: impl FnOnce(&CatalogState) -> T) -> T {
        let state = self.state.read().unwrap_or_else(PoisonError::into_inner);
        f(&state)
    }
}
