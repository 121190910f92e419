//! Delegation to capability-restricted subagents.

mod catalog;
mod executor;
mod routing;
mod tool;

pub use catalog::*;
pub use executor::{SubagentExecutor, SubagentOutcome, SubagentTask};
pub use routing::{ModelRouting, RoutingAttempt};
pub use tool::delegate_tool;
