//! Agent orchestration core for aide.
//!
//! A turn takes the session lock, runs multi-step generation over the
//! capability-filtered tool registry, delegates sub-tasks to isolated
//! subagents, persists history once, and releases the lock.

pub mod abort;
pub mod clock;
pub mod collaborators;
pub mod config;
pub mod errors;
pub mod events;
pub mod generation;
pub mod guard;
pub mod lock;
pub mod reducer;
pub mod subagents;
pub mod tools;
pub mod turn;

pub use abort::*;
pub use clock::*;
pub use collaborators::*;
pub use config::*;
pub use errors::*;
pub use events::*;
pub use generation::*;
pub use guard::*;
pub use lock::*;
pub use reducer::*;
pub use subagents::*;
pub use tools::*;
pub use turn::*;
