//! Collaborator stores for the aide agent core: sessions, conversation
//! history, session locks, subagent runs, and model settings.

pub mod fs;
pub mod memory;
pub mod store;
pub mod types;

pub use fs::FsStore;
pub use memory::MemoryStore;
pub use store::{
    ConversationStore, LockStore, RunStore, SessionStore, SettingsStore, StoreError, StoreResult,
};
pub use types::{
    History, LockRecord, ModelSettings, RunStatus, SessionId, SessionRecord, SubagentRunRecord,
};
