use crate::types::{History, LockRecord, ModelSettings, SessionRecord, SubagentRunRecord};
use aide_llm::Message;

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("resource not found: {resource} ({id})")]
    NotFound { resource: &'static str, id: String },

    #[error("conflict: {0}")]
    Conflict(String),

    /// History was replaced by another writer since it was read.
    #[error("history version conflict for session {session_id}: expected {expected}, found {actual}")]
    VersionConflict {
        session_id: String,
        expected: u64,
        actual: u64,
    },

    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error("serialization failed: {0}")]
    Serialization(String),

    #[error("backend failure: {0}")]
    Backend(String),
}

pub type StoreResult<T> = Result<T, StoreError>;

#[async_trait::async_trait]
pub trait SessionStore: Send + Sync {
    /// Fails with `Conflict` when the id is already taken.
    async fn create_session(&self, record: SessionRecord) -> StoreResult<()>;

    async fn get_session(&self, session_id: &str) -> StoreResult<Option<SessionRecord>>;

    async fn set_active_mode(&self, session_id: &str, mode: &str) -> StoreResult<()>;
}

#[async_trait::async_trait]
pub trait ConversationStore: Send + Sync {
    /// Unknown sessions read as an empty history at version 0.
    async fn get_history(&self, session_id: &str) -> StoreResult<History>;

    /// Replaces the whole history if it is still at `expected_version` and
    /// returns the new version.
    async fn replace_history(
        &self,
        session_id: &str,
        messages: Vec<Message>,
        expected_version: u64,
    ) -> StoreResult<u64>;
}

#[async_trait::async_trait]
pub trait LockStore: Send + Sync {
    async fn load_lock(&self, session_id: &str) -> StoreResult<Option<LockRecord>>;

    /// Atomically replaces the lock when the current value equals `expected`.
    /// `next = None` deletes the lock. Returns whether the swap happened.
    async fn compare_and_swap_lock(
        &self,
        session_id: &str,
        expected: Option<&LockRecord>,
        next: Option<LockRecord>,
    ) -> StoreResult<bool>;
}

#[async_trait::async_trait]
pub trait RunStore: Send + Sync {
    /// Inserts or overwrites the record with the same id.
    async fn put_run(&self, record: SubagentRunRecord) -> StoreResult<()>;

    async fn get_run(&self, run_id: &str) -> StoreResult<Option<SubagentRunRecord>>;

    /// Runs delegated from `parent_session_id`, oldest first.
    async fn list_runs(&self, parent_session_id: &str) -> StoreResult<Vec<SubagentRunRecord>>;
}

#[async_trait::async_trait]
pub trait SettingsStore: Send + Sync {
    async fn model_settings(&self) -> StoreResult<ModelSettings>;

    async fn set_default_model(&self, model: Option<String>) -> StoreResult<()>;

    /// `None` clears the pinned provider for `model`.
    async fn set_provider_preference(
        &self,
        model: &str,
        provider: Option<String>,
    ) -> StoreResult<()>;
}
