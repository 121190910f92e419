use crate::store::{
    ConversationStore, LockStore, RunStore, SessionStore, SettingsStore, StoreError, StoreResult,
};
use crate::types::{History, LockRecord, ModelSettings, SessionRecord, SubagentRunRecord};
use aide_llm::Message;
use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};

#[derive(Clone, Debug, Default, serde::Serialize, serde::Deserialize)]
pub(crate) struct MemoryState {
    #[serde(default)]
    pub sessions: BTreeMap<String, SessionRecord>,
    #[serde(default)]
    pub histories: BTreeMap<String, History>,
    #[serde(default)]
    pub locks: BTreeMap<String, LockRecord>,
    #[serde(default)]
    pub runs: BTreeMap<String, SubagentRunRecord>,
    #[serde(default)]
    pub settings: ModelSettings,
}

/// Single-process store backing every collaborator trait.
#[derive(Clone, Debug, Default)]
pub struct MemoryStore {
    inner: Arc<Mutex<MemoryState>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn from_state(state: MemoryState) -> Self {
        Self {
            inner: Arc::new(Mutex::new(state)),
        }
    }

    pub(crate) fn snapshot(&self) -> StoreResult<MemoryState> {
        self.with_state(|state| Ok(state.clone()))
    }

    pub(crate) fn restore(&self, snapshot: MemoryState) -> StoreResult<()> {
        self.with_state(|state| {
            *state = snapshot;
            Ok(())
        })
    }

    fn with_state<T>(
        &self,
        f: impl FnOnce(&mut MemoryState) -> StoreResult<T>,
    ) -> StoreResult<T> {
        let mut state = self
            .inner
            .lock()
            .map_err(|_| StoreError::Backend("memory store mutex poisoned".to_string()))?;
        f(&mut state)
    }
}

#[async_trait::async_trait]
impl SessionStore for MemoryStore {
    async fn create_session(&self, record: SessionRecord) -> StoreResult<()> {
        self.with_state(|state| {
            if state.sessions.contains_key(&record.id) {
                return Err(StoreError::Conflict(format!(
                    "session {} already exists",
                    record.id
                )));
            }
            state.sessions.insert(record.id.clone(), record);
            Ok(())
        })
    }

    async fn get_session(&self, session_id: &str) -> StoreResult<Option<SessionRecord>> {
        self.with_state(|state| Ok(state.sessions.get(session_id).cloned()))
    }

    async fn set_active_mode(&self, session_id: &str, mode: &str) -> StoreResult<()> {
        self.with_state(|state| {
            let session = state
                .sessions
                .get_mut(session_id)
                .ok_or_else(|| StoreError::NotFound {
                    resource: "session",
                    id: session_id.to_string(),
                })?;
            session.active_mode = mode.to_string();
            Ok(())
        })
    }
}

#[async_trait::async_trait]
impl ConversationStore for MemoryStore {
    async fn get_history(&self, session_id: &str) -> StoreResult<History> {
        self.with_state(|state| Ok(state.histories.get(session_id).cloned().unwrap_or_default()))
    }

    async fn replace_history(
        &self,
        session_id: &str,
        messages: Vec<Message>,
        expected_version: u64,
    ) -> StoreResult<u64> {
        self.with_state(|state| {
            let history = state.histories.entry(session_id.to_string()).or_default();
            if history.version != expected_version {
                return Err(StoreError::VersionConflict {
                    session_id: session_id.to_string(),
                    expected: expected_version,
                    actual: history.version,
                });
            }
            history.messages = messages;
            history.version += 1;
            Ok(history.version)
        })
    }
}

#[async_trait::async_trait]
impl LockStore for MemoryStore {
    async fn load_lock(&self, session_id: &str) -> StoreResult<Option<LockRecord>> {
        self.with_state(|state| Ok(state.locks.get(session_id).cloned()))
    }

    async fn compare_and_swap_lock(
        &self,
        session_id: &str,
        expected: Option<&LockRecord>,
        next: Option<LockRecord>,
    ) -> StoreResult<bool> {
        self.with_state(|state| {
            if state.locks.get(session_id) != expected {
                return Ok(false);
            }
            match next {
                Some(lock) => {
                    state.locks.insert(session_id.to_string(), lock);
                }
                None => {
                    state.locks.remove(session_id);
                }
            }
            Ok(true)
        })
    }
}

#[async_trait::async_trait]
impl RunStore for MemoryStore {
    async fn put_run(&self, record: SubagentRunRecord) -> StoreResult<()> {
        if record.id.trim().is_empty() {
            return Err(StoreError::InvalidInput("run id must not be empty".to_string()));
        }
        self.with_state(|state| {
            state.runs.insert(record.id.clone(), record);
            Ok(())
        })
    }

    async fn get_run(&self, run_id: &str) -> StoreResult<Option<SubagentRunRecord>> {
        self.with_state(|state| Ok(state.runs.get(run_id).cloned()))
    }

    async fn list_runs(&self, parent_session_id: &str) -> StoreResult<Vec<SubagentRunRecord>> {
        self.with_state(|state| {
            let mut runs: Vec<SubagentRunRecord> = state
                .runs
                .values()
                .filter(|run| run.parent_session_id == parent_session_id)
                .cloned()
                .collect();
            runs.sort_by(|a, b| a.started_at.cmp(&b.started_at).then(a.id.cmp(&b.id)));
            Ok(runs)
        })
    }
}

#[async_trait::async_trait]
impl SettingsStore for MemoryStore {
    async fn model_settings(&self) -> StoreResult<ModelSettings> {
        self.with_state(|state| Ok(state.settings.clone()))
    }

    async fn set_default_model(&self, model: Option<String>) -> StoreResult<()> {
        self.with_state(|state| {
            state.settings.default_model = model;
            Ok(())
        })
    }

    async fn set_provider_preference(
        &self,
        model: &str,
        provider: Option<String>,
    ) -> StoreResult<()> {
        self.with_state(|state| {
            match provider {
                Some(provider) => {
                    state
                        .settings
                        .provider_preferences
                        .insert(model.to_string(), provider);
                }
                None => {
                    state.settings.provider_preferences.remove(model);
                }
            }
            Ok(())
        })
    }
}
