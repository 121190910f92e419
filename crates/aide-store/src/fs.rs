use crate::memory::{MemoryState, MemoryStore};
use crate::store::{
    ConversationStore, LockStore, RunStore, SessionStore, SettingsStore, StoreError, StoreResult,
};
use crate::types::{History, LockRecord, ModelSettings, SessionRecord, SubagentRunRecord};
use aide_llm::Message;
use std::fs;
use std::future::Future;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::Mutex;

const STATE_FILE_NAME: &str = "aide-state.json";

/// Memory store snapshotted to a JSON file after every successful mutation.
///
/// Writers are serialized; a mutation whose snapshot cannot be written is
/// rolled back before the error is returned.
#[derive(Clone, Debug)]
pub struct FsStore {
    state_file: PathBuf,
    inner: MemoryStore,
    write_lock: Arc<Mutex<()>>,
}

impl FsStore {
    pub fn new<P: AsRef<Path>>(root: P) -> StoreResult<Self> {
        fs::create_dir_all(root.as_ref())
            .map_err(|err| StoreError::Backend(format!("create fs store root failed: {err}")))?;
        let state_file = root.as_ref().join(STATE_FILE_NAME);
        let state = if state_file.exists() {
            let raw = fs::read(&state_file)
                .map_err(|err| StoreError::Backend(format!("read state file failed: {err}")))?;
            serde_json::from_slice::<MemoryState>(&raw)
                .map_err(|err| StoreError::Serialization(err.to_string()))?
        } else {
            MemoryState::default()
        };
        tracing::debug!(path = %state_file.display(), "opened fs store");

        Ok(Self {
            state_file,
            inner: MemoryStore::from_state(state),
            write_lock: Arc::new(Mutex::new(())),
        })
    }

    /// Applies `mutation` and persists when `changed` says the state moved.
    async fn write<T, F>(&self, mutation: F, changed: impl FnOnce(&T) -> bool) -> StoreResult<T>
    where
        F: Future<Output = StoreResult<T>>,
    {
        let _guard = self.write_lock.lock().await;
        let before = self.inner.snapshot()?;
        let value = mutation.await?;
        if !changed(&value) {
            return Ok(value);
        }
        if let Err(error) = self.persist() {
            tracing::warn!(path = %self.state_file.display(), error = %error, "state write failed, rolling back");
            self.inner.restore(before)?;
            return Err(error);
        }
        Ok(value)
    }

    fn persist(&self) -> StoreResult<()> {
        let snapshot = self.inner.snapshot()?;
        let raw = serde_json::to_vec_pretty(&snapshot)
            .map_err(|err| StoreError::Serialization(err.to_string()))?;
        let tmp = self.state_file.with_extension("json.tmp");
        fs::write(&tmp, raw)
            .map_err(|err| StoreError::Backend(format!("write state file failed: {err}")))?;
        fs::rename(&tmp, &self.state_file)
            .map_err(|err| StoreError::Backend(format!("rename state file failed: {err}")))?;
        Ok(())
    }
}

fn always<T>(_: &T) -> bool {
    true
}

#[async_trait::async_trait]
impl SessionStore for FsStore {
    async fn create_session(&self, record: SessionRecord) -> StoreResult<()> {
        self.write(self.inner.create_session(record), always).await
    }

    async fn get_session(&self, session_id: &str) -> StoreResult<Option<SessionRecord>> {
        self.inner.get_session(session_id).await
    }

    async fn set_active_mode(&self, session_id: &str, mode: &str) -> StoreResult<()> {
        self.write(self.inner.set_active_mode(session_id, mode), always)
            .await
    }
}

#[async_trait::async_trait]
impl ConversationStore for FsStore {
    async fn get_history(&self, session_id: &str) -> StoreResult<History> {
        self.inner.get_history(session_id).await
    }

    async fn replace_history(
        &self,
        session_id: &str,
        messages: Vec<Message>,
        expected_version: u64,
    ) -> StoreResult<u64> {
        self.write(
            self.inner
                .replace_history(session_id, messages, expected_version),
            always,
        )
        .await
    }
}

#[async_trait::async_trait]
impl LockStore for FsStore {
    async fn load_lock(&self, session_id: &str) -> StoreResult<Option<LockRecord>> {
        self.inner.load_lock(session_id).await
    }

    async fn compare_and_swap_lock(
        &self,
        session_id: &str,
        expected: Option<&LockRecord>,
        next: Option<LockRecord>,
    ) -> StoreResult<bool> {
        self.write(
            self.inner.compare_and_swap_lock(session_id, expected, next),
            |swapped| *swapped,
        )
        .await
    }
}

#[async_trait::async_trait]
impl RunStore for FsStore {
    async fn put_run(&self, record: SubagentRunRecord) -> StoreResult<()> {
        self.write(self.inner.put_run(record), always).await
    }

    async fn get_run(&self, run_id: &str) -> StoreResult<Option<SubagentRunRecord>> {
        self.inner.get_run(run_id).await
    }

    async fn list_runs(&self, parent_session_id: &str) -> StoreResult<Vec<SubagentRunRecord>> {
        self.inner.list_runs(parent_session_id).await
    }
}

#[async_trait::async_trait]
impl SettingsStore for FsStore {
    async fn model_settings(&self) -> StoreResult<ModelSettings> {
        self.inner.model_settings().await
    }

    async fn set_default_model(&self, model: Option<String>) -> StoreResult<()> {
        self.write(self.inner.set_default_model(model), always)
            .await
    }

    async fn set_provider_preference(
        &self,
        model: &str,
        provider: Option<String>,
    ) -> StoreResult<()> {
        self.write(self.inner.set_provider_preference(model, provider), always)
            .await
    }
}
