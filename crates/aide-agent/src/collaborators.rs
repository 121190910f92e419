use crate::generation::GenerationLoop;
use crate::subagents::{ModelRouting, SubagentCatalog};
use crate::{AgentConfig, Clock, EventEmitter, NoopEventEmitter, SystemClock};
use aide_llm::GenerationProvider;
use aide_store::{ConversationStore, LockStore, RunStore, SessionStore, SettingsStore};
use std::sync::Arc;

#[derive(Clone)]
pub struct AgentStores {
    pub sessions: Arc<dyn SessionStore>,
    pub conversations: Arc<dyn ConversationStore>,
    pub locks: Arc<dyn LockStore>,
    pub runs: Arc<dyn RunStore>,
    pub settings: Arc<dyn SettingsStore>,
}

impl AgentStores {
    /// Uses one backend for every store.
    pub fn shared<S>(store: Arc<S>) -> Self
    where
        S: SessionStore + ConversationStore + LockStore + RunStore + SettingsStore + 'static,
    {
        Self {
            sessions: store.clone(),
            conversations: store.clone(),
            locks: store.clone(),
            runs: store.clone(),
            settings: store,
        }
    }
}

/// Everything the core talks to but does not own.
#[derive(Clone)]
pub struct Collaborators {
    pub provider: Arc<dyn GenerationProvider>,
    pub stores: AgentStores,
    pub catalog: Arc<SubagentCatalog>,
    pub clock: Arc<dyn Clock>,
    pub emitter: Arc<dyn EventEmitter>,
}

impl Collaborators {
    pub fn new(provider: Arc<dyn GenerationProvider>, stores: AgentStores) -> Self {
        Self {
            provider,
            stores,
            catalog: Arc::new(SubagentCatalog::with_builtins()),
            clock: Arc::new(SystemClock),
            emitter: Arc::new(NoopEventEmitter),
        }
    }

    pub fn with_catalog(mut self, catalog: Arc<SubagentCatalog>) -> Self {
        self.catalog = catalog;
        self
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn with_emitter(mut self, emitter: Arc<dyn EventEmitter>) -> Self {
        self.emitter = emitter;
        self
    }

    pub(crate) fn generation_loop(&self, config: &AgentConfig) -> GenerationLoop {
        GenerationLoop::new(
            self.provider.clone(),
            config.pricing.clone(),
            self.emitter.clone(),
            self.clock.clone(),
        )
    }

    pub(crate) fn model_routing(&self, config: &AgentConfig) -> ModelRouting {
        ModelRouting::new(
            self.stores.settings.clone(),
            self.provider.clone(),
            self.emitter.clone(),
            self.clock.clone(),
            config.clone(),
        )
    }
}
