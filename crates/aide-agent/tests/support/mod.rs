#![allow(dead_code)]

use aide_agent::{
    AgentConfig, AgentStores, BufferedEventEmitter, Collaborators, ManualClock, RegisteredTool,
    SideEffect, SubagentCatalog, SubagentExecutor, ToolRegistry, ToolSpec, TurnRunner,
};
use aide_llm::testing::ScriptedProvider;
use aide_llm::{GenerationProvider, GenerationRequest, ProviderError, StreamEventStream};
use aide_store::MemoryStore;
use serde_json::json;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use tokio::sync::Notify;

pub const MODEL: &str = "openai/gpt-4o-mini";

pub struct Harness {
    pub store: Arc<MemoryStore>,
    pub provider: ScriptedProvider,
    pub clock: ManualClock,
    pub emitter: BufferedEventEmitter,
    pub catalog: Arc<SubagentCatalog>,
    pub mutations: Arc<AtomicUsize>,
    pub config: AgentConfig,
}

impl Harness {
    pub fn new() -> Self {
        Self {
            store: Arc::new(MemoryStore::new()),
            provider: ScriptedProvider::new(),
            clock: ManualClock::new(1_700_000_000_000),
            emitter: BufferedEventEmitter::default(),
            catalog: Arc::new(SubagentCatalog::with_builtins()),
            mutations: Arc::new(AtomicUsize::new(0)),
            config: AgentConfig {
                default_model: Some(MODEL.to_string()),
                ..AgentConfig::default()
            },
        }
    }

    pub fn collaborators(&self) -> Collaborators {
        self.collaborators_with(Arc::new(self.provider.clone()))
    }

    pub fn collaborators_with(&self, provider: Arc<dyn GenerationProvider>) -> Collaborators {
        Collaborators::new(provider, AgentStores::shared(self.store.clone()))
        .with_catalog(self.catalog.clone())
        .with_clock(Arc::new(self.clock.clone()))
        .with_emitter(Arc::new(self.emitter.clone()))
    }

    pub fn tools(&self) -> ToolRegistry {
        let mutations = self.mutations.clone();
        ToolRegistry::from_tools([
            RegisteredTool::from_fn(
                spec("list_tasks", SideEffect::ReadOnly),
                |_input, _context| async { Ok(json!({"tasks": ["buy milk"]})) },
            ),
            RegisteredTool::from_fn(
                spec("create_task", SideEffect::Mutating),
                move |input, _context| {
                    let mutations = mutations.clone();
                    async move {
                        mutations.fetch_add(1, Ordering::SeqCst);
                        Ok(json!({"created": input}))
                    }
                },
            ),
        ])
    }

    pub fn runner(&self) -> TurnRunner {
        TurnRunner::new(self.config.clone(), self.collaborators(), self.tools())
            .expect("runner should build")
    }

    pub fn runner_with(&self, provider: Arc<dyn GenerationProvider>) -> TurnRunner {
        TurnRunner::new(
            self.config.clone(),
            self.collaborators_with(provider),
            self.tools(),
        )
        .expect("runner should build")
    }

    pub fn executor(&self) -> SubagentExecutor {
        SubagentExecutor::new(self.config.clone(), self.collaborators(), self.tools())
    }

    pub fn mutation_count(&self) -> usize {
        self.mutations.load(Ordering::SeqCst)
    }
}

fn spec(name: &str, side_effect: SideEffect) -> ToolSpec {
    ToolSpec {
        name: name.to_string(),
        description: format!("{name} test tool"),
        parameters: json!({"type": "object"}),
        side_effect,
    }
}

/// Holds the first stream call until `open` is called; later calls pass straight through.
#[derive(Clone)]
pub struct GatedProvider {
    inner: ScriptedProvider,
    gate: Arc<Notify>,
    calls: Arc<AtomicUsize>,
}

impl GatedProvider {
    pub fn new(inner: ScriptedProvider) -> Self {
        Self {
            inner,
            gate: Arc::new(Notify::new()),
            calls: Arc::new(AtomicUsize::new(0)),
        }
    }

    pub fn open(&self) {
        self.gate.notify_one();
    }
}

#[async_trait::async_trait]
impl GenerationProvider for GatedProvider {
    fn name(&self) -> &str {
        "gated"
    }

    async fn stream(&self, request: GenerationRequest) -> Result<StreamEventStream, ProviderError> {
        if self.calls.fetch_add(1, Ordering::SeqCst) == 0 {
            self.gate.notified().await;
        }
        self.inner.stream(request).await
    }
}
