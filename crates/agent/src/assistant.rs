//! The public facade other components talk to.
//!
//! An [`Assistant`] owns the scope database, the persistence manager, the
//! capability registry and the orchestration loop. Nothing is global: create
//! one, call [`Assistant::start`], and call [`Assistant::shutdown`] before
//! dropping it so pending state reaches storage.

use convoke_capabilities::{CapabilityRegistry, MEMORY_OWNER, MemoryCapabilities};
use convoke_config::AppConfig;
use convoke_core::capability::CapabilityOwner;
use convoke_core::error::Result;
use convoke_core::event::EventBus;
use convoke_core::host::{ActorId, ChannelId, HostPlatform, ScopeId};
use convoke_core::message::ConversationKey;
use convoke_core::provider::Provider;
use convoke_core::storage::StorageBackend;
use convoke_memory::{
    ConversationStore, Db, Memory, MemoryHit, PersistenceManager, SaveOutcome, SemanticMemory,
    load_db,
};
use convoke_providers::RetryingProvider;
use serde_json::Value;
use std::sync::Arc;
use tracing::{debug, info};

use crate::maintenance::{GcReport, collect_garbage};
use crate::orchestrator::{ChatRequest, Orchestrator, TurnReport, retry_policy};

pub struct Assistant {
    db: Arc<Db>,
    persistence: Arc<PersistenceManager>,
    memory: Arc<SemanticMemory>,
    registry: Arc<CapabilityRegistry>,
    conversations: ConversationStore,
    orchestrator: Orchestrator,
    host: Arc<dyn HostPlatform>,
    events: Arc<EventBus>,
}

impl Assistant {
    /// Load stored state and wire every component together.
    ///
    /// The built-in memory capabilities are attached and registered under
    /// [`MEMORY_OWNER`].
    pub async fn new(
        config: AppConfig,
        provider: Arc<dyn Provider>,
        storage: Arc<dyn StorageBackend>,
        host: Arc<dyn HostPlatform>,
    ) -> Result<Self> {
        let events = Arc::new(EventBus::default());
        let db = Arc::new(load_db(storage.as_ref(), config.scope_defaults.clone()).await?);
        let persistence = Arc::new(
            PersistenceManager::new(db.clone(), storage, config.persistence.clone())
                .with_events(events.clone()),
        );

        let embedder: Arc<dyn Provider> = Arc::new(
            RetryingProvider::new(provider.clone())
                .with_policy(retry_policy(&config.orchestrator)),
        );
        let memory = Arc::new(
            SemanticMemory::new(embedder, persistence.clone()).with_events(events.clone()),
        );

        let registry = Arc::new(CapabilityRegistry::new());
        registry
            .attach_owner(Arc::new(MemoryCapabilities::new(memory.clone())))
            .await;
        for result in registry
            .register_many(MEMORY_OWNER, &MemoryCapabilities::schemas())
            .await
        {
            result?;
        }

        let orchestrator = Orchestrator::new(
            provider,
            memory.clone(),
            registry.clone(),
            persistence.clone(),
            host.clone(),
            config.orchestrator.clone(),
        )
        .with_events(events.clone());

        Ok(Self {
            conversations: ConversationStore::new(db.clone()),
            db,
            persistence,
            memory,
            registry,
            orchestrator,
            host,
            events,
        })
    }

    pub fn events(&self) -> &Arc<EventBus> {
        &self.events
    }

    pub fn db(&self) -> &Arc<Db> {
        &self.db
    }

    pub fn registry(&self) -> &Arc<CapabilityRegistry> {
        &self.registry
    }

    pub fn persistence(&self) -> &Arc<PersistenceManager> {
        &self.persistence
    }

    /// Clean stale state and start the periodic save when needed.
    pub async fn start(&self) -> GcReport {
        let report = self.collect_garbage().await;
        self.persistence.ensure_periodic().await;
        report
    }

    /// Stop the periodic save and write everything out.
    pub async fn shutdown(&self) -> SaveOutcome {
        info!("Assistant shutting down");
        self.persistence.shutdown().await
    }

    // ── Chat ──

    pub async fn chat(&self, request: ChatRequest) -> Result<String> {
        Ok(self.orchestrator.run(&request).await?.reply)
    }

    /// Like [`chat`](Self::chat), with the full turn report.
    pub async fn chat_with_report(&self, request: ChatRequest) -> Result<TurnReport> {
        self.orchestrator.run(&request).await
    }

    // ── Memories ──

    /// Tutor-gated memory creation. Always answers with readable text.
    pub async fn create_memory(
        &self,
        scope: ScopeId,
        actor: ActorId,
        name: &str,
        text: &str,
    ) -> String {
        let roles = self.host.actor_roles(scope, actor).await;
        self.memory
            .knowledge_store(scope, actor, &roles, name, text)
            .await
    }

    /// Store a memory on behalf of another component, without a tutor check.
    pub async fn add_embedding(
        &self,
        scope: ScopeId,
        name: &str,
        text: &str,
        overwrite: bool,
    ) -> Result<Option<Vec<f32>>> {
        Ok(self.memory.create(scope, name, text, overwrite, false).await?)
    }

    pub async fn search_memories(
        &self,
        scope: ScopeId,
        query: &str,
        k: Option<usize>,
    ) -> Result<Vec<MemoryHit>> {
        Ok(self.memory.search(scope, query, k).await?)
    }

    pub async fn list_memories(&self, scope: ScopeId) -> Vec<(String, Memory)> {
        self.memory.list(scope).await
    }

    pub async fn delete_memory(&self, scope: ScopeId, name: &str) -> bool {
        self.memory.delete(scope, name).await
    }

    // ── Capabilities ──

    pub async fn attach_owner(&self, owner: Arc<dyn CapabilityOwner>) {
        self.registry.attach_owner(owner).await;
    }

    pub async fn detach_owner(&self, owner: &str) -> usize {
        self.registry.detach_owner(owner).await
    }

    /// Register a capability. Rejections are logged, not returned.
    pub async fn register_capability(&self, owner: &str, schema: &Value) -> bool {
        match self.registry.register(owner, schema).await {
            Ok(()) => true,
            Err(e) => {
                info!(owner, error = %e, "Capability registration failed");
                false
            }
        }
    }

    /// Register several capabilities. Returns how many were accepted.
    pub async fn register_capabilities(&self, owner: &str, schemas: &[Value]) -> usize {
        let mut accepted = 0;
        for schema in schemas {
            if self.register_capability(owner, schema).await {
                accepted += 1;
            }
        }
        accepted
    }

    pub async fn unregister_capability(&self, owner: &str, capability: &str) -> bool {
        self.registry.unregister(owner, capability).await
    }

    pub async fn unregister_owner(&self, owner: &str) -> usize {
        self.registry.unregister_owner(owner).await
    }

    // ── Conversations ──

    pub async fn reset_conversation(
        &self,
        scope: ScopeId,
        actor: ActorId,
        channel: ChannelId,
    ) -> bool {
        let removed = self
            .conversations
            .reset(scope, ConversationKey::new(actor, channel))
            .await;
        if removed {
            self.persistence.schedule();
        }
        removed
    }

    pub async fn reset_all_conversations(&self, scope: ScopeId) -> usize {
        let removed = self.conversations.reset_all(scope).await;
        if removed > 0 {
            self.persistence.schedule();
        }
        removed
    }

    /// (message count, token count) for one conversation.
    pub async fn conversation_stats(
        &self,
        scope: ScopeId,
        actor: ActorId,
        channel: ChannelId,
    ) -> (usize, usize) {
        self.conversations
            .stats(scope, ConversationKey::new(actor, channel))
            .await
    }

    /// Toggle whether the scope's conversations survive restarts.
    pub async fn set_persist_conversations(&self, scope: ScopeId, enabled: bool) {
        self.db.scope(scope).await.write().await.persist_conversations = enabled;
        debug!(scope, enabled, "Conversation persistence toggled");
        self.persistence.schedule();
        if enabled {
            self.persistence.ensure_periodic().await;
        }
    }

    // ── Maintenance ──

    pub async fn collect_garbage(&self) -> GcReport {
        let report = collect_garbage(&self.db, &self.registry, self.host.as_ref()).await;
        if report.changed() {
            self.persistence.schedule();
        }
        report
    }
}
