//! Embedding-backed long-term memories, one namespace per scope.
//!
//! Embedding calls never run under the scope lock. Whatever was checked
//! before the call (existence, overwrite rules) is checked again under the
//! write lock afterwards.

use chrono::Utc;
use convoke_core::error::{MemoryError, ProviderError};
use convoke_core::event::{DomainEvent, EventBus};
use convoke_core::host::{ActorId, RoleId, ScopeId};
use convoke_core::provider::{Credentials, EmbeddingRequest, Provider};
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::db::{Db, MAX_MEMORY_NAME_LEN, Memory};
use crate::persistence::PersistenceManager;
use crate::vector::{MemoryHit, rank_memories};

/// Results returned when the caller does not ask for a specific amount.
pub const DEFAULT_SEARCH_K: usize = 2;
/// Upper bound on results per search.
pub const MAX_SEARCH_K: usize = 10;

pub struct SemanticMemory {
    db: Arc<Db>,
    provider: Arc<dyn Provider>,
    persistence: Arc<PersistenceManager>,
    events: Option<Arc<EventBus>>,
}

impl SemanticMemory {
    pub fn new(provider: Arc<dyn Provider>, persistence: Arc<PersistenceManager>) -> Self {
        Self {
            db: persistence.db().clone(),
            provider,
            persistence,
            events: None,
        }
    }

    pub fn with_events(mut self, events: Arc<EventBus>) -> Self {
        self.events = Some(events);
        self
    }

    async fn embed(
        &self,
        credentials: Credentials,
        model: String,
        text: &str,
    ) -> Result<Vec<f32>, ProviderError> {
        let response = self
            .provider
            .embed(EmbeddingRequest {
                model,
                inputs: vec![text.to_string()],
                credentials,
            })
            .await?;
        Ok(response.embeddings.into_iter().next().unwrap_or_default())
    }

    fn changed(&self, scope: ScopeId, name: &str, operation: &str) {
        if let Some(events) = &self.events {
            events.publish(DomainEvent::MemoryChanged {
                scope,
                name: name.to_string(),
                operation: operation.to_string(),
                timestamp: Utc::now(),
            });
        }
        self.persistence.schedule();
    }

    /// Embed `text` and store it under `name`.
    ///
    /// Returns `Ok(None)` when the embedder produced nothing.
    pub async fn create(
        &self,
        scope: ScopeId,
        name: &str,
        text: &str,
        overwrite: bool,
        ai_created: bool,
    ) -> Result<Option<Vec<f32>>, MemoryError> {
        let len = name.chars().count();
        if len > MAX_MEMORY_NAME_LEN {
            return Err(MemoryError::NameTooLong {
                name: name.to_string(),
                len,
                max: MAX_MEMORY_NAME_LEN,
            });
        }

        let handle = self.db.scope(scope).await;
        let (credentials, model) = {
            let conf = handle.read().await;
            if !overwrite && conf.embeddings.contains_key(name) {
                return Err(MemoryError::EntryExists(name.to_string()));
            }
            let credentials = conf.credentials();
            if !credentials.is_usable() {
                return Err(MemoryError::NoCredentials);
            }
            (credentials, conf.embed_model.clone())
        };

        let embedding = self.embed(credentials, model, text).await?;
        if embedding.is_empty() {
            warn!(scope, name, "Embedder returned an empty vector");
            return Ok(None);
        }

        {
            let mut conf = handle.write().await;
            let now = Utc::now();
            if let Some(existing) = conf.embeddings.get_mut(name) {
                if !overwrite {
                    return Err(MemoryError::EntryExists(name.to_string()));
                }
                existing.text = text.to_string();
                existing.embedding = embedding.clone();
                existing.ai_created = ai_created;
                existing.modified = now;
            } else {
                let seq = conf.take_memory_seq();
                conf.embeddings.insert(
                    name.to_string(),
                    Memory {
                        text: text.to_string(),
                        embedding: embedding.clone(),
                        ai_created,
                        seq,
                        created: now,
                        modified: now,
                    },
                );
            }
        }

        info!(scope, name, ai_created, overwrite, "Memory stored");
        self.changed(scope, name, "create");
        Ok(Some(embedding))
    }

    /// Replace a memory's text and regenerate its embedding.
    pub async fn edit(
        &self,
        scope: ScopeId,
        name: &str,
        new_text: &str,
    ) -> Result<Vec<f32>, MemoryError> {
        let handle = self
            .db
            .get(scope)
            .await
            .ok_or_else(|| MemoryError::NotFound(name.to_string()))?;
        let (credentials, model) = {
            let conf = handle.read().await;
            if !conf.embeddings.contains_key(name) {
                return Err(MemoryError::NotFound(name.to_string()));
            }
            let credentials = conf.credentials();
            if !credentials.is_usable() {
                return Err(MemoryError::NoCredentials);
            }
            (credentials, conf.embed_model.clone())
        };

        let embedding = self.embed(credentials, model, new_text).await?;
        if embedding.is_empty() {
            return Err(MemoryError::EmbeddingFailed(ProviderError::ApiError {
                status_code: 200,
                message: "empty embedding".into(),
            }));
        }

        {
            let mut conf = handle.write().await;
            let memory = conf
                .embeddings
                .get_mut(name)
                .ok_or_else(|| MemoryError::NotFound(name.to_string()))?;
            memory.text = new_text.to_string();
            memory.embedding = embedding.clone();
            memory.modified = Utc::now();
        }

        info!(scope, name, "Memory edited");
        self.changed(scope, name, "edit");
        Ok(embedding)
    }

    pub async fn delete(&self, scope: ScopeId, name: &str) -> bool {
        let Some(handle) = self.db.get(scope).await else {
            return false;
        };
        let removed = handle.write().await.embeddings.remove(name).is_some();
        if removed {
            info!(scope, name, "Memory deleted");
            self.changed(scope, name, "delete");
        }
        removed
    }

    /// Rank the scope's memories against `query`.
    ///
    /// `k` defaults to [`DEFAULT_SEARCH_K`] and is capped at [`MAX_SEARCH_K`].
    pub async fn search(
        &self,
        scope: ScopeId,
        query: &str,
        k: Option<usize>,
    ) -> Result<Vec<MemoryHit>, MemoryError> {
        self.search_with_threshold(scope, query, k, -1.0).await
    }

    /// Like [`search`](Self::search), dropping hits scoring below `min_score`.
    pub async fn search_with_threshold(
        &self,
        scope: ScopeId,
        query: &str,
        k: Option<usize>,
        min_score: f32,
    ) -> Result<Vec<MemoryHit>, MemoryError> {
        let k = k.unwrap_or(DEFAULT_SEARCH_K).min(MAX_SEARCH_K);
        let Some(handle) = self.db.get(scope).await else {
            return Ok(Vec::new());
        };

        let (credentials, model) = {
            let conf = handle.read().await;
            if conf.embeddings.is_empty() || k == 0 {
                return Ok(Vec::new());
            }
            let credentials = conf.credentials();
            if !credentials.is_usable() {
                return Err(MemoryError::NoCredentials);
            }
            (credentials, conf.embed_model.clone())
        };

        let query_embedding = self.embed(credentials, model, query).await?;
        if query_embedding.is_empty() {
            return Ok(Vec::new());
        }

        let conf = handle.read().await;
        let hits = rank_memories(&conf.embeddings, &query_embedding, k, min_score);
        debug!(scope, k, hits = hits.len(), "Memory search");
        Ok(hits)
    }

    /// Every memory in the scope, in insertion order.
    pub async fn list(&self, scope: ScopeId) -> Vec<(String, Memory)> {
        let Some(handle) = self.db.get(scope).await else {
            return Vec::new();
        };
        let conf = handle.read().await;
        let mut memories: Vec<(String, Memory)> = conf
            .embeddings
            .iter()
            .map(|(name, memory)| (name.clone(), memory.clone()))
            .collect();
        memories.sort_by_key(|(_, m)| m.seq);
        memories
    }

    /// Whether the actor, or one of its roles, may teach the assistant.
    pub async fn is_tutor(&self, scope: ScopeId, actor: ActorId, roles: &[RoleId]) -> bool {
        match self.db.get(scope).await {
            Some(handle) => handle.read().await.is_tutor(actor, roles),
            None => false,
        }
    }

    /// Tutor-gated memory creation for the model. Always answers with text
    /// suitable to hand back to the model.
    pub async fn knowledge_store(
        &self,
        scope: ScopeId,
        actor: ActorId,
        roles: &[RoleId],
        name: &str,
        text: &str,
    ) -> String {
        if name.chars().count() > MAX_MEMORY_NAME_LEN {
            return format!(
                "Error: memory_name should be {MAX_MEMORY_NAME_LEN} characters or less!"
            );
        }

        if !self.is_tutor(scope, actor, roles).await {
            return format!("User {actor} is not recognized as a tutor!");
        }

        match self.create(scope, name, text, false, true).await {
            Ok(Some(_)) => {
                format!("The {name} memory has been created, you can now reference it later")
            }
            Ok(None) => "Failed to create memory!".to_string(),
            Err(MemoryError::EntryExists(_)) => {
                format!("A memory with the name {name} already exists!")
            }
            Err(e) => format!("Error: {e}"),
        }
    }
}
