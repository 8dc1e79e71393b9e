//! The DB root: every scope's configuration, memories and conversations.
//!
//! Each scope sits behind its own `RwLock`; the scope map has a separate lock
//! that is held only long enough to find or insert a scope.

use chrono::{DateTime, Utc};
use convoke_config::ScopeDefaults;
use convoke_core::error::StorageError;
use convoke_core::host::{RoleId, ScopeId};
use convoke_core::message::{Conversation, ConversationKey};
use convoke_core::provider::Credentials;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::Arc;
use tokio::sync::RwLock;

/// Longest accepted memory name, in characters.
pub const MAX_MEMORY_NAME_LEN: usize = 45;

/// A named piece of text plus its embedding.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Memory {
    pub text: String,
    pub embedding: Vec<f32>,
    #[serde(default)]
    pub ai_created: bool,
    /// Insertion sequence, kept across overwrites.
    #[serde(default)]
    pub seq: u64,
    pub created: DateTime<Utc>,
    pub modified: DateTime<Utc>,
}

/// Per-scope configuration and state.
#[derive(Clone, Serialize, Deserialize)]
pub struct ScopeConfig {
    #[serde(default)]
    pub api_key: Option<String>,
    #[serde(default)]
    pub endpoint_override: Option<String>,
    pub model: String,
    pub embed_model: String,
    #[serde(default)]
    pub system_prompt: String,
    #[serde(default)]
    pub prompt: String,

    pub max_tokens: usize,
    pub max_retention: usize,
    pub max_retention_time: u64,

    #[serde(default)]
    pub max_token_role_override: HashMap<RoleId, usize>,
    #[serde(default)]
    pub max_retention_role_override: HashMap<RoleId, usize>,
    #[serde(default)]
    pub max_time_role_override: HashMap<RoleId, u64>,
    #[serde(default)]
    pub model_role_overrides: HashMap<RoleId, String>,

    /// Actors, roles or channels excluded from the assistant.
    #[serde(default)]
    pub blacklist: HashSet<u64>,
    /// Actors or roles allowed to create memories through the model.
    #[serde(default)]
    pub tutors: HashSet<u64>,

    #[serde(default)]
    pub embeddings: HashMap<String, Memory>,
    #[serde(default)]
    pub next_memory_seq: u64,

    #[serde(default)]
    pub conversations: HashMap<ConversationKey, Conversation>,
    #[serde(default)]
    pub persist_conversations: bool,

    pub top_n: usize,
    pub min_relatedness: f32,
    pub max_function_calls: u32,
    pub use_function_calls: bool,
    #[serde(default)]
    pub disabled_functions: HashSet<String>,
    pub temperature: f32,
}

impl ScopeConfig {
    pub fn from_defaults(defaults: &ScopeDefaults) -> Self {
        Self {
            api_key: None,
            endpoint_override: None,
            model: defaults.model.clone(),
            embed_model: defaults.embed_model.clone(),
            system_prompt: defaults.system_prompt.clone(),
            prompt: defaults.prompt.clone(),
            max_tokens: defaults.max_tokens,
            max_retention: defaults.max_retention,
            max_retention_time: defaults.max_retention_time,
            max_token_role_override: HashMap::new(),
            max_retention_role_override: HashMap::new(),
            max_time_role_override: HashMap::new(),
            model_role_overrides: HashMap::new(),
            blacklist: HashSet::new(),
            tutors: HashSet::new(),
            embeddings: HashMap::new(),
            next_memory_seq: 0,
            conversations: HashMap::new(),
            persist_conversations: defaults.persist_conversations,
            top_n: defaults.top_n,
            min_relatedness: defaults.min_relatedness,
            max_function_calls: defaults.max_function_calls,
            use_function_calls: defaults.use_function_calls,
            disabled_functions: HashSet::new(),
            temperature: defaults.temperature,
        }
    }

    pub fn credentials(&self) -> Credentials {
        Credentials {
            api_key: self.api_key.clone(),
            endpoint: self.endpoint_override.clone(),
        }
    }

    /// Whether any of the given ids (actor, channel, roles) is blacklisted.
    pub fn blacklisted<'a>(&self, ids: impl IntoIterator<Item = &'a u64>) -> Option<u64> {
        ids.into_iter().find(|id| self.blacklist.contains(id)).copied()
    }

    /// Whether the actor, or one of its roles, is a tutor.
    pub fn is_tutor(&self, actor: u64, roles: &[RoleId]) -> bool {
        self.tutors.contains(&actor) || roles.iter().any(|r| self.tutors.contains(r))
    }

    fn clone_without_conversations(&self) -> Self {
        Self {
            api_key: self.api_key.clone(),
            endpoint_override: self.endpoint_override.clone(),
            model: self.model.clone(),
            embed_model: self.embed_model.clone(),
            system_prompt: self.system_prompt.clone(),
            prompt: self.prompt.clone(),
            max_tokens: self.max_tokens,
            max_retention: self.max_retention,
            max_retention_time: self.max_retention_time,
            max_token_role_override: self.max_token_role_override.clone(),
            max_retention_role_override: self.max_retention_role_override.clone(),
            max_time_role_override: self.max_time_role_override.clone(),
            model_role_overrides: self.model_role_overrides.clone(),
            blacklist: self.blacklist.clone(),
            tutors: self.tutors.clone(),
            embeddings: self.embeddings.clone(),
            next_memory_seq: self.next_memory_seq,
            conversations: HashMap::new(),
            persist_conversations: self.persist_conversations,
            top_n: self.top_n,
            min_relatedness: self.min_relatedness,
            max_function_calls: self.max_function_calls,
            use_function_calls: self.use_function_calls,
            disabled_functions: self.disabled_functions.clone(),
            temperature: self.temperature,
        }
    }

    /// Hand out the next insertion sequence number.
    pub fn take_memory_seq(&mut self) -> u64 {
        let seq = self.next_memory_seq;
        self.next_memory_seq += 1;
        seq
    }
}

impl std::fmt::Debug for ScopeConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ScopeConfig")
            .field(
                "api_key",
                &match self.api_key {
                    Some(_) => "[REDACTED]",
                    None => "None",
                },
            )
            .field("endpoint_override", &self.endpoint_override)
            .field("model", &self.model)
            .field("embed_model", &self.embed_model)
            .field("max_tokens", &self.max_tokens)
            .field("max_retention", &self.max_retention)
            .field("max_retention_time", &self.max_retention_time)
            .field("memories", &self.embeddings.len())
            .field("conversations", &self.conversations.len())
            .field("persist_conversations", &self.persist_conversations)
            .finish_non_exhaustive()
    }
}

/// The persisted document.
#[derive(Serialize, Deserialize, Default)]
struct DbDocument {
    #[serde(default)]
    configs: BTreeMap<ScopeId, ScopeConfig>,
}

pub type ScopeHandle = Arc<RwLock<ScopeConfig>>;

/// Every scope's state, keyed by scope id.
pub struct Db {
    scopes: RwLock<HashMap<ScopeId, ScopeHandle>>,
    defaults: ScopeDefaults,
}

impl Db {
    pub fn new(defaults: ScopeDefaults) -> Self {
        Self {
            scopes: RwLock::new(HashMap::new()),
            defaults,
        }
    }

    /// Rebuild from a saved document.
    pub fn from_bytes(bytes: &[u8], defaults: ScopeDefaults) -> Result<Self, StorageError> {
        let doc: DbDocument =
            serde_json::from_slice(bytes).map_err(|e| StorageError::Corrupt(e.to_string()))?;
        let scopes = doc
            .configs
            .into_iter()
            .map(|(id, conf)| (id, Arc::new(RwLock::new(conf))))
            .collect();
        Ok(Self {
            scopes: RwLock::new(scopes),
            defaults,
        })
    }

    pub fn defaults(&self) -> &ScopeDefaults {
        &self.defaults
    }

    /// The scope's handle if it has been seen before.
    pub async fn get(&self, scope: ScopeId) -> Option<ScopeHandle> {
        self.scopes.read().await.get(&scope).cloned()
    }

    /// The scope's handle, created from the defaults on first use.
    pub async fn scope(&self, scope: ScopeId) -> ScopeHandle {
        if let Some(handle) = self.get(scope).await {
            return handle;
        }
        self.scopes
            .write()
            .await
            .entry(scope)
            .or_insert_with(|| Arc::new(RwLock::new(ScopeConfig::from_defaults(&self.defaults))))
            .clone()
    }

    pub async fn remove(&self, scope: ScopeId) -> bool {
        self.scopes.write().await.remove(&scope).is_some()
    }

    pub async fn scope_ids(&self) -> Vec<ScopeId> {
        let mut ids: Vec<ScopeId> = self.scopes.read().await.keys().copied().collect();
        ids.sort_unstable();
        ids
    }

    async fn handles(&self) -> Vec<(ScopeId, ScopeHandle)> {
        self.scopes
            .read()
            .await
            .iter()
            .map(|(id, h)| (*id, h.clone()))
            .collect()
    }

    /// Whether any scope keeps its conversations across restarts.
    pub async fn any_persisting(&self) -> bool {
        for (_, handle) in self.handles().await {
            if handle.read().await.persist_conversations {
                return true;
            }
        }
        false
    }

    /// Serialize every scope. Conversations of scopes that do not persist
    /// them are left out of the document but stay in memory.
    pub async fn snapshot(&self) -> Result<Vec<u8>, StorageError> {
        let mut doc = DbDocument::default();
        for (id, handle) in self.handles().await {
            let conf = handle.read().await;
            let mut copy = conf.clone_without_conversations();
            if conf.persist_conversations {
                copy.conversations = conf
                    .conversations
                    .iter()
                    .filter(|(_, c)| !c.is_empty())
                    .map(|(k, c)| (*k, c.clone()))
                    .collect();
            }
            doc.configs.insert(id, copy);
        }
        serde_json::to_vec(&doc).map_err(|e| StorageError::Corrupt(e.to_string()))
    }
}
