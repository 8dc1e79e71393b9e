//! Scripted collaborators shared by the agent tests.

use async_trait::async_trait;
use convoke_core::error::ProviderError;
use convoke_core::host::{ActorId, ChannelId, HostPlatform, RoleId, ScopeId};
use convoke_core::message::{Message, MessageToolCall};
use convoke_core::provider::{
    EmbeddingRequest, EmbeddingResponse, Provider, ProviderRequest, ProviderResponse, Usage,
};
use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::Mutex;

const VOCAB: &[&str] = &["rules", "pizza", "rust", "music"];

/// Keyword embedding: one dimension per vocabulary word plus a small constant
/// so unrelated texts never produce a zero vector.
pub fn keyword_embedding(text: &str) -> Vec<f32> {
    let lower = text.to_lowercase();
    let mut vector: Vec<f32> = VOCAB
        .iter()
        .map(|w| if lower.contains(w) { 1.0 } else { 0.0 })
        .collect();
    vector.push(0.1);
    vector
}

/// Returns queued responses in order, then repeats `fallback` if set.
/// Every completion request is recorded.
pub struct ScriptedProvider {
    responses: Mutex<VecDeque<ProviderResponse>>,
    fallback: Option<ProviderResponse>,
    requests: Mutex<Vec<ProviderRequest>>,
}

impl ScriptedProvider {
    pub fn new(responses: Vec<ProviderResponse>) -> Self {
        Self {
            responses: Mutex::new(responses.into()),
            fallback: None,
            requests: Mutex::new(Vec::new()),
        }
    }

    pub fn text(reply: &str) -> Self {
        Self::new(vec![text_response(reply)])
    }

    /// Answers every call with the same response.
    pub fn repeating(response: ProviderResponse) -> Self {
        Self {
            fallback: Some(response),
            ..Self::new(Vec::new())
        }
    }

    pub fn requests(&self) -> Vec<ProviderRequest> {
        self.requests.lock().unwrap().clone()
    }

    pub fn call_count(&self) -> usize {
        self.requests.lock().unwrap().len()
    }
}

#[async_trait]
impl Provider for ScriptedProvider {
    fn name(&self) -> &str {
        "scripted"
    }

    async fn complete(&self, request: ProviderRequest) -> Result<ProviderResponse, ProviderError> {
        self.requests.lock().unwrap().push(request);
        let next = self.responses.lock().unwrap().pop_front();
        next.or_else(|| self.fallback.clone())
            .ok_or_else(|| ProviderError::ApiError {
                status_code: 400,
                message: "script exhausted".into(),
            })
    }

    async fn embed(&self, request: EmbeddingRequest) -> Result<EmbeddingResponse, ProviderError> {
        Ok(EmbeddingResponse {
            embeddings: request.inputs.iter().map(|t| keyword_embedding(t)).collect(),
            model: request.model,
            usage: None,
        })
    }
}

pub fn text_response(text: &str) -> ProviderResponse {
    ProviderResponse {
        message: Message::assistant(text),
        usage: Some(Usage {
            prompt_tokens: 10,
            completion_tokens: 5,
            total_tokens: 15,
        }),
        model: "scripted-model".into(),
    }
}

pub fn call_response(calls: Vec<MessageToolCall>, thought: &str) -> ProviderResponse {
    let mut response = text_response(thought);
    response.message.tool_calls = calls;
    response
}

pub fn call(name: &str, args: serde_json::Value) -> MessageToolCall {
    MessageToolCall {
        id: format!("call_{name}"),
        name: name.to_string(),
        arguments: args.to_string(),
    }
}

/// A host platform backed by fixed sets. Ids are shared across scopes.
#[derive(Default)]
pub struct StaticHost {
    scopes: HashSet<ScopeId>,
    roles: HashSet<RoleId>,
    channels: HashSet<ChannelId>,
    actors: HashMap<ActorId, Vec<RoleId>>,
}

impl StaticHost {
    pub fn with_scope(mut self, scope: ScopeId) -> Self {
        self.scopes.insert(scope);
        self
    }

    pub fn with_role(mut self, role: RoleId) -> Self {
        self.roles.insert(role);
        self
    }

    pub fn with_channel(mut self, channel: ChannelId) -> Self {
        self.channels.insert(channel);
        self
    }

    pub fn with_actor(mut self, actor: ActorId, roles: Vec<RoleId>) -> Self {
        self.roles.extend(roles.iter().copied());
        self.actors.insert(actor, roles);
        self
    }
}

#[async_trait]
impl HostPlatform for StaticHost {
    async fn scope_exists(&self, scope: ScopeId) -> bool {
        self.scopes.contains(&scope)
    }

    async fn role_exists(&self, _scope: ScopeId, role: RoleId) -> bool {
        self.roles.contains(&role)
    }

    async fn channel_exists(&self, _scope: ScopeId, channel: ChannelId) -> bool {
        self.channels.contains(&channel)
    }

    async fn actor_exists(&self, _scope: ScopeId, actor: ActorId) -> bool {
        self.actors.contains_key(&actor)
    }

    async fn actor_roles(&self, _scope: ScopeId, actor: ActorId) -> Vec<RoleId> {
        self.actors.get(&actor).cloned().unwrap_or_default()
    }
}
