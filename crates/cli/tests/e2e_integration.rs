//! End-to-end tests for the Convoke assistant.
//!
//! These run the full pipeline: file-backed state, memory retrieval,
//! capability registration and dispatch, and persistence across restarts.

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use convoke_agent::{Assistant, ChatRequest};
use convoke_config::AppConfig;
use convoke_core::capability::{CapabilityOwner, InvocationContext};
use convoke_core::error::{CapabilityError, ProviderError};
use convoke_core::host::{ActorId, ChannelId, HostPlatform, RoleId, ScopeId};
use convoke_core::message::{Message, MessageToolCall, Role};
use convoke_core::provider::{
    EmbeddingRequest, EmbeddingResponse, Provider, ProviderRequest, ProviderResponse, Usage,
};
use convoke_memory::FileBackend;
use serde_json::{Value, json};

// ── Scripted collaborators ───────────────────────────────────────────────

/// Returns queued responses in order and embeds texts by keyword.
struct ScriptedProvider {
    responses: Mutex<VecDeque<ProviderResponse>>,
    requests: Mutex<Vec<ProviderRequest>>,
}

impl ScriptedProvider {
    fn new(responses: Vec<ProviderResponse>) -> Self {
        Self {
            responses: Mutex::new(responses.into()),
            requests: Mutex::new(Vec::new()),
        }
    }

    fn requests(&self) -> Vec<ProviderRequest> {
        self.requests.lock().unwrap().clone()
    }
}

#[async_trait]
impl Provider for ScriptedProvider {
    fn name(&self) -> &str {
        "e2e_scripted"
    }

    async fn complete(&self, request: ProviderRequest) -> Result<ProviderResponse, ProviderError> {
        self.requests.lock().unwrap().push(request);
        self.responses
            .lock()
            .unwrap()
            .pop_front()
            .ok_or_else(|| ProviderError::ApiError {
                status_code: 400,
                message: "no more scripted responses".into(),
            })
    }

    async fn embed(&self, request: EmbeddingRequest) -> Result<EmbeddingResponse, ProviderError> {
        let embeddings = request
            .inputs
            .iter()
            .map(|text| {
                let lower = text.to_lowercase();
                ["weather", "deploy", "coffee"]
                    .iter()
                    .map(|w| if lower.contains(w) { 1.0 } else { 0.0 })
                    .chain(std::iter::once(0.1))
                    .collect()
            })
            .collect();
        Ok(EmbeddingResponse {
            embeddings,
            model: request.model,
            usage: None,
        })
    }
}

fn text_response(text: &str) -> ProviderResponse {
    ProviderResponse {
        message: Message::assistant(text),
        usage: Some(Usage {
            prompt_tokens: 10,
            completion_tokens: 5,
            total_tokens: 15,
        }),
        model: "e2e-model".into(),
    }
}

fn call_response(name: &str, args: Value) -> ProviderResponse {
    let mut response = text_response("");
    response.message.tool_calls.push(MessageToolCall {
        id: format!("call_{name}"),
        name: name.into(),
        arguments: args.to_string(),
    });
    response
}

/// One scope (1), one tutor role (50) held by actor 5.
struct TestHost {
    roles: HashMap<ActorId, Vec<RoleId>>,
}

impl TestHost {
    fn new() -> Self {
        Self {
            roles: HashMap::from([(5, vec![50])]),
        }
    }
}

#[async_trait]
impl HostPlatform for TestHost {
    async fn scope_exists(&self, scope: ScopeId) -> bool {
        scope == 1
    }

    async fn role_exists(&self, _scope: ScopeId, role: RoleId) -> bool {
        role == 50
    }

    async fn channel_exists(&self, _scope: ScopeId, _channel: ChannelId) -> bool {
        true
    }

    async fn actor_exists(&self, _scope: ScopeId, actor: ActorId) -> bool {
        self.roles.contains_key(&actor)
    }

    async fn actor_roles(&self, _scope: ScopeId, actor: ActorId) -> Vec<RoleId> {
        self.roles.get(&actor).cloned().unwrap_or_default()
    }
}

struct Deployments {
    loaded: bool,
}

#[async_trait]
impl CapabilityOwner for Deployments {
    fn name(&self) -> &str {
        "Deployments"
    }

    fn implements(&self, capability: &str) -> bool {
        capability == "deploy_status"
    }

    fn is_loaded(&self) -> bool {
        self.loaded
    }

    async fn invoke(
        &self,
        _capability: &str,
        ctx: &InvocationContext,
        arguments: Value,
    ) -> Result<String, CapabilityError> {
        let service = arguments["service"]
            .as_str()
            .ok_or_else(|| CapabilityError::InvalidArguments("missing service".into()))?;
        Ok(format!("{service} is green (asked by {})", ctx.actor))
    }
}

fn deploy_schema() -> Value {
    json!({
        "name": "deploy_status",
        "description": "Current deploy status of a service",
        "parameters": {
            "type": "object",
            "properties": {"service": {"type": "string"}},
            "required": ["service"]
        }
    })
}

fn config_for(dir: &tempfile::TempDir) -> AppConfig {
    let mut config = AppConfig::default();
    config.storage.path = Some(dir.path().join("db.json").display().to_string());
    config
}

async fn assistant(config: &AppConfig, provider: Arc<ScriptedProvider>) -> Assistant {
    let assistant = Assistant::new(
        config.clone(),
        provider,
        Arc::new(FileBackend::new(config.storage.resolved_path())),
        Arc::new(TestHost::new()),
    )
    .await
    .unwrap();
    {
        let handle = assistant.db().scope(1).await;
        let mut conf = handle.write().await;
        conf.api_key = Some("sk-e2e".into());
        conf.tutors.insert(50);
    }
    assistant
}

// ── Tests ────────────────────────────────────────────────────────────────

#[tokio::test]
async fn e2e_memory_is_retrieved_into_the_prompt() {
    let dir = tempfile::tempdir().unwrap();
    let config = config_for(&dir);
    let provider = Arc::new(ScriptedProvider::new(vec![text_response(
        "Deploys happen on tuesdays.",
    )]));
    let a = assistant(&config, provider.clone()).await;

    let out = a
        .create_memory(1, 5, "deploy day", "We deploy every tuesday after standup")
        .await;
    assert!(out.contains("has been created"), "{out}");

    let reply = a
        .chat(ChatRequest::new(1, 5, 10, "When do we deploy?"))
        .await
        .unwrap();
    assert_eq!(reply, "Deploys happen on tuesdays.");

    let request = &provider.requests()[0];
    assert!(
        request
            .messages
            .iter()
            .any(|m| m.role == Role::System && m.content.contains("every tuesday"))
    );
    a.shutdown().await;
}

#[tokio::test]
async fn e2e_registered_capability_is_dispatched() {
    let dir = tempfile::tempdir().unwrap();
    let config = config_for(&dir);
    let provider = Arc::new(ScriptedProvider::new(vec![
        call_response("deploy_status", json!({"service": "api"})),
        text_response("The api deploy is green."),
    ]));
    let a = assistant(&config, provider.clone()).await;

    a.attach_owner(Arc::new(Deployments { loaded: true })).await;
    assert!(a.register_capability("Deployments", &deploy_schema()).await);

    let reply = a
        .chat(ChatRequest::new(1, 5, 10, "Is the api deployed?"))
        .await
        .unwrap();
    assert_eq!(reply, "The api deploy is green.");

    let requests = provider.requests();
    assert!(
        requests[0]
            .capabilities
            .iter()
            .any(|c| c.name == "deploy_status")
    );
    let result = requests[1]
        .messages
        .iter()
        .find(|m| m.role == Role::Capability)
        .unwrap();
    assert_eq!(result.content, "api is green (asked by 5)");
    a.shutdown().await;
}

#[tokio::test]
async fn e2e_conflicting_registration_keeps_first_owner() {
    let dir = tempfile::tempdir().unwrap();
    let config = config_for(&dir);
    let a = assistant(&config, Arc::new(ScriptedProvider::new(vec![]))).await;

    struct Impostor;

    #[async_trait]
    impl CapabilityOwner for Impostor {
        fn name(&self) -> &str {
            "Impostor"
        }

        fn implements(&self, _capability: &str) -> bool {
            true
        }

        async fn invoke(
            &self,
            _capability: &str,
            _ctx: &InvocationContext,
            _arguments: Value,
        ) -> Result<String, CapabilityError> {
            Ok("fake".into())
        }
    }

    a.attach_owner(Arc::new(Deployments { loaded: true })).await;
    a.attach_owner(Arc::new(Impostor)).await;
    assert!(a.register_capability("Deployments", &deploy_schema()).await);
    assert!(!a.register_capability("Impostor", &deploy_schema()).await);

    let (owner, _) = a.registry().lookup("deploy_status").await.unwrap();
    assert_eq!(owner, "Deployments");
}

#[tokio::test]
async fn e2e_unloaded_owner_is_reconciled_away() {
    let dir = tempfile::tempdir().unwrap();
    let config = config_for(&dir);
    let a = assistant(&config, Arc::new(ScriptedProvider::new(vec![]))).await;

    a.attach_owner(Arc::new(Deployments { loaded: true })).await;
    assert!(a.register_capability("Deployments", &deploy_schema()).await);
    // The owner reloads in a state where it no longer is available.
    a.attach_owner(Arc::new(Deployments { loaded: false })).await;

    let report = a.collect_garbage().await;
    assert_eq!(report.capabilities_dropped, 1);
    assert_eq!(report.health(), "cleaned");
    assert!(a.registry().lookup("deploy_status").await.is_none());
    assert!(a.registry().lookup("search_memories").await.is_some());
}

#[tokio::test]
async fn e2e_state_survives_restart() {
    let dir = tempfile::tempdir().unwrap();
    let config = config_for(&dir);

    let provider = Arc::new(ScriptedProvider::new(vec![text_response("Noted.")]));
    let a = assistant(&config, provider).await;
    a.add_embedding(1, "coffee", "The coffee machine is on floor 3", false)
        .await
        .unwrap()
        .unwrap();
    a.set_persist_conversations(1, true).await;
    a.chat(ChatRequest::new(1, 5, 10, "Remember my coffee order"))
        .await
        .unwrap();
    a.shutdown().await;
    assert!(config.storage.resolved_path().exists());

    let restored = assistant(&config, Arc::new(ScriptedProvider::new(vec![]))).await;
    let memories = restored.list_memories(1).await;
    assert_eq!(memories.len(), 1);
    assert_eq!(memories[0].0, "coffee");
    assert_eq!(restored.conversation_stats(1, 5, 10).await.0, 2);

    let hits = restored
        .search_memories(1, "where is the coffee?", None)
        .await
        .unwrap();
    assert_eq!(hits[0].name, "coffee");
}

#[tokio::test]
async fn e2e_unpersisted_conversations_are_not_written() {
    let dir = tempfile::tempdir().unwrap();
    let config = config_for(&dir);

    let provider = Arc::new(ScriptedProvider::new(vec![text_response("Hi!")]));
    let a = assistant(&config, provider).await;
    a.chat(ChatRequest::new(1, 5, 10, "hello")).await.unwrap();
    assert_eq!(a.conversation_stats(1, 5, 10).await.0, 2);
    a.shutdown().await;

    let restored = assistant(&config, Arc::new(ScriptedProvider::new(vec![]))).await;
    assert_eq!(restored.conversation_stats(1, 5, 10).await, (0, 0));
}
