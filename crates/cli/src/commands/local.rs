//! Wiring for running the assistant from a terminal.
//!
//! There is no chat platform behind the binary: every scope, actor and
//! channel the operator names exists, and nobody holds any role.

use async_trait::async_trait;
use convoke_agent::Assistant;
use convoke_config::AppConfig;
use convoke_core::host::{ActorId, ChannelId, HostPlatform, RoleId, ScopeId};
use convoke_memory::FileBackend;
use convoke_providers::OpenAiCompatProvider;
use std::sync::Arc;
use tracing::debug;

pub struct LocalHost;

#[async_trait]
impl HostPlatform for LocalHost {
    async fn scope_exists(&self, _scope: ScopeId) -> bool {
        true
    }

    async fn role_exists(&self, _scope: ScopeId, _role: RoleId) -> bool {
        true
    }

    async fn channel_exists(&self, _scope: ScopeId, _channel: ChannelId) -> bool {
        true
    }

    async fn actor_exists(&self, _scope: ScopeId, _actor: ActorId) -> bool {
        true
    }

    async fn actor_roles(&self, _scope: ScopeId, _actor: ActorId) -> Vec<RoleId> {
        Vec::new()
    }
}

/// Build an assistant over the configured DB file and endpoint.
pub async fn bootstrap(config: &AppConfig) -> Result<Assistant, Box<dyn std::error::Error>> {
    let path = config.storage.resolved_path();
    debug!(path = %path.display(), "Opening DB");
    let provider = Arc::new(OpenAiCompatProvider::new(
        "openai",
        config.api_url.clone(),
        config.api_key.clone(),
    ));
    let assistant = Assistant::new(
        config.clone(),
        provider,
        Arc::new(FileBackend::new(path)),
        Arc::new(LocalHost),
    )
    .await?;
    Ok(assistant)
}

/// Make the scope usable with the operator's configured endpoint.
///
/// The API key stays in the config file; the provider falls back to it when
/// a request carries none.
pub async fn prepare_scope(assistant: &Assistant, scope: ScopeId, config: &AppConfig) {
    let handle = assistant.db().scope(scope).await;
    let mut conf = handle.write().await;
    if !conf.credentials().is_usable() && config.api_key.is_some() {
        conf.endpoint_override = Some(config.api_url.clone());
    }
    // The operator is always allowed to teach.
    conf.tutors.insert(OPERATOR);
}

/// Actor id used for the operator when none is given.
pub const OPERATOR: ActorId = 0;
