//! The orchestration loop: one inbound message in, one reply out.
//!
//! Each turn walks an explicit state machine:
//!
//! ```text
//! Idle -> Retrieving -> Composing -> AwaitingModel <-> DispatchingCapability
//!                                          |
//!                                          v
//!                                         Done
//! ```
//!
//! The loop between `AwaitingModel` and `DispatchingCapability` is bounded by
//! the scope's `max_function_calls`. No scope lock is held across a model,
//! embedding or capability call.

use chrono::Utc;
use convoke_capabilities::CapabilityRegistry;
use convoke_config::OrchestratorConfig;
use convoke_core::capability::{CapabilityHandler, InvocationContext};
use convoke_core::error::{CapabilityError, Error, MemoryError, Result};
use convoke_core::event::{DomainEvent, EventBus};
use convoke_core::host::{ActorId, ChannelId, HostPlatform, ScopeId};
use convoke_core::message::{ConversationKey, Message, MessageToolCall};
use convoke_core::provider::{Credentials, Provider, ProviderRequest};
use convoke_memory::{
    ConversationStore, Db, MemoryHit, PersistenceManager, ResolvedLimits, SemanticMemory,
    resolve_limits,
};
use convoke_providers::{RetryPolicy, RetryingProvider};
use futures::future::join_all;
use serde_json::Value;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

use crate::composer::{CompositionInput, compose, merge_capabilities};

/// Reply used when the ceiling is hit before the model produced any text.
pub const CEILING_REPLY: &str =
    "I've reached the maximum number of function calls for this message. Please provide further guidance.";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TurnState {
    Idle,
    Retrieving,
    Composing,
    AwaitingModel,
    DispatchingCapability,
    Done,
}

/// One inbound chat message plus any capabilities offered only for this call.
pub struct ChatRequest {
    pub scope: ScopeId,
    pub actor: ActorId,
    pub channel: ChannelId,
    pub message: String,
    pub ad_hoc_schemas: Vec<Value>,
    pub ad_hoc_handlers: HashMap<String, Arc<dyn CapabilityHandler>>,
    /// Offer registered capabilities alongside the ad hoc ones.
    pub extend_capabilities: bool,
}

impl ChatRequest {
    pub fn new(
        scope: ScopeId,
        actor: ActorId,
        channel: ChannelId,
        message: impl Into<String>,
    ) -> Self {
        Self {
            scope,
            actor,
            channel,
            message: message.into(),
            ad_hoc_schemas: Vec::new(),
            ad_hoc_handlers: HashMap::new(),
            extend_capabilities: true,
        }
    }

    /// Offer a capability for this call only. It takes precedence over a
    /// registered capability of the same name.
    pub fn with_capability(mut self, schema: Value, handler: Arc<dyn CapabilityHandler>) -> Self {
        if let Some(name) = schema.get("name").and_then(Value::as_str) {
            self.ad_hoc_handlers.insert(name.to_string(), handler);
        }
        self.ad_hoc_schemas.push(schema);
        self
    }

    /// Offer only the ad hoc capabilities.
    pub fn without_registered_capabilities(mut self) -> Self {
        self.extend_capabilities = false;
        self
    }

    pub fn key(&self) -> ConversationKey {
        ConversationKey::new(self.actor, self.channel)
    }
}

/// What happened during a turn.
#[derive(Debug, Clone)]
pub struct TurnReport {
    pub reply: String,
    /// Model calls made.
    pub iterations: u32,
    pub capability_calls: usize,
    pub hit_ceiling: bool,
    pub memories: Vec<MemoryHit>,
    pub states: Vec<TurnState>,
}

struct Turn {
    scope: ScopeId,
    state: TurnState,
    states: Vec<TurnState>,
}

impl Turn {
    fn new(scope: ScopeId) -> Self {
        Self {
            scope,
            state: TurnState::Idle,
            states: vec![TurnState::Idle],
        }
    }

    fn advance(&mut self, next: TurnState) {
        debug!(scope = self.scope, from = ?self.state, to = ?next, "Turn state");
        self.state = next;
        self.states.push(next);
    }
}

pub fn retry_policy(config: &OrchestratorConfig) -> RetryPolicy {
    RetryPolicy {
        timeout: Duration::from_secs(config.model_timeout_secs),
        max_retries: config.max_retries,
        base_backoff: Duration::from_millis(config.retry_backoff_ms),
    }
}

pub struct Orchestrator {
    db: Arc<Db>,
    conversations: ConversationStore,
    memory: Arc<SemanticMemory>,
    registry: Arc<CapabilityRegistry>,
    provider: Arc<dyn Provider>,
    persistence: Arc<PersistenceManager>,
    host: Arc<dyn HostPlatform>,
    events: Arc<EventBus>,
    config: OrchestratorConfig,
}

impl Orchestrator {
    /// Model calls go through a [`RetryingProvider`] built from `config`.
    pub fn new(
        provider: Arc<dyn Provider>,
        memory: Arc<SemanticMemory>,
        registry: Arc<CapabilityRegistry>,
        persistence: Arc<PersistenceManager>,
        host: Arc<dyn HostPlatform>,
        config: OrchestratorConfig,
    ) -> Self {
        let db = persistence.db().clone();
        let provider = Arc::new(RetryingProvider::new(provider).with_policy(retry_policy(&config)));
        Self {
            conversations: ConversationStore::new(db.clone()),
            db,
            memory,
            registry,
            provider,
            persistence,
            host,
            events: Arc::new(EventBus::default()),
            config,
        }
    }

    pub fn with_events(mut self, events: Arc<EventBus>) -> Self {
        self.events = events;
        self
    }

    /// Run one turn and return its reply.
    pub async fn run(&self, request: &ChatRequest) -> Result<TurnReport> {
        let scope = request.scope;
        let key = request.key();
        let mut turn = Turn::new(scope);

        // ── Retrieving ──
        turn.advance(TurnState::Retrieving);
        let roles = self.host.actor_roles(scope, request.actor).await;
        let handle = self.db.scope(scope).await;
        let settings = {
            let conf = handle.read().await;
            if !conf.credentials().is_usable() {
                return Err(MemoryError::NoCredentials.into());
            }
            let ids = [request.actor, request.channel];
            if let Some(id) = conf.blacklisted(ids.iter().chain(roles.iter())) {
                info!(scope, id, "Refusing blacklisted requester");
                return Err(Error::Blacklisted { scope, id });
            }
            TurnSettings {
                limits: resolve_limits(&conf, &roles),
                credentials: conf.credentials(),
                system_prompt: conf.system_prompt.clone(),
                instructions: conf.prompt.clone(),
                temperature: conf.temperature,
                top_n: conf.top_n,
                min_relatedness: conf.min_relatedness,
                max_function_calls: conf.max_function_calls,
                use_function_calls: conf.use_function_calls,
                disabled: conf.disabled_functions.clone(),
            }
        };

        let memories = if settings.top_n == 0 {
            Vec::new()
        } else {
            match self
                .memory
                .search_with_threshold(
                    scope,
                    &request.message,
                    Some(settings.top_n),
                    settings.min_relatedness,
                )
                .await
            {
                Ok(hits) => hits,
                Err(e) => {
                    warn!(scope, error = %e, "Memory retrieval failed, continuing without");
                    Vec::new()
                }
            }
        };

        // ── Composing ──
        turn.advance(TurnState::Composing);
        let capabilities = if settings.use_function_calls {
            merge_capabilities(
                self.registry.schemas(&settings.disabled).await,
                &request.ad_hoc_schemas,
                request.extend_capabilities,
            )
        } else {
            Vec::new()
        };

        let user_message = Message::user(request.message.clone());
        self.conversations
            .append(scope, key, user_message.clone(), &settings.limits)
            .await;

        let ctx = InvocationContext {
            scope,
            actor: request.actor,
            channel: request.channel,
            actor_roles: roles,
        };

        let mut iterations = 0u32;
        let mut rounds = 0u32;
        let mut capability_calls = 0usize;
        let mut partial: Option<String> = None;
        let mut hit_ceiling = false;
        // Calls and results of this turn. Committed to the store at Done, so
        // the retention budget never trims a result before the model sees it.
        let mut in_flight: Vec<Message> = Vec::new();

        let reply = loop {
            let mut history = self.conversations.get(scope, key).await;
            if !history.iter().any(|m| m.id == user_message.id) {
                history.insert(0, user_message.clone());
            }
            history.extend(in_flight.iter().cloned());
            let prompt = compose(CompositionInput {
                model: &settings.limits.model,
                system_prompt: &settings.system_prompt,
                instructions: &settings.instructions,
                memories: &memories,
                history: &history,
                capabilities: capabilities.clone(),
                completion_reserve: self.config.completion_reserve,
            });

            // ── AwaitingModel ──
            turn.advance(TurnState::AwaitingModel);
            let response = self
                .provider
                .complete(ProviderRequest {
                    model: settings.limits.model.clone(),
                    messages: prompt.messages,
                    temperature: settings.temperature,
                    max_tokens: self.config.max_response_tokens,
                    capabilities: prompt.capabilities,
                    credentials: settings.credentials.clone(),
                })
                .await?;
            iterations += 1;

            self.events.publish(DomainEvent::ResponseGenerated {
                scope,
                conversation: key.to_string(),
                model: response.model.clone(),
                iterations,
                timestamp: Utc::now(),
            });

            let message = response.message;
            if message.tool_calls.is_empty() {
                break message.content;
            }
            if !message.content.trim().is_empty() {
                partial = Some(message.content.clone());
            }
            if rounds >= settings.max_function_calls {
                warn!(
                    scope,
                    iteration = iterations,
                    max = settings.max_function_calls,
                    "Function call ceiling reached, ending turn"
                );
                hit_ceiling = true;
                break partial.take().unwrap_or_else(|| CEILING_REPLY.to_string());
            }

            // ── DispatchingCapability ──
            turn.advance(TurnState::DispatchingCapability);
            let calls = message.tool_calls.clone();
            in_flight.push(message);

            let results = join_all(calls.iter().map(|call| self.dispatch(request, &ctx, call))).await;
            for (call, output) in calls.iter().zip(results) {
                in_flight.push(Message::capability_result(&call.id, output));
            }
            capability_calls += calls.len();
            rounds += 1;
        };

        // ── Done ──
        turn.advance(TurnState::Done);
        in_flight.push(Message::assistant(reply.clone()));
        for message in in_flight {
            self.conversations
                .append(scope, key, message, &settings.limits)
                .await;
        }
        self.persistence.schedule();

        info!(
            scope,
            conversation = %key,
            iterations,
            capability_calls,
            memories = memories.len(),
            "Reply generated"
        );

        Ok(TurnReport {
            reply,
            iterations,
            capability_calls,
            hit_ceiling,
            memories,
            states: turn.states,
        })
    }

    /// Resolve one call against the ad hoc handlers, then the registry.
    /// Failures come back as text for the model.
    async fn dispatch(
        &self,
        request: &ChatRequest,
        ctx: &InvocationContext,
        call: &MessageToolCall,
    ) -> String {
        let start = Instant::now();
        let raw = if call.arguments.trim().is_empty() {
            "{}"
        } else {
            call.arguments.as_str()
        };

        let result = match serde_json::from_str::<Value>(raw) {
            Err(e) => Err(CapabilityError::InvalidArguments(e.to_string())),
            Ok(arguments) => match request.ad_hoc_handlers.get(&call.name) {
                Some(handler) => handler.call(ctx, arguments).await,
                None => self.registry.invoke(&call.name, ctx, arguments).await,
            },
        };

        let duration_ms = start.elapsed().as_millis() as u64;
        self.events.publish(DomainEvent::CapabilityInvoked {
            scope: ctx.scope,
            name: call.name.clone(),
            success: result.is_ok(),
            duration_ms,
            timestamp: Utc::now(),
        });

        match result {
            Ok(output) => {
                debug!(scope = ctx.scope, capability = %call.name, duration_ms, "Capability returned");
                output
            }
            Err(e) => {
                warn!(scope = ctx.scope, capability = %call.name, error = %e, "Capability failed");
                format!("Error: {e}")
            }
        }
    }
}

/// Scope settings copied out under the read lock.
struct TurnSettings {
    limits: ResolvedLimits,
    credentials: Credentials,
    system_prompt: String,
    instructions: String,
    temperature: f32,
    top_n: usize,
    min_relatedness: f32,
    max_function_calls: u32,
    use_function_calls: bool,
    disabled: HashSet<String>,
}
