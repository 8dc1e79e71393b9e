//! Capability traits: the abstraction over things the model may invoke.
//!
//! Capabilities are exposed by external collaborators ("owners") that
//! register schemas at runtime. The registry keeps the schemas; the owner
//! keeps the callable. Invocation goes through a uniform interface keyed by
//! (owner, name), so no reflection is needed.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::CapabilityError;
use crate::host::{ActorId, ChannelId, RoleId, ScopeId};

/// A capability definition sent to the LLM so it knows what it can call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CapabilitySchema {
    /// The capability name
    pub name: String,

    /// Description of what the capability does
    pub description: String,

    /// JSON Schema describing the capability's parameters
    pub parameters: serde_json::Value,
}

/// A request to execute a capability, parsed from the model's response.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CapabilityCall {
    /// Unique call ID (matches the LLM's tool_call.id)
    pub id: String,

    /// Name of the capability to execute
    pub name: String,

    /// Arguments as a JSON value
    pub arguments: serde_json::Value,
}

/// Who is asking, and where. Passed to every invocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InvocationContext {
    pub scope: ScopeId,
    pub actor: ActorId,
    pub channel: ChannelId,
    pub actor_roles: Vec<RoleId>,
}

/// A collaborator that owns a set of named capabilities.
///
/// Owners are attached to the registry when they load and detached when they
/// unload. `implements` and `is_loaded` back the registration checks and the
/// periodic reconciliation pass.
#[async_trait]
pub trait CapabilityOwner: Send + Sync {
    /// Unique owner name.
    fn name(&self) -> &str;

    /// Whether this owner currently exposes a callable with this name.
    fn implements(&self, capability: &str) -> bool;

    /// Liveness check; an unloaded owner loses its registrations.
    fn is_loaded(&self) -> bool {
        true
    }

    /// Invoke a capability. The returned text is fed back to the model.
    async fn invoke(
        &self,
        capability: &str,
        ctx: &InvocationContext,
        arguments: serde_json::Value,
    ) -> std::result::Result<String, CapabilityError>;
}

/// An ad hoc callable supplied by a caller for a single chat request.
#[async_trait]
pub trait CapabilityHandler: Send + Sync {
    async fn call(
        &self,
        ctx: &InvocationContext,
        arguments: serde_json::Value,
    ) -> std::result::Result<String, CapabilityError>;
}
