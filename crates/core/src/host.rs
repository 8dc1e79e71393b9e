//! Host platform lookups.
//!
//! The chat platform the assistant lives in is an external collaborator.
//! The core only needs to know whether scopes, roles, channels and actors
//! still exist (for garbage collection) and which roles an actor holds (for
//! role-override resolution).

use async_trait::async_trait;

/// A top-level tenant (a server or community).
pub type ScopeId = u64;
/// A user of the host platform.
pub type ActorId = u64;
/// A role within a scope.
pub type RoleId = u64;
/// A channel or thread within a scope.
pub type ChannelId = u64;

#[async_trait]
pub trait HostPlatform: Send + Sync {
    async fn scope_exists(&self, scope: ScopeId) -> bool;

    async fn role_exists(&self, scope: ScopeId, role: RoleId) -> bool;

    async fn channel_exists(&self, scope: ScopeId, channel: ChannelId) -> bool;

    async fn actor_exists(&self, scope: ScopeId, actor: ActorId) -> bool;

    /// Roles the actor currently holds in the scope. Unknown actors have none.
    async fn actor_roles(&self, scope: ScopeId, actor: ActorId) -> Vec<RoleId>;
}
