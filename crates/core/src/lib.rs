//! # Convoke Core
//!
//! Domain types, traits, and error definitions for the Convoke assistant
//! orchestration engine. This crate has **no framework dependencies**; it
//! defines the domain model that all other crates implement against.
//!
//! ## Design Philosophy
//!
//! Every external collaborator (language model, embedder, host chat platform,
//! capability owners, durable storage) is a trait here. Implementations live
//! in their respective crates or in the embedding application. This enables:
//! - Swapping implementations via configuration
//! - Easy testing with scripted mock implementations
//! - Clean dependency graph (all crates depend inward on core)

pub mod capability;
pub mod error;
pub mod event;
pub mod host;
pub mod message;
pub mod provider;
pub mod storage;
pub mod token;

// Re-export key types at crate root for ergonomics
pub use capability::{
    CapabilityCall, CapabilityHandler, CapabilityOwner, CapabilitySchema, InvocationContext,
};
pub use error::{Error, Result};
pub use event::{DomainEvent, EventBus};
pub use host::{ActorId, ChannelId, HostPlatform, RoleId, ScopeId};
pub use message::{Conversation, ConversationKey, Message, MessageToolCall, Role};
pub use provider::{Credentials, Provider, ProviderRequest, ProviderResponse};
pub use storage::StorageBackend;
