//! Error types for the Convoke domain.
//!
//! Uses `thiserror` for ergonomic error definitions.
//! Each bounded context has its own error enum.

use thiserror::Error;

/// The top-level error type for all Convoke operations.
#[derive(Debug, Error)]
pub enum Error {
    // --- Provider errors ---
    #[error("Provider error: {0}")]
    Provider(#[from] ProviderError),

    // --- Memory errors ---
    #[error("Memory error: {0}")]
    Memory(#[from] MemoryError),

    // --- Capability errors ---
    #[error("Capability error: {0}")]
    Capability(#[from] CapabilityError),

    // --- Registry errors ---
    #[error("Registry error: {0}")]
    Registry(#[from] RegistryError),

    // --- Storage errors ---
    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    /// The actor, one of its roles, or the channel is blacklisted in the scope.
    #[error("Blacklisted in scope {scope}: {id}")]
    Blacklisted { scope: u64, id: u64 },

    // --- Configuration errors ---
    #[error("Configuration error: {message}")]
    Config { message: String },

    // --- Serialization ---
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    // --- Generic ---
    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    /// A short, human-readable message safe to show to end users.
    ///
    /// Internal detail stays in the logs.
    pub fn user_message(&self) -> &'static str {
        match self {
            Self::Memory(MemoryError::NoCredentials) => {
                "No API key has been set for this server!"
            }
            Self::Provider(ProviderError::AuthenticationFailed(_)) => {
                "The language model rejected the configured credentials."
            }
            Self::Provider(ProviderError::RateLimited { .. }) => {
                "The language model is rate limiting requests, try again shortly."
            }
            Self::Provider(ProviderError::Timeout(_)) => {
                "The language model took too long to respond."
            }
            Self::Provider(_) => "Failed to get a response from the language model.",
            Self::Blacklisted { .. } => "You are not allowed to use the assistant here.",
            _ => "Something went wrong while processing your request.",
        }
    }
}

/// Result type alias using our Error.
pub type Result<T> = std::result::Result<T, Error>;

// --- Bounded context errors ---

#[derive(Debug, Clone, Error)]
pub enum ProviderError {
    #[error("API request failed: {message} (status: {status_code})")]
    ApiError { status_code: u16, message: String },

    #[error("Rate limited by provider, retry after {retry_after_secs}s")]
    RateLimited { retry_after_secs: u64 },

    #[error("Authentication failed: {0}")]
    AuthenticationFailed(String),

    #[error("Model not found: {0}")]
    ModelNotFound(String),

    #[error("Provider not configured: {0}")]
    NotConfigured(String),

    #[error("Request timed out: {0}")]
    Timeout(String),

    #[error("Network error: {0}")]
    Network(String),
}

impl ProviderError {
    /// Whether a retry has a chance of succeeding.
    ///
    /// Transport failures, timeouts, rate limits and 5xx responses are
    /// transient; authentication and configuration problems are not.
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Network(_) | Self::Timeout(_) | Self::RateLimited { .. } => true,
            Self::ApiError { status_code, .. } => *status_code >= 500,
            Self::AuthenticationFailed(_) | Self::ModelNotFound(_) | Self::NotConfigured(_) => {
                false
            }
        }
    }
}

#[derive(Debug, Error)]
pub enum MemoryError {
    #[error("No usable model credentials for this scope")]
    NoCredentials,

    #[error("The entry name '{0}' already exists!")]
    EntryExists(String),

    #[error("No memory named '{0}'")]
    NotFound(String),

    #[error("Memory name '{name}' is {len} characters, the limit is {max}")]
    NameTooLong { name: String, len: usize, max: usize },

    #[error("Embedding generation failed: {0}")]
    EmbeddingFailed(#[from] ProviderError),
}

#[derive(Debug, Error)]
pub enum CapabilityError {
    #[error("Capability not found: {0}")]
    NotFound(String),

    #[error("Capability execution failed: {name}: {reason}")]
    ExecutionFailed { name: String, reason: String },

    #[error("Invalid capability arguments: {0}")]
    InvalidArguments(String),

    #[error("Capability owner '{0}' is not loaded")]
    OwnerUnavailable(String),
}

/// Rejections from the capability registry.
///
/// These are never fatal: the facade logs them and reports `false` to the
/// registering collaborator.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RegistryError {
    #[error("Empty schema provided")]
    EmptySchema,

    #[error("Invalid schema, missing or malformed: {}", missing.join(", "))]
    SchemaInvalid { missing: Vec<String> },

    #[error("{existing_owner} already registered the capability {name}")]
    NameConflict { name: String, existing_owner: String },

    #[error("Owner '{0}' is not loaded or does not exist")]
    OwnerUnknown(String),

    #[error("Owner '{owner}' does not implement a capability called {name}")]
    CapabilityMissing { owner: String, name: String },
}

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("I/O error on {path}: {reason}")]
    Io { path: String, reason: String },

    #[error("Corrupt stored state: {0}")]
    Corrupt(String),
}
