//! Scope state, semantic memory, conversations and persistence for Convoke.

pub mod conversation;
pub mod db;
pub mod file_backend;
pub mod in_memory;
pub mod limits;
pub mod persistence;
pub mod semantic;
pub mod vector;

pub use conversation::ConversationStore;
pub use db::{Db, MAX_MEMORY_NAME_LEN, Memory, ScopeConfig, ScopeHandle};
pub use file_backend::FileBackend;
pub use in_memory::InMemoryStorage;
pub use limits::{ResolvedLimits, resolve_limits};
pub use persistence::{PersistenceManager, SaveOutcome, SaveState, load_db};
pub use semantic::SemanticMemory;
pub use vector::{MemoryHit, cosine_similarity, rank_memories};
