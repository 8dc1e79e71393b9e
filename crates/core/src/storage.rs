//! Durable storage backend trait.
//!
//! The whole DB is serialized into one blob and written atomically per save.
//! Backends only move bytes; (de)serialization lives with the DB.

use async_trait::async_trait;

use crate::error::StorageError;

#[async_trait]
pub trait StorageBackend: Send + Sync {
    /// Backend name for logging (e.g., "file", "in_memory").
    fn name(&self) -> &str;

    /// Load the last saved blob. `None` when nothing has been saved yet.
    async fn load(&self) -> std::result::Result<Option<Vec<u8>>, StorageError>;

    /// Replace the stored blob.
    async fn save(&self, data: Vec<u8>) -> std::result::Result<(), StorageError>;
}
