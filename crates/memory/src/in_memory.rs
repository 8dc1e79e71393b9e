//! In-memory storage backend, useful for testing and ephemeral sessions.

use async_trait::async_trait;
use convoke_core::error::StorageError;
use convoke_core::storage::StorageBackend;
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};

/// Keeps the last saved document in a buffer.
#[derive(Default)]
pub struct InMemoryStorage {
    data: Mutex<Option<Vec<u8>>>,
    saves: AtomicUsize,
}

impl InMemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed the backend as if a document had been saved earlier.
    pub fn with_document(data: Vec<u8>) -> Self {
        Self {
            data: Mutex::new(Some(data)),
            saves: AtomicUsize::new(0),
        }
    }

    /// Number of completed saves.
    pub fn save_count(&self) -> usize {
        self.saves.load(Ordering::SeqCst)
    }

    /// The last saved document.
    pub fn contents(&self) -> Option<Vec<u8>> {
        self.data.lock().map(|d| d.clone()).unwrap_or_default()
    }
}

#[async_trait]
impl StorageBackend for InMemoryStorage {
    fn name(&self) -> &str {
        "in_memory"
    }

    async fn load(&self) -> Result<Option<Vec<u8>>, StorageError> {
        Ok(self.contents())
    }

    async fn save(&self, data: Vec<u8>) -> Result<(), StorageError> {
        let mut guard = self
            .data
            .lock()
            .map_err(|e| StorageError::Corrupt(e.to_string()))?;
        *guard = Some(data);
        self.saves.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}
