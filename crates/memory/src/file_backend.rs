//! File storage backend: the whole DB as one JSON document on disk.
//!
//! Storage location defaults to `~/.convoke/db.json`. Each save writes a
//! sibling temp file and renames it over the target, so a crash mid-write
//! leaves the previous document intact.

use async_trait::async_trait;
use convoke_core::error::StorageError;
use convoke_core::storage::StorageBackend;
use std::path::{Path, PathBuf};
use tracing::debug;

pub struct FileBackend {
    path: PathBuf,
}

impl FileBackend {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn temp_path(&self) -> PathBuf {
        let mut name = self
            .path
            .file_name()
            .map(|n| n.to_os_string())
            .unwrap_or_else(|| "db.json".into());
        name.push(".tmp");
        self.path.with_file_name(name)
    }

    fn io_error(&self, e: std::io::Error) -> StorageError {
        StorageError::Io {
            path: self.path.display().to_string(),
            reason: e.to_string(),
        }
    }
}

#[async_trait]
impl StorageBackend for FileBackend {
    fn name(&self) -> &str {
        "file"
    }

    async fn load(&self) -> Result<Option<Vec<u8>>, StorageError> {
        match tokio::fs::read(&self.path).await {
            Ok(bytes) => {
                debug!(path = %self.path.display(), bytes = bytes.len(), "Loaded DB document");
                Ok(Some(bytes))
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(self.io_error(e)),
        }
    }

    async fn save(&self, data: Vec<u8>) -> Result<(), StorageError> {
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| self.io_error(e))?;
        }

        let tmp = self.temp_path();
        tokio::fs::write(&tmp, &data)
            .await
            .map_err(|e| self.io_error(e))?;
        tokio::fs::rename(&tmp, &self.path)
            .await
            .map_err(|e| self.io_error(e))?;
        Ok(())
    }
}
