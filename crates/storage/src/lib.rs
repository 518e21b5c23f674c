//! Storage abstraction and implementations for the knowledge base.
//!
//! This crate provides the [`KnowledgeBaseStore`] trait with an in-memory
//! backend, a JSON-file backend (default) and a SQLite backend behind the
//! `sqlite` feature.

#![warn(missing_docs)]

pub mod trait_;
pub mod memory_storage;
#[cfg(feature = "json")]
pub mod json_storage;
#[cfg(feature = "sqlite")]
pub mod sqlite_storage;

pub use trait_::{KnowledgeBaseStore, StorageError, Result, validate_chunk_set};
pub use memory_storage::MemoryStorage;
#[cfg(feature = "json")]
pub use json_storage::JsonStorage;
#[cfg(feature = "sqlite")]
pub use sqlite_storage::SqliteStorage;

use docrag_core::{StorageBackend, StorageConfig};
use tracing::debug;

/// Open the backend selected by `config`.
pub async fn open(config: &StorageConfig) -> Result<Box<dyn KnowledgeBaseStore>> {
    debug!(backend = ?config.backend, path = %config.path.display(), "Opening knowledge-base store");

    match config.backend {
        StorageBackend::Memory => Ok(Box::new(MemoryStorage::new())),
        #[cfg(feature = "json")]
        StorageBackend::Json => Ok(Box::new(JsonStorage::new(&config.path).await?)),
        #[cfg(feature = "sqlite")]
        StorageBackend::Sqlite => {
            if let Some(parent) = config.path.parent().filter(|p| !p.as_os_str().is_empty()) {
                tokio::fs::create_dir_all(parent).await?;
            }
            Ok(Box::new(SqliteStorage::new_from_path(&config.path).await?))
        }
        #[allow(unreachable_patterns)]
        other => Err(StorageError::Other(format!(
            "storage backend {:?} is not compiled in; enable the matching cargo feature",
            other
        ))),
    }
}
