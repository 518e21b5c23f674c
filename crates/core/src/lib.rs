//! docrag core data models.
//!
//! This crate defines the records the knowledge base persists, the derived
//! search types that flow into prompt assembly, and the configuration tree
//! passed to every component.

#![warn(missing_docs)]

mod id;
mod document;
mod config;

pub use id::*;

pub use document::{Document, Chunk, SearchResult, RetrievedChunk, KnowledgeBaseStats};
pub use config::{
    KnowledgeBaseConfig, ChunkingConfig, RetryConfig, EmbeddingConfig, SearchConfig,
    FilterPolicy, FilterConfig, RerankerBackend, RerankerConfig, ContextConfig, GenerationConfig,
    StorageBackend, StorageConfig, IndexingConfig, ChunkingConfigError, ConfigError,
};

/// Timestamp type
pub type Time = chrono::DateTime<chrono::Utc>;
