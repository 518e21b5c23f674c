//! Knowledge-base indexing and retrieval.
//!
//! Indexing: [`DocumentLoader`] → [`TextChunker`] → [`EmbeddingProvider`]
//! → [`VectorNormalizer`] → store, driven by [`Indexer`].
//!
//! Querying: [`SearchService`] → [`RelevanceFilter`] → [`ContextAssembler`]
//! → [`AnswerGenerator`], driven by [`RagService`].

#![warn(missing_docs)]

pub mod chunker;
pub mod context;
pub mod embedding;
pub mod error;
pub mod filter;
pub mod generation;
pub mod indexer;
pub mod loader;
pub mod normalizer;
pub mod reranker;
pub mod search;
pub mod service;

#[cfg(test)]
mod testing;

pub use chunker::{estimate_tokens, TextChunk, TextChunker};
pub use context::{ContextAssembler, Prompt};
pub use embedding::{EmbeddingProvider, OllamaEmbeddingClient, RetryingEmbedder};
pub use error::{KnowledgeError, ProviderError, Result};
pub use filter::{FilterOutcome, RelevanceFilter};
pub use generation::{AnswerGenerator, GeneratedAnswer, OllamaChatClient};
pub use indexer::{DirectoryIndexReport, IndexOutcome, IndexStatus, Indexer};
pub use loader::{DocumentLoader, FsDocumentLoader, LoadedDocument};
pub use normalizer::VectorNormalizer;
pub use reranker::{LlmJudgeReranker, OllamaRerankerClient, Reranker};
pub use search::SearchService;
pub use service::{RagAnswer, RagService, Retrieval};
