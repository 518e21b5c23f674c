//! Configuration for indexing, retrieval and answer generation.
//!
//! Every component receives its slice of [`KnowledgeBaseConfig`] through its
//! constructor. The whole tree deserializes from TOML and every field has a
//! default, so an empty file is a valid configuration.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Invalid chunk size / overlap combination.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ChunkingConfigError {
    /// Chunk size must be positive
    #[error("chunk_size must be greater than zero")]
    ZeroChunkSize,

    /// Overlap must be strictly smaller than the chunk size
    #[error("overlap_size ({overlap_size}) must be smaller than chunk_size ({chunk_size})")]
    OverlapTooLarge {
        /// Configured chunk size
        chunk_size: usize,
        /// Configured overlap
        overlap_size: usize,
    },
}

/// Errors raised while loading or validating configuration.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// Bad chunking parameters
    #[error("chunking config: {0}")]
    Chunking(#[from] ChunkingConfigError),

    /// A similarity threshold outside its allowed range
    #[error("{field} must be within [0, 1], got {value}")]
    InvalidThreshold {
        /// Offending field
        field: &'static str,
        /// Offending value
        value: f32,
    },

    /// Any other invalid value
    #[error("invalid config: {0}")]
    Invalid(String),

    /// Config file could not be read
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Config file is not valid TOML for this schema
    #[error("TOML error: {0}")]
    Parse(#[from] toml::de::Error),
}

/// Sliding-window chunking parameters, in characters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChunkingConfig {
    /// Window length
    #[serde(default = "default_chunk_size")]
    pub chunk_size: usize,

    /// Characters shared by consecutive windows
    #[serde(default = "default_overlap_size")]
    pub overlap_size: usize,
}

fn default_chunk_size() -> usize {
    1000
}

fn default_overlap_size() -> usize {
    200
}

impl Default for ChunkingConfig {
    fn default() -> Self {
        Self {
            chunk_size: default_chunk_size(),
            overlap_size: default_overlap_size(),
        }
    }
}

impl ChunkingConfig {
    /// Create a validated chunking config.
    pub fn new(chunk_size: usize, overlap_size: usize) -> Result<Self, ChunkingConfigError> {
        let config = Self { chunk_size, overlap_size };
        config.validate()?;
        Ok(config)
    }

    /// Check `0 <= overlap_size < chunk_size`.
    pub fn validate(&self) -> Result<(), ChunkingConfigError> {
        if self.chunk_size == 0 {
            return Err(ChunkingConfigError::ZeroChunkSize);
        }
        if self.overlap_size >= self.chunk_size {
            return Err(ChunkingConfigError::OverlapTooLarge {
                chunk_size: self.chunk_size,
                overlap_size: self.overlap_size,
            });
        }
        Ok(())
    }

    /// Distance the window advances between chunks.
    pub fn stride(&self) -> usize {
        self.chunk_size - self.overlap_size
    }
}

/// Bounded exponential backoff for provider calls.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetryConfig {
    /// Total attempts including the first one
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    /// Delay before the first retry
    #[serde(default = "default_base_delay_ms")]
    pub base_delay_ms: u64,

    /// Upper bound for any single delay
    #[serde(default = "default_max_delay_ms")]
    pub max_delay_ms: u64,
}

fn default_max_attempts() -> u32 {
    3
}

fn default_base_delay_ms() -> u64 {
    500
}

fn default_max_delay_ms() -> u64 {
    8_000
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            base_delay_ms: default_base_delay_ms(),
            max_delay_ms: default_max_delay_ms(),
        }
    }
}

impl RetryConfig {
    /// Delay to wait after the given failed attempt (1-based).
    ///
    /// Doubles from `base_delay_ms` and saturates at `max_delay_ms`.
    pub fn delay_after(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(31);
        let delay = self.base_delay_ms.saturating_mul(1u64 << exponent);
        Duration::from_millis(delay.min(self.max_delay_ms))
    }
}

/// Embedding provider settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EmbeddingConfig {
    /// Ollama server URL
    #[serde(default = "default_ollama_url")]
    pub ollama_url: String,

    /// Embedding model name
    #[serde(default = "default_embedding_model")]
    pub model: String,

    /// Expected embedding dimension
    #[serde(default = "default_dimension")]
    pub dimension: usize,

    /// Per-request timeout
    #[serde(default = "default_embedding_timeout")]
    pub timeout_secs: u64,

    /// Retry policy for transient failures
    #[serde(default)]
    pub retry: RetryConfig,
}

fn default_ollama_url() -> String {
    "http://localhost:11434".to_string()
}

fn default_embedding_model() -> String {
    "nomic-embed-text".to_string()
}

fn default_dimension() -> usize {
    768 // nomic-embed-text dimension
}

fn default_embedding_timeout() -> u64 {
    60
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            ollama_url: default_ollama_url(),
            model: default_embedding_model(),
            dimension: default_dimension(),
            timeout_secs: default_embedding_timeout(),
            retry: RetryConfig::default(),
        }
    }
}

/// Default search parameters.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SearchConfig {
    /// Maximum number of results
    #[serde(default = "default_limit")]
    pub limit: usize,

    /// Minimum similarity score (values above 1.0 match nothing)
    #[serde(default)]
    pub min_similarity: f32,
}

fn default_limit() -> usize {
    5
}

impl Default for SearchConfig {
    fn default() -> Self {
        Self {
            limit: default_limit(),
            min_similarity: 0.0,
        }
    }
}

/// Post-search relevance policy.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize, Default)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum FilterPolicy {
    /// Pass results through unchanged
    #[default]
    None,

    /// Drop results scoring below `min_similarity`
    Threshold {
        /// Minimum similarity score
        min_similarity: f32,
        /// Keep at most this many survivors
        #[serde(default)]
        keep_top: Option<usize>,
    },

    /// Re-score with the reranker and keep the best `max_chunks`
    Reranker {
        /// Maximum chunks after reranking
        #[serde(default = "default_max_chunks")]
        max_chunks: usize,
    },

    /// Threshold first, then rerank the survivors
    Hybrid {
        /// Minimum similarity score
        min_similarity: f32,
        /// Keep at most this many threshold survivors
        #[serde(default)]
        keep_top: Option<usize>,
        /// Maximum chunks after reranking
        #[serde(default = "default_max_chunks")]
        max_chunks: usize,
    },
}

fn default_max_chunks() -> usize {
    3
}

impl FilterPolicy {
    /// Whether this policy calls the reranker.
    pub fn uses_reranker(&self) -> bool {
        matches!(self, Self::Reranker { .. } | Self::Hybrid { .. })
    }
}

/// Which reranker implementation scores candidates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum RerankerBackend {
    /// Ollama `/api/rerank` with a dedicated rerank model
    #[default]
    Ollama,
    /// The chat model judges each chunk
    Judge,
}

/// Reranker endpoint settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RerankerConfig {
    /// Implementation to use
    #[serde(default)]
    pub backend: RerankerBackend,

    /// Ollama server URL
    #[serde(default = "default_ollama_url")]
    pub ollama_url: String,

    /// Reranker model name
    #[serde(default = "default_reranker_model")]
    pub model: String,

    /// Per-request timeout
    #[serde(default = "default_reranker_timeout")]
    pub timeout_secs: u64,
}

fn default_reranker_model() -> String {
    "qwen3-reranker:0.6b".to_string()
}

fn default_reranker_timeout() -> u64 {
    120
}

impl Default for RerankerConfig {
    fn default() -> Self {
        Self {
            backend: RerankerBackend::default(),
            ollama_url: default_ollama_url(),
            model: default_reranker_model(),
            timeout_secs: default_reranker_timeout(),
        }
    }
}

/// Relevance filtering settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct FilterConfig {
    /// Selected policy
    #[serde(default)]
    pub policy: FilterPolicy,

    /// Reranker endpoint, used by the reranker and hybrid policies
    #[serde(default)]
    pub reranker: RerankerConfig,
}

/// Prompt assembly settings.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct ContextConfig {
    /// Upper bound on estimated context tokens; unlimited when unset
    #[serde(default)]
    pub max_context_tokens: Option<usize>,
}

/// Answer generation settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GenerationConfig {
    /// Ollama server URL
    #[serde(default = "default_ollama_url")]
    pub ollama_url: String,

    /// Chat model name
    #[serde(default = "default_generation_model")]
    pub model: String,

    /// Sampling temperature
    #[serde(default = "default_temperature")]
    pub temperature: f32,

    /// Per-request timeout
    #[serde(default = "default_generation_timeout")]
    pub timeout_secs: u64,
}

fn default_generation_model() -> String {
    "llama3.2".to_string()
}

fn default_temperature() -> f32 {
    0.2
}

fn default_generation_timeout() -> u64 {
    120
}

impl Default for GenerationConfig {
    fn default() -> Self {
        Self {
            ollama_url: default_ollama_url(),
            model: default_generation_model(),
            temperature: default_temperature(),
            timeout_secs: default_generation_timeout(),
        }
    }
}

/// Storage backend kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum StorageBackend {
    /// Process-local, lost on exit
    Memory,
    /// One JSON file per document and per chunk set
    #[default]
    Json,
    /// SQLite database (requires the `sqlite` feature)
    Sqlite,
}

/// Storage settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StorageConfig {
    /// Backend kind
    #[serde(default)]
    pub backend: StorageBackend,

    /// Directory (json) or database file (sqlite)
    #[serde(default = "default_storage_path")]
    pub path: PathBuf,
}

fn default_storage_path() -> PathBuf {
    PathBuf::from(".docrag")
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            backend: StorageBackend::default(),
            path: default_storage_path(),
        }
    }
}

/// Indexing pipeline settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IndexingConfig {
    /// Documents indexed concurrently when walking a directory
    #[serde(default = "default_concurrency")]
    pub concurrency: usize,

    /// File extensions picked up by the directory loader
    #[serde(default = "default_extensions")]
    pub extensions: Vec<String>,
}

fn default_concurrency() -> usize {
    1
}

fn default_extensions() -> Vec<String> {
    vec!["md".to_string(), "txt".to_string()]
}

impl Default for IndexingConfig {
    fn default() -> Self {
        Self {
            concurrency: default_concurrency(),
            extensions: default_extensions(),
        }
    }
}

/// Top-level configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct KnowledgeBaseConfig {
    /// Chunking
    #[serde(default)]
    pub chunking: ChunkingConfig,

    /// Embedding provider
    #[serde(default)]
    pub embedding: EmbeddingConfig,

    /// Search defaults
    #[serde(default)]
    pub search: SearchConfig,

    /// Relevance filter
    #[serde(default)]
    pub filter: FilterConfig,

    /// Prompt assembly
    #[serde(default)]
    pub context: ContextConfig,

    /// Answer generation
    #[serde(default)]
    pub generation: GenerationConfig,

    /// Storage
    #[serde(default)]
    pub storage: StorageConfig,

    /// Indexing
    #[serde(default)]
    pub indexing: IndexingConfig,
}

impl KnowledgeBaseConfig {
    /// Read, parse and validate a TOML config file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path.as_ref())?;
        Self::from_toml(&text)
    }

    /// Parse and validate TOML text.
    pub fn from_toml(text: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    /// Reject configurations no component can run with.
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.chunking.validate()?;

        if !self.search.min_similarity.is_finite() || self.search.min_similarity < 0.0 {
            return Err(ConfigError::Invalid(format!(
                "search.min_similarity must be a non-negative number, got {}",
                self.search.min_similarity
            )));
        }
        if self.search.limit == 0 {
            return Err(ConfigError::Invalid("search.limit must be greater than zero".into()));
        }

        match self.filter.policy {
            FilterPolicy::None => {}
            FilterPolicy::Threshold { min_similarity, keep_top } => {
                check_unit_interval("filter.min_similarity", min_similarity)?;
                check_positive("filter.keep_top", keep_top)?;
            }
            FilterPolicy::Reranker { max_chunks } => {
                check_positive("filter.max_chunks", Some(max_chunks))?;
            }
            FilterPolicy::Hybrid { min_similarity, keep_top, max_chunks } => {
                check_unit_interval("filter.min_similarity", min_similarity)?;
                check_positive("filter.keep_top", keep_top)?;
                check_positive("filter.max_chunks", Some(max_chunks))?;
            }
        }

        let retry = &self.embedding.retry;
        if retry.max_attempts == 0 {
            return Err(ConfigError::Invalid("embedding.retry.max_attempts must be at least 1".into()));
        }
        if retry.base_delay_ms > retry.max_delay_ms {
            return Err(ConfigError::Invalid(
                "embedding.retry.base_delay_ms must not exceed max_delay_ms".into(),
            ));
        }
        if self.embedding.dimension == 0 {
            return Err(ConfigError::Invalid("embedding.dimension must be greater than zero".into()));
        }
        if self.indexing.concurrency == 0 {
            return Err(ConfigError::Invalid("indexing.concurrency must be at least 1".into()));
        }

        Ok(())
    }
}

fn check_unit_interval(field: &'static str, value: f32) -> Result<(), ConfigError> {
    if (0.0..=1.0).contains(&value) {
        Ok(())
    } else {
        Err(ConfigError::InvalidThreshold { field, value })
    }
}

fn check_positive(field: &str, value: Option<usize>) -> Result<(), ConfigError> {
    match value {
        Some(0) => Err(ConfigError::Invalid(format!("{field} must be greater than zero"))),
        _ => Ok(()),
    }
}
