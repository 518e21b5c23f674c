//! Error taxonomy for indexing and retrieval.

use docrag_storage::StorageError;

/// Failure reported by an external provider (embedding, rerank, chat).
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ProviderError {
    /// Network, timeout, rate limit or server-side failure; worth retrying
    #[error("transient provider failure: {0}")]
    Transient(String),

    /// Malformed input or unusable response; retrying will not help
    #[error("permanent provider failure: {0}")]
    Permanent(String),
}

impl ProviderError {
    /// Whether a retry may succeed.
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Transient(_))
    }

    /// Classify a transport error.
    pub fn from_reqwest(err: &reqwest::Error) -> Self {
        if err.is_timeout() || err.is_connect() || err.is_request() || err.is_body() {
            Self::Transient(err.to_string())
        } else {
            Self::Permanent(err.to_string())
        }
    }

    /// Classify a non-success HTTP status.
    pub fn from_status(status: reqwest::StatusCode, body: &str) -> Self {
        let message = format!("status {}: {}", status, body);
        if status == reqwest::StatusCode::TOO_MANY_REQUESTS
            || status == reqwest::StatusCode::REQUEST_TIMEOUT
            || status.is_server_error()
        {
            Self::Transient(message)
        } else {
            Self::Permanent(message)
        }
    }
}

/// Errors surfaced by the knowledge-base services.
#[derive(Debug, thiserror::Error)]
pub enum KnowledgeError {
    /// Embedding call failed for good after retries
    #[error("embedding generation failed after {attempts} attempt(s): {message}")]
    EmbeddingGeneration {
        /// Attempts made
        attempts: u32,
        /// Last provider error
        message: String,
    },

    /// Every chunk of a document failed embedding
    #[error("none of {failed} chunk(s) could be embedded; last error: {last_error}")]
    NoChunksEmbedded {
        /// Chunks attempted
        failed: usize,
        /// Error of the last failed chunk
        last_error: String,
    },

    /// Provider returned a zero-norm (or non-finite) vector
    #[error("embedding provider returned a degenerate vector")]
    DegenerateEmbedding,

    /// Provider or store dimensionality disagrees with the configuration
    #[error("embedding dimension mismatch: expected {expected}, got {actual}")]
    DimensionMismatch {
        /// Configured dimension
        expected: usize,
        /// Observed dimension
        actual: usize,
    },

    /// Persistence failure
    #[error("storage error: {0}")]
    Storage(#[from] StorageError),

    /// Reranker could not score the candidates
    #[error("reranker unavailable: {0}")]
    RerankerUnavailable(String),

    /// Answer generation failed
    #[error("answer generation failed: {0}")]
    Generation(String),

    /// A document could not be read
    #[error("failed to load {path}: {message}")]
    Load {
        /// Offending path
        path: String,
        /// Cause
        message: String,
    },
}

/// Result alias for knowledge-base operations.
pub type Result<T> = std::result::Result<T, KnowledgeError>;
