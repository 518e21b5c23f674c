//! Knowledge-base store abstraction.

use async_trait::async_trait;
use docrag_core::{Chunk, Document, DocumentId, KnowledgeBaseStats};

/// Error type for storage operations.
pub type Result<T> = std::result::Result<T, StorageError>;

/// Errors that can occur during storage operations.
#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization/deserialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Database error
    #[cfg(feature = "sqlite")]
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    /// Chunk embeddings disagree on dimensionality
    #[error("embedding dimension mismatch: store holds {expected}, got {actual}")]
    DimensionMismatch {
        /// Dimension already present in the store
        expected: usize,
        /// Dimension of the rejected embedding
        actual: usize,
    },

    /// A chunk set that cannot be stored as given
    #[error("invalid chunk: {0}")]
    InvalidChunk(String),

    /// Other error
    #[error("{0}")]
    Other(String),
}

/// Persistence for documents and their embedded chunks.
///
/// Writers take `&mut self`; callers share a store behind a
/// `tokio::sync::RwLock` so that writes are serialized and searches run
/// concurrently.
#[async_trait]
pub trait KnowledgeBaseStore: Send + Sync {
    /// Upsert a document keyed by `file_path`.
    ///
    /// When a document with the same path exists its id is kept; the
    /// returned record carries the id actually stored.
    async fn save_document(&mut self, document: &Document) -> Result<Document>;

    /// Replace the full chunk set of a document.
    async fn save_chunks(&mut self, document_id: DocumentId, chunks: &[Chunk]) -> Result<()>;

    /// Upsert a document and replace its chunks as one unit.
    ///
    /// The chunk set is validated before anything is written: a rejected
    /// set leaves both the document record and its previous chunks as they
    /// were. Chunks are re-pointed at the stored document id.
    async fn commit_document(&mut self, document: &Document, chunks: &[Chunk]) -> Result<Document>;

    /// Delete a document and its chunks. Returns whether it existed.
    async fn delete_document(&mut self, id: DocumentId) -> Result<bool>;

    /// All documents, most recently indexed first.
    async fn get_all_documents(&self) -> Result<Vec<Document>>;

    /// Load a document by id.
    async fn get_document(&self, id: DocumentId) -> Result<Option<Document>>;

    /// Load a document by its source path.
    async fn get_document_by_path(&self, file_path: &str) -> Result<Option<Document>>;

    /// Number of stored chunks for a document.
    async fn count_chunks(&self, document_id: DocumentId) -> Result<usize>;

    /// Document and chunk counts.
    async fn get_statistics(&self) -> Result<KnowledgeBaseStats>;

    /// Every stored chunk with its embedding, ordered by document then index.
    async fn scan_all_chunks(&self) -> Result<Vec<Chunk>>;

    /// Dimension shared by all stored embeddings, `None` when empty.
    async fn embedding_dimension(&self) -> Result<Option<usize>>;
}

#[async_trait]
impl KnowledgeBaseStore for Box<dyn KnowledgeBaseStore> {
    async fn save_document(&mut self, document: &Document) -> Result<Document> {
        (**self).save_document(document).await
    }

    async fn save_chunks(&mut self, document_id: DocumentId, chunks: &[Chunk]) -> Result<()> {
        (**self).save_chunks(document_id, chunks).await
    }

    async fn commit_document(&mut self, document: &Document, chunks: &[Chunk]) -> Result<Document> {
        (**self).commit_document(document, chunks).await
    }

    async fn delete_document(&mut self, id: DocumentId) -> Result<bool> {
        (**self).delete_document(id).await
    }

    async fn get_all_documents(&self) -> Result<Vec<Document>> {
        (**self).get_all_documents().await
    }

    async fn get_document(&self, id: DocumentId) -> Result<Option<Document>> {
        (**self).get_document(id).await
    }

    async fn get_document_by_path(&self, file_path: &str) -> Result<Option<Document>> {
        (**self).get_document_by_path(file_path).await
    }

    async fn count_chunks(&self, document_id: DocumentId) -> Result<usize> {
        (**self).count_chunks(document_id).await
    }

    async fn get_statistics(&self) -> Result<KnowledgeBaseStats> {
        (**self).get_statistics().await
    }

    async fn scan_all_chunks(&self) -> Result<Vec<Chunk>> {
        (**self).scan_all_chunks().await
    }

    async fn embedding_dimension(&self) -> Result<Option<usize>> {
        (**self).embedding_dimension().await
    }
}

/// Check a chunk set before it replaces a document's chunks.
///
/// Every chunk must belong to `document_id`, chunk indexes must be unique,
/// and all embeddings must share one dimension equal to `existing` (the
/// dimension of the rest of the store) when that is known.
pub fn validate_chunk_set(
    document_id: DocumentId,
    chunks: &[Chunk],
    existing: Option<usize>,
) -> Result<()> {
    let mut expected = existing;
    let mut seen = std::collections::HashSet::with_capacity(chunks.len());

    for chunk in chunks {
        if chunk.document_id != document_id {
            return Err(StorageError::InvalidChunk(format!(
                "chunk {} belongs to document {}, not {}",
                chunk.id, chunk.document_id, document_id
            )));
        }
        if !seen.insert(chunk.chunk_index) {
            return Err(StorageError::InvalidChunk(format!(
                "duplicate chunk_index {} for document {}",
                chunk.chunk_index, document_id
            )));
        }
        if chunk.embedding.is_empty() {
            return Err(StorageError::InvalidChunk(format!("chunk {} has an empty embedding", chunk.id)));
        }
        match expected {
            Some(dimension) if dimension != chunk.dimension() => {
                return Err(StorageError::DimensionMismatch {
                    expected: dimension,
                    actual: chunk.dimension(),
                });
            }
            Some(_) => {}
            None => expected = Some(chunk.dimension()),
        }
    }

    Ok(())
}

/// Order documents most recently indexed first, then by path.
pub(crate) fn sort_documents(documents: &mut [Document]) {
    documents.sort_by(|a, b| {
        b.indexed_at
            .cmp(&a.indexed_at)
            .then_with(|| a.file_path.cmp(&b.file_path))
    });
}

/// Point every chunk at `document_id`.
pub(crate) fn reassign_document(chunks: &[Chunk], document_id: DocumentId) -> Vec<Chunk> {
    chunks
        .iter()
        .cloned()
        .map(|mut chunk| {
            chunk.document_id = document_id;
            chunk
        })
        .collect()
}


#[cfg(test)]
mod tests {
    use super::test_support::chunk;
    use super::*;

    #[test]
    fn test_validate_rejects_foreign_chunk() {
        let doc = DocumentId::new();
        let chunks = vec![chunk(DocumentId::new(), 0, vec![1.0])];
        assert!(matches!(
            validate_chunk_set(doc, &chunks, None),
            Err(StorageError::InvalidChunk(_))
        ));
    }

    #[test]
    fn test_validate_rejects_mixed_dimensions() {
        let doc = DocumentId::new();
        let chunks = vec![chunk(doc, 0, vec![1.0, 0.0]), chunk(doc, 1, vec![1.0, 0.0, 0.0])];
        assert!(matches!(
            validate_chunk_set(doc, &chunks, None),
            Err(StorageError::DimensionMismatch { expected: 2, actual: 3 })
        ));
    }

    #[test]
    fn test_validate_checks_existing_dimension() {
        let doc = DocumentId::new();
        let chunks = vec![chunk(doc, 0, vec![1.0, 0.0])];
        assert!(validate_chunk_set(doc, &chunks, Some(2)).is_ok());
        assert!(validate_chunk_set(doc, &chunks, Some(4)).is_err());
    }

    #[test]
    fn test_validate_rejects_duplicate_index() {
        let doc = DocumentId::new();
        let chunks = vec![chunk(doc, 0, vec![1.0]), chunk(doc, 0, vec![1.0])];
        assert!(validate_chunk_set(doc, &chunks, None).is_err());
    }
}
