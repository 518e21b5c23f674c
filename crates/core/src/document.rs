//! Document and chunk model - the persisted shape of the knowledge base.

use serde::{Deserialize, Serialize};
use crate::id::{ChunkId, DocumentId};
use crate::Time;

/// A source document that has been indexed.
///
/// `file_path` is the natural key: indexing the same path again keeps
/// the same `id` and replaces the content and chunk set.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Document {
    /// Unique identifier
    pub id: DocumentId,

    /// Source path (unique)
    pub file_path: String,

    /// Display title
    pub title: String,

    /// Full text content
    pub content: String,

    /// When the document was last indexed
    pub indexed_at: Time,

    /// Number of chunks committed for this document
    pub chunk_count: usize,
}

impl Document {
    /// Create a new document record with a fresh id.
    pub fn new(file_path: impl Into<String>, title: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            id: DocumentId::new(),
            file_path: file_path.into(),
            title: title.into(),
            content: content.into(),
            indexed_at: chrono::Utc::now(),
            chunk_count: 0,
        }
    }
}

/// An embedded slice of a document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Chunk {
    /// Unique identifier
    pub id: ChunkId,

    /// Owning document
    pub document_id: DocumentId,

    /// Position within the document (0-based)
    pub chunk_index: usize,

    /// Chunk text
    pub content: String,

    /// Character offset where the chunk starts in the document content
    pub start_offset: usize,

    /// Character offset one past the chunk end
    pub end_offset: usize,

    /// Estimated token count
    pub token_count: usize,

    /// L2-normalized embedding vector
    pub embedding: Vec<f32>,

    /// Created at
    pub created_at: Time,
}

impl Chunk {
    /// Dimensionality of the stored embedding.
    pub fn dimension(&self) -> usize {
        self.embedding.len()
    }
}

/// A chunk matched by similarity search.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchResult {
    /// Matched chunk
    pub chunk_id: ChunkId,

    /// Owning document
    pub document_id: DocumentId,

    /// Chunk text
    pub content: String,

    /// Similarity score in [0, 1]
    pub similarity: f32,

    /// Position within the document
    pub chunk_index: usize,

    /// Title of the owning document, when known
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub document_title: Option<String>,

    /// Path of the owning document, when known
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub document_file_path: Option<String>,
}

/// A search result carried into prompt assembly.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetrievedChunk {
    /// Matched chunk
    pub chunk_id: ChunkId,

    /// Owning document
    pub document_id: DocumentId,

    /// Chunk text
    pub content: String,

    /// Similarity score in [0, 1]
    pub similarity: f32,

    /// Position within the document
    pub chunk_index: usize,

    /// Title of the owning document, when known
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub document_title: Option<String>,

    /// Path of the owning document, when known
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub document_file_path: Option<String>,

    /// Relevance assigned by a reranker, if one ran
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rerank_score: Option<f32>,
}

impl RetrievedChunk {
    /// Label used to cite this chunk: the document path, then title, then id.
    pub fn source_label(&self) -> String {
        self.document_file_path
            .clone()
            .or_else(|| self.document_title.clone())
            .unwrap_or_else(|| self.document_id.to_string())
    }
}

impl From<SearchResult> for RetrievedChunk {
    fn from(result: SearchResult) -> Self {
        Self {
            chunk_id: result.chunk_id,
            document_id: result.document_id,
            content: result.content,
            similarity: result.similarity,
            chunk_index: result.chunk_index,
            document_title: result.document_title,
            document_file_path: result.document_file_path,
            rerank_score: None,
        }
    }
}

/// Record counts for the knowledge base.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct KnowledgeBaseStats {
    /// Number of documents
    pub documents_count: usize,

    /// Number of chunks across all documents
    pub chunks_count: usize,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn result() -> SearchResult {
        SearchResult {
            chunk_id: ChunkId::new(),
            document_id: DocumentId::new(),
            content: "text".to_string(),
            similarity: 0.8,
            chunk_index: 2,
            document_title: Some("Guide".to_string()),
            document_file_path: None,
        }
    }

    #[test]
    fn test_source_label_prefers_path_then_title() {
        let mut chunk = RetrievedChunk::from(result());
        assert_eq!(chunk.source_label(), "Guide");

        chunk.document_file_path = Some("docs/guide.md".to_string());
        assert_eq!(chunk.source_label(), "docs/guide.md");

        chunk.document_file_path = None;
        chunk.document_title = None;
        assert_eq!(chunk.source_label(), chunk.document_id.to_string());
    }

    #[test]
    fn test_retrieved_chunk_keeps_search_fields() {
        let source = result();
        let chunk = RetrievedChunk::from(source.clone());
        assert_eq!(chunk.chunk_id, source.chunk_id);
        assert_eq!(chunk.similarity, source.similarity);
        assert_eq!(chunk.chunk_index, 2);
        assert!(chunk.rerank_score.is_none());
    }
}
