//! In-process storage backend.
//!
//! Holds everything in ordered maps. Useful for tests and for one-shot
//! sessions that index and query without persisting anything.

use async_trait::async_trait;
use docrag_core::{Chunk, Document, DocumentId, KnowledgeBaseStats};
use std::collections::BTreeMap;

use super::trait_::{reassign_document, sort_documents, validate_chunk_set, KnowledgeBaseStore, Result};

/// Memory-backed knowledge-base store.
#[derive(Debug, Clone, Default)]
pub struct MemoryStorage {
    documents: BTreeMap<DocumentId, Document>,
    chunks: BTreeMap<DocumentId, Vec<Chunk>>,
}

impl MemoryStorage {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    fn dimension_excluding(&self, document_id: Option<DocumentId>) -> Option<usize> {
        self.chunks
            .iter()
            .filter(|(id, _)| Some(**id) != document_id)
            .flat_map(|(_, chunks)| chunks.first())
            .map(Chunk::dimension)
            .next()
    }

    fn id_for_path(&self, file_path: &str) -> Option<DocumentId> {
        self.documents.values().find(|d| d.file_path == file_path).map(|d| d.id)
    }

    fn replace_chunks(&mut self, document_id: DocumentId, chunks: &[Chunk]) {
        let mut ordered = chunks.to_vec();
        ordered.sort_by_key(|c| c.chunk_index);
        if ordered.is_empty() {
            self.chunks.remove(&document_id);
        } else {
            self.chunks.insert(document_id, ordered);
        }
    }
}

#[async_trait]
impl KnowledgeBaseStore for MemoryStorage {
    async fn save_document(&mut self, document: &Document) -> Result<Document> {
        let mut saved = document.clone();
        if let Some(id) = self.id_for_path(&document.file_path) {
            saved.id = id;
        }
        self.documents.insert(saved.id, saved.clone());
        Ok(saved)
    }

    async fn save_chunks(&mut self, document_id: DocumentId, chunks: &[Chunk]) -> Result<()> {
        validate_chunk_set(document_id, chunks, self.dimension_excluding(Some(document_id)))?;
        self.replace_chunks(document_id, chunks);
        Ok(())
    }

    async fn commit_document(&mut self, document: &Document, chunks: &[Chunk]) -> Result<Document> {
        let mut saved = document.clone();
        if let Some(id) = self.id_for_path(&document.file_path) {
            saved.id = id;
        }
        let chunks = reassign_document(chunks, saved.id);
        validate_chunk_set(saved.id, &chunks, self.dimension_excluding(Some(saved.id)))?;

        self.documents.insert(saved.id, saved.clone());
        self.replace_chunks(saved.id, &chunks);
        Ok(saved)
    }

    async fn delete_document(&mut self, id: DocumentId) -> Result<bool> {
        self.chunks.remove(&id);
        Ok(self.documents.remove(&id).is_some())
    }

    async fn get_all_documents(&self) -> Result<Vec<Document>> {
        let mut documents: Vec<Document> = self.documents.values().cloned().collect();
        sort_documents(&mut documents);
        Ok(documents)
    }

    async fn get_document(&self, id: DocumentId) -> Result<Option<Document>> {
        Ok(self.documents.get(&id).cloned())
    }

    async fn get_document_by_path(&self, file_path: &str) -> Result<Option<Document>> {
        Ok(self.documents.values().find(|d| d.file_path == file_path).cloned())
    }

    async fn count_chunks(&self, document_id: DocumentId) -> Result<usize> {
        Ok(self.chunks.get(&document_id).map_or(0, Vec::len))
    }

    async fn get_statistics(&self) -> Result<KnowledgeBaseStats> {
        Ok(KnowledgeBaseStats {
            documents_count: self.documents.len(),
            chunks_count: self.chunks.values().map(Vec::len).sum(),
        })
    }

    async fn scan_all_chunks(&self) -> Result<Vec<Chunk>> {
        Ok(self.chunks.values().flatten().cloned().collect())
    }

    async fn embedding_dimension(&self) -> Result<Option<usize>> {
        Ok(self.dimension_excluding(None))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::trait_::test_support::chunk;
    use crate::StorageError;

    #[tokio::test]
    async fn test_save_document_upserts_by_path() {
        let mut storage = MemoryStorage::new();

        let first = storage.save_document(&Document::new("a.md", "A", "one")).await.unwrap();
        let second = storage.save_document(&Document::new("a.md", "A v2", "two")).await.unwrap();

        assert_eq!(first.id, second.id);
        let all = storage.get_all_documents().await.unwrap();
        assert_eq!(all.len(), 1);
        assert_eq!(all[0].title, "A v2");
    }

    #[tokio::test]
    async fn test_save_chunks_supersedes_previous_set() {
        let mut storage = MemoryStorage::new();
        let doc = storage.save_document(&Document::new("a.md", "A", "text")).await.unwrap();

        let three: Vec<_> = (0..3).map(|i| chunk(doc.id, i, vec![1.0, 0.0])).collect();
        storage.save_chunks(doc.id, &three).await.unwrap();
        let two: Vec<_> = (0..2).map(|i| chunk(doc.id, i, vec![0.0, 1.0])).collect();
        storage.save_chunks(doc.id, &two).await.unwrap();

        assert_eq!(storage.count_chunks(doc.id).await.unwrap(), 2);
        assert_eq!(storage.get_statistics().await.unwrap().chunks_count, 2);
    }

    #[tokio::test]
    async fn test_dimension_mismatch_across_documents() {
        let mut storage = MemoryStorage::new();
        let a = storage.save_document(&Document::new("a.md", "A", "a")).await.unwrap();
        let b = storage.save_document(&Document::new("b.md", "B", "b")).await.unwrap();

        storage.save_chunks(a.id, &[chunk(a.id, 0, vec![1.0, 0.0])]).await.unwrap();
        let err = storage.save_chunks(b.id, &[chunk(b.id, 0, vec![1.0, 0.0, 0.0])]).await.unwrap_err();

        assert!(matches!(err, StorageError::DimensionMismatch { expected: 2, actual: 3 }));
        assert_eq!(storage.count_chunks(b.id).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_commit_document_and_delete() {
        let mut storage = MemoryStorage::new();
        let mut doc = Document::new("a.md", "A", "text");
        doc.chunk_count = 2;
        let chunks: Vec<_> = (0..2).map(|i| chunk(doc.id, i, vec![1.0])).collect();

        let saved = storage.commit_document(&doc, &chunks).await.unwrap();
        assert_eq!(storage.count_chunks(saved.id).await.unwrap(), saved.chunk_count);
        assert_eq!(storage.embedding_dimension().await.unwrap(), Some(1));

        assert!(storage.delete_document(saved.id).await.unwrap());
        assert!(!storage.delete_document(saved.id).await.unwrap());
        assert_eq!(storage.get_statistics().await.unwrap(), KnowledgeBaseStats::default());
        assert_eq!(storage.embedding_dimension().await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_commit_rejects_mixed_dimensions() {
        let mut storage = MemoryStorage::new();
        let a = Document::new("a.md", "A", "a");
        storage.commit_document(&a, &[chunk(a.id, 0, vec![1.0, 0.0])]).await.unwrap();

        let b = Document::new("b.md", "B", "b");
        let err = storage.commit_document(&b, &[chunk(b.id, 0, vec![1.0])]).await.unwrap_err();
        assert!(matches!(err, StorageError::DimensionMismatch { expected: 2, actual: 1 }));
        assert!(storage.get_document_by_path("b.md").await.unwrap().is_none());
        assert_eq!(storage.get_statistics().await.unwrap().documents_count, 1);
    }

    #[tokio::test]
    async fn test_rejected_reindex_keeps_previous_version() {
        let mut storage = MemoryStorage::new();
        let c = Document::new("c.md", "C", "c");
        storage.commit_document(&c, &[chunk(c.id, 0, vec![1.0, 0.0])]).await.unwrap();
        let mut a = Document::new("a.md", "A", "first");
        a.chunk_count = 2;
        let chunks: Vec<_> = (0..2).map(|i| chunk(a.id, i, vec![0.0, 1.0])).collect();
        let a = storage.commit_document(&a, &chunks).await.unwrap();

        let mut replacement = Document::new("a.md", "A2", "second");
        replacement.chunk_count = 1;
        let err = storage
            .commit_document(&replacement, &[chunk(replacement.id, 0, vec![1.0, 0.0, 0.0])])
            .await
            .unwrap_err();

        assert!(matches!(err, StorageError::DimensionMismatch { expected: 2, actual: 3 }));
        let stored = storage.get_document(a.id).await.unwrap().unwrap();
        assert_eq!(stored.title, "A");
        assert_eq!(stored.content, "first");
        assert_eq!(storage.count_chunks(a.id).await.unwrap(), 2);
    }
}
