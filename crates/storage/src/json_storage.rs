//! JSON file storage implementation.
//!
//! Stores each document as `documents/<id>.json` and its chunk set as
//! `chunks/<id>.json`. Files are written to a temporary sibling and renamed
//! into place, so a reader never observes a half-written chunk set.

use std::path::{Path, PathBuf};
use async_trait::async_trait;
use docrag_core::{Chunk, Document, DocumentId, KnowledgeBaseStats};
use tokio::fs;
use tracing::warn;

use super::trait_::{reassign_document, sort_documents, validate_chunk_set, KnowledgeBaseStore, Result};

/// File-based JSON storage backend.
pub struct JsonStorage {
    root: PathBuf,
}

impl JsonStorage {
    /// Create storage rooted at `root`, creating the directory layout.
    pub async fn new(root: impl AsRef<Path>) -> Result<Self> {
        let root = root.as_ref().to_path_buf();

        fs::create_dir_all(root.join("documents")).await?;
        fs::create_dir_all(root.join("chunks")).await?;

        Ok(Self { root })
    }

    fn document_path(&self, id: DocumentId) -> PathBuf {
        self.root.join("documents").join(format!("{}.json", id))
    }

    fn chunks_path(&self, id: DocumentId) -> PathBuf {
        self.root.join("chunks").join(format!("{}.json", id))
    }

    async fn load_chunks(&self, id: DocumentId) -> Result<Vec<Chunk>> {
        Ok(read_json(&self.chunks_path(id)).await?.unwrap_or_default())
    }

    async fn dimension_excluding(&self, document_id: Option<DocumentId>) -> Result<Option<usize>> {
        for document in list_dir::<Document>(&self.root.join("documents")).await? {
            if Some(document.id) == document_id {
                continue;
            }
            if let Some(first) = self.load_chunks(document.id).await?.first() {
                return Ok(Some(first.dimension()));
            }
        }
        Ok(None)
    }

    async fn write_chunks(&self, document_id: DocumentId, chunks: &[Chunk]) -> Result<()> {
        let path = self.chunks_path(document_id);
        if chunks.is_empty() {
            return remove_if_exists(&path).await;
        }

        let mut ordered = chunks.to_vec();
        ordered.sort_by_key(|c| c.chunk_index);
        let json = serde_json::to_string(&ordered)?;
        write_atomic(&path, json.as_bytes()).await
    }

    async fn write_document(&self, document: &Document) -> Result<()> {
        let json = serde_json::to_string_pretty(document)?;
        write_atomic(&self.document_path(document.id), json.as_bytes()).await
    }
}

#[async_trait]
impl KnowledgeBaseStore for JsonStorage {
    async fn save_document(&mut self, document: &Document) -> Result<Document> {
        let mut saved = document.clone();
        if let Some(existing) = self.get_document_by_path(&document.file_path).await? {
            saved.id = existing.id;
        }

        self.write_document(&saved).await?;
        Ok(saved)
    }

    async fn save_chunks(&mut self, document_id: DocumentId, chunks: &[Chunk]) -> Result<()> {
        validate_chunk_set(document_id, chunks, self.dimension_excluding(Some(document_id)).await?)?;
        self.write_chunks(document_id, chunks).await
    }

    async fn commit_document(&mut self, document: &Document, chunks: &[Chunk]) -> Result<Document> {
        let mut saved = document.clone();
        if let Some(existing) = self.get_document_by_path(&document.file_path).await? {
            saved.id = existing.id;
        }
        let chunks = reassign_document(chunks, saved.id);
        validate_chunk_set(saved.id, &chunks, self.dimension_excluding(Some(saved.id)).await?)?;

        // Chunks first: without its document record a chunk file is never read.
        self.write_chunks(saved.id, &chunks).await?;
        self.write_document(&saved).await?;
        Ok(saved)
    }

    async fn delete_document(&mut self, id: DocumentId) -> Result<bool> {
        remove_if_exists(&self.chunks_path(id)).await?;
        let path = self.document_path(id);
        let existed = fs::try_exists(&path).await?;
        remove_if_exists(&path).await?;
        Ok(existed)
    }

    async fn get_all_documents(&self) -> Result<Vec<Document>> {
        let mut documents = list_dir(&self.root.join("documents")).await?;
        sort_documents(&mut documents);
        Ok(documents)
    }

    async fn get_document(&self, id: DocumentId) -> Result<Option<Document>> {
        read_json(&self.document_path(id)).await
    }

    async fn get_document_by_path(&self, file_path: &str) -> Result<Option<Document>> {
        let documents: Vec<Document> = list_dir(&self.root.join("documents")).await?;
        Ok(documents.into_iter().find(|d| d.file_path == file_path))
    }

    async fn count_chunks(&self, document_id: DocumentId) -> Result<usize> {
        Ok(self.load_chunks(document_id).await?.len())
    }

    async fn get_statistics(&self) -> Result<KnowledgeBaseStats> {
        let documents: Vec<Document> = list_dir(&self.root.join("documents")).await?;
        let mut chunks_count = 0;
        for document in &documents {
            chunks_count += self.count_chunks(document.id).await?;
        }
        Ok(KnowledgeBaseStats {
            documents_count: documents.len(),
            chunks_count,
        })
    }

    async fn scan_all_chunks(&self) -> Result<Vec<Chunk>> {
        let mut documents: Vec<Document> = list_dir(&self.root.join("documents")).await?;
        documents.sort_by_key(|d| d.id);

        let mut chunks = Vec::new();
        for document in documents {
            chunks.extend(self.load_chunks(document.id).await?);
        }
        Ok(chunks)
    }

    async fn embedding_dimension(&self) -> Result<Option<usize>> {
        self.dimension_excluding(None).await
    }
}

async fn write_atomic(path: &Path, bytes: &[u8]) -> Result<()> {
    let tmp = path.with_extension("json.tmp");
    fs::write(&tmp, bytes).await?;
    fs::rename(&tmp, path).await?;
    Ok(())
}

async fn remove_if_exists(path: &Path) -> Result<()> {
    fs::remove_file(path).await.or_else(|e| {
        if e.kind() == std::io::ErrorKind::NotFound { Ok(()) } else { Err(e) }
    })?;
    Ok(())
}

async fn read_json<T: serde::de::DeserializeOwned>(path: &Path) -> Result<Option<T>> {
    match fs::read_to_string(path).await {
        Ok(json) => {
            let value = serde_json::from_str(&json)?;
            Ok(Some(value))
        }
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
        Err(e) => Err(e.into()),
    }
}

async fn list_dir<T: serde::de::DeserializeOwned>(dir: &Path) -> Result<Vec<T>> {
    let mut items = Vec::new();
    let mut rd = fs::read_dir(dir).await?;
    while let Some(entry) = rd.next_entry().await? {
        if entry.path().extension().and_then(|s| s.to_str()) != Some("json") {
            continue;
        }
        match read_json(&entry.path()).await {
            Ok(Some(item)) => items.push(item),
            Ok(None) => {}
            Err(e) => warn!(path = %entry.path().display(), "Skipping unreadable record: {}", e),
        }
    }
    Ok(items)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::trait_::test_support::chunk;
    use crate::StorageError;

    #[tokio::test]
    async fn test_documents_survive_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let saved = {
            let mut storage = JsonStorage::new(dir.path()).await.unwrap();
            let mut doc = Document::new("notes/a.md", "A", "alpha beta");
            doc.chunk_count = 1;
            let chunks = vec![chunk(doc.id, 0, vec![0.6, 0.8])];
            storage.commit_document(&doc, &chunks).await.unwrap()
        };

        let storage = JsonStorage::new(dir.path()).await.unwrap();
        let loaded = storage.get_document(saved.id).await.unwrap().unwrap();
        assert_eq!(loaded.file_path, "notes/a.md");
        assert_eq!(storage.count_chunks(saved.id).await.unwrap(), 1);

        let scanned = storage.scan_all_chunks().await.unwrap();
        assert_eq!(scanned[0].embedding, vec![0.6, 0.8]);
    }

    #[tokio::test]
    async fn test_reindex_same_path_keeps_one_document() {
        let dir = tempfile::tempdir().unwrap();
        let mut storage = JsonStorage::new(dir.path()).await.unwrap();

        let first = Document::new("a.md", "A", "v1");
        let chunks: Vec<_> = (0..3).map(|i| chunk(first.id, i, vec![1.0, 0.0])).collect();
        let first = storage.commit_document(&first, &chunks).await.unwrap();

        let second = Document::new("a.md", "A", "v2");
        let chunks: Vec<_> = (0..2).map(|i| chunk(second.id, i, vec![1.0, 0.0])).collect();
        let second = storage.commit_document(&second, &chunks).await.unwrap();

        assert_eq!(first.id, second.id);
        let stats = storage.get_statistics().await.unwrap();
        assert_eq!(stats.documents_count, 1);
        assert_eq!(stats.chunks_count, 2);
    }

    #[tokio::test]
    async fn test_delete_removes_chunks() {
        let dir = tempfile::tempdir().unwrap();
        let mut storage = JsonStorage::new(dir.path()).await.unwrap();

        let doc = Document::new("a.md", "A", "text");
        let saved = storage.commit_document(&doc, &[chunk(doc.id, 0, vec![1.0])]).await.unwrap();

        assert!(storage.delete_document(saved.id).await.unwrap());
        assert!(storage.get_document(saved.id).await.unwrap().is_none());
        assert!(storage.scan_all_chunks().await.unwrap().is_empty());
        assert!(!storage.delete_document(saved.id).await.unwrap());
    }

    #[tokio::test]
    async fn test_commit_rejects_mixed_dimensions() {
        let dir = tempfile::tempdir().unwrap();
        let mut storage = JsonStorage::new(dir.path()).await.unwrap();
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
        let dir = tempfile::tempdir().unwrap();
        let mut storage = JsonStorage::new(dir.path()).await.unwrap();
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
        assert_eq!(stored.chunk_count, 2);
        assert_eq!(storage.count_chunks(a.id).await.unwrap(), 2);
    }
}
