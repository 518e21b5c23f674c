//! Indexing pipeline: load, chunk, embed, normalize, commit.
//!
//! All embeddings of a document are computed before anything is written,
//! then the document and its chunk set are committed in one store call. A
//! cancelled or failed run leaves the previous version of the document in
//! place.

use docrag_core::{Chunk, ChunkId, Document, DocumentId};
use docrag_storage::KnowledgeBaseStore;
use futures::stream::{self, StreamExt};
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{debug, error, info, warn};

use crate::chunker::TextChunker;
use crate::embedding::RetryingEmbedder;
use crate::error::{KnowledgeError, Result};
use crate::loader::{DocumentLoader, LoadedDocument};
use crate::normalizer::VectorNormalizer;

/// How indexing one document ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum IndexStatus {
    /// Every chunk embedded and stored
    Indexed,
    /// Stored, but some chunks failed embedding
    Degraded,
    /// Nothing stored for this attempt
    Failed,
}

/// Outcome of indexing one document.
#[derive(Debug, Clone, Serialize)]
pub struct IndexOutcome {
    /// Source path
    pub file_path: String,

    /// Stored document id, when something was committed
    pub document_id: Option<DocumentId>,

    /// Result classification
    pub status: IndexStatus,

    /// Chunks committed
    pub chunk_count: usize,

    /// Chunks whose embedding failed
    pub failed_chunks: usize,

    /// Error message for failed or degraded runs
    pub error: Option<String>,
}

impl IndexOutcome {
    /// Whether anything was stored.
    pub fn success(&self) -> bool {
        self.status != IndexStatus::Failed
    }

    fn failed(file_path: impl Into<String>, failed_chunks: usize, error: impl ToString) -> Self {
        Self {
            file_path: file_path.into(),
            document_id: None,
            status: IndexStatus::Failed,
            chunk_count: 0,
            failed_chunks,
            error: Some(error.to_string()),
        }
    }
}

/// Per-document outcomes of a directory run, in path order.
#[derive(Debug, Clone, Default, Serialize)]
pub struct DirectoryIndexReport {
    /// One outcome per discovered file
    pub outcomes: Vec<IndexOutcome>,
}

impl DirectoryIndexReport {
    /// Fully indexed documents.
    pub fn indexed(&self) -> usize {
        self.count(IndexStatus::Indexed)
    }

    /// Documents stored with missing chunks.
    pub fn degraded(&self) -> usize {
        self.count(IndexStatus::Degraded)
    }

    /// Documents that were not stored.
    pub fn failed(&self) -> usize {
        self.count(IndexStatus::Failed)
    }

    /// Chunks committed across all documents.
    pub fn total_chunks(&self) -> usize {
        self.outcomes.iter().map(|o| o.chunk_count).sum()
    }

    fn count(&self, status: IndexStatus) -> usize {
        self.outcomes.iter().filter(|o| o.status == status).count()
    }
}

/// Turns documents into embedded chunks in a shared store.
pub struct Indexer<S: KnowledgeBaseStore> {
    store: Arc<RwLock<S>>,
    loader: Arc<dyn DocumentLoader>,
    chunker: TextChunker,
    embedder: RetryingEmbedder,
    normalizer: VectorNormalizer,
    concurrency: usize,
}

impl<S: KnowledgeBaseStore> Indexer<S> {
    /// Create an indexer that processes one document at a time.
    pub fn new(
        store: Arc<RwLock<S>>,
        loader: Arc<dyn DocumentLoader>,
        chunker: TextChunker,
        embedder: RetryingEmbedder,
    ) -> Self {
        Self {
            store,
            loader,
            chunker,
            embedder,
            normalizer: VectorNormalizer::new(),
            concurrency: 1,
        }
    }

    /// Number of documents indexed concurrently by [`index_directory`](Self::index_directory).
    pub fn with_concurrency(mut self, concurrency: usize) -> Self {
        self.concurrency = concurrency.max(1);
        self
    }

    /// Load and index a single file.
    pub async fn index_path(&self, path: &Path) -> IndexOutcome {
        match self.loader.load(path).await {
            Ok(doc) => self.index_document(doc).await,
            Err(e) => {
                error!("Failed to load {}: {}", path.display(), e);
                IndexOutcome::failed(path.display().to_string(), 0, e)
            }
        }
    }

    /// Index every loadable file under `dir`.
    ///
    /// One document failing never stops the others. Outcomes are reported
    /// in discovery order whatever the concurrency.
    pub async fn index_directory(&self, dir: &Path) -> Result<DirectoryIndexReport> {
        let paths: Vec<PathBuf> = self.loader.discover(dir).await?;
        info!("Indexing {} documents from {}", paths.len(), dir.display());

        let outcomes: Vec<IndexOutcome> = stream::iter(paths)
            .map(|path| async move { self.index_path(&path).await })
            .buffered(self.concurrency)
            .collect()
            .await;

        let report = DirectoryIndexReport { outcomes };
        info!(
            indexed = report.indexed(),
            degraded = report.degraded(),
            failed = report.failed(),
            chunks = report.total_chunks(),
            "Directory indexing finished"
        );
        Ok(report)
    }

    /// Index one loaded document, replacing any earlier version at the same path.
    pub async fn index_document(&self, doc: LoadedDocument) -> IndexOutcome {
        let file_path = doc.file_path.clone();
        match self.try_index(doc).await {
            Ok(outcome) => outcome,
            Err((failed_chunks, e)) => {
                error!("Indexing {} failed: {}", file_path, e);
                IndexOutcome::failed(file_path, failed_chunks, e)
            }
        }
    }

    async fn try_index(&self, doc: LoadedDocument) -> std::result::Result<IndexOutcome, (usize, KnowledgeError)> {
        let mut document = Document::new(doc.file_path, doc.title, doc.content);
        let pieces = self.chunker.chunk(&document.content, document.id);
        if pieces.is_empty() {
            return Err((0, KnowledgeError::Load {
                path: document.file_path,
                message: "document has no text content".to_string(),
            }));
        }
        debug!("{} split into {} chunks", document.file_path, pieces.len());

        let expected = self.embedder.dimension();
        let mut chunks = Vec::with_capacity(pieces.len());
        let mut failed_chunks = 0;
        let mut last_error = None;

        for piece in pieces {
            let raw = match self.embedder.embed(&piece.content).await {
                Ok(raw) => raw,
                Err(e) => {
                    warn!(chunk_index = piece.chunk_index, "Embedding failed for {}: {}", document.file_path, e);
                    failed_chunks += 1;
                    last_error = Some(e.to_string());
                    continue;
                }
            };
            if raw.len() != expected {
                return Err((failed_chunks, KnowledgeError::DimensionMismatch { expected, actual: raw.len() }));
            }
            if self.normalizer.is_degenerate(&raw) {
                warn!(chunk_index = piece.chunk_index, "Degenerate embedding for {}", document.file_path);
                failed_chunks += 1;
                last_error = Some(KnowledgeError::DegenerateEmbedding.to_string());
                continue;
            }

            chunks.push(Chunk {
                id: ChunkId::new(),
                document_id: document.id,
                chunk_index: piece.chunk_index,
                content: piece.content,
                start_offset: piece.start_offset,
                end_offset: piece.end_offset,
                token_count: piece.token_count,
                embedding: self.normalizer.normalize(&raw),
                created_at: chrono::Utc::now(),
            });
        }

        if chunks.is_empty() {
            return Err((failed_chunks, KnowledgeError::NoChunksEmbedded {
                failed: failed_chunks,
                last_error: last_error.unwrap_or_default(),
            }));
        }

        document.chunk_count = chunks.len();
        let saved = {
            let mut store = self.store.write().await;
            let saved = store
                .commit_document(&document, &chunks)
                .await
                .map_err(|e| (failed_chunks, e.into()))?;
            let stored = store.count_chunks(saved.id).await.map_err(|e| (failed_chunks, e.into()))?;
            if stored != saved.chunk_count {
                return Err((failed_chunks, KnowledgeError::Storage(docrag_storage::StorageError::Other(format!(
                    "partial write for {}: {} of {} chunks stored",
                    saved.file_path, stored, saved.chunk_count
                )))));
            }
            saved
        };

        let status = if failed_chunks == 0 { IndexStatus::Indexed } else { IndexStatus::Degraded };
        info!(
            chunks = saved.chunk_count,
            failed_chunks,
            "Indexed {} ({:?})",
            saved.file_path,
            status
        );

        Ok(IndexOutcome {
            file_path: saved.file_path,
            document_id: Some(saved.id),
            status,
            chunk_count: saved.chunk_count,
            failed_chunks,
            error: last_error,
        })
    }
}
