//! Similarity search over stored chunks.
//!
//! A brute-force scan: every stored embedding is compared with the
//! normalized query vector. Callers only see [`SearchService::search`], so
//! the scan can later be replaced by an index.

use docrag_core::{DocumentId, SearchResult};
use docrag_storage::KnowledgeBaseStore;
use std::cmp::Ordering;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::debug;

use crate::embedding::RetryingEmbedder;
use crate::error::{KnowledgeError, Result};
use crate::normalizer::VectorNormalizer;

/// Ranks stored chunks against a query.
pub struct SearchService<S: KnowledgeBaseStore> {
    store: Arc<RwLock<S>>,
    embedder: RetryingEmbedder,
    normalizer: VectorNormalizer,
}

impl<S: KnowledgeBaseStore> Clone for SearchService<S> {
    fn clone(&self) -> Self {
        Self {
            store: self.store.clone(),
            embedder: self.embedder.clone(),
            normalizer: self.normalizer,
        }
    }
}

impl<S: KnowledgeBaseStore> SearchService<S> {
    /// Create a search service over a shared store.
    pub fn new(store: Arc<RwLock<S>>, embedder: RetryingEmbedder) -> Self {
        Self {
            store,
            embedder,
            normalizer: VectorNormalizer::new(),
        }
    }

    /// Search for the `limit` chunks most similar to `query`.
    ///
    /// Results scoring below `min_similarity` are dropped. Ties are broken
    /// by chunk index, then document id. An empty query or an empty store
    /// yields an empty list without calling the embedding provider.
    pub async fn search(&self, query: &str, limit: usize, min_similarity: f32) -> Result<Vec<SearchResult>> {
        if query.trim().is_empty() || limit == 0 {
            return Ok(Vec::new());
        }

        let chunks = self.store.read().await.scan_all_chunks().await?;
        if chunks.is_empty() {
            debug!("Knowledge base is empty, nothing to search");
            return Ok(Vec::new());
        }

        let raw = self.embedder.embed(query).await?;
        if self.normalizer.is_degenerate(&raw) {
            return Err(KnowledgeError::DegenerateEmbedding);
        }
        let query_vector = self.normalizer.normalize(&raw);

        let mut scored = Vec::new();
        for chunk in chunks {
            if chunk.dimension() != query_vector.len() {
                return Err(KnowledgeError::DimensionMismatch {
                    expected: chunk.dimension(),
                    actual: query_vector.len(),
                });
            }
            let similarity = self.normalizer.to_score(self.normalizer.dot(&query_vector, &chunk.embedding));
            if similarity >= min_similarity {
                scored.push((similarity, chunk));
            }
        }

        scored.sort_by(|(a_score, a), (b_score, b)| {
            b_score
                .partial_cmp(a_score)
                .unwrap_or(Ordering::Equal)
                .then(a.chunk_index.cmp(&b.chunk_index))
                .then(a.document_id.cmp(&b.document_id))
        });
        scored.truncate(limit);

        let mut documents: HashMap<DocumentId, (String, String)> = HashMap::new();
        {
            let store = self.store.read().await;
            for (_, chunk) in &scored {
                if documents.contains_key(&chunk.document_id) {
                    continue;
                }
                if let Some(doc) = store.get_document(chunk.document_id).await? {
                    documents.insert(doc.id, (doc.title, doc.file_path));
                }
            }
        }

        let results: Vec<SearchResult> = scored
            .into_iter()
            .map(|(similarity, chunk)| {
                let source = documents.get(&chunk.document_id);
                SearchResult {
                    chunk_id: chunk.id,
                    document_id: chunk.document_id,
                    content: chunk.content,
                    similarity,
                    chunk_index: chunk.chunk_index,
                    document_title: source.map(|(title, _)| title.clone()),
                    document_file_path: source.map(|(_, path)| path.clone()),
                }
            })
            .collect();

        debug!("Search for {:?} returned {} results", query, results.len());
        Ok(results)
    }
}
