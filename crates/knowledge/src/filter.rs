//! Post-search relevance filtering.
//!
//! A [`RelevanceFilter`] applies one [`FilterPolicy`] to a ranked result
//! list. Reranking failures never empty the context: the filter falls back
//! to the threshold-filtered ordering and reports the degradation.

use docrag_core::{FilterPolicy, RetrievedChunk, SearchResult};
use std::sync::Arc;
use tracing::{debug, warn};

use crate::reranker::Reranker;

/// Chunks that survived filtering, plus how the filter got there.
#[derive(Debug, Clone, Default)]
pub struct FilterOutcome {
    /// Surviving chunks, best first
    pub chunks: Vec<RetrievedChunk>,

    /// The reranker was required but could not be used
    pub degraded: bool,

    /// Why the reranker could not be used
    pub reranker_error: Option<String>,
}

/// Applies the configured relevance policy.
#[derive(Clone)]
pub struct RelevanceFilter {
    policy: FilterPolicy,
    reranker: Option<Arc<dyn Reranker>>,
}

impl RelevanceFilter {
    /// Create a filter for `policy` with no reranker attached.
    pub fn new(policy: FilterPolicy) -> Self {
        Self { policy, reranker: None }
    }

    /// Attach the reranker used by the reranker and hybrid policies.
    pub fn with_reranker(mut self, reranker: Arc<dyn Reranker>) -> Self {
        self.reranker = Some(reranker);
        self
    }

    /// Filter `results` for `question`.
    pub async fn apply(&self, question: &str, results: Vec<SearchResult>) -> FilterOutcome {
        let candidates: Vec<RetrievedChunk> = results.into_iter().map(RetrievedChunk::from).collect();

        match self.policy {
            FilterPolicy::None => FilterOutcome { chunks: candidates, ..Default::default() },
            FilterPolicy::Threshold { min_similarity, keep_top } => FilterOutcome {
                chunks: threshold(candidates, min_similarity, keep_top),
                ..Default::default()
            },
            FilterPolicy::Reranker { max_chunks } => self.rerank(question, candidates, max_chunks).await,
            FilterPolicy::Hybrid { min_similarity, keep_top, max_chunks } => {
                let survivors = threshold(candidates, min_similarity, keep_top);
                self.rerank(question, survivors, max_chunks).await
            }
        }
    }

    async fn rerank(&self, question: &str, candidates: Vec<RetrievedChunk>, max_chunks: usize) -> FilterOutcome {
        if candidates.is_empty() {
            return FilterOutcome::default();
        }

        let Some(reranker) = &self.reranker else {
            warn!("Reranking requested but no reranker is configured, keeping similarity order");
            return FilterOutcome {
                chunks: candidates,
                degraded: true,
                reranker_error: Some("no reranker configured".to_string()),
            };
        };

        let texts: Vec<String> = candidates.iter().map(|c| c.content.clone()).collect();
        let scores = match reranker.score(question, &texts).await {
            Ok(scores) if scores.len() == candidates.len() => scores,
            Ok(scores) => {
                let message = format!("reranker returned {} scores for {} chunks", scores.len(), candidates.len());
                warn!("{}, keeping similarity order", message);
                return FilterOutcome { chunks: candidates, degraded: true, reranker_error: Some(message) };
            }
            Err(e) => {
                warn!("Reranker failed, keeping similarity order: {}", e);
                return FilterOutcome { chunks: candidates, degraded: true, reranker_error: Some(e.to_string()) };
            }
        };

        let before = candidates.len();
        let mut scored: Vec<RetrievedChunk> = candidates
            .into_iter()
            .zip(scores)
            .filter(|(_, score)| score.is_finite() && (0.0..=1.0).contains(score))
            .map(|(mut chunk, score)| {
                chunk.rerank_score = Some(score);
                chunk
            })
            .collect();

        // Stable sort: equal rerank scores keep their similarity order.
        scored.sort_by(|a, b| {
            b.rerank_score
                .partial_cmp(&a.rerank_score)
                .unwrap_or(std::cmp::Ordering::Equal)
        });
        scored.truncate(max_chunks);

        debug!(before, after = scored.len(), "Reranked candidates");
        FilterOutcome { chunks: scored, ..Default::default() }
    }
}

fn threshold(candidates: Vec<RetrievedChunk>, min_similarity: f32, keep_top: Option<usize>) -> Vec<RetrievedChunk> {
    let mut kept: Vec<RetrievedChunk> = candidates
        .into_iter()
        .filter(|c| c.similarity >= min_similarity)
        .collect();
    if let Some(limit) = keep_top {
        kept.truncate(limit);
    }
    kept
}
