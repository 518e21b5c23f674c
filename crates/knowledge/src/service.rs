//! Question answering over the knowledge base.
//!
//! [`RagService`] runs the query flow end to end: search, relevance
//! filtering, prompt assembly and answer generation.

use docrag_core::{RetrievedChunk, SearchConfig};
use docrag_storage::KnowledgeBaseStore;
use serde::Serialize;
use std::sync::Arc;
use tracing::{debug, info};

use crate::context::{ContextAssembler, Prompt};
use crate::error::Result;
use crate::filter::RelevanceFilter;
use crate::generation::AnswerGenerator;
use crate::search::SearchService;

/// Context selected for a question, before generation.
#[derive(Debug, Clone)]
pub struct Retrieval {
    /// Chunks rendered into the prompt, in prompt order
    pub chunks: Vec<RetrievedChunk>,

    /// Prompt for the answer generator
    pub prompt: Prompt,

    /// The reranker was required but could not be used
    pub filter_degraded: bool,
}

/// A generated answer with its provenance.
#[derive(Debug, Clone, Serialize)]
pub struct RagAnswer {
    /// Model answer
    pub answer: String,

    /// Tokens reported by the generator
    pub tokens_used: usize,

    /// Chunks the answer was grounded on, cited as `[Chunk n]` in order
    pub sources: Vec<RetrievedChunk>,

    /// Whether any context was given to the model
    pub used_context: bool,

    /// The reranker was required but could not be used
    pub filter_degraded: bool,
}

/// End-to-end retrieval-augmented answering.
pub struct RagService<S: KnowledgeBaseStore> {
    search: SearchService<S>,
    filter: RelevanceFilter,
    assembler: ContextAssembler,
    generator: Arc<dyn AnswerGenerator>,
    search_config: SearchConfig,
}

impl<S: KnowledgeBaseStore> RagService<S> {
    /// Assemble a service from its parts.
    pub fn new(
        search: SearchService<S>,
        filter: RelevanceFilter,
        assembler: ContextAssembler,
        generator: Arc<dyn AnswerGenerator>,
        search_config: SearchConfig,
    ) -> Self {
        Self {
            search,
            filter,
            assembler,
            generator,
            search_config,
        }
    }

    /// Search, filter and build the prompt for `question`.
    pub async fn retrieve(&self, question: &str) -> Result<Retrieval> {
        let results = self
            .search
            .search(question, self.search_config.limit, self.search_config.min_similarity)
            .await?;
        let found = results.len();

        let outcome = self.filter.apply(question, results).await;
        let prompt = self.assembler.build_prompt(question, &outcome.chunks);
        debug!(
            found,
            kept = outcome.chunks.len(),
            used = prompt.chunks_used,
            "Retrieved context"
        );

        let mut chunks = outcome.chunks;
        chunks.truncate(prompt.chunks_used);

        Ok(Retrieval {
            chunks,
            prompt,
            filter_degraded: outcome.degraded,
        })
    }

    /// Answer `question` from the knowledge base.
    pub async fn ask(&self, question: &str) -> Result<RagAnswer> {
        let retrieval = self.retrieve(question).await?;
        self.answer(retrieval).await
    }

    /// Generate the answer for an already retrieved context.
    pub async fn answer(&self, retrieval: Retrieval) -> Result<RagAnswer> {
        if retrieval.prompt.is_fallback() {
            info!("No relevant context found, answering without context");
        }

        let generated = self
            .generator
            .generate(&retrieval.prompt.system_prompt, &retrieval.prompt.user_message)
            .await?;

        Ok(RagAnswer {
            answer: generated.answer_text,
            tokens_used: generated.tokens_used,
            used_context: !retrieval.prompt.is_fallback(),
            sources: retrieval.chunks,
            filter_degraded: retrieval.filter_degraded,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chunker::TextChunker;
    use crate::embedding::RetryingEmbedder;
    use crate::indexer::Indexer;
    use crate::loader::{FsDocumentLoader, LoadedDocument};
    use crate::testing::{FakeEmbedder, FakeGenerator, ScriptedReranker};
    use docrag_core::{ChunkingConfig, ContextConfig, FilterPolicy, RetryConfig};
    use docrag_storage::MemoryStorage;
    use tokio::sync::RwLock;

    async fn indexed_store(embedder: &RetryingEmbedder) -> Arc<RwLock<MemoryStorage>> {
        let store = Arc::new(RwLock::new(MemoryStorage::new()));
        let chunker = TextChunker::new(ChunkingConfig { chunk_size: 200, overlap_size: 20 }).unwrap();
        let indexer = Indexer::new(store.clone(), Arc::new(FsDocumentLoader::default()), chunker, embedder.clone());
        for (path, content) in [
            ("rust.md", "rust borrow checker ownership"),
            ("cooking.md", "pasta tomato basil oven"),
        ] {
            let doc = LoadedDocument {
                file_path: path.to_string(),
                title: path.to_string(),
                content: content.to_string(),
            };
            assert!(indexer.index_document(doc).await.success());
        }
        store
    }

    fn embedder() -> RetryingEmbedder {
        RetryingEmbedder::new(Arc::new(FakeEmbedder::new(26)), RetryConfig::default())
    }

    fn search_config(limit: usize) -> SearchConfig {
        SearchConfig { limit, min_similarity: 0.0 }
    }

    #[tokio::test]
    async fn test_ask_grounds_answer_in_best_chunk() {
        let embedder = embedder();
        let store = indexed_store(&embedder).await;
        let generator = Arc::new(FakeGenerator::replying("Ownership rules."));
        let service = RagService::new(
            SearchService::new(store, embedder),
            RelevanceFilter::new(FilterPolicy::None),
            ContextAssembler::default(),
            generator.clone(),
            search_config(1),
        );

        let answer = service.ask("how does the borrow checker work").await.unwrap();

        assert_eq!(answer.answer, "Ownership rules.");
        assert_eq!(answer.tokens_used, 42);
        assert!(answer.used_context);
        assert_eq!(answer.sources.len(), 1);
        assert_eq!(answer.sources[0].document_file_path.as_deref(), Some("rust.md"));

        let prompts = generator.prompts();
        assert!(prompts[0].0.contains("[Chunk 1] (document: rust.md"));
        assert_eq!(prompts[0].1, "Question: how does the borrow checker work");
    }

    #[tokio::test]
    async fn test_everything_filtered_uses_fallback_prompt() {
        let embedder = embedder();
        let store = indexed_store(&embedder).await;
        let generator = Arc::new(FakeGenerator::replying("I don't know."));
        let service = RagService::new(
            SearchService::new(store, embedder),
            RelevanceFilter::new(FilterPolicy::Threshold { min_similarity: 1.0, keep_top: None }),
            ContextAssembler::new(ContextConfig::default()),
            generator.clone(),
            search_config(5),
        );

        let answer = service.ask("zzz").await.unwrap();

        assert!(!answer.used_context);
        assert!(answer.sources.is_empty());
        assert!(!generator.prompts()[0].0.contains("Chunk"));
    }

    #[tokio::test]
    async fn test_reranker_failure_is_reported_not_fatal() {
        let embedder = embedder();
        let store = indexed_store(&embedder).await;
        let filter = RelevanceFilter::new(FilterPolicy::Reranker { max_chunks: 1 })
            .with_reranker(Arc::new(ScriptedReranker::failing()));
        let service = RagService::new(
            SearchService::new(store, embedder),
            filter,
            ContextAssembler::default(),
            Arc::new(FakeGenerator::replying("ok")),
            search_config(5),
        );

        let retrieval = service.retrieve("pasta").await.unwrap();
        assert!(retrieval.filter_degraded);
        assert_eq!(retrieval.chunks.len(), 2);
        assert_eq!(retrieval.prompt.chunks_used, 2);
    }

    #[tokio::test]
    async fn test_answer_reuses_retrieved_prompt() {
        let provider = Arc::new(FakeEmbedder::new(26));
        let embedder = RetryingEmbedder::new(provider.clone(), RetryConfig::default());
        let store = indexed_store(&embedder).await;
        let generator = Arc::new(FakeGenerator::replying("Bake it."));
        let service = RagService::new(
            SearchService::new(store, embedder),
            RelevanceFilter::new(FilterPolicy::None),
            ContextAssembler::default(),
            generator.clone(),
            search_config(1),
        );

        let retrieval = service.retrieve("pasta in the oven").await.unwrap();
        let calls_after_retrieval = provider.calls();
        let answer = service.answer(retrieval.clone()).await.unwrap();

        assert_eq!(provider.calls(), calls_after_retrieval);
        assert_eq!(answer.answer, "Bake it.");
        assert_eq!(answer.sources, retrieval.chunks);
        let prompts = generator.prompts();
        assert_eq!(prompts.len(), 1);
        assert_eq!(prompts[0].0, retrieval.prompt.system_prompt);
        assert_eq!(prompts[0].1, retrieval.prompt.user_message);
    }

    #[tokio::test]
    async fn test_generation_failure_propagates() {
        let embedder = embedder();
        let store = indexed_store(&embedder).await;
        let service = RagService::new(
            SearchService::new(store, embedder),
            RelevanceFilter::new(FilterPolicy::None),
            ContextAssembler::default(),
            Arc::new(FakeGenerator::failing()),
            search_config(5),
        );

        assert!(service.ask("rust").await.is_err());
    }
}
