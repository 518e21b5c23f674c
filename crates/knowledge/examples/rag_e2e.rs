//! End-to-end check against a local Ollama: index, search, rerank, answer.
//!
//! Needs `nomic-embed-text` and `llama3.2` pulled; the reranker step falls
//! back to similarity order when no rerank model is available.

use docrag_core::{FilterPolicy, KnowledgeBaseConfig};
use docrag_knowledge::{
    ContextAssembler, FsDocumentLoader, Indexer, LoadedDocument, OllamaChatClient, OllamaEmbeddingClient,
    OllamaRerankerClient, RagService, RelevanceFilter, RetryingEmbedder, SearchService, TextChunker,
};
use docrag_storage::MemoryStorage;
use std::sync::Arc;
use tokio::sync::RwLock;

#[tokio::main]
async fn main() -> Result<(), anyhow::Error> {
    println!("=== docrag E2E ===\n");

    let mut config = KnowledgeBaseConfig::default();
    config.chunking.chunk_size = 300;
    config.chunking.overlap_size = 50;
    config.filter.policy = FilterPolicy::Hybrid { min_similarity: 0.55, keep_top: None, max_chunks: 2 };

    let client = OllamaEmbeddingClient::new(&config.embedding)?;
    if !client.health_check().await? {
        println!("[FAIL] Ollama is not available at {}", config.embedding.ollama_url);
        return Err(anyhow::anyhow!("Ollama not available"));
    }
    println!("[OK] Ollama is available\n");

    let store = Arc::new(RwLock::new(MemoryStorage::new()));
    let embedder = RetryingEmbedder::new(Arc::new(client), config.embedding.retry);
    let indexer = Indexer::new(
        store.clone(),
        Arc::new(FsDocumentLoader::default()),
        TextChunker::new(config.chunking)?,
        embedder.clone(),
    );

    println!("--- Indexing ---");
    let documents = [
        ("rust-errors.md", "Rust Error Handling", "Rust handles recoverable errors with Result<T, E> and propagates them with the ? operator. Panics are for bugs."),
        ("python-exceptions.md", "Python Exceptions", "Python raises exceptions and handles them in try/except blocks, with finally for cleanup."),
        ("acid.md", "ACID Transactions", "Database transactions are atomic, consistent, isolated and durable."),
        ("async-js.md", "Async Await", "JavaScript async functions return promises; await suspends until the promise settles."),
    ];
    for (path, title, content) in documents {
        let outcome = indexer
            .index_document(LoadedDocument {
                file_path: path.to_string(),
                title: title.to_string(),
                content: content.to_string(),
            })
            .await;
        println!("[{:?}] {} ({} chunks)", outcome.status, path, outcome.chunk_count);
    }
    println!();

    let search = SearchService::new(store.clone(), embedder);

    println!("--- Search ---");
    for query in ["how to handle errors in code", "database consistency", "waiting for promises"] {
        let results = search.search(query, 3, 0.0).await?;
        println!("Query: '{}'", query);
        for r in &results {
            println!(
                "  {:.1}%  {}",
                r.similarity * 100.0,
                r.document_file_path.as_deref().unwrap_or("?")
            );
        }
    }
    println!();

    println!("--- Ask ---");
    let filter = RelevanceFilter::new(config.filter.policy)
        .with_reranker(Arc::new(OllamaRerankerClient::new(&config.filter.reranker)?));
    let service = RagService::new(
        search,
        filter,
        ContextAssembler::new(config.context),
        Arc::new(OllamaChatClient::new(&config.generation)?),
        config.search,
    );
    let answer = service.ask("How should I propagate errors in Rust?").await?;
    println!("{}\n", answer.answer);
    for (i, source) in answer.sources.iter().enumerate() {
        println!("[Chunk {}] {}", i + 1, source.source_label());
    }
    if answer.filter_degraded {
        println!("\n(reranker unavailable, similarity order used)");
    }

    Ok(())
}
