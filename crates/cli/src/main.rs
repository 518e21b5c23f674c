//! docrag CLI - index documents and ask questions about them.

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use docrag_core::{DocumentId, KnowledgeBaseConfig, RerankerBackend};
use docrag_knowledge::{
    ContextAssembler, FsDocumentLoader, IndexOutcome, Indexer, LlmJudgeReranker, OllamaChatClient,
    OllamaEmbeddingClient, OllamaRerankerClient, RagService, RelevanceFilter, Reranker, RetryingEmbedder,
    SearchService, TextChunker,
};
use docrag_storage::KnowledgeBaseStore;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{debug, info};
use tracing_subscriber::EnvFilter;

type Store = Box<dyn KnowledgeBaseStore>;

#[derive(Parser)]
#[command(name = "docrag")]
#[command(about = "Index documents and answer questions from them", long_about = None)]
struct Cli {
    /// Configuration file (TOML)
    #[arg(long, short, env = "DOCRAG_CONFIG")]
    config: Option<PathBuf>,

    /// Override the storage path from the configuration
    #[arg(long)]
    store: Option<PathBuf>,

    /// Debug logging
    #[arg(long, short)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Index a file or every matching file under a directory
    Index {
        /// File or directory
        path: PathBuf,
    },
    /// Rank stored chunks against a query
    Search {
        /// Query text
        query: String,
        /// Maximum number of results
        #[arg(long)]
        limit: Option<usize>,
        /// Minimum similarity score (0-1)
        #[arg(long)]
        min_similarity: Option<f32>,
    },
    /// Answer a question from the indexed documents
    Ask {
        /// Question text
        question: String,
        /// Print the assembled prompt before the answer
        #[arg(long)]
        show_prompt: bool,
    },
    /// List indexed documents
    Docs,
    /// Show document details
    Show {
        /// Document ID
        id: String,
    },
    /// Remove a document by ID or path
    Remove {
        /// Document ID or indexed path
        target: String,
    },
    /// Show knowledge-base statistics
    Stats,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    let mut config = match &cli.config {
        Some(path) => KnowledgeBaseConfig::load(path)
            .with_context(|| format!("Failed to load config from {}", path.display()))?,
        None => KnowledgeBaseConfig::default(),
    };
    if let Some(store) = cli.store {
        config.storage.path = store;
    }
    debug!(?config, "Configuration loaded");

    let store: Arc<RwLock<Store>> = Arc::new(RwLock::new(
        docrag_storage::open(&config.storage)
            .await
            .context("Failed to open knowledge base")?,
    ));

    match cli.command {
        Commands::Index { path } => {
            let indexer = Indexer::new(
                store.clone(),
                Arc::new(FsDocumentLoader::new(config.indexing.extensions.clone())),
                TextChunker::new(config.chunking)?,
                embedder(&config)?,
            )
            .with_concurrency(config.indexing.concurrency);

            if path.is_dir() {
                let report = indexer.index_directory(&path).await?;
                for outcome in &report.outcomes {
                    print_outcome(outcome);
                }
                println!(
                    "\nIndexed: {}  Degraded: {}  Failed: {}  Chunks: {}",
                    report.indexed(),
                    report.degraded(),
                    report.failed(),
                    report.total_chunks()
                );
            } else {
                let outcome = indexer.index_path(&path).await;
                print_outcome(&outcome);
                if !outcome.success() {
                    anyhow::bail!("Indexing {} failed", path.display());
                }
            }
        }
        Commands::Search { query, limit, min_similarity } => {
            let search = SearchService::new(store.clone(), embedder(&config)?);
            let results = search
                .search(
                    &query,
                    limit.unwrap_or(config.search.limit),
                    min_similarity.unwrap_or(config.search.min_similarity),
                )
                .await?;

            println!("Results ({})", results.len());
            for (i, r) in results.iter().enumerate() {
                println!(
                    "{}. {:.1}% | {} #{}",
                    i + 1,
                    r.similarity * 100.0,
                    r.document_file_path.as_deref().unwrap_or("?"),
                    r.chunk_index
                );
                println!("   {}", preview(&r.content, 160));
            }
        }
        Commands::Ask { question, show_prompt } => {
            let service = rag_service(&config, store.clone())?;

            let retrieval = service.retrieve(&question).await?;
            if show_prompt {
                println!("--- System prompt ---\n{}\n", retrieval.prompt.system_prompt);
                println!("--- User message ---\n{}\n", retrieval.prompt.user_message);
            }

            let answer = service.answer(retrieval).await?;
            println!("{}", answer.answer);

            if !answer.sources.is_empty() {
                println!("\nSources:");
                for (i, source) in answer.sources.iter().enumerate() {
                    println!("  [Chunk {}] {} ({:.1}%)", i + 1, source.source_label(), source.similarity * 100.0);
                }
            }
            if answer.filter_degraded {
                println!("\nNote: reranker unavailable, results kept in similarity order");
            }
            info!(tokens = answer.tokens_used, "Answer generated");
        }
        Commands::Docs => {
            let documents = store.read().await.get_all_documents().await?;
            println!("Documents ({})", documents.len());
            for doc in documents {
                println!(
                    "  {} | {} chunks | {} | {}",
                    doc.id,
                    doc.chunk_count,
                    doc.indexed_at.format("%Y-%m-%d %H:%M"),
                    doc.file_path
                );
            }
        }
        Commands::Show { id } => {
            let document_id: DocumentId = id.parse().map_err(|_| anyhow::anyhow!("Invalid document ID"))?;
            let store = store.read().await;
            let Some(doc) = store.get_document(document_id).await? else {
                println!("Document not found");
                return Ok(());
            };
            let stored = store.count_chunks(doc.id).await?;

            println!("Document: {}", doc.id);
            println!("  Title: {}", doc.title);
            println!("  Path: {}", doc.file_path);
            println!("  Indexed: {}", doc.indexed_at);
            println!("  Chunks: {} (stored: {})", doc.chunk_count, stored);
            println!("  Length: {} chars", doc.content.chars().count());
        }
        Commands::Remove { target } => {
            let mut store = store.write().await;
            let id = match target.parse::<DocumentId>() {
                Ok(id) => Some(id),
                Err(_) => store.get_document_by_path(&target).await?.map(|d| d.id),
            };
            let removed = match id {
                Some(id) => store.delete_document(id).await?,
                None => false,
            };
            if removed {
                println!("Removed {}", target);
            } else {
                println!("Document not found");
            }
        }
        Commands::Stats => {
            let stats = store.read().await.get_statistics().await?;
            let dimension = store.read().await.embedding_dimension().await?;

            println!("Knowledge base: {}", config.storage.path.display());
            println!("  Documents: {}", stats.documents_count);
            println!("  Chunks: {}", stats.chunks_count);
            match dimension {
                Some(d) => println!("  Embedding dimension: {}", d),
                None => println!("  Embedding dimension: -"),
            }
        }
    }

    Ok(())
}

fn init_tracing(verbose: bool) {
    let filter = if verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

fn embedder(config: &KnowledgeBaseConfig) -> Result<RetryingEmbedder> {
    let client = OllamaEmbeddingClient::new(&config.embedding)?;
    Ok(RetryingEmbedder::new(Arc::new(client), config.embedding.retry))
}

fn rag_service(config: &KnowledgeBaseConfig, store: Arc<RwLock<Store>>) -> Result<RagService<Store>> {
    let generator = Arc::new(OllamaChatClient::new(&config.generation)?);

    let mut filter = RelevanceFilter::new(config.filter.policy);
    if config.filter.policy.uses_reranker() {
        let reranker: Arc<dyn Reranker> = match config.filter.reranker.backend {
            RerankerBackend::Ollama => Arc::new(OllamaRerankerClient::new(&config.filter.reranker)?),
            RerankerBackend::Judge => Arc::new(LlmJudgeReranker::new(generator.clone())),
        };
        filter = filter.with_reranker(reranker);
    }

    Ok(RagService::new(
        SearchService::new(store, embedder(config)?),
        filter,
        ContextAssembler::new(config.context),
        generator,
        config.search,
    ))
}

fn print_outcome(outcome: &IndexOutcome) {
    let name = &outcome.file_path;
    match &outcome.error {
        Some(error) if !outcome.success() => println!("  [failed]   {} - {}", name, error),
        _ if outcome.failed_chunks > 0 => println!(
            "  [degraded] {} - {} chunks, {} failed",
            name, outcome.chunk_count, outcome.failed_chunks
        ),
        _ => println!("  [indexed]  {} - {} chunks", name, outcome.chunk_count),
    }
}

fn preview(text: &str, max_chars: usize) -> String {
    let flat: String = text.split_whitespace().collect::<Vec<_>>().join(" ");
    if flat.chars().count() <= max_chars {
        flat
    } else {
        format!("{}...", flat.chars().take(max_chars).collect::<String>())
    }
}
