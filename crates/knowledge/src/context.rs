//! Prompt assembly from retrieved chunks.

use docrag_core::{ContextConfig, RetrievedChunk};
use tracing::debug;

use crate::chunker::estimate_tokens;

const CONTEXT_PREAMBLE: &str = "You are a helpful assistant answering questions about a document collection.\n\
Use the numbered context excerpts below to answer the user's question.";

const CONTEXT_FOOTER: &str = "Instructions:\n\
- Answer only from the context above. Do not use outside knowledge.\n\
- If the context does not contain the information needed, say so plainly.\n\
- Cite the excerpts you rely on as [Chunk n].\n\
- If excerpts contradict each other, point out the contradiction.";

const FALLBACK_SYSTEM_PROMPT: &str = "You are a helpful assistant answering questions about a document collection.\n\
No relevant material was found in the collection for this question. \
Tell the user that the knowledge base has no information on it, and do not invent an answer.";

/// A prompt ready for an answer generator.
#[derive(Debug, Clone, PartialEq)]
pub struct Prompt {
    /// System prompt carrying instructions and context
    pub system_prompt: String,

    /// User turn wrapping the question
    pub user_message: String,

    /// Number of chunks rendered into the system prompt
    pub chunks_used: usize,
}

impl Prompt {
    /// Whether the prompt fell back to the no-context form.
    pub fn is_fallback(&self) -> bool {
        self.chunks_used == 0
    }
}

/// Builds cited prompts from ranked chunks.
#[derive(Debug, Clone, Default)]
pub struct ContextAssembler {
    config: ContextConfig,
}

impl ContextAssembler {
    /// Create an assembler.
    pub fn new(config: ContextConfig) -> Self {
        Self { config }
    }

    /// Build a prompt for `question` from `chunks`, kept in input order.
    ///
    /// With a token budget configured, chunks are taken in order while their
    /// estimated size fits. If no chunk is usable the no-context prompt is
    /// returned.
    pub fn build_prompt(&self, question: &str, chunks: &[RetrievedChunk]) -> Prompt {
        let user_message = format!("Question: {}", question);

        let mut blocks = Vec::new();
        let mut used_tokens = 0;
        for chunk in chunks {
            let block = format_block(blocks.len() + 1, chunk);
            let cost = estimate_tokens(&block);
            if let Some(budget) = self.config.max_context_tokens {
                if used_tokens + cost > budget {
                    debug!(budget, used_tokens, "Context budget reached");
                    break;
                }
            }
            used_tokens += cost;
            blocks.push(block);
        }

        if blocks.is_empty() {
            return Prompt {
                system_prompt: FALLBACK_SYSTEM_PROMPT.to_string(),
                user_message,
                chunks_used: 0,
            };
        }

        let system_prompt = format!(
            "{}\n\nContext:\n\n{}\n\n{}",
            CONTEXT_PREAMBLE,
            blocks.join("\n\n"),
            CONTEXT_FOOTER
        );

        Prompt {
            system_prompt,
            user_message,
            chunks_used: blocks.len(),
        }
    }
}

fn format_block(number: usize, chunk: &RetrievedChunk) -> String {
    format!(
        "[Chunk {}] (document: {}, similarity: {:.1}%)\n{}",
        number,
        chunk.source_label(),
        chunk.similarity * 100.0,
        chunk.content.trim()
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use docrag_core::{ChunkId, DocumentId};

    fn retrieved(content: &str, similarity: f32, path: Option<&str>) -> RetrievedChunk {
        RetrievedChunk {
            chunk_id: ChunkId::new(),
            document_id: DocumentId::new(),
            content: content.to_string(),
            similarity,
            chunk_index: 0,
            document_title: Some("Guide".to_string()),
            document_file_path: path.map(str::to_string),
            rerank_score: None,
        }
    }

    #[test]
    fn test_empty_chunks_use_fallback() {
        let prompt = ContextAssembler::default().build_prompt("What is Rust?", &[]);
        assert!(!prompt.system_prompt.contains("Chunk"));
        assert!(prompt.user_message.contains("What is Rust?"));
        assert!(prompt.is_fallback());
    }

    #[test]
    fn test_blocks_are_labeled_in_order() {
        let chunks = vec![
            retrieved("  first text \n", 0.912, Some("docs/a.md")),
            retrieved("second text", 0.5, None),
        ];
        let prompt = ContextAssembler::default().build_prompt("q", &chunks);

        assert_eq!(prompt.chunks_used, 2);
        let first = prompt
            .system_prompt
            .find("[Chunk 1] (document: docs/a.md, similarity: 91.2%)\nfirst text\n")
            .unwrap();
        let second = prompt
            .system_prompt
            .find("[Chunk 2] (document: Guide, similarity: 50.0%)\nsecond text")
            .unwrap();
        assert!(first < second);
        assert!(prompt.system_prompt.contains("[Chunk n]"));
        assert_eq!(prompt.user_message, "Question: q");
    }

    #[test]
    fn test_token_budget_limits_blocks() {
        let chunks = vec![
            retrieved(&"a".repeat(200), 0.9, Some("a.md")),
            retrieved(&"b".repeat(200), 0.8, Some("b.md")),
        ];
        let assembler = ContextAssembler::new(ContextConfig { max_context_tokens: Some(70) });
        let prompt = assembler.build_prompt("q", &chunks);

        assert_eq!(prompt.chunks_used, 1);
        assert!(!prompt.system_prompt.contains("[Chunk 2]"));
    }

    #[test]
    fn test_budget_too_small_falls_back() {
        let chunks = vec![retrieved(&"a".repeat(400), 0.9, Some("a.md"))];
        let assembler = ContextAssembler::new(ContextConfig { max_context_tokens: Some(10) });
        let prompt = assembler.build_prompt("q", &chunks);
        assert!(prompt.is_fallback());
        assert!(!prompt.system_prompt.contains("Chunk"));
    }
}
