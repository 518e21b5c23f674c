//! Reranking channel used by the relevance filter.
//!
//! A [`Reranker`] receives the question and the candidate chunk texts and
//! returns one relevance score per chunk, aligned to input order. Two
//! implementations: Ollama's `/api/rerank` endpoint and an LLM judge that
//! asks any [`AnswerGenerator`] to score the chunks.

use anyhow::Context;
use async_trait::async_trait;
use docrag_core::RerankerConfig;
use regex::Regex;
use reqwest::{Client, ClientBuilder, StatusCode};
use serde_json::json;
use std::sync::{Arc, LazyLock};
use std::time::Duration;
use tracing::debug;

use crate::error::{KnowledgeError, Result};
use crate::generation::AnswerGenerator;

/// Scores candidate chunks against a question.
#[async_trait]
pub trait Reranker: Send + Sync {
    /// One score per entry of `chunk_texts`, in the same order.
    ///
    /// Scores are expected in [0, 1]. A non-finite or out-of-range entry
    /// means the chunk could not be scored. A failed call returns
    /// [`KnowledgeError::RerankerUnavailable`].
    async fn score(&self, question: &str, chunk_texts: &[String]) -> Result<Vec<f32>>;
}

/// Ollama Reranker Client.
#[derive(Clone)]
pub struct OllamaRerankerClient {
    /// HTTP client
    client: Client,

    /// Ollama server URL
    url: String,

    /// Model name
    model: String,
}

impl OllamaRerankerClient {
    /// Create a new Ollama reranker client.
    pub fn new(config: &RerankerConfig) -> anyhow::Result<Self> {
        let client = ClientBuilder::new()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .context("Failed to build HTTP client for Ollama rerank")?;

        Ok(Self {
            client,
            url: config.ollama_url.trim_end_matches('/').to_string(),
            model: config.model.clone(),
        })
    }

    /// Rerank documents given a query using Ollama's rerank API.
    async fn rerank(&self, query: &str, documents: &[String]) -> anyhow::Result<Vec<f32>> {
        let payload = json!({
            "model": self.model,
            "query": query,
            "documents": documents,
        });

        debug!("Reranking {} documents", documents.len());

        let response = self
            .client
            .post(format!("{}/api/rerank", self.url))
            .json(&payload)
            .send()
            .await
            .context("Failed to call Ollama rerank API")?;

        if response.status() == StatusCode::NOT_FOUND {
            anyhow::bail!("Ollama /api/rerank endpoint not available");
        }

        if !response.status().is_success() {
            let status = response.status();
            let error_text = response.text().await.unwrap_or_default();
            anyhow::bail!("Ollama rerank API error (status {}): {}", status, error_text);
        }

        #[derive(serde::Deserialize)]
        struct Response {
            results: Vec<RerankResult>,
        }

        #[derive(serde::Deserialize)]
        struct RerankResult {
            #[serde(default)]
            index: Option<usize>,
            relevance_score: f32,
        }

        let response_data: Response = response
            .json()
            .await
            .context("Failed to parse Ollama rerank response")?;

        // Results may come back sorted by score; put them back in input order.
        let mut scores = vec![f32::NAN; documents.len()];
        for (position, result) in response_data.results.into_iter().enumerate() {
            let slot = result.index.unwrap_or(position);
            if let Some(score) = scores.get_mut(slot) {
                *score = result.relevance_score;
            }
        }
        Ok(scores)
    }
}

#[async_trait]
impl Reranker for OllamaRerankerClient {
    async fn score(&self, question: &str, chunk_texts: &[String]) -> Result<Vec<f32>> {
        if chunk_texts.is_empty() {
            return Ok(vec![]);
        }
        self.rerank(question, chunk_texts)
            .await
            .map_err(|e| KnowledgeError::RerankerUnavailable(format!("{:#}", e)))
    }
}

/// Reranker that asks a chat model to rate each chunk.
pub struct LlmJudgeReranker {
    generator: Arc<dyn AnswerGenerator>,
}

const JUDGE_SYSTEM_PROMPT: &str = "You rate how useful text passages are for answering a question. \
For every passage give a relevance score between 0 and 1, where 1 means the passage directly answers \
the question and 0 means it is unrelated. Reply with a JSON array of numbers only, one per passage, \
in the order the passages are given.";

impl LlmJudgeReranker {
    /// Create a judge backed by `generator`.
    pub fn new(generator: Arc<dyn AnswerGenerator>) -> Self {
        Self { generator }
    }

    fn user_message(question: &str, chunk_texts: &[String]) -> String {
        let mut message = format!("Question: {}\n\n", question.trim());
        for (i, text) in chunk_texts.iter().enumerate() {
            message.push_str(&format!("Passage {}:\n{}\n\n", i + 1, text.trim()));
        }
        message.push_str(&format!("Return exactly {} scores.", chunk_texts.len()));
        message
    }
}

/// Pull the first JSON array of scores out of a model reply.
static SCORE_ARRAY: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?s)\[.*?\]").expect("score array pattern is valid"));

fn parse_scores(reply: &str, expected: usize) -> Result<Vec<f32>> {
    let found = SCORE_ARRAY
        .find(reply)
        .ok_or_else(|| KnowledgeError::RerankerUnavailable("judge reply contains no score array".into()))?;
    let values: Vec<serde_json::Value> = serde_json::from_str(found.as_str())
        .map_err(|e| KnowledgeError::RerankerUnavailable(format!("judge reply is not a JSON array: {}", e)))?;

    if values.len() != expected {
        return Err(KnowledgeError::RerankerUnavailable(format!(
            "judge returned {} scores for {} passages",
            values.len(),
            expected
        )));
    }

    Ok(values
        .iter()
        .map(|v| v.as_f64().map_or(f32::NAN, |score| score as f32))
        .collect())
}

#[async_trait]
impl Reranker for LlmJudgeReranker {
    async fn score(&self, question: &str, chunk_texts: &[String]) -> Result<Vec<f32>> {
        if chunk_texts.is_empty() {
            return Ok(vec![]);
        }

        let reply = self
            .generator
            .generate(JUDGE_SYSTEM_PROMPT, &Self::user_message(question, chunk_texts))
            .await
            .map_err(|e| KnowledgeError::RerankerUnavailable(e.to_string()))?;

        parse_scores(&reply.answer_text, chunk_texts.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::FakeGenerator;

    #[test]
    fn test_parse_scores_from_chatty_reply() {
        let scores = parse_scores("Sure! Here are the scores:\n[0.9, 0.1,\n 0.5]\nHope it helps.", 3).unwrap();
        assert_eq!(scores, vec![0.9, 0.1, 0.5]);
    }

    #[test]
    fn test_parse_scores_marks_non_numbers_unscored() {
        let scores = parse_scores(r#"[0.7, "n/a"]"#, 2).unwrap();
        assert_eq!(scores[0], 0.7);
        assert!(scores[1].is_nan());
    }

    #[test]
    fn test_parse_scores_rejects_wrong_length() {
        assert!(matches!(
            parse_scores("[0.7]", 2),
            Err(KnowledgeError::RerankerUnavailable(_))
        ));
        assert!(parse_scores("no idea", 1).is_err());
    }

    #[test]
    fn test_parse_scores_takes_first_array() {
        let scores = parse_scores("[0.2, 0.4] and later [9, 9]", 2).unwrap();
        assert_eq!(scores, vec![0.2, 0.4]);
        assert_eq!(SCORE_ARRAY.find("[1]").map(|m| m.as_str()), Some("[1]"));
    }

    #[tokio::test]
    async fn test_judge_sends_numbered_passages() {
        let generator = Arc::new(FakeGenerator::replying("[0.2, 0.8]"));
        let judge = LlmJudgeReranker::new(generator.clone());

        let scores = judge
            .score("what is rust?", &["A language.".to_string(), "A fungus.".to_string()])
            .await
            .unwrap();

        assert_eq!(scores, vec![0.2, 0.8]);
        let (_, user) = &generator.prompts()[0];
        assert!(user.contains("Passage 1:\nA language."));
        assert!(user.contains("Passage 2:\nA fungus."));
    }

    #[tokio::test]
    async fn test_judge_failure_is_unavailable() {
        let judge = LlmJudgeReranker::new(Arc::new(FakeGenerator::failing()));
        let err = judge.score("q", &["x".to_string()]).await.unwrap_err();
        assert!(matches!(err, KnowledgeError::RerankerUnavailable(_)));
    }
}
