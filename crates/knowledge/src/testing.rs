//! Deterministic stand-ins for the external services, used by unit tests.

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, AtomicUsize, Ordering};
use std::sync::Mutex;

use crate::embedding::EmbeddingProvider;
use crate::error::{KnowledgeError, ProviderError, Result};
use crate::generation::{AnswerGenerator, GeneratedAnswer};
use crate::reranker::Reranker;

/// Letter-frequency embedder: texts sharing letters point the same way.
pub struct FakeEmbedder {
    dimension: usize,
    calls: AtomicUsize,
    transient_failures: AtomicU32,
    fail_on: Vec<String>,
    overrides: HashMap<String, Vec<f32>>,
    park_after: Option<usize>,
}

impl FakeEmbedder {
    pub fn new(dimension: usize) -> Self {
        Self {
            dimension,
            calls: AtomicUsize::new(0),
            transient_failures: AtomicU32::new(0),
            fail_on: Vec::new(),
            overrides: HashMap::new(),
            park_after: None,
        }
    }

    /// Fail the next `n` calls with a transient error.
    pub fn with_transient_failures(self, n: u32) -> Self {
        self.transient_failures.store(n, Ordering::SeqCst);
        self
    }

    /// Fail permanently for any text containing `needle`.
    pub fn failing_on(mut self, needle: &str) -> Self {
        self.fail_on.push(needle.to_string());
        self
    }

    /// Return `vector` verbatim for exactly `text`.
    pub fn with_vector(mut self, text: &str, vector: Vec<f32>) -> Self {
        self.overrides.insert(text.to_string(), vector);
        self
    }

    /// Answer the first `n` calls, then never complete.
    pub fn parking_after(mut self, n: usize) -> Self {
        self.park_after = Some(n);
        self
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl EmbeddingProvider for FakeEmbedder {
    async fn embed(&self, text: &str) -> std::result::Result<Vec<f32>, ProviderError> {
        let previous = self.calls.fetch_add(1, Ordering::SeqCst);
        if self.park_after.is_some_and(|n| previous >= n) {
            std::future::pending::<()>().await;
        }

        let remaining = self.transient_failures.load(Ordering::SeqCst);
        if remaining > 0 {
            self.transient_failures.store(remaining - 1, Ordering::SeqCst);
            return Err(ProviderError::Transient("connection reset".to_string()));
        }
        if self.fail_on.iter().any(|needle| text.contains(needle.as_str())) {
            return Err(ProviderError::Permanent("input rejected".to_string()));
        }
        if let Some(vector) = self.overrides.get(text) {
            return Ok(vector.clone());
        }

        let mut vector = vec![0.0; self.dimension];
        for c in text.chars().filter(char::is_ascii_alphabetic) {
            let bucket = (c.to_ascii_lowercase() as usize - 'a' as usize) % self.dimension;
            vector[bucket] += 1.0;
        }
        vector[self.dimension - 1] += 0.1;
        Ok(vector)
    }

    fn dimension(&self) -> usize {
        self.dimension
    }
}

/// Reranker returning canned scores, or failing.
pub struct ScriptedReranker {
    scores: Option<Vec<f32>>,
    calls: AtomicUsize,
}

impl ScriptedReranker {
    pub fn scoring(scores: Vec<f32>) -> Self {
        Self { scores: Some(scores), calls: AtomicUsize::new(0) }
    }

    pub fn failing() -> Self {
        Self { scores: None, calls: AtomicUsize::new(0) }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Reranker for ScriptedReranker {
    async fn score(&self, _question: &str, _chunk_texts: &[String]) -> Result<Vec<f32>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.scores
            .clone()
            .ok_or_else(|| KnowledgeError::RerankerUnavailable("connection refused".to_string()))
    }
}

/// Generator that replies with a fixed text and records its prompts.
pub struct FakeGenerator {
    reply: Option<String>,
    prompts: Mutex<Vec<(String, String)>>,
}

impl FakeGenerator {
    pub fn replying(reply: &str) -> Self {
        Self { reply: Some(reply.to_string()), prompts: Mutex::new(Vec::new()) }
    }

    pub fn failing() -> Self {
        Self { reply: None, prompts: Mutex::new(Vec::new()) }
    }

    pub fn prompts(&self) -> Vec<(String, String)> {
        self.prompts.lock().unwrap().clone()
    }
}

#[async_trait]
impl AnswerGenerator for FakeGenerator {
    async fn generate(&self, system_prompt: &str, user_message: &str) -> Result<GeneratedAnswer> {
        self.prompts
            .lock()
            .unwrap()
            .push((system_prompt.to_string(), user_message.to_string()));
        match &self.reply {
            Some(reply) => Ok(GeneratedAnswer { answer_text: reply.clone(), tokens_used: 42 }),
            None => Err(KnowledgeError::Generation("model offline".to_string())),
        }
    }
}
