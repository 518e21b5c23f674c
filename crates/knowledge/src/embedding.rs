//! Embedding providers.
//!
//! [`EmbeddingProvider`] is the narrow interface to whatever model turns
//! text into vectors. [`OllamaEmbeddingClient`] talks to a local Ollama
//! server; [`RetryingEmbedder`] wraps any provider in the bounded
//! exponential-backoff loop every indexing and query path goes through.

use anyhow::Context;
use async_trait::async_trait;
use docrag_core::{EmbeddingConfig, RetryConfig};
use reqwest::{Client, ClientBuilder};
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

use crate::error::{KnowledgeError, ProviderError, Result};

/// Maps text to a fixed-dimensionality vector.
#[async_trait]
pub trait EmbeddingProvider: Send + Sync {
    /// Embed a single text.
    async fn embed(&self, text: &str) -> std::result::Result<Vec<f32>, ProviderError>;

    /// Dimension of every vector this provider returns.
    fn dimension(&self) -> usize;
}

/// Ollama Embedding Client.
#[derive(Clone)]
pub struct OllamaEmbeddingClient {
    /// HTTP client
    client: Client,

    /// Ollama server URL
    url: String,

    /// Model name
    model: String,

    /// Expected embedding dimension
    dimension: usize,
}

impl OllamaEmbeddingClient {
    /// Create a new Ollama embedding client.
    pub fn new(config: &EmbeddingConfig) -> anyhow::Result<Self> {
        let client = ClientBuilder::new()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .context("Failed to build HTTP client for Ollama embeddings")?;

        Ok(Self {
            client,
            url: config.ollama_url.trim_end_matches('/').to_string(),
            model: config.model.clone(),
            dimension: config.dimension,
        })
    }

    /// Check if Ollama server is available.
    pub async fn health_check(&self) -> anyhow::Result<bool> {
        let response = self
            .client
            .get(format!("{}/api/version", self.url))
            .send()
            .await
            .context("Failed to check Ollama health")?;

        Ok(response.status().is_success())
    }
}

#[async_trait]
impl EmbeddingProvider for OllamaEmbeddingClient {
    async fn embed(&self, text: &str) -> std::result::Result<Vec<f32>, ProviderError> {
        let payload = json!({
            "model": self.model,
            "prompt": text,
        });

        debug!("Generating embedding for text ({} chars)", text.len());

        let response = self
            .client
            .post(format!("{}/api/embeddings", self.url))
            .json(&payload)
            .send()
            .await
            .map_err(|e| ProviderError::from_reqwest(&e))?;

        if !response.status().is_success() {
            let status = response.status();
            let error_text = response.text().await.unwrap_or_default();
            return Err(ProviderError::from_status(status, &error_text));
        }

        #[derive(serde::Deserialize)]
        struct Response {
            embedding: Vec<f32>,
        }

        let response_data: Response = response
            .json()
            .await
            .map_err(|e| ProviderError::Permanent(format!("Failed to parse Ollama response: {}", e)))?;

        if response_data.embedding.is_empty() {
            return Err(ProviderError::Permanent("Ollama returned an empty embedding".to_string()));
        }

        Ok(response_data.embedding)
    }

    fn dimension(&self) -> usize {
        self.dimension
    }
}

/// Wraps a provider in a bounded retry loop with exponential backoff.
#[derive(Clone)]
pub struct RetryingEmbedder {
    provider: Arc<dyn EmbeddingProvider>,
    retry: RetryConfig,
}

impl RetryingEmbedder {
    /// Wrap `provider` with the given retry policy.
    pub fn new(provider: Arc<dyn EmbeddingProvider>, retry: RetryConfig) -> Self {
        Self { provider, retry }
    }

    /// Dimension of the wrapped provider.
    pub fn dimension(&self) -> usize {
        self.provider.dimension()
    }

    /// Embed `text`, retrying transient failures.
    ///
    /// Permanent failures end the loop immediately. After
    /// `max_attempts` transient failures the last error is returned as
    /// [`KnowledgeError::EmbeddingGeneration`].
    pub async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        let max_attempts = self.retry.max_attempts.max(1);
        let mut attempt = 1;

        loop {
            match self.provider.embed(text).await {
                Ok(embedding) => return Ok(embedding),
                Err(err) if err.is_transient() && attempt < max_attempts => {
                    let delay = self.retry.delay_after(attempt);
                    warn!(
                        attempt,
                        max_attempts,
                        delay_ms = delay.as_millis() as u64,
                        "Embedding attempt failed, retrying: {}",
                        err
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                Err(err) => {
                    return Err(KnowledgeError::EmbeddingGeneration {
                        attempts: attempt,
                        message: err.to_string(),
                    });
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::FakeEmbedder;

    fn retry(max_attempts: u32) -> RetryConfig {
        RetryConfig { max_attempts, base_delay_ms: 100, max_delay_ms: 250 }
    }

    #[tokio::test(start_paused = true)]
    async fn test_retries_transient_failures() {
        let provider = Arc::new(FakeEmbedder::new(8).with_transient_failures(2));
        let embedder = RetryingEmbedder::new(provider.clone(), retry(3));

        let started = tokio::time::Instant::now();
        let embedding = embedder.embed("hello").await.unwrap();

        assert_eq!(embedding.len(), 8);
        assert_eq!(provider.calls(), 3);
        // 100ms then 200ms of backoff.
        let elapsed = started.elapsed();
        assert!(elapsed >= Duration::from_millis(300) && elapsed < Duration::from_millis(310));
    }

    #[tokio::test(start_paused = true)]
    async fn test_gives_up_after_max_attempts() {
        let provider = Arc::new(FakeEmbedder::new(8).with_transient_failures(10));
        let embedder = RetryingEmbedder::new(provider.clone(), retry(4));

        let started = tokio::time::Instant::now();
        let err = embedder.embed("hello").await.unwrap_err();

        assert!(matches!(err, KnowledgeError::EmbeddingGeneration { attempts: 4, .. }));
        assert_eq!(provider.calls(), 4);
        // 100 + 200 + 250 (capped)
        let elapsed = started.elapsed();
        assert!(elapsed >= Duration::from_millis(550) && elapsed < Duration::from_millis(560));
    }

    #[tokio::test]
    async fn test_permanent_failure_is_not_retried() {
        let provider = Arc::new(FakeEmbedder::new(8).failing_on("poison"));
        let embedder = RetryingEmbedder::new(provider.clone(), retry(5));

        let err = embedder.embed("some poison text").await.unwrap_err();
        assert!(matches!(err, KnowledgeError::EmbeddingGeneration { attempts: 1, .. }));
        assert_eq!(provider.calls(), 1);
    }

    #[test]
    fn test_ollama_client_uses_config() {
        let config = EmbeddingConfig {
            ollama_url: "http://localhost:11434/".to_string(),
            dimension: 1024,
            ..EmbeddingConfig::default()
        };
        let client = OllamaEmbeddingClient::new(&config).unwrap();
        assert_eq!(client.url, "http://localhost:11434");
        assert_eq!(client.dimension(), 1024);
    }
}
