//! Answer generation - the LLM call downstream of context assembly.

use anyhow::Context;
use async_trait::async_trait;
use docrag_core::GenerationConfig;
use reqwest::{Client, ClientBuilder};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::time::Duration;
use tracing::debug;

use crate::error::{KnowledgeError, Result};

/// Text produced by the model plus its token usage.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GeneratedAnswer {
    /// Model reply
    pub answer_text: String,
    /// Prompt plus completion tokens, as reported by the model server
    pub tokens_used: usize,
}

/// Produces an answer from a system prompt and a user message.
#[async_trait]
pub trait AnswerGenerator: Send + Sync {
    /// Run one chat completion.
    async fn generate(&self, system_prompt: &str, user_message: &str) -> Result<GeneratedAnswer>;
}

/// Ollama chat client.
#[derive(Clone)]
pub struct OllamaChatClient {
    /// HTTP client
    client: Client,

    /// Ollama server URL
    url: String,

    /// Model name
    model: String,

    /// Sampling temperature
    temperature: f32,
}

impl OllamaChatClient {
    /// Create a new Ollama chat client.
    pub fn new(config: &GenerationConfig) -> anyhow::Result<Self> {
        let client = ClientBuilder::new()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .context("Failed to build HTTP client for Ollama chat")?;

        Ok(Self {
            client,
            url: config.ollama_url.trim_end_matches('/').to_string(),
            model: config.model.clone(),
            temperature: config.temperature,
        })
    }

    async fn chat(&self, system_prompt: &str, user_message: &str) -> anyhow::Result<GeneratedAnswer> {
        let payload = json!({
            "model": self.model,
            "stream": false,
            "messages": [
                { "role": "system", "content": system_prompt },
                { "role": "user", "content": user_message },
            ],
            "options": {
                "temperature": self.temperature,
            },
        });

        debug!(model = %self.model, "Requesting chat completion ({} prompt chars)", system_prompt.len() + user_message.len());

        let response = self
            .client
            .post(format!("{}/api/chat", self.url))
            .json(&payload)
            .send()
            .await
            .context("Failed to call Ollama chat API")?;

        if !response.status().is_success() {
            let status = response.status();
            let error_text = response.text().await.unwrap_or_default();
            anyhow::bail!("Ollama chat API error (status {}): {}", status, error_text);
        }

        #[derive(Deserialize)]
        struct Message {
            content: String,
        }

        #[derive(Deserialize)]
        struct Response {
            message: Message,
            #[serde(default)]
            prompt_eval_count: usize,
            #[serde(default)]
            eval_count: usize,
        }

        let response_data: Response = response
            .json()
            .await
            .context("Failed to parse Ollama chat response")?;

        Ok(GeneratedAnswer {
            answer_text: response_data.message.content,
            tokens_used: response_data.prompt_eval_count + response_data.eval_count,
        })
    }
}

#[async_trait]
impl AnswerGenerator for OllamaChatClient {
    async fn generate(&self, system_prompt: &str, user_message: &str) -> Result<GeneratedAnswer> {
        self.chat(system_prompt, user_message)
            .await
            .map_err(|e| KnowledgeError::Generation(format!("{:#}", e)))
    }
}
