//! HTTP Inference Client
//!
//! Wraps an OpenAI-compatible `/v1/chat/completions` endpoint. The
//! default deployment points at a local Ollama server; any compatible
//! endpoint works. One system message, one user message, no tool
//! definitions: tool use is decided by the pipeline, never delegated to
//! the model API.

use anyhow::{Context, Result};
use async_trait::async_trait;
use reqwest::Client;
use serde_json::Value;

use crate::types::InferenceClient;

pub struct HttpInferenceClient {
    api_url: String,
    api_key: String,
    model: String,
    max_tokens: u32,
    http: Client,
}

impl HttpInferenceClient {
    /// * `api_url` - Base URL for the inference API (e.g. `http://localhost:11434`).
    /// * `api_key` - Authorization header value; empty for unauthenticated local endpoints.
    /// * `model` - Model identifier (e.g. `llama3:8b`).
    /// * `max_tokens` - Completion token cap per call.
    pub fn new(api_url: String, api_key: String, model: String, max_tokens: u32) -> Self {
        Self {
            api_url,
            api_key,
            model,
            max_tokens,
            http: Client::new(),
        }
    }
}

#[async_trait]
impl InferenceClient for HttpInferenceClient {
    async fn chat(
        &self,
        system_instructions: &str,
        user_content: &str,
        temperature: f64,
    ) -> Result<String> {
        let body = serde_json::json!({
            "model": self.model,
            "messages": [
                { "role": "system", "content": system_instructions },
                { "role": "user", "content": user_content },
            ],
            "temperature": temperature,
            "max_tokens": self.max_tokens,
            "stream": false,
        });

        let url = format!("{}/v1/chat/completions", self.api_url);
        let mut request = self
            .http
            .post(&url)
            .header("Content-Type", "application/json")
            .json(&body);
        if !self.api_key.is_empty() {
            request = request.header("Authorization", &self.api_key);
        }

        let resp = request.send().await.context("Inference request failed")?;

        let status = resp.status();
        if !status.is_success() {
            let text = resp.text().await.unwrap_or_default();
            anyhow::bail!("Inference error: {}: {}", status.as_u16(), text);
        }

        let data: Value = resp
            .json()
            .await
            .context("Failed to parse inference response")?;

        let content = data["choices"]
            .get(0)
            .and_then(|choice| choice["message"]["content"].as_str())
            .ok_or_else(|| anyhow::anyhow!("No completion choice returned from inference"))?;

        Ok(content.to_string())
    }
}
