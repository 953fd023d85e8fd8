use async_trait::async_trait;
use serde_json::json;
use tracing::debug;

use crate::{GenerateJson, LlmError};

/// HTTP client for an Ollama-compatible `/api/generate` endpoint.
///
/// `format: "json"` constrains decoding to valid JSON where the runtime
/// supports it; the parser still treats the output as untrusted text.
#[derive(Debug, Clone)]
pub struct OllamaClient {
    client: reqwest::Client,
    model: String,
    base_url: String,
}

impl OllamaClient {
    /// `OLLAMA_BASE_URL` overrides the configured base URL at construction.
    pub fn new(model: impl Into<String>, base_url: impl Into<String>) -> Self {
        let base_url = std::env::var("OLLAMA_BASE_URL").unwrap_or_else(|_| base_url.into());
        Self {
            client: reqwest::Client::new(),
            model: model.into(),
            base_url,
        }
    }

    pub fn model(&self) -> &str {
        &self.model
    }
}

#[async_trait]
impl GenerateJson for OllamaClient {
    async fn generate_json(
        &self,
        prompt: &str,
        max_tokens: u32,
        temperature: f32,
    ) -> Result<String, LlmError> {
        let endpoint = format!("{}/api/generate", self.base_url.trim_end_matches('/'));
        let payload = json!({
            "model": self.model,
            "prompt": prompt,
            "stream": false,
            "format": "json",
            "options": {
                "temperature": temperature,
                "num_predict": max_tokens,
            },
        });

        debug!(model = %self.model, prompt_len = prompt.len(), "sending extraction prompt");
        let response = self.client.post(&endpoint).json(&payload).send().await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(LlmError::Status { status: status.as_u16(), body });
        }

        let body: serde_json::Value = response.json().await?;
        let completion = body
            .get("response")
            .and_then(serde_json::Value::as_str)
            .ok_or(LlmError::MissingCompletion)?;

        debug!(completion_len = completion.len(), "completion received");
        Ok(completion.trim().to_string())
    }
}
