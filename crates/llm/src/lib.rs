//! Language-model runtime access.
//!
//! The engine treats the model as a synchronous black box behind one seam:
//! [`GenerateJson`].  Production uses the HTTP-backed [`OllamaClient`];
//! tests use the in-memory [`ScriptedClient`].  The handle is created once
//! at startup and shared process-wide behind an `Arc`.

mod ollama;
mod scripted;

use async_trait::async_trait;
use thiserror::Error;

pub use ollama::OllamaClient;
pub use scripted::ScriptedClient;

/// Failure kinds a model call can produce.  Callers distinguish transport
/// failures (fail fast or record `generation_failed`) from the content-level
/// problems they handle themselves after JSON decoding.
#[derive(Debug, Error)]
pub enum LlmError {
    #[error("LLM request failed: {0}")]
    Transport(#[from] reqwest::Error),
    #[error("LLM endpoint returned status {status}: {body}")]
    Status { status: u16, body: String },
    #[error("LLM response carried no completion text")]
    MissingCompletion,
    #[error("scripted client has no responses left")]
    ScriptExhausted,
    #[error("{0}")]
    Other(String),
}

/// A model client that produces JSON-formatted completions.
///
/// Implementations return the raw completion string; decoding and repair are
/// the caller's concern.  Calls are deterministic at `temperature = 0.0`.
#[async_trait]
pub trait GenerateJson: Send + Sync {
    async fn generate_json(
        &self,
        prompt: &str,
        max_tokens: u32,
        temperature: f32,
    ) -> Result<String, LlmError>;
}
