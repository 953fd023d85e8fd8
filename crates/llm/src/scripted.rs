use std::collections::VecDeque;
use std::sync::Mutex;

use async_trait::async_trait;

use crate::{GenerateJson, LlmError};

/// Deterministic in-memory stand-in for the model runtime.
///
/// Queued responses are returned in order; every received prompt is recorded
/// so tests can assert on prompt content.  An exhausted script or an
/// explicit `failing()` client surfaces as a transport-level error, which is
/// exactly what a dead model runtime looks like to callers.
#[derive(Debug, Default)]
pub struct ScriptedClient {
    responses: Mutex<VecDeque<String>>,
    prompts: Mutex<Vec<String>>,
    fail: bool,
}

impl ScriptedClient {
    pub fn new(responses: impl IntoIterator<Item = impl Into<String>>) -> Self {
        Self {
            responses: Mutex::new(responses.into_iter().map(Into::into).collect()),
            prompts: Mutex::new(Vec::new()),
            fail: false,
        }
    }

    /// A client whose every call fails, for exercising fail-fast paths.
    pub fn failing() -> Self {
        Self { fail: true, ..Self::default() }
    }

    pub fn push_response(&self, response: impl Into<String>) {
        self.responses.lock().expect("scripted queue poisoned").push_back(response.into());
    }

    /// Prompts received so far, in call order.
    pub fn prompts(&self) -> Vec<String> {
        self.prompts.lock().expect("scripted prompts poisoned").clone()
    }

    pub fn calls(&self) -> usize {
        self.prompts.lock().expect("scripted prompts poisoned").len()
    }
}

#[async_trait]
impl GenerateJson for ScriptedClient {
    async fn generate_json(
        &self,
        prompt: &str,
        _max_tokens: u32,
        _temperature: f32,
    ) -> Result<String, LlmError> {
        self.prompts.lock().expect("scripted prompts poisoned").push(prompt.to_string());
        if self.fail {
            return Err(LlmError::Other("scripted failure".into()));
        }
        self.responses
            .lock()
            .expect("scripted queue poisoned")
            .pop_front()
            .ok_or(LlmError::ScriptExhausted)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn replays_responses_in_order_and_records_prompts() {
        let client = ScriptedClient::new(["{\"a\": 1}", "{}"]);
        assert_eq!(client.generate_json("first", 64, 0.0).await.unwrap(), "{\"a\": 1}");
        assert_eq!(client.generate_json("second", 64, 0.0).await.unwrap(), "{}");
        assert!(matches!(
            client.generate_json("third", 64, 0.0).await,
            Err(LlmError::ScriptExhausted)
        ));
        assert_eq!(client.prompts(), vec!["first", "second", "third"]);
    }

    #[tokio::test]
    async fn failing_client_always_errors() {
        let client = ScriptedClient::failing();
        assert!(client.generate_json("any", 64, 0.0).await.is_err());
        assert_eq!(client.calls(), 1);
    }
}
