//! LLM-powered episode hypothesis generation.
//!
//! Detects episode multiplicity and pivoting in patient utterances by
//! semantic analysis.  This module does not enumerate mentions, extract
//! clinical data, or decide episode identity — it only produces the signal.
//!
//! Error handling is asymmetric on purpose: a failed model call propagates
//! (the runtime is down, fail fast), while malformed model *output* degrades
//! to the safe-default signal so the conversation continues.

use std::sync::Arc;

use anyhow::{Context, Result};
use serde_json::Value;
use tracing::{debug, info, warn};

use iris_llm::GenerateJson;

use crate::signal::{ConfidenceBand, EpisodeHypothesisSignal};

/// Context about the episode currently under discussion.
#[derive(Debug, Clone, Default)]
pub struct EpisodeContext {
    /// Symptom categories confirmed present in the current episode,
    /// e.g. `["vision loss", "headache"]`.
    pub active_symptom_categories: Vec<String>,
}

pub struct EpisodeHypothesisGenerator {
    llm: Arc<dyn GenerateJson>,
    temperature: f32,
    max_tokens: u32,
}

impl EpisodeHypothesisGenerator {
    pub fn new(llm: Arc<dyn GenerateJson>) -> Self {
        Self { llm, temperature: 0.0, max_tokens: 128 }
    }

    /// Generate the hypothesis signal for one utterance.
    ///
    /// Empty or whitespace-only input short-circuits to the zero-hypothesis
    /// signal without a model call.
    pub async fn generate(
        &self,
        user_utterance: &str,
        last_system_question: Option<&str>,
        context: Option<&EpisodeContext>,
    ) -> Result<EpisodeHypothesisSignal> {
        if user_utterance.trim().is_empty() {
            debug!("empty utterance, returning zero-hypothesis signal");
            return Ok(EpisodeHypothesisSignal::empty_input());
        }

        let prompt = build_prompt(user_utterance, last_system_question, context);
        let raw = self
            .llm
            .generate_json(&prompt, self.max_tokens, self.temperature)
            .await
            .context("episode hypothesis model call failed")?;

        let signal = parse_output(&raw);
        info!(
            hypothesis_count = signal.hypothesis_count,
            pivot_detected = signal.pivot_detected,
            "hypothesis signal generated"
        );
        Ok(signal)
    }
}

fn build_prompt(
    user_utterance: &str,
    last_system_question: Option<&str>,
    context: Option<&EpisodeContext>,
) -> String {
    let context_section = match context {
        Some(context) if !context.active_symptom_categories.is_empty() => format!(
            "\nCurrent Problem Context:\nThe patient is currently being asked about symptoms \
             related to: {}\n",
            context.active_symptom_categories.join(", ")
        ),
        Some(_) => "\nCurrent Problem Context:\nThis is a new problem - no symptom categories \
                    have been confirmed yet.\n"
            .to_string(),
        None => "\nCurrent Problem Context:\nNo problem context available.\n".to_string(),
    };

    let question_section = match last_system_question {
        Some(question) => format!("\nLast System Question:\n\"{question}\"\n"),
        None => String::new(),
    };

    format!(
        "You are analyzing a patient's response in an ophthalmology consultation to detect \
         whether they are referring to more than one distinct eye problem.\n\
         \n\
         A distinct problem is a separate symptom presentation. Patients may:\n\
         1. Talk about multiple different eye problems in one response\n\
         2. Start answering about one problem but then switch to a different problem (pivot)\n\
         {context_section}{question_section}\n\
         Patient Response:\n\"{user_utterance}\"\n\
         \n\
         Determine:\n\
         1. hypothesis_count: How many distinct eye problems are mentioned?\n\
            - 0 = no eye problem mentioned (off-topic, greeting, or unclear)\n\
            - 1 = exactly one problem discussed\n\
            - 2 or more = multiple distinct problems mentioned\n\
         2. hypothesis_confidence: \"low\", \"medium\" or \"high\"\n\
         3. pivot_detected: Did the patient switch to a different problem mid-response? \
         true or false\n\
         4. pivot_confidence: \"low\", \"medium\" or \"high\"\n\
         \n\
         Respond with ONLY a JSON object in this exact format:\n\
         {{\"hypothesis_count\": <number>, \"hypothesis_confidence\": \"<low|medium|high>\", \
         \"pivot_detected\": <true|false>, \"pivot_confidence\": \"<low|medium|high>\"}}"
    )
}

/// Parse model output, degrading field-by-field to safe values.  A fully
/// unparseable payload yields the safe-default signal.
fn parse_output(raw: &str) -> EpisodeHypothesisSignal {
    let parsed: Value = match serde_json::from_str(raw) {
        Ok(parsed) => parsed,
        Err(err) => {
            warn!(%err, raw = raw.get(..200).unwrap_or(raw), "invalid JSON from triage model");
            return EpisodeHypothesisSignal::no_ambiguity();
        }
    };
    if !parsed.is_object() {
        warn!("triage model returned non-object JSON");
        return EpisodeHypothesisSignal::no_ambiguity();
    }

    EpisodeHypothesisSignal {
        hypothesis_count: extract_count(&parsed),
        confidence_band: extract_band(&parsed, "hypothesis_confidence"),
        pivot_detected: extract_pivot(&parsed),
        pivot_confidence_band: extract_band(&parsed, "pivot_confidence"),
    }
}

/// Clamp to 0 and cap at 2 — ">1" is all downstream logic cares about.
fn extract_count(parsed: &Value) -> u8 {
    let raw = match parsed.get("hypothesis_count") {
        Some(raw) => raw,
        None => {
            warn!("missing hypothesis_count, defaulting to 1");
            return 1;
        }
    };

    let count = raw
        .as_i64()
        .or_else(|| raw.as_f64().map(|count| count as i64))
        .or_else(|| raw.as_str().and_then(|text| text.trim().parse::<i64>().ok()));
    match count {
        Some(count) if count < 0 => {
            warn!(count, "negative hypothesis_count clamped to 0");
            0
        }
        Some(count) => count.min(2) as u8,
        None => {
            warn!(?raw, "unparseable hypothesis_count, defaulting to 1");
            1
        }
    }
}

fn extract_band(parsed: &Value, key: &str) -> ConfidenceBand {
    match parsed.get(key).and_then(Value::as_str).and_then(ConfidenceBand::parse) {
        Some(band) => band,
        None => {
            warn!(key, "missing or invalid confidence band, defaulting to high");
            ConfidenceBand::High
        }
    }
}

fn extract_pivot(parsed: &Value) -> bool {
    match parsed.get("pivot_detected") {
        Some(Value::Bool(flag)) => *flag,
        Some(Value::String(text)) => match text.trim().to_lowercase().as_str() {
            "true" | "yes" | "1" => true,
            "false" | "no" | "0" => false,
            other => {
                warn!(value = other, "invalid pivot_detected string, defaulting to false");
                false
            }
        },
        Some(other) => {
            warn!(?other, "unexpected pivot_detected type, defaulting to false");
            false
        }
        None => {
            warn!("missing pivot_detected, defaulting to false");
            false
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use iris_llm::ScriptedClient;

    use crate::signal::{ConfidenceBand, EpisodeHypothesisSignal};

    use super::{EpisodeContext, EpisodeHypothesisGenerator};

    fn generator(responses: &[&str]) -> EpisodeHypothesisGenerator {
        EpisodeHypothesisGenerator::new(Arc::new(ScriptedClient::new(responses.iter().copied())))
    }

    #[tokio::test]
    async fn empty_utterance_skips_the_model() {
        let client = Arc::new(ScriptedClient::new(Vec::<String>::new()));
        let generator = EpisodeHypothesisGenerator::new(client.clone());

        let signal = generator.generate("   ", None, None).await.unwrap();
        assert_eq!(signal, EpisodeHypothesisSignal::empty_input());
        assert_eq!(client.calls(), 0);
    }

    #[tokio::test]
    async fn well_formed_output_parses_into_the_signal() {
        let generator = generator(&[r#"{"hypothesis_count": 2, "hypothesis_confidence": "medium",
            "pivot_detected": false, "pivot_confidence": "low"}"#]);
        let signal = generator
            .generate("my right eye is blurry and I get terrible headaches", None, None)
            .await
            .unwrap();

        assert_eq!(signal.hypothesis_count, 2);
        assert_eq!(signal.confidence_band, ConfidenceBand::Medium);
        assert!(!signal.pivot_detected);
        assert_eq!(signal.pivot_confidence_band, ConfidenceBand::Low);
    }

    #[tokio::test]
    async fn count_is_capped_at_two_and_clamped_at_zero() {
        let generator = generator(&[
            r#"{"hypothesis_count": 7, "hypothesis_confidence": "high", "pivot_detected": false, "pivot_confidence": "high"}"#,
            r#"{"hypothesis_count": -3, "hypothesis_confidence": "high", "pivot_detected": false, "pivot_confidence": "high"}"#,
        ]);
        assert_eq!(generator.generate("a", None, None).await.unwrap().hypothesis_count, 2);
        assert_eq!(generator.generate("b", None, None).await.unwrap().hypothesis_count, 0);
    }

    #[tokio::test]
    async fn malformed_output_fails_open_to_the_safe_default() {
        let generator = generator(&["not json at all"]);
        let signal = generator.generate("my eye hurts", None, None).await.unwrap();
        assert_eq!(signal, EpisodeHypothesisSignal::no_ambiguity());
    }

    #[tokio::test]
    async fn missing_fields_degrade_individually() {
        let generator = generator(&[r#"{"hypothesis_count": 1}"#]);
        let signal = generator.generate("my eye hurts", None, None).await.unwrap();
        assert_eq!(signal.hypothesis_count, 1);
        assert_eq!(signal.confidence_band, ConfidenceBand::High);
        assert!(!signal.pivot_detected);
    }

    #[tokio::test]
    async fn model_call_failure_propagates() {
        let generator = EpisodeHypothesisGenerator::new(Arc::new(ScriptedClient::failing()));
        assert!(generator.generate("my eye hurts", None, None).await.is_err());
    }

    #[tokio::test]
    async fn prompt_carries_context_and_last_question() {
        let client = Arc::new(ScriptedClient::new([
            r#"{"hypothesis_count": 1, "hypothesis_confidence": "high", "pivot_detected": false, "pivot_confidence": "high"}"#,
        ]));
        let generator = EpisodeHypothesisGenerator::new(client.clone());
        let context = EpisodeContext {
            active_symptom_categories: vec!["vision loss".into()],
        };

        generator
            .generate("it got worse", Some("How severe is it now?"), Some(&context))
            .await
            .unwrap();

        let prompt = client.prompts().remove(0);
        assert!(prompt.contains("vision loss"));
        assert!(prompt.contains("How severe is it now?"));
        assert!(prompt.contains("\"it got worse\""));
    }
}
