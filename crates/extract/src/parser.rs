//! Response parser: run a pre-built extraction prompt through the model and
//! normalize the output under the outcome contract.
//!
//! The parser is a pure executor.  It builds no prompts, performs no episode
//! reasoning, and does not enforce categorical membership — warnings only;
//! schema enforcement happens downstream at write time.

use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::Value;
use tracing::{debug, info, warn};

use iris_core::ValueEnvelope;
use iris_llm::{GenerateJson, LlmError};

const TRUE_VALUES: &[&str] = &["true", "yes", "y", "1", "t"];
const FALSE_VALUES: &[&str] = &["false", "no", "n", "0", "f"];

/// Source identity stamped on every envelope this parser produces.
const SOURCE: &str = "response_parser";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ParseOutcome {
    /// The expected field was extracted with a non-null value.
    Success,
    /// Something was extracted, but not the expected field.
    PartialSuccess,
    /// The model returned `{}` — nothing clearly extractable.
    Unclear,
    /// The model returned something that is not a JSON object.
    ExtractionFailed,
    /// The model call itself failed.
    GenerationFailed,
}

impl ParseOutcome {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Success => "success",
            Self::PartialSuccess => "partial_success",
            Self::Unclear => "unclear",
            Self::ExtractionFailed => "extraction_failed",
            Self::GenerationFailed => "generation_failed",
        }
    }
}

/// Audit record for one applied normalization.
#[derive(Debug, Clone, Serialize)]
pub struct NormalizationRecord {
    pub field: String,
    pub original_value: Value,
    pub normalized_value: Value,
    pub normalization_type: &'static str,
}

#[derive(Debug, Clone, Serialize)]
pub struct ParseMetadata {
    pub expected_field: Option<String>,
    pub turn_id: Option<String>,
    pub timestamp: DateTime<Utc>,
    pub raw_llm_output: Option<String>,
    pub error_message: Option<String>,
    pub error_type: Option<String>,
    pub validation_warnings: Vec<String>,
    pub normalization_applied: Vec<NormalizationRecord>,
}

impl ParseMetadata {
    fn new(expected_field: Option<&str>, turn_id: Option<&str>) -> Self {
        Self {
            expected_field: expected_field.map(str::to_string),
            turn_id: turn_id.map(str::to_string),
            timestamp: Utc::now(),
            raw_llm_output: None,
            error_message: None,
            error_type: None,
            validation_warnings: Vec::new(),
            normalization_applied: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct ParseResult {
    pub outcome: ParseOutcome,
    pub fields: BTreeMap<String, ValueEnvelope>,
    pub parse_metadata: ParseMetadata,
}

impl ParseResult {
    fn failed(outcome: ParseOutcome, parse_metadata: ParseMetadata) -> Self {
        Self { outcome, fields: BTreeMap::new(), parse_metadata }
    }
}

pub struct ResponseParser {
    llm: Arc<dyn GenerateJson>,
    temperature: f32,
    max_tokens: u32,
}

impl ResponseParser {
    pub fn new(llm: Arc<dyn GenerateJson>) -> Self {
        Self { llm, temperature: 0.0, max_tokens: 256 }
    }

    /// Execute a pre-built extraction prompt.
    ///
    /// `expected_field` drives outcome determination; `turn_id` is carried
    /// into metadata for provenance.  Never errors: every failure mode is a
    /// tagged outcome.
    pub async fn parse(
        &self,
        prompt_text: &str,
        patient_response: &str,
        expected_field: Option<&str>,
        turn_id: Option<&str>,
    ) -> ParseResult {
        let mut metadata = ParseMetadata::new(expected_field, turn_id);
        debug!(turn_id, response_len = patient_response.len(), "running extraction");

        let raw = match self
            .llm
            .generate_json(prompt_text, self.max_tokens, self.temperature)
            .await
        {
            Ok(raw) => raw,
            Err(err) => {
                warn!(turn_id, %err, "LLM generation failed");
                metadata.error_message = Some(err.to_string());
                metadata.error_type = Some(error_kind(&err).to_string());
                return ParseResult::failed(ParseOutcome::GenerationFailed, metadata);
            }
        };
        metadata.raw_llm_output = Some(raw.clone());

        let parsed: Value = match serde_json::from_str(&raw) {
            Ok(parsed) => parsed,
            Err(err) => {
                warn!(turn_id, %err, "LLM returned invalid JSON");
                metadata.error_message = Some(format!("invalid JSON: {err}"));
                metadata.error_type = Some("json_decode".to_string());
                return ParseResult::failed(ParseOutcome::ExtractionFailed, metadata);
            }
        };
        let Some(object) = parsed.as_object() else {
            metadata.error_message = Some("expected a JSON object".to_string());
            metadata.error_type = Some("json_shape".to_string());
            return ParseResult::failed(ParseOutcome::ExtractionFailed, metadata);
        };

        if object.is_empty() {
            info!(turn_id, "empty extraction (unclear response)");
            return ParseResult::failed(ParseOutcome::Unclear, metadata);
        }

        let mut fields = BTreeMap::new();
        for (key, value) in object {
            // Underscore keys are model-internal scratch; never surfaced.
            if key.starts_with('_') {
                continue;
            }
            let normalized = self.normalize(key, value, &mut metadata);
            fields.insert(key.clone(), ValueEnvelope::new(normalized, SOURCE));
        }

        let outcome = match expected_field {
            Some(expected) => match fields.get(expected) {
                Some(envelope) if !envelope.value.is_null() => ParseOutcome::Success,
                _ if !fields.is_empty() => ParseOutcome::PartialSuccess,
                _ => {
                    // Non-empty object that yielded nothing usable.
                    metadata.error_message =
                        Some("parsed non-empty object but extracted no fields".to_string());
                    ParseOutcome::ExtractionFailed
                }
            },
            None if !fields.is_empty() => ParseOutcome::Success,
            None => {
                metadata.error_message =
                    Some("parsed non-empty object but extracted no fields".to_string());
                ParseOutcome::ExtractionFailed
            }
        };

        info!(
            turn_id,
            outcome = outcome.as_str(),
            field_count = fields.len(),
            "extraction complete"
        );
        ParseResult { outcome, fields, parse_metadata: metadata }
    }

    /// Boolean normalization from the fixed lexicon, recorded for audit.
    fn normalize(&self, field: &str, value: &Value, metadata: &mut ParseMetadata) -> Value {
        if let Value::String(text) = value {
            let lowered = text.trim().to_lowercase();
            let normalized = if TRUE_VALUES.contains(&lowered.as_str()) {
                Some(true)
            } else if FALSE_VALUES.contains(&lowered.as_str()) {
                Some(false)
            } else {
                None
            };
            if let Some(normalized) = normalized {
                metadata.normalization_applied.push(NormalizationRecord {
                    field: field.to_string(),
                    original_value: value.clone(),
                    normalized_value: Value::Bool(normalized),
                    normalization_type: "boolean",
                });
                return Value::Bool(normalized);
            }
        }
        value.clone()
    }
}

fn error_kind(err: &LlmError) -> &'static str {
    match err {
        LlmError::Transport(_) => "transport",
        LlmError::Status { .. } => "status",
        LlmError::MissingCompletion => "missing_completion",
        LlmError::ScriptExhausted => "script_exhausted",
        LlmError::Other(_) => "other",
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use serde_json::json;

    use iris_llm::ScriptedClient;

    use super::{ParseOutcome, ResponseParser};

    fn parser(responses: &[&str]) -> ResponseParser {
        ResponseParser::new(Arc::new(ScriptedClient::new(responses.iter().copied())))
    }

    #[tokio::test]
    async fn expected_field_present_is_success() {
        let parser = parser(&[r#"{"vl_laterality": "right"}"#]);
        let result = parser.parse("prompt", "my right eye", Some("vl_laterality"), None).await;
        assert_eq!(result.outcome, ParseOutcome::Success);
        assert_eq!(result.fields["vl_laterality"].value, json!("right"));
        assert_eq!(result.fields["vl_laterality"].source, "response_parser");
        assert_eq!(result.fields["vl_laterality"].confidence, 1.0);
    }

    #[tokio::test]
    async fn volunteered_fields_without_expected_is_partial() {
        let parser = parser(&[r#"{"vl_onset_speed": "acute"}"#]);
        let result = parser.parse("prompt", "it was sudden", Some("vl_laterality"), None).await;
        assert_eq!(result.outcome, ParseOutcome::PartialSuccess);
        assert!(result.fields.contains_key("vl_onset_speed"));
    }

    #[tokio::test]
    async fn multi_field_answer_extracts_both() {
        let parser = parser(&[r#"{"vl_single_eye": "single", "vl_laterality": "right"}"#]);
        let result = parser
            .parse("prompt", "one eye, the right one", Some("vl_single_eye"), Some("turn_004"))
            .await;
        assert_eq!(result.outcome, ParseOutcome::Success);
        assert_eq!(result.fields.len(), 2);
    }

    #[tokio::test]
    async fn empty_object_is_unclear_with_raw_output_kept() {
        let parser = parser(&["{}"]);
        let result = parser.parse("prompt", "I don't know", Some("vl_degree"), None).await;
        assert_eq!(result.outcome, ParseOutcome::Unclear);
        assert!(result.fields.is_empty());
        assert_eq!(result.parse_metadata.raw_llm_output.as_deref(), Some("{}"));
    }

    #[tokio::test]
    async fn invalid_json_is_extraction_failed() {
        let parser = parser(&["the patient has vision loss"]);
        let result = parser.parse("prompt", "x", Some("vl_present"), None).await;
        assert_eq!(result.outcome, ParseOutcome::ExtractionFailed);
        assert_eq!(result.parse_metadata.error_type.as_deref(), Some("json_decode"));
    }

    #[tokio::test]
    async fn non_object_json_is_extraction_failed() {
        let parser = parser(&["[1, 2, 3]"]);
        let result = parser.parse("prompt", "x", None, None).await;
        assert_eq!(result.outcome, ParseOutcome::ExtractionFailed);
        assert_eq!(result.parse_metadata.error_type.as_deref(), Some("json_shape"));
    }

    #[tokio::test]
    async fn model_failure_is_generation_failed() {
        let parser = ResponseParser::new(Arc::new(ScriptedClient::failing()));
        let result = parser.parse("prompt", "x", Some("vl_present"), None).await;
        assert_eq!(result.outcome, ParseOutcome::GenerationFailed);
        assert!(result.parse_metadata.error_message.is_some());
        assert!(result.parse_metadata.raw_llm_output.is_none());
    }

    #[tokio::test]
    async fn boolean_strings_normalize_with_audit_trail() {
        let parser = parser(&[r#"{"vl_present": "Yes", "h_present": "n"}"#]);
        let result = parser.parse("prompt", "x", Some("vl_present"), None).await;

        assert_eq!(result.fields["vl_present"].value, json!(true));
        assert_eq!(result.fields["h_present"].value, json!(false));
        let records = &result.parse_metadata.normalization_applied;
        assert_eq!(records.len(), 2);
        assert!(records.iter().all(|record| record.normalization_type == "boolean"));
    }

    #[tokio::test]
    async fn non_boolean_strings_pass_through_untouched() {
        let parser = parser(&[r#"{"vl_degree": "partial"}"#]);
        let result = parser.parse("prompt", "x", Some("vl_degree"), None).await;
        assert_eq!(result.fields["vl_degree"].value, json!("partial"));
        assert!(result.parse_metadata.normalization_applied.is_empty());
    }

    #[tokio::test]
    async fn underscore_keys_are_dropped() {
        let parser = parser(&[r#"{"_reasoning": "...", "vl_present": true}"#]);
        let result = parser.parse("prompt", "x", Some("vl_present"), None).await;
        assert_eq!(result.outcome, ParseOutcome::Success);
        assert_eq!(result.fields.len(), 1);
    }

    #[tokio::test]
    async fn null_expected_field_with_others_is_partial() {
        let parser = parser(&[r#"{"vl_laterality": null, "vl_degree": "total"}"#]);
        let result = parser.parse("prompt", "x", Some("vl_laterality"), None).await;
        assert_eq!(result.outcome, ParseOutcome::PartialSuccess);
    }
}
