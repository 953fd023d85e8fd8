//! Compiled extraction intent.
//!
//! A [`PromptSpec`] is a contract object, not a convenience bag: it is built
//! through fail-fast constructors so a spec that exists can always be
//! rendered into prompt text.

use std::collections::BTreeMap;

use anyhow::{bail, Result};

use iris_core::{FieldType, QuestionDescriptor};

/// Extraction mode.  Only `Primary` renders today; the other two reserve
/// authority for the clarification replay pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PromptMode {
    Primary,
    Replay,
    ClarificationExit,
}

/// Episode context anchor.  Reserved: will scope replay extraction to a
/// resolved episode.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct EpisodeAnchor {
    pub episode_id: Option<String>,
    pub resolution_status: Option<String>,
}

/// Complete specification of one extractable field.
#[derive(Debug, Clone, PartialEq)]
pub struct FieldSpec {
    /// Used verbatim as the JSON output key.
    pub field_id: String,
    /// Semantic meaning, e.g. "visual loss onset speed".
    pub label: String,
    pub description: String,
    pub field_type: FieldType,
    pub valid_values: Option<Vec<String>>,
    pub definitions: Option<BTreeMap<String, String>>,
}

impl FieldSpec {
    pub fn new(
        field_id: impl Into<String>,
        label: impl Into<String>,
        description: impl Into<String>,
        field_type: FieldType,
        valid_values: Option<Vec<String>>,
        definitions: Option<BTreeMap<String, String>>,
    ) -> Result<Self> {
        let spec = Self {
            field_id: field_id.into(),
            label: label.into(),
            description: description.into(),
            field_type,
            valid_values,
            definitions,
        };

        if spec.field_id.trim().is_empty() {
            bail!("field_id must be non-empty");
        }
        if spec.label.trim().is_empty() {
            bail!("field_label missing or empty for field '{}'", spec.field_id);
        }
        if spec.description.trim().is_empty() {
            bail!("field_description missing or empty for field '{}'", spec.field_id);
        }
        if spec.field_type == FieldType::Categorical
            && spec.valid_values.as_ref().map_or(true, Vec::is_empty)
        {
            bail!("categorical field '{}' missing valid_values", spec.field_id);
        }
        if let (Some(definitions), Some(valid_values)) = (&spec.definitions, &spec.valid_values) {
            let missing: Vec<&str> = valid_values
                .iter()
                .filter(|value| !definitions.contains_key(*value))
                .map(String::as_str)
                .collect();
            if !missing.is_empty() {
                bail!(
                    "field '{}' definitions incomplete; missing: {}",
                    spec.field_id,
                    missing.join(", ")
                );
            }
        }

        Ok(spec)
    }

    /// Compile a question descriptor into a field spec.  Questions without
    /// prompt metadata (label + description) cannot be compiled.
    pub fn from_question(question: &QuestionDescriptor) -> Result<Self> {
        let label = question
            .field_label
            .clone()
            .filter(|label| !label.trim().is_empty());
        let description = question
            .field_description
            .clone()
            .filter(|description| !description.trim().is_empty());
        let (Some(label), Some(description)) = (label, description) else {
            bail!(
                "question '{}' lacks field_label/field_description for prompting",
                question.id
            );
        };

        Self::new(
            question.field.clone(),
            label,
            description,
            question.field_type,
            question.valid_values.clone(),
            question.definitions.clone(),
        )
    }
}

/// Complete specification for one prompt build.
#[derive(Debug, Clone)]
pub struct PromptSpec {
    pub mode: PromptMode,
    pub primary_field: FieldSpec,
    /// Question the patient was actually asked.
    pub question_text: String,
    /// Lookahead window: fields the model may also extract when clearly
    /// mentioned.
    pub additional_fields: Vec<FieldSpec>,
    pub episode_anchor: Option<EpisodeAnchor>,
}

impl PromptSpec {
    pub fn primary(
        primary_field: FieldSpec,
        question_text: impl Into<String>,
        additional_fields: Vec<FieldSpec>,
    ) -> Result<Self> {
        let question_text = question_text.into();
        if question_text.trim().is_empty() {
            bail!("question_text must be non-empty");
        }
        Ok(Self {
            mode: PromptMode::Primary,
            primary_field,
            question_text,
            additional_fields,
            episode_anchor: None,
        })
    }
}
