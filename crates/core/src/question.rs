use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// Value shape a question's field takes.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FieldType {
    #[default]
    Text,
    Categorical,
    Boolean,
}

impl FieldType {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Text => "text",
            Self::Categorical => "categorical",
            Self::Boolean => "boolean",
        }
    }
}

/// Scheduling class of a question within the protocol.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum QuestionKind {
    /// Always eligible.
    #[default]
    Probe,
    /// Eligible only while its named condition holds.
    Conditional,
}

/// Immutable question representation handed out by the question selector.
///
/// This is the complete specification for one question — everything the
/// prompt builder needs is carried here so downstream consumers never reach
/// back into the ruleset.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QuestionDescriptor {
    pub id: String,
    pub question: String,
    pub field: String,
    #[serde(default)]
    pub field_type: FieldType,
    #[serde(default, rename = "type")]
    pub kind: QuestionKind,
    /// Name of the ruleset condition gating a conditional question.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub condition: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub valid_values: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub field_label: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub field_description: Option<String>,
    /// Per-value definitions for categorical fields.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub definitions: Option<BTreeMap<String, String>>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn deserializes_minimal_question_with_defaults() {
        let question: QuestionDescriptor = serde_json::from_value(serde_json::json!({
            "id": "vl_1",
            "question": "Have you lost vision?",
            "field": "vl_present",
        }))
        .unwrap();

        assert_eq!(question.field_type, FieldType::Text);
        assert_eq!(question.kind, QuestionKind::Probe);
        assert!(question.condition.is_none());
    }

    #[test]
    fn serializes_type_under_its_wire_name() {
        let question = QuestionDescriptor {
            id: "h_2".into(),
            question: "How severe is the headache?".into(),
            field: "h_severity".into(),
            field_type: FieldType::Categorical,
            kind: QuestionKind::Conditional,
            condition: Some("headache_present".into()),
            valid_values: Some(vec!["mild".into(), "severe".into()]),
            field_label: None,
            field_description: None,
            definitions: None,
        };

        let value = serde_json::to_value(&question).unwrap();
        assert_eq!(value["type"], "conditional");
        assert_eq!(value["field_type"], "categorical");
    }
}
