//! Ruleset file format and load-time validation.
//!
//! The ruleset is loaded once, owned outright, and treated as immutable for
//! the lifetime of the process.  Everything that can be wrong with it is a
//! deployment bug, so validation is exhaustive and fatal at startup.

use std::collections::{BTreeMap, BTreeSet};
use std::path::Path;

use anyhow::{bail, Context, Result};
use serde::Deserialize;
use tracing::info;

use iris_core::{QuestionDescriptor, QuestionKind};

use crate::dsl;

/// Block ids activated by a trigger — a single id or a list.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum Activation {
    One(String),
    Many(Vec<String>),
}

impl Activation {
    pub fn block_ids(&self) -> Vec<&str> {
        match self {
            Self::One(id) => vec![id.as_str()],
            Self::Many(ids) => ids.iter().map(String::as_str).collect(),
        }
    }
}

/// A trigger: when `condition` holds for an episode, the named follow-up
/// blocks become active.
#[derive(Debug, Clone, Deserialize)]
pub struct Trigger {
    pub condition: serde_json::Value,
    pub activates: Activation,
}

/// A named group of protocol questions activated by a trigger.
#[derive(Debug, Clone, Deserialize)]
pub struct FollowUpBlock {
    pub questions: Vec<QuestionDescriptor>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Ruleset {
    pub section_order: Vec<String>,
    pub sections: BTreeMap<String, Vec<QuestionDescriptor>>,
    #[serde(default)]
    pub conditions: BTreeMap<String, serde_json::Value>,
    #[serde(default)]
    pub trigger_conditions: BTreeMap<String, Trigger>,
    #[serde(default)]
    pub follow_up_blocks: BTreeMap<String, FollowUpBlock>,
}

impl Ruleset {
    /// Load and validate a ruleset file.  Any validation failure is fatal.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("ruleset not found: {}", path.display()))?;
        let ruleset: Self = serde_json::from_str(&raw)
            .with_context(|| format!("ruleset is not valid JSON: {}", path.display()))?;
        ruleset.validate()?;
        info!(
            sections = ruleset.section_order.len(),
            blocks = ruleset.follow_up_blocks.len(),
            "ruleset loaded"
        );
        Ok(ruleset)
    }

    /// Validate structure and cross-references, collecting every problem
    /// before failing so a broken ruleset is fixable in one pass.
    pub fn validate(&self) -> Result<()> {
        let mut errors = Vec::new();

        if self.section_order.is_empty() {
            errors.push("missing or empty 'section_order'".to_string());
        }
        for section in &self.section_order {
            if !self.sections.contains_key(section) {
                errors.push(format!(
                    "section '{section}' listed in section_order but not defined"
                ));
            }
        }

        let mut seen_ids = BTreeSet::new();
        for (section, questions) in &self.sections {
            for question in questions {
                self.validate_question(question, &format!("section '{section}'"), &mut errors);
                if !seen_ids.insert(question.id.clone()) {
                    errors.push(format!("duplicate question id '{}'", question.id));
                }
            }
        }

        for (block_id, block) in &self.follow_up_blocks {
            if block.questions.is_empty() {
                errors.push(format!("block '{block_id}' has an empty question list"));
                continue;
            }
            for question in &block.questions {
                self.validate_question(question, &format!("block '{block_id}'"), &mut errors);
                if !seen_ids.insert(question.id.clone()) {
                    errors.push(format!("duplicate question id '{}'", question.id));
                }
            }
        }

        for (name, expr) in &self.conditions {
            if let Err(err) = dsl::validate_expr(expr) {
                errors.push(format!("condition '{name}': {err}"));
            }
        }

        for (name, trigger) in &self.trigger_conditions {
            if let Err(err) = dsl::validate_expr(&trigger.condition) {
                errors.push(format!("trigger '{name}': {err}"));
            }
            for block_id in trigger.activates.block_ids() {
                if !self.follow_up_blocks.contains_key(block_id) {
                    errors.push(format!(
                        "trigger '{name}' activates undefined block '{block_id}'"
                    ));
                }
            }
        }

        if !errors.is_empty() {
            bail!("ruleset validation failed:\n  - {}", errors.join("\n  - "));
        }
        Ok(())
    }

    fn validate_question(
        &self,
        question: &QuestionDescriptor,
        location: &str,
        errors: &mut Vec<String>,
    ) {
        if question.id.trim().is_empty() {
            errors.push(format!("question in {location} has an empty id"));
        }
        if question.question.trim().is_empty() {
            errors.push(format!("question '{}' in {location} has no text", question.id));
        }
        if question.field.trim().is_empty() {
            errors.push(format!("question '{}' in {location} has no field", question.id));
        }

        match question.kind {
            QuestionKind::Probe => {}
            QuestionKind::Conditional => match &question.condition {
                None => errors.push(format!(
                    "question '{}' in {location} is conditional but names no condition",
                    question.id
                )),
                Some(name) if !self.conditions.contains_key(name) => errors.push(format!(
                    "question '{}' in {location} references undefined condition '{name}'",
                    question.id
                )),
                Some(_) => {}
            },
        }
    }

    /// All questions in definition order: sections first (per
    /// `section_order`), then follow-up blocks.
    pub fn all_questions(&self) -> impl Iterator<Item = &QuestionDescriptor> {
        self.section_order
            .iter()
            .filter_map(|section| self.sections.get(section))
            .flatten()
            .chain(self.follow_up_blocks.values().flat_map(|block| &block.questions))
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::Ruleset;

    fn parse(value: serde_json::Value) -> Ruleset {
        serde_json::from_value(value).unwrap()
    }

    fn minimal() -> serde_json::Value {
        json!({
            "section_order": ["intro"],
            "sections": {
                "intro": [
                    {"id": "vl_1", "question": "Any vision loss?", "field": "vl_present",
                     "field_type": "boolean", "type": "probe"}
                ]
            }
        })
    }

    #[test]
    fn minimal_ruleset_validates() {
        parse(minimal()).validate().unwrap();
    }

    #[test]
    fn undefined_section_in_order_is_rejected() {
        let mut raw = minimal();
        raw["section_order"] = json!(["intro", "missing"]);
        let err = parse(raw).validate().unwrap_err().to_string();
        assert!(err.contains("missing"));
    }

    #[test]
    fn duplicate_question_ids_are_rejected() {
        let mut raw = minimal();
        raw["sections"]["intro"] = json!([
            {"id": "vl_1", "question": "a", "field": "f1", "type": "probe"},
            {"id": "vl_1", "question": "b", "field": "f2", "type": "probe"},
        ]);
        let err = parse(raw).validate().unwrap_err().to_string();
        assert!(err.contains("duplicate question id 'vl_1'"));
    }

    #[test]
    fn conditional_without_defined_condition_is_rejected() {
        let mut raw = minimal();
        raw["sections"]["intro"] = json!([
            {"id": "vl_2", "question": "q", "field": "f", "type": "conditional",
             "condition": "never_defined"},
        ]);
        let err = parse(raw).validate().unwrap_err().to_string();
        assert!(err.contains("undefined condition 'never_defined'"));
    }

    #[test]
    fn trigger_to_undefined_block_is_rejected() {
        let mut raw = minimal();
        raw["trigger_conditions"] = json!({
            "t1": {"condition": {"is_true": "vl_present"}, "activates": "block_9"}
        });
        let err = parse(raw).validate().unwrap_err().to_string();
        assert!(err.contains("undefined block 'block_9'"));
    }

    #[test]
    fn empty_block_is_rejected() {
        let mut raw = minimal();
        raw["follow_up_blocks"] = json!({"block_1": {"questions": []}});
        let err = parse(raw).validate().unwrap_err().to_string();
        assert!(err.contains("empty question list"));
    }

    #[test]
    fn bad_dsl_operator_in_condition_is_rejected() {
        let mut raw = minimal();
        raw["conditions"] = json!({"c1": {"regex": ["f", ".*"]}});
        let err = parse(raw).validate().unwrap_err().to_string();
        assert!(err.contains("unknown DSL operator"));
    }
}
