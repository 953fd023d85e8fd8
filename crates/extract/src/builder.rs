//! Deterministic prompt assembly from a compiled [`PromptSpec`].
//!
//! Pure function: spec + patient response in, prompt text out.  Section
//! order is fixed — role, primary field, additional context, quoted patient
//! response, output directive — so identical inputs always produce identical
//! prompts.

use anyhow::{bail, Result};

use iris_core::FieldType;

use crate::spec::{FieldSpec, PromptMode, PromptSpec};

/// Render `spec` against the patient's response.
pub fn build_prompt(spec: &PromptSpec, patient_response: &str) -> Result<String> {
    match spec.mode {
        PromptMode::Primary => Ok(build_primary(spec, patient_response)),
        PromptMode::Replay => bail!("REPLAY prompt mode is not implemented"),
        PromptMode::ClarificationExit => {
            bail!("CLARIFICATION_EXIT prompt mode is not implemented")
        }
    }
}

fn build_primary(spec: &PromptSpec, patient_response: &str) -> String {
    let primary = &spec.primary_field;
    let mut prompt = String::new();

    prompt.push_str("You are a medical data extractor for ophthalmology consultations.\n\n");

    prompt.push_str("PRIMARY FIELD\n");
    prompt.push_str(&format!("Field ID: {}\n", primary.field_id));
    prompt.push_str(&format!("Meaning: {}\n", primary.label));
    prompt.push_str(&format!("Description: {}\n", primary.description));
    prompt.push_str(&format!("Type: {}\n", primary.field_type.as_str()));
    if primary.field_type == FieldType::Categorical {
        prompt.push_str("Valid values:\n");
        for value in primary.valid_values.as_deref().unwrap_or(&[]) {
            match primary.definitions.as_ref().and_then(|defs| defs.get(value)) {
                Some(definition) => {
                    prompt.push_str(&format!("  - {value} ({definition})\n"));
                }
                None => prompt.push_str(&format!("  - {value}\n")),
            }
        }
    }

    if !spec.additional_fields.is_empty() {
        prompt.push_str(
            "\nADDITIONAL CONTEXT - You may also extract these fields if clearly mentioned:\n",
        );
        for field in &spec.additional_fields {
            push_additional_field(&mut prompt, field);
        }
    }

    prompt.push_str(&format!("\nQuestion asked: \"{}\"\n", spec.question_text));
    prompt.push_str(&format!("Patient response: \"{patient_response}\"\n\n"));

    prompt.push_str("Extract any relevant fields from the patient's response.\n");
    prompt.push_str("Return ONLY valid JSON using the Field ID as the key:\n");
    prompt.push_str("{\n");
    prompt.push_str(&format!("  \"{}\": \"value\",\n", primary.field_id));
    prompt.push_str("  \"other_field_id\": \"value\"\n");
    prompt.push_str("}\n\n");

    prompt.push_str("Rules:\n");
    prompt.push_str(&format!("- PRIMARY focus on {}\n", primary.field_id));
    prompt.push_str("- You MAY extract additional fields if clearly mentioned\n");
    prompt.push_str(
        "- If the patient response does not clearly contain extractable information for the \
         listed fields, return {}\n",
    );
    prompt.push_str("- Do not guess. Do not infer.\n");
    prompt.push_str("- Use exact Field IDs as JSON keys\n");
    prompt.push_str("- For categorical fields, use exact valid values\n");
    prompt.push_str("- For boolean fields, use true or false (lowercase, no quotes)\n");

    prompt
}

fn push_additional_field(prompt: &mut String, field: &FieldSpec) {
    prompt.push_str(&format!("  - Field ID: {}\n", field.field_id));
    prompt.push_str(&format!("    Meaning: {}\n", field.label));
    prompt.push_str(&format!("    Type: {}\n", field.field_type.as_str()));
    if field.field_type == FieldType::Categorical {
        let values = field.valid_values.as_deref().unwrap_or(&[]).join(", ");
        prompt.push_str(&format!("    Valid values: {values}\n"));
    }
    prompt.push('\n');
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;

    use iris_core::FieldType;

    use crate::spec::{FieldSpec, PromptSpec};

    use super::build_prompt;

    fn onset_field() -> FieldSpec {
        FieldSpec::new(
            "vl_onset_speed",
            "visual loss onset speed",
            "how quickly the visual loss developed",
            FieldType::Categorical,
            Some(vec!["acute".into(), "subacute".into(), "chronic".into()]),
            Some(BTreeMap::from([
                ("acute".to_string(), "seconds to minutes".to_string()),
                ("subacute".to_string(), "hours to days".to_string()),
                ("chronic".to_string(), "weeks or longer".to_string()),
            ])),
        )
        .unwrap()
    }

    #[test]
    fn primary_prompt_renders_sections_in_fixed_order() {
        let spec = PromptSpec::primary(onset_field(), "How quickly did it come on?", vec![])
            .unwrap();
        let prompt = build_prompt(&spec, "it happened over a couple of days").unwrap();

        let primary_at = prompt.find("PRIMARY FIELD").unwrap();
        let response_at = prompt.find("Patient response:").unwrap();
        let rules_at = prompt.find("Rules:").unwrap();
        assert!(primary_at < response_at && response_at < rules_at);

        assert!(prompt.contains("  - subacute (hours to days)"));
        assert!(prompt.contains("- For boolean fields, use true or false (lowercase, no quotes)"));
        assert!(!prompt.contains("ADDITIONAL CONTEXT"));
    }

    #[test]
    fn additional_fields_render_with_ids_and_values() {
        let laterality = FieldSpec::new(
            "vl_laterality",
            "affected eye",
            "which eye lost vision",
            FieldType::Categorical,
            Some(vec!["right".into(), "left".into()]),
            None,
        )
        .unwrap();
        let spec = PromptSpec::primary(
            onset_field(),
            "How quickly did it come on?",
            vec![laterality],
        )
        .unwrap();

        let prompt = build_prompt(&spec, "suddenly, in my right eye").unwrap();
        assert!(prompt.contains("ADDITIONAL CONTEXT"));
        assert!(prompt.contains("  - Field ID: vl_laterality"));
        assert!(prompt.contains("    Valid values: right, left"));
    }

    #[test]
    fn identical_inputs_produce_identical_prompts() {
        let spec = PromptSpec::primary(onset_field(), "How quickly?", vec![]).unwrap();
        assert_eq!(
            build_prompt(&spec, "slowly").unwrap(),
            build_prompt(&spec, "slowly").unwrap()
        );
    }

    #[test]
    fn reserved_modes_refuse_to_render() {
        let mut spec = PromptSpec::primary(onset_field(), "How quickly?", vec![]).unwrap();
        spec.mode = crate::spec::PromptMode::Replay;
        assert!(build_prompt(&spec, "x").is_err());
    }
}
