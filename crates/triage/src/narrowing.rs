//! Narrowing (coercion) prompts for detected episode ambiguity.
//!
//! When the safety assessor blocks a commit, the conversation is steered
//! back to the current problem with exactly one literal string per status.
//! No templates, no randomization.  The strings acknowledge, state what was
//! detected, and assert the constraint — they never ask the patient to
//! resolve the ambiguity, never use the word "episode", and never invite a
//! freeform explanation.

use anyhow::{bail, Result};

use crate::safety::EpisodeSafetyStatus;

const MULTIPLE_PROMPT: &str = "Thank you — it sounds like your last answer may have mentioned \
more than one problem.\nTo avoid mixing things up, I'm going to focus on the current problem \
for now.";

const PIVOT_PROMPT: &str = "Thank you — it sounds like your last answer may have mentioned a \
different problem.\nTo avoid mixing things up, I'm going to focus on the current problem for \
now.";

/// The coercion text for a non-safe status.  Calling this with
/// `SafeToExtract` is a caller error and fails accordingly.
pub fn narrowing_prompt(status: EpisodeSafetyStatus) -> Result<&'static str> {
    match status {
        EpisodeSafetyStatus::AmbiguousMultiple => Ok(MULTIPLE_PROMPT),
        EpisodeSafetyStatus::AmbiguousPivot => Ok(PIVOT_PROMPT),
        EpisodeSafetyStatus::SafeToExtract => {
            bail!("narrowing_prompt called with SAFE_TO_EXTRACT - caller error")
        }
    }
}

#[cfg(test)]
mod tests {
    use crate::safety::EpisodeSafetyStatus;

    use super::narrowing_prompt;

    #[test]
    fn each_ambiguous_status_has_exactly_one_literal() {
        let multiple = narrowing_prompt(EpisodeSafetyStatus::AmbiguousMultiple).unwrap();
        let pivot = narrowing_prompt(EpisodeSafetyStatus::AmbiguousPivot).unwrap();
        assert_ne!(multiple, pivot);
        assert!(multiple.contains("more than one problem"));
        assert!(pivot.contains("a different problem"));
    }

    #[test]
    fn prompts_never_mention_episodes_or_ask_for_resolution() {
        for status in [
            EpisodeSafetyStatus::AmbiguousMultiple,
            EpisodeSafetyStatus::AmbiguousPivot,
        ] {
            let text = narrowing_prompt(status).unwrap().to_lowercase();
            assert!(!text.contains("episode"));
            assert!(!text.contains('?'));
        }
    }

    #[test]
    fn safe_status_is_a_caller_error() {
        assert!(narrowing_prompt(EpisodeSafetyStatus::SafeToExtract).is_err());
    }
}
