//! Stateless question selection for multi-episode consultations.
//!
//! The selector owns a validated, frozen ruleset and derives every decision
//! from the episode view handed to it: same input, same output.  Obtained
//! data is the skip predicate — a question whose primary field has been
//! captured (asked or volunteered) is never asked.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::path::Path;

use anyhow::Result;
use tracing::{error, warn};

use iris_core::{EpisodeView, QuestionDescriptor, QuestionKind};

use crate::dsl;
use crate::ruleset::Ruleset;

pub struct QuestionSelector {
    ruleset: Ruleset,
    /// `question_id → primary field` (1:1).
    question_to_field: HashMap<String, String>,
    /// `field → question ids` (1:many); used for multi-field satisfaction.
    field_to_questions: BTreeMap<String, BTreeSet<String>>,
}

impl QuestionSelector {
    /// Build a selector over an already-parsed ruleset.  Validation happens
    /// here so a selector can only exist over a well-formed ruleset.
    pub fn new(ruleset: Ruleset) -> Result<Self> {
        ruleset.validate()?;

        let mut question_to_field = HashMap::new();
        let mut field_to_questions: BTreeMap<String, BTreeSet<String>> = BTreeMap::new();
        for question in ruleset.all_questions() {
            question_to_field.insert(question.id.clone(), question.field.clone());
            field_to_questions
                .entry(question.field.clone())
                .or_default()
                .insert(question.id.clone());
        }

        Ok(Self { ruleset, question_to_field, field_to_questions })
    }

    pub fn from_path(path: impl AsRef<Path>) -> Result<Self> {
        Self::new(Ruleset::load(path)?)
    }

    /// Next question for the episode, or `None` when the protocol is
    /// exhausted.  Pending follow-up blocks take priority over sections.
    pub fn next_question(&self, episode: &EpisodeView) -> Option<QuestionDescriptor> {
        for block_id in episode.pending_blocks() {
            if let Some(question) = self.next_block_question(block_id, episode) {
                return Some(question.clone());
            }
        }

        for section in &self.ruleset.section_order {
            let questions = match self.ruleset.sections.get(section) {
                Some(questions) => questions,
                None => continue,
            };
            for question in questions {
                if episode.questions_satisfied.contains(&question.id) {
                    continue;
                }
                if self.is_eligible(question, episode) {
                    return Some(question.clone());
                }
            }
        }

        None
    }

    /// The next `n` questions after `current_id` within the same id-prefix
    /// group, ordered by numeric suffix, eligibility ignored.
    ///
    /// Used to widen extraction prompts so data volunteered ahead of
    /// sequence is captured.  Never wraps into another prefix group.
    pub fn next_window(&self, current_id: &str, n: usize) -> Vec<QuestionDescriptor> {
        if n == 0 {
            return Vec::new();
        }

        let Some((prefix, current_num)) = split_question_id(current_id) else {
            warn!(question_id = current_id, "question id has no numeric suffix");
            return Vec::new();
        };

        let mut group: Vec<(u32, &QuestionDescriptor)> = self
            .ruleset
            .all_questions()
            .filter_map(|question| {
                let (q_prefix, q_num) = split_question_id(&question.id)?;
                (q_prefix == prefix).then_some((q_num, question))
            })
            .collect();
        group.sort_by_key(|(num, _)| *num);

        group
            .into_iter()
            .filter(|(num, _)| *num > current_num)
            .take(n)
            .map(|(_, question)| question.clone())
            .collect()
    }

    /// Every block whose trigger condition currently holds.  Returns all
    /// matches, not just new ones — idempotency is the caller's concern.
    pub fn check_triggers(&self, episode: &EpisodeView) -> BTreeSet<String> {
        let mut activated = BTreeSet::new();
        for (name, trigger) in &self.ruleset.trigger_conditions {
            if self.evaluate_expr(&trigger.condition, episode, name) {
                for block_id in trigger.activates.block_ids() {
                    activated.insert(block_id.to_string());
                }
            }
        }
        activated
    }

    /// A block is complete when every question in it is answered or
    /// currently ineligible.  Ineligible counts as implicitly skipped, and a
    /// completed block never reopens if eligibility later changes.
    pub fn is_block_complete(&self, block_id: &str, episode: &EpisodeView) -> bool {
        let Some(block) = self.ruleset.follow_up_blocks.get(block_id) else {
            warn!(block_id, "unknown block treated as complete");
            return true;
        };

        block.questions.iter().all(|question| {
            episode.questions_answered.contains(&question.id)
                || !self.is_eligible(question, episode)
        })
    }

    /// Questions of a named section, in protocol order.  Empty for unknown
    /// sections.
    pub fn section(&self, name: &str) -> &[QuestionDescriptor] {
        self.ruleset.sections.get(name).map(Vec::as_slice).unwrap_or(&[])
    }

    /// Every question in the ruleset, sections first then blocks.
    pub fn questions(&self) -> impl Iterator<Item = &QuestionDescriptor> {
        self.ruleset.all_questions()
    }

    pub fn primary_field(&self, question_id: &str) -> Option<&str> {
        self.question_to_field.get(question_id).map(String::as_str)
    }

    pub fn questions_for_field(&self, field: &str) -> Option<&BTreeSet<String>> {
        self.field_to_questions.get(field)
    }

    fn next_block_question<'a>(
        &'a self,
        block_id: &str,
        episode: &EpisodeView,
    ) -> Option<&'a QuestionDescriptor> {
        let block = self.ruleset.follow_up_blocks.get(block_id)?;
        block.questions.iter().find(|question| {
            !episode.questions_satisfied.contains(&question.id)
                && self.is_eligible(question, episode)
        })
    }

    fn is_eligible(&self, question: &QuestionDescriptor, episode: &EpisodeView) -> bool {
        match question.kind {
            QuestionKind::Probe => true,
            QuestionKind::Conditional => {
                let Some(name) = question.condition.as_deref() else {
                    // Load validation guarantees a name; treat as ineligible.
                    return false;
                };
                let Some(expr) = self.ruleset.conditions.get(name) else {
                    warn!(condition = name, "unknown condition");
                    return false;
                };
                self.evaluate_expr(expr, episode, name)
            }
        }
    }

    fn evaluate_expr(&self, expr: &serde_json::Value, episode: &EpisodeView, name: &str) -> bool {
        match dsl::evaluate(expr, &episode.fields) {
            Ok(result) => result,
            Err(err) => {
                // Unreachable after load validation; never take down a
                // live consultation over it.
                error!(condition = name, %err, "DSL evaluation failed");
                false
            }
        }
    }
}

/// Split `vl_5` into `("vl", 5)`; multi-part prefixes keep everything before
/// the numeric tail.
fn split_question_id(id: &str) -> Option<(&str, u32)> {
    let (prefix, tail) = id.rsplit_once('_')?;
    let num = tail.parse::<u32>().ok()?;
    Some((prefix, num))
}
